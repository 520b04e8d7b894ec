//! Pin queue adapters.
//!
//! The queue lives in PostgreSQL next to the ledger so publishing needs no
//! extra infrastructure. Consumers claim rows with `FOR UPDATE SKIP LOCKED`
//! and hold a time-limited lease; a crashed consumer's lease simply expires
//! and the message is redelivered.

mod diesel_pin_queue;

pub use diesel_pin_queue::{DEFAULT_LEASE, DieselPinQueue};
