//! Outbound adapters implementing domain ports.
//!
//! - **persistence**: Diesel repositories for accounts and upload records
//! - **queue**: the PostgreSQL-backed pin queue
//! - **storage**: the IPFS RPC content store
//!
//! Adapters translate between domain values and wire or row formats; they
//! hold no business rules.

pub mod persistence;
pub mod queue;
pub mod storage;
