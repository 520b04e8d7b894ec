//! Credit-metered pin orchestration and upload-record reconciliation.
//!
//! The domain lives in [`domain`]; [`outbound`] holds the PostgreSQL and IPFS
//! adapters and [`settings`] the layered configuration.

pub mod domain;
pub mod outbound;
pub mod settings;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use settings::PinLedgerSettings;
