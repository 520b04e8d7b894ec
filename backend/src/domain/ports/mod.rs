//! Domain ports and supporting types for the hexagonal boundary.

mod macros;
pub(crate) use macros::define_port_error;

mod content_store;
mod credit_ledger;
mod pin_queue;
mod upload_repository;
mod usage_meter;

#[cfg(test)]
pub use content_store::MockContentStore;
pub use content_store::{ContentStore, ContentStoreError, ObjectStat};
#[cfg(test)]
pub use credit_ledger::MockCreditLedger;
pub use credit_ledger::{CreditLedger, CreditLedgerError};
#[cfg(test)]
pub use pin_queue::MockPinPublisher;
pub use pin_queue::{DeliveryAcker, PinDelivery, PinPublisher, PinQueueError, PinSubscription};
pub use upload_repository::{
    OwnershipReservation, UploadMutation, UploadRepository, UploadRepositoryError,
};
#[cfg(test)]
pub use usage_meter::MockUsageMeter;
pub use usage_meter::{UsageMeter, UsageMeterError};
