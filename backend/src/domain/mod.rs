//! Domain primitives, policies, and services.
//!
//! Purpose: hold the credit-metered pin workflow free of transport and
//! storage concerns. Adapters reach the domain only through [`ports`].
//!
//! Public surface:
//! - [`PinOrchestrator`] admits, prices, and charges pin, extend, and
//!   add-file requests.
//! - [`UploadReconciler`] converges queued pin instructions into upload
//!   records.
//! - Value types ([`Credits`], [`Username`], [`ContentHash`], …) validate
//!   their invariants on construction.

pub mod account;
pub mod content;
pub mod credits;
pub mod error;
pub mod pin_message;
pub mod pin_orchestrator;
pub mod ports;
pub mod pricing;
pub mod reconciler;
pub mod retention;
pub mod saga;
pub mod upload;

pub use self::account::{AccountUsage, AccountValidationError, Tier, USERNAME_MAX, Username};
pub use self::content::{
    CONTENT_HASH_MAX, CONTENT_HASH_MIN, ContentHash, ContentValidationError, DEFAULT_NETWORK,
    NetworkName,
};
pub use self::credits::{Credits, CreditsError, MICROS_PER_CREDIT};
pub use self::error::{Error, ErrorCode, ErrorValidationError};
pub use self::pin_message::{PinMessageError, PinRequestMessage};
pub use self::pin_orchestrator::{
    AddFileRequest, DEFAULT_MAX_UPLOAD_BYTES, ExtendOutcome, ExtendRequest, PinOrchestrator,
    PinOrchestratorPorts, PinOutcome, PinPolicy, PinRejection, PinRequest, PinState,
};
pub use self::pricing::{BYTES_PER_GIB, CostCalculator, PriceTable, PricingError, Quote};
pub use self::reconciler::{DeliveryOutcome, ReconcilerConfig, ReconcilerSummary, UploadReconciler};
pub use self::retention::{
    DEFAULT_MAX_HOLD_MONTHS_PER_REQUEST, DEFAULT_MAX_LIFETIME_MONTHS, RetentionError,
    RetentionPolicy, deadline_after,
};
pub use self::saga::{Compensation, CompensationPolicy, CompensationPorts, CompensationReport, Saga};
pub use self::upload::{
    UnknownUploadKind, UploadClaim, UploadKind, UploadMergeError, UploadRecord, extend_record,
    merge_claim, merge_records, record_from_claim,
};
