//! Synchronous admission path for pin, extend, and add-file requests.
//!
//! Every request walks the same state machine:
//!
//! ```text
//! Received ─┬─> Deduplicated
//!           └─> Priced ─> Debited ─> UsageCommitted ─> Published
//! ```
//!
//! Rejections before the debit end in `UnrecoverableRejected`; rejections
//! after it unwind the [`Saga`] and end in `CompensatedRejected`. The debit
//! always happens before the irreversible external action so compensation only
//! ever undoes local ledger steps.

use std::sync::Arc;

use mockable::Clock;
use serde_json::json;
use tracing::{debug, info, warn};

use super::ports::{
    ContentStore, ContentStoreError, CreditLedger, CreditLedgerError, PinPublisher,
    UploadRepository, UploadRepositoryError, UsageMeter, UsageMeterError,
};
use super::{
    Compensation, CompensationPolicy, CompensationPorts, ContentHash, CostCalculator, Credits,
    Error, NetworkName, PinRequestMessage, PricingError, RetentionError, RetentionPolicy, Saga,
    UploadKind, UploadMergeError, UploadReconciler, Username,
};

mod flow;

/// Default ceiling on a single uploaded file.
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 1 << 30;

/// Position of a request in the admission state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinState {
    /// Request accepted for processing; nothing checked yet.
    Received,
    /// Terminal: the user already owns the content; nothing was charged.
    Deduplicated,
    /// Content size is known and the cost has been computed.
    Priced,
    /// Credits were taken from the balance.
    Debited,
    /// The monthly usage counter includes the content.
    UsageCommitted,
    /// Terminal: accepted; custody is confirmed asynchronously.
    Published,
    /// Terminal: rejected after the debit; the ledger was restored.
    CompensatedRejected,
    /// Terminal: rejected before any debit.
    UnrecoverableRejected,
}

impl PinState {
    /// Whether a debit has been taken in this state.
    pub const fn has_debited(self) -> bool {
        matches!(self, Self::Debited | Self::UsageCommitted)
    }

    /// Stable label used in logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Deduplicated => "deduplicated",
            Self::Priced => "priced",
            Self::Debited => "debited",
            Self::UsageCommitted => "usage_committed",
            Self::Published => "published",
            Self::CompensatedRejected => "compensated_rejected",
            Self::UnrecoverableRejected => "unrecoverable_rejected",
        }
    }
}

/// Limits applied at admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinPolicy {
    pub retention: RetentionPolicy,
    pub max_upload_bytes: u64,
}

impl Default for PinPolicy {
    fn default() -> Self {
        Self {
            retention: RetentionPolicy::default(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

/// Request to pin content that already exists on the storage network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinRequest {
    pub username: Username,
    pub hash: ContentHash,
    pub network: NetworkName,
    pub hold_months: u32,
}

/// Request to push an existing record's deadline out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendRequest {
    pub username: Username,
    pub hash: ContentHash,
    pub network: NetworkName,
    pub months: u32,
}

/// Request to upload and pin new content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddFileRequest {
    pub username: Username,
    pub network: NetworkName,
    pub bytes: Vec<u8>,
    pub hold_months: u32,
    pub encrypted: bool,
}

/// Successful result of a pin or add-file request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinOutcome {
    /// The user already custodies this content; no charge was made.
    AlreadyOwned { hash: ContentHash },
    /// The request was charged and handed to the queue.
    Published {
        hash: ContentHash,
        cost: Credits,
        size_bytes: u64,
    },
}

/// Successful result of an extend request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendOutcome {
    pub cost: Credits,
    pub gc_deadline: chrono::DateTime<chrono::Utc>,
}

/// A rejected request and the terminal state it ended in.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{error}")]
pub struct PinRejection {
    pub error: Error,
    pub state: PinState,
}

/// Ports the orchestrator drives.
#[derive(Clone)]
pub struct PinOrchestratorPorts {
    pub ledger: Arc<dyn CreditLedger>,
    pub usage: Arc<dyn UsageMeter>,
    pub uploads: Arc<dyn UploadRepository>,
    pub store: Arc<dyn ContentStore>,
    pub publisher: Arc<dyn PinPublisher>,
}

/// Credit-metered admission service.
pub struct PinOrchestrator {
    ports: PinOrchestratorPorts,
    reconciler: Arc<UploadReconciler>,
    calculator: CostCalculator,
    policy: PinPolicy,
    compensation: CompensationPolicy,
    clock: Arc<dyn Clock>,
}

impl PinOrchestrator {
    /// Build the orchestrator over its ports.
    ///
    /// `reconciler` writes extended deadlines synchronously; pins and file
    /// uploads only reach it through the queue.
    pub fn new(
        ports: PinOrchestratorPorts,
        reconciler: Arc<UploadReconciler>,
        calculator: CostCalculator,
        policy: PinPolicy,
        compensation: CompensationPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ports,
            reconciler,
            calculator,
            policy,
            compensation,
            clock,
        }
    }

    fn new_saga(&self) -> Saga {
        let ports = CompensationPorts {
            ledger: Arc::clone(&self.ports.ledger),
            usage: Arc::clone(&self.ports.usage),
            uploads: Arc::clone(&self.ports.uploads),
        };
        Saga::new(ports, self.compensation)
    }

    /// Admit a pin request for existing content.
    pub async fn pin(&self, request: PinRequest) -> Result<PinOutcome, PinRejection> {
        let mut run = Run::new(self.new_saga(), "pin", &request.username);
        match self.pin_steps(&request, &mut run).await {
            Ok(outcome) => Ok(run.succeed(outcome)),
            Err(error) => Err(run.reject(error).await),
        }
    }

    /// Extend the retention of content the caller already owns.
    pub async fn extend(&self, request: ExtendRequest) -> Result<ExtendOutcome, PinRejection> {
        let mut run = Run::new(self.new_saga(), "extend", &request.username);
        match self.extend_steps(&request, &mut run).await {
            Ok(outcome) => Ok(run.succeed(outcome)),
            Err(error) => Err(run.reject(error).await),
        }
    }

    /// Upload new content, then pin it.
    pub async fn add_file(&self, request: AddFileRequest) -> Result<PinOutcome, PinRejection> {
        let mut run = Run::new(self.new_saga(), "add_file", &request.username);
        match self.add_file_steps(&request, &mut run).await {
            Ok(outcome) => Ok(run.succeed(outcome)),
            Err(error) => Err(run.reject(error).await),
        }
    }
}

/// Mutable progress of one request: its state and the saga log.
struct Run {
    saga: Saga,
    state: PinState,
    call_type: &'static str,
    username: Username,
}

impl Run {
    fn new(saga: Saga, call_type: &'static str, username: &Username) -> Self {
        Self {
            saga,
            state: PinState::Received,
            call_type,
            username: username.clone(),
        }
    }

    fn advance(&mut self, next: PinState) {
        debug!(
            username = %self.username,
            call_type = self.call_type,
            from = self.state.as_str(),
            to = next.as_str(),
            "pin request transition"
        );
        self.state = next;
    }

    fn record(&mut self, step: Compensation) {
        self.saga.record(step);
    }

    fn succeed<T>(self, outcome: T) -> T {
        let Self {
            saga,
            state,
            call_type,
            username,
        } = self;
        info!(%username, call_type, state = state.as_str(), "pin request accepted");
        saga.commit();
        outcome
    }

    async fn reject(self, error: Error) -> PinRejection {
        let Self {
            saga,
            state,
            call_type,
            username,
        } = self;
        let terminal = if state.has_debited() {
            PinState::CompensatedRejected
        } else {
            PinState::UnrecoverableRejected
        };
        warn!(
            %username,
            call_type,
            reached = state.as_str(),
            terminal = terminal.as_str(),
            code = ?error.code(),
            error = %error,
            "pin request rejected"
        );
        let report = saga.compensate().await;
        if report.failed > 0 {
            warn!(%username, call_type, failed = report.failed, "rejection left unreversed steps");
        }
        PinRejection {
            error,
            state: terminal,
        }
    }
}

fn map_upload_error(error: &UploadRepositoryError) -> Error {
    match error {
        UploadRepositoryError::Rejected { reason } => map_merge_error(reason),
        other => Error::service_unavailable(format!("upload records unavailable: {other}")),
    }
}

fn map_merge_error(reason: &UploadMergeError) -> Error {
    match reason {
        UploadMergeError::NotFound => Error::upload_not_found("no upload found for this content"),
        UploadMergeError::Retention(retention) => map_retention_error(retention),
    }
}

fn map_retention_error(error: &RetentionError) -> Error {
    match error {
        RetentionError::InvalidHoldTime { requested, max } => Error::invalid_hold_time(format!(
            "hold time must be between 1 and {max} months"
        ))
        .with_details(json!({ "requested_months": requested, "max_months": max })),
        RetentionError::MaxRetentionExceeded { requested, limit } => {
            Error::max_retention_exceeded("retention would exceed the lifetime limit")
                .with_details(json!({
                    "requested_deadline": requested.to_rfc3339(),
                    "limit_deadline": limit.to_rfc3339(),
                }))
        }
        RetentionError::DeadlineOutOfRange => {
            Error::invalid_hold_time("retention deadline is out of range")
        }
    }
}

fn map_usage_error(error: &UsageMeterError) -> Error {
    match error {
        UsageMeterError::CapExceeded {
            used_bytes,
            limit_bytes,
            requested_bytes,
        } => Error::quota_exceeded("monthly data cap would be exceeded").with_details(json!({
            "used_bytes": used_bytes,
            "limit_bytes": limit_bytes,
            "requested_bytes": requested_bytes,
        })),
        UsageMeterError::PubSubCapExceeded {
            sent,
            limit,
            requested,
        } => Error::quota_exceeded("monthly pub/sub message cap would be exceeded").with_details(
            json!({ "sent": sent, "limit": limit, "requested": requested }),
        ),
        UsageMeterError::AccountNotFound { .. } => Error::forbidden("account not found"),
        other => Error::service_unavailable(format!("usage meter unavailable: {other}")),
    }
}

fn map_ledger_error(error: &CreditLedgerError) -> Error {
    match error {
        CreditLedgerError::InsufficientBalance { balance, requested } => {
            Error::insufficient_balance("insufficient credits for this request").with_details(
                json!({ "balance": balance, "requested": requested }),
            )
        }
        CreditLedgerError::AccountNotFound { .. } => Error::forbidden("account not found"),
        other => Error::service_unavailable(format!("credit ledger unavailable: {other}")),
    }
}

fn map_pricing_error(error: &PricingError) -> Error {
    match error {
        PricingError::InvalidDuration { requested, max } => {
            map_retention_error(&RetentionError::InvalidHoldTime {
                requested: *requested,
                max: *max,
            })
        }
        PricingError::SizeLookup(source) => map_stat_error(source),
        PricingError::Overflow => Error::cost_calculation_failed("cost exceeds the ledger range"),
    }
}

fn map_stat_error(error: &ContentStoreError) -> Error {
    Error::object_stat_failed(format!("failed to determine content size: {error}"))
}

/// Shape of the published fact for a charged request.
struct Publication<'a> {
    username: &'a Username,
    hash: &'a ContentHash,
    network: &'a NetworkName,
    hold_months: u32,
    size_bytes: u64,
    cost: Credits,
    kind: UploadKind,
    encrypted: bool,
}

impl PinOrchestrator {
    fn message(&self, publication: &Publication<'_>) -> PinRequestMessage {
        PinRequestMessage {
            content_hash: publication.hash.clone(),
            network: publication.network.clone(),
            username: publication.username.clone(),
            hold_months: publication.hold_months,
            size: Some(publication.size_bytes),
            cost: Some(publication.cost),
            created_at: Some(self.clock.utc()),
            kind: publication.kind,
            encrypted: publication.encrypted,
        }
    }
}

#[cfg(test)]
mod tests;
