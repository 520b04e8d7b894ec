//! Debit-then-compensate saga.
//!
//! Each committed step of a pin request records its reverse operation. On
//! failure the recorded steps are unwound in reverse order on a detached task,
//! so a caller that disconnects mid-request cannot abandon a refund halfway.
//! Reverse operations are retried a bounded number of times; anything that
//! still fails is logged with enough context to fix by hand and is never
//! surfaced to the caller.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, warn};

use super::ports::{
    CreditLedger, CreditLedgerError, UploadRepository, UsageMeter, UsageMeterError,
};
use super::{ContentHash, Credits, NetworkName, Username};

/// Reverse operation for one committed step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compensation {
    /// Drop an ownership reservation.
    ReleaseOwnership {
        username: Username,
        hash: ContentHash,
        network: NetworkName,
    },
    /// Credit back a debit.
    RefundCredits { username: Username, amount: Credits },
    /// Roll back a usage increment.
    ReduceUsage { username: Username, bytes: u64 },
}

impl Compensation {
    /// Label used in remediation logs.
    pub const fn call_type(&self) -> &'static str {
        match self {
            Self::ReleaseOwnership { .. } => "release_ownership",
            Self::RefundCredits { .. } => "refund_credits",
            Self::ReduceUsage { .. } => "reduce_usage",
        }
    }

    fn username(&self) -> &Username {
        match self {
            Self::ReleaseOwnership { username, .. }
            | Self::RefundCredits { username, .. }
            | Self::ReduceUsage { username, .. } => username,
        }
    }

    fn amount(&self) -> String {
        match self {
            Self::ReleaseOwnership { hash, network, .. } => format!("{network}/{hash}"),
            Self::RefundCredits { amount, .. } => amount.to_string(),
            Self::ReduceUsage { bytes, .. } => format!("{bytes} bytes"),
        }
    }
}

/// Retry budget for reverse operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompensationPolicy {
    /// Attempts per reverse operation, including the first.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub retry_delay: Duration,
}

impl Default for CompensationPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_millis(100),
        }
    }
}

/// Ports reverse operations run against.
#[derive(Clone)]
pub struct CompensationPorts {
    pub ledger: Arc<dyn CreditLedger>,
    pub usage: Arc<dyn UsageMeter>,
    pub uploads: Arc<dyn UploadRepository>,
}

/// Tally of one unwind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompensationReport {
    pub applied: usize,
    pub failed: usize,
}

/// Why one reverse attempt failed.
enum ReverseError {
    /// Retrying cannot help.
    Permanent(String),
    Transient(String),
}

impl ReverseError {
    fn message(&self) -> &str {
        match self {
            Self::Permanent(message) | Self::Transient(message) => message,
        }
    }
}

impl From<CreditLedgerError> for ReverseError {
    fn from(err: CreditLedgerError) -> Self {
        match err {
            CreditLedgerError::AccountNotFound { .. } => Self::Permanent(err.to_string()),
            other => Self::Transient(other.to_string()),
        }
    }
}

impl From<UsageMeterError> for ReverseError {
    fn from(err: UsageMeterError) -> Self {
        match err {
            UsageMeterError::AccountNotFound { .. } => Self::Permanent(err.to_string()),
            other => Self::Transient(other.to_string()),
        }
    }
}

/// Ordered log of committed steps for one request.
///
/// Dropping a saga that still holds steps, for example because the request
/// future was cancelled mid-flight, unwinds them on a detached task. Only
/// [`Saga::commit`] discards recorded steps without undoing them.
pub struct Saga {
    ports: CompensationPorts,
    policy: CompensationPolicy,
    completed: Vec<Compensation>,
}

impl Saga {
    /// Start an empty log for one request.
    pub fn new(ports: CompensationPorts, policy: CompensationPolicy) -> Self {
        Self {
            ports,
            policy,
            completed: Vec::new(),
        }
    }

    /// Record that a step committed and how to undo it.
    pub fn record(&mut self, step: Compensation) {
        self.completed.push(step);
    }

    /// Steps recorded so far, oldest first.
    pub fn completed(&self) -> &[Compensation] {
        &self.completed
    }

    /// Finish successfully; nothing is undone.
    pub fn commit(mut self) {
        self.completed.clear();
    }

    /// Undo every recorded step, newest first.
    ///
    /// The unwind runs on its own task and completes even if the returned
    /// future is dropped.
    pub async fn compensate(mut self) -> CompensationReport {
        let completed = std::mem::take(&mut self.completed);
        if completed.is_empty() {
            return CompensationReport::default();
        }

        let pending = completed.len();
        let handle = tokio::spawn(unwind(self.ports.clone(), self.policy, completed));
        match handle.await {
            Ok(report) => report,
            Err(join_error) => {
                error!(error = %join_error, pending, "compensation task aborted");
                CompensationReport {
                    applied: 0,
                    failed: pending,
                }
            }
        }
    }
}

impl Drop for Saga {
    fn drop(&mut self) {
        let completed = std::mem::take(&mut self.completed);
        if completed.is_empty() {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                warn!(pending = completed.len(), "request abandoned; unwinding committed steps");
                drop(runtime.spawn(unwind(self.ports.clone(), self.policy, completed)));
            }
            Err(_) => {
                for step in &completed {
                    error!(
                        username = %step.username(),
                        call_type = step.call_type(),
                        amount = %step.amount(),
                        "no runtime to unwind abandoned step; manual remediation required"
                    );
                }
            }
        }
    }
}

async fn unwind(
    ports: CompensationPorts,
    policy: CompensationPolicy,
    completed: Vec<Compensation>,
) -> CompensationReport {
    let mut report = CompensationReport::default();
    for step in completed.into_iter().rev() {
        if apply_with_retry(&ports, policy, &step).await {
            report.applied += 1;
        } else {
            report.failed += 1;
        }
    }
    report
}

async fn apply_with_retry(
    ports: &CompensationPorts,
    policy: CompensationPolicy,
    step: &Compensation,
) -> bool {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let failure = match apply(ports, step).await {
            Ok(()) => return true,
            Err(err) => err,
        };

        let exhausted = attempt >= max_attempts || matches!(failure, ReverseError::Permanent(_));
        if exhausted {
            error!(
                username = %step.username(),
                call_type = step.call_type(),
                amount = %step.amount(),
                attempts = attempt,
                error = failure.message(),
                "compensation failed; manual remediation required"
            );
            return false;
        }

        warn!(
            username = %step.username(),
            call_type = step.call_type(),
            attempt,
            error = failure.message(),
            "compensation attempt failed; retrying"
        );
        attempt += 1;
        if !policy.retry_delay.is_zero() {
            tokio::time::sleep(policy.retry_delay).await;
        }
    }
}

async fn apply(ports: &CompensationPorts, step: &Compensation) -> Result<(), ReverseError> {
    match step {
        Compensation::ReleaseOwnership {
            username,
            hash,
            network,
        } => ports
            .uploads
            .release_ownership(username, hash, network)
            .await
            .map_err(|err| ReverseError::Transient(err.to_string())),
        Compensation::RefundCredits { username, amount } => {
            ports.ledger.credit(username, *amount).await?;
            Ok(())
        }
        Compensation::ReduceUsage { username, bytes } => {
            ports.usage.reduce_usage(username, *bytes).await?;
            Ok(())
        }
    }
}
