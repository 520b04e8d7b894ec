//! Asynchronous upload-ledger reconciler.
//!
//! Consumes pin instructions and converges them into upload records. Delivery
//! is at least once and unordered, so every update goes through the pure
//! [`merge_claim`] inside a locked upsert: replaying a message, or applying
//! two messages in either order, lands on the same record.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use mockable::Clock;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::ports::{PinDelivery, PinQueueError, PinSubscription, UploadRepository, UploadRepositoryError};
use super::{
    ContentHash, NetworkName, PinRequestMessage, RetentionPolicy, UploadRecord, extend_record,
    merge_claim,
};

/// Consumer tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Deliveries allowed before a failing message is dead-lettered.
    pub max_deliveries: u32,
    /// Messages processed concurrently.
    pub max_in_flight: usize,
    /// Pause after finding the queue empty.
    pub poll_interval: Duration,
    /// Redelivery delay after the first failed delivery.
    pub initial_backoff: Duration,
    /// Upper bound on the redelivery delay.
    pub max_backoff: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            max_deliveries: 5,
            max_in_flight: 32,
            poll_interval: Duration::from_millis(500),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl ReconcilerConfig {
    /// Delay before a message that failed its `delivery_count`-th delivery
    /// becomes claimable again. Doubles per delivery up to `max_backoff`.
    pub fn redelivery_delay(&self, delivery_count: u32) -> Duration {
        let exponent = 2_u32.saturating_pow(delivery_count.saturating_sub(1));
        let base_ms = u64::try_from(self.initial_backoff.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max_backoff.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(base_ms.saturating_mul(u64::from(exponent)).min(max_ms))
    }
}

/// What happened to one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Record written and message acknowledged.
    Applied,
    /// Payload could never be valid; acknowledged without effect.
    Dropped,
    /// Transient failure; returned to the queue.
    Redelivering,
    /// Retries exhausted or update refused; parked for remediation.
    DeadLettered,
}

/// Counts of delivery outcomes over one [`UploadReconciler::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcilerSummary {
    pub applied: u64,
    pub dropped: u64,
    pub redelivering: u64,
    pub dead_lettered: u64,
    /// Tasks that panicked or were cancelled.
    pub aborted: u64,
}

impl ReconcilerSummary {
    fn record(&mut self, outcome: DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Applied => self.applied += 1,
            DeliveryOutcome::Dropped => self.dropped += 1,
            DeliveryOutcome::Redelivering => self.redelivering += 1,
            DeliveryOutcome::DeadLettered => self.dead_lettered += 1,
        }
    }

    fn record_join(&mut self, result: Result<DeliveryOutcome, tokio::task::JoinError>) {
        match result {
            Ok(outcome) => self.record(outcome),
            Err(join_error) => {
                error!(error = %join_error, "reconciler task aborted");
                self.aborted += 1;
            }
        }
    }
}

/// Durable writer of upload records.
pub struct UploadReconciler {
    uploads: Arc<dyn UploadRepository>,
    clock: Arc<dyn Clock>,
    retention: RetentionPolicy,
}

impl UploadReconciler {
    /// Create a reconciler writing through `uploads`.
    ///
    /// `clock` stamps messages that carry no creation time; `retention` bounds
    /// extensions.
    pub fn new(
        uploads: Arc<dyn UploadRepository>,
        clock: Arc<dyn Clock>,
        retention: RetentionPolicy,
    ) -> Self {
        Self {
            uploads,
            clock,
            retention,
        }
    }

    /// Merge one message into its record.
    pub async fn apply_message(
        &self,
        message: &PinRequestMessage,
    ) -> Result<UploadRecord, UploadRepositoryError> {
        let claim = message.to_claim(self.clock.utc());
        self.uploads
            .upsert_with(
                &message.content_hash,
                &message.network,
                Box::new(move |existing| merge_claim(existing, &claim)),
            )
            .await
    }

    /// Push the deadline of an existing record out by `months`.
    ///
    /// The lifetime limit is re-checked under the row lock.
    pub async fn extend_retention(
        &self,
        hash: &ContentHash,
        network: &NetworkName,
        months: u32,
    ) -> Result<UploadRecord, UploadRepositoryError> {
        let retention = self.retention;
        self.uploads
            .upsert_with(
                hash,
                network,
                Box::new(move |existing| extend_record(existing, months, &retention)),
            )
            .await
    }

    /// Decode, apply, and settle one delivery.
    pub async fn process_delivery(
        &self,
        delivery: PinDelivery,
        config: &ReconcilerConfig,
    ) -> DeliveryOutcome {
        let PinDelivery {
            body,
            delivery_count,
            acker,
        } = delivery;

        let message = match PinRequestMessage::decode(&body) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, delivery_count, "dropping malformed pin message");
                log_settle_failure("ack", acker.ack().await);
                return DeliveryOutcome::Dropped;
            }
        };

        let failure = match self.apply_message(&message).await {
            Ok(record) => {
                debug!(
                    username = %message.username,
                    content_hash = %record.hash,
                    network = %record.network,
                    gc_deadline = %record.gc_deadline,
                    uploaders = record.uploaders.len(),
                    "upload record reconciled"
                );
                log_settle_failure("ack", acker.ack().await);
                return DeliveryOutcome::Applied;
            }
            Err(err) => err,
        };

        if failure.is_transient() && delivery_count < config.max_deliveries {
            let delay = config.redelivery_delay(delivery_count);
            warn!(
                username = %message.username,
                content_hash = %message.content_hash,
                network = %message.network,
                delivery_count,
                retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %failure,
                "upload record update failed; requesting redelivery"
            );
            log_settle_failure("nack", acker.nack(delay).await);
            return DeliveryOutcome::Redelivering;
        }

        error!(
            username = %message.username,
            content_hash = %message.content_hash,
            network = %message.network,
            hold_months = message.hold_months,
            cost = ?message.cost.map(|cost| cost.to_string()),
            delivery_count,
            error = %failure,
            "dead-lettering pin message; manual remediation required"
        );
        log_settle_failure("dead_letter", acker.dead_letter(failure.to_string()).await);
        DeliveryOutcome::DeadLettered
    }

    /// Consume `subscription` until `shutdown` resolves.
    ///
    /// At most `max_in_flight` deliveries are processed at once. On shutdown
    /// no new deliveries are claimed and every in-flight task is drained
    /// before the subscription is released.
    pub async fn run<F>(
        self: Arc<Self>,
        subscription: Arc<dyn PinSubscription>,
        config: ReconcilerConfig,
        shutdown: F,
    ) -> ReconcilerSummary
    where
        F: Future<Output = ()> + Send,
    {
        let permits = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
        let mut tasks = JoinSet::new();
        let mut summary = ReconcilerSummary::default();
        tokio::pin!(shutdown);

        info!(
            max_in_flight = config.max_in_flight,
            max_deliveries = config.max_deliveries,
            "reconciler started"
        );

        loop {
            while let Some(result) = tasks.try_join_next() {
                summary.record_join(result);
            }

            let permit = tokio::select! {
                () = &mut shutdown => break,
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let next = tokio::select! {
                () = &mut shutdown => break,
                next = subscription.next_delivery() => next,
            };

            match next {
                Ok(Some(delivery)) => {
                    let reconciler = Arc::clone(&self);
                    tasks.spawn(async move {
                        let outcome = reconciler.process_delivery(delivery, &config).await;
                        drop(permit);
                        outcome
                    });
                }
                Ok(None) => {
                    drop(permit);
                    if idle(&mut shutdown, config.poll_interval).await {
                        break;
                    }
                }
                Err(err) => {
                    drop(permit);
                    log_claim_failure(&err);
                    if idle(&mut shutdown, config.poll_interval).await {
                        break;
                    }
                }
            }
        }

        info!(in_flight = tasks.len(), "reconciler draining");
        while let Some(result) = tasks.join_next().await {
            summary.record_join(result);
        }
        drop(subscription);
        info!(
            applied = summary.applied,
            dropped = summary.dropped,
            dead_lettered = summary.dead_lettered,
            "reconciler stopped"
        );
        summary
    }
}

/// Sleep for `interval`, returning `true` if shutdown fired first.
async fn idle<F>(shutdown: &mut std::pin::Pin<&mut F>, interval: Duration) -> bool
where
    F: Future<Output = ()>,
{
    tokio::select! {
        () = shutdown.as_mut() => true,
        () = tokio::time::sleep(interval) => false,
    }
}

fn log_claim_failure(err: &PinQueueError) {
    warn!(error = %err, "failed to claim pin delivery");
}

fn log_settle_failure(action: &'static str, result: Result<(), PinQueueError>) {
    if let Err(err) = result {
        warn!(action, error = %err, "failed to settle pin delivery; it will be redelivered");
    }
}

#[cfg(test)]
mod tests;
