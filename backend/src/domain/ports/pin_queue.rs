//! Ports for the durable pin queue.
//!
//! Delivery is at least once. A delivery is settled exactly once through its
//! [`DeliveryAcker`]; dropping an unsettled delivery leaves the message to be
//! redelivered once its lease expires.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::PinRequestMessage;

use super::define_port_error;

define_port_error! {
    /// Errors surfaced by queue adapters.
    pub enum PinQueueError {
        /// Queue infrastructure is unavailable.
        Unavailable { message: String } => "pin queue is unavailable: {message}",
        /// The message could not be accepted or settled.
        Rejected { message: String } => "pin queue rejected operation: {message}",
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PinPublisher: Send + Sync {
    /// Durably enqueue a message. Returns only once the queue has accepted it.
    async fn publish(&self, message: &PinRequestMessage) -> Result<(), PinQueueError>;
}

/// Settlement handle for one delivery.
#[async_trait]
pub trait DeliveryAcker: Send + Sync {
    /// Remove the message from the queue.
    async fn ack(self: Box<Self>) -> Result<(), PinQueueError>;

    /// Return the message for redelivery once `delay` has passed.
    async fn nack(self: Box<Self>, delay: Duration) -> Result<(), PinQueueError>;

    /// Park the message for manual remediation.
    async fn dead_letter(self: Box<Self>, reason: String) -> Result<(), PinQueueError>;
}

/// One message handed to a consumer.
pub struct PinDelivery {
    /// Raw payload as published.
    pub body: Vec<u8>,
    /// How many times this message has been delivered, including this time.
    pub delivery_count: u32,
    pub acker: Box<dyn DeliveryAcker>,
}

impl std::fmt::Debug for PinDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinDelivery")
            .field("body_len", &self.body.len())
            .field("delivery_count", &self.delivery_count)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait PinSubscription: Send + Sync {
    /// Claim the next available delivery, or `None` when the queue is idle.
    async fn next_delivery(&self) -> Result<Option<PinDelivery>, PinQueueError>;
}
