use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::domain::PinRequestMessage;
use crate::domain::ports::{
    DeliveryAcker, PinDelivery, PinPublisher, PinQueueError, PinSubscription,
};

use super::{FailureBudget, lock};

#[derive(Debug, Clone)]
struct Entry {
    id: u64,
    body: Vec<u8>,
    delivery_count: u32,
    /// Set by a delayed nack; the entry is hidden until then.
    not_before: Option<Instant>,
}

impl Entry {
    fn is_claimable(&self, now: Instant) -> bool {
        self.not_before.is_none_or(|at| at <= now)
    }
}

#[derive(Debug, Default)]
struct QueueState {
    next_id: u64,
    ready: VecDeque<Entry>,
    in_flight: HashMap<u64, Entry>,
    acked: Vec<Entry>,
    dead_lettered: Vec<(Entry, String)>,
    published: Vec<PinRequestMessage>,
}

/// Counts of messages by queue position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub ready: usize,
    pub in_flight: usize,
    pub acked: usize,
    pub dead_lettered: usize,
}

/// FIFO queue implementing both the publisher and the subscription.
#[derive(Debug, Default)]
pub struct InMemoryPinQueue {
    state: Arc<Mutex<QueueState>>,
    publish_failures: FailureBudget,
}

impl InMemoryPinQueue {
    /// Enqueue a raw payload, bypassing encoding.
    pub fn push_raw(&self, body: impl Into<Vec<u8>>) {
        let mut state = lock(&self.state);
        let id = state.next_id;
        state.next_id += 1;
        state.ready.push_back(Entry {
            id,
            body: body.into(),
            delivery_count: 0,
            not_before: None,
        });
    }

    /// Every message successfully published, in order.
    pub fn published(&self) -> Vec<PinRequestMessage> {
        lock(&self.state).published.clone()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let state = lock(&self.state);
        QueueSnapshot {
            ready: state.ready.len(),
            in_flight: state.in_flight.len(),
            acked: state.acked.len(),
            dead_lettered: state.dead_lettered.len(),
        }
    }

    /// Reasons recorded for dead-lettered messages.
    pub fn dead_letter_reasons(&self) -> Vec<String> {
        lock(&self.state)
            .dead_lettered
            .iter()
            .map(|(_, reason)| reason.clone())
            .collect()
    }

    /// Reverse the ready queue so tests can replay messages out of order.
    pub fn reverse_ready(&self) {
        let mut state = lock(&self.state);
        let reversed: VecDeque<Entry> = state.ready.drain(..).rev().collect();
        state.ready = reversed;
    }

    /// Fail the next `count` publishes.
    pub fn fail_publishes(&self, count: u32) {
        self.publish_failures.set(count);
    }
}

#[async_trait]
impl PinPublisher for InMemoryPinQueue {
    async fn publish(&self, message: &PinRequestMessage) -> Result<(), PinQueueError> {
        if self.publish_failures.take() {
            return Err(PinQueueError::unavailable("injected publish failure"));
        }
        let body = message
            .encode()
            .map_err(|err| PinQueueError::rejected(err.to_string()))?;
        self.push_raw(body);
        lock(&self.state).published.push(message.clone());
        Ok(())
    }
}

#[async_trait]
impl PinSubscription for InMemoryPinQueue {
    async fn next_delivery(&self) -> Result<Option<PinDelivery>, PinQueueError> {
        let mut state = lock(&self.state);
        let now = Instant::now();
        let Some(position) = state.ready.iter().position(|entry| entry.is_claimable(now)) else {
            return Ok(None);
        };
        let Some(mut entry) = state.ready.remove(position) else {
            return Ok(None);
        };
        entry.delivery_count += 1;
        state.in_flight.insert(entry.id, entry.clone());
        Ok(Some(PinDelivery {
            body: entry.body,
            delivery_count: entry.delivery_count,
            acker: Box::new(InMemoryAcker {
                state: Arc::clone(&self.state),
                id: entry.id,
            }),
        }))
    }
}

struct InMemoryAcker {
    state: Arc<Mutex<QueueState>>,
    id: u64,
}

impl InMemoryAcker {
    fn take(&self) -> Result<(std::sync::MutexGuard<'_, QueueState>, Entry), PinQueueError> {
        let mut state = lock(&self.state);
        let entry = state
            .in_flight
            .remove(&self.id)
            .ok_or_else(|| PinQueueError::rejected(format!("delivery {} is not in flight", self.id)))?;
        Ok((state, entry))
    }
}

#[async_trait]
impl DeliveryAcker for InMemoryAcker {
    async fn ack(self: Box<Self>) -> Result<(), PinQueueError> {
        let (mut state, entry) = self.take()?;
        state.acked.push(entry);
        Ok(())
    }

    async fn nack(self: Box<Self>, delay: Duration) -> Result<(), PinQueueError> {
        let (mut state, mut entry) = self.take()?;
        entry.not_before = (!delay.is_zero()).then(|| Instant::now() + delay);
        state.ready.push_back(entry);
        Ok(())
    }

    async fn dead_letter(self: Box<Self>, reason: String) -> Result<(), PinQueueError> {
        let (mut state, entry) = self.take()?;
        state.dead_lettered.push((entry, reason));
        Ok(())
    }
}
