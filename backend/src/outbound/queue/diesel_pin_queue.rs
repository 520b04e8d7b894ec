//! PostgreSQL-backed `PinPublisher` and `PinSubscription`.

use std::time::Duration;

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::sql_types::BigInt;
use diesel_async::RunQueryDsl;
use tracing::debug;

use crate::domain::PinRequestMessage;
use crate::domain::ports::{
    DeliveryAcker, PinDelivery, PinPublisher, PinQueueError, PinSubscription,
};
use crate::outbound::persistence::{DbPool, PoolError};
use crate::outbound::persistence::models::{NewPinMessageRow, PinMessageRow};
use crate::outbound::persistence::schema::pin_messages;

/// Time a claimed message stays invisible to other consumers.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(60);

const CLAIM_SQL: &str = "UPDATE pin_messages \
     SET delivery_count = delivery_count + 1, \
         leased_until = NOW() + ($1 * INTERVAL '1 millisecond') \
     WHERE id = ( \
         SELECT id FROM pin_messages \
         WHERE dead_lettered_at IS NULL \
           AND (leased_until IS NULL OR leased_until < NOW()) \
         ORDER BY id \
         LIMIT 1 \
         FOR UPDATE SKIP LOCKED) \
     RETURNING id, body, delivery_count";

const NACK_SQL: &str = "UPDATE pin_messages \
     SET leased_until = NOW() + ($1 * INTERVAL '1 millisecond') \
     WHERE id = $2";

/// Durable queue over the `pin_messages` table.
#[derive(Clone)]
pub struct DieselPinQueue {
    pool: DbPool,
    lease: Duration,
}

impl DieselPinQueue {
    /// Create a queue over `pool` granting [`DEFAULT_LEASE`] per claim.
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            lease: DEFAULT_LEASE,
        }
    }

    /// Override the lease granted to each claim.
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }
}

fn map_pool_error(error: PoolError) -> PinQueueError {
    PinQueueError::unavailable(error.into_message())
}

fn map_diesel_error(operation: &'static str) -> impl Fn(diesel::result::Error) -> PinQueueError {
    move |error| {
        crate::outbound::persistence::map_diesel_error(
            error,
            operation,
            PinQueueError::rejected,
            PinQueueError::unavailable,
        )
    }
}

fn interval_millis(interval: Duration) -> i64 {
    i64::try_from(interval.as_millis()).unwrap_or(i64::MAX)
}

fn row_to_delivery(row: PinMessageRow, pool: DbPool) -> PinDelivery {
    PinDelivery {
        body: row.body,
        delivery_count: u32::try_from(row.delivery_count).unwrap_or(0),
        acker: Box::new(DieselAcker { pool, id: row.id }),
    }
}

#[async_trait]
impl PinPublisher for DieselPinQueue {
    async fn publish(&self, message: &PinRequestMessage) -> Result<(), PinQueueError> {
        let body = message
            .encode()
            .map_err(|err| PinQueueError::rejected(err.to_string()))?;
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        diesel::insert_into(pin_messages::table)
            .values(NewPinMessageRow { body: &body })
            .execute(&mut conn)
            .await
            .map_err(map_diesel_error("publish pin message"))?;
        Ok(())
    }
}

#[async_trait]
impl PinSubscription for DieselPinQueue {
    async fn next_delivery(&self) -> Result<Option<PinDelivery>, PinQueueError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let row: Option<PinMessageRow> = diesel::sql_query(CLAIM_SQL)
            .bind::<BigInt, _>(interval_millis(self.lease))
            .get_result(&mut conn)
            .await
            .optional()
            .map_err(map_diesel_error("claim pin message"))?;

        Ok(row.map(|row| {
            debug!(message_id = row.id, delivery_count = row.delivery_count, "claimed pin message");
            row_to_delivery(row, self.pool.clone())
        }))
    }
}

/// Settles one claimed row.
struct DieselAcker {
    pool: DbPool,
    id: i64,
}

#[async_trait]
impl DeliveryAcker for DieselAcker {
    async fn ack(self: Box<Self>) -> Result<(), PinQueueError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        diesel::delete(pin_messages::table.filter(pin_messages::id.eq(self.id)))
            .execute(&mut conn)
            .await
            .map_err(map_diesel_error("ack pin message"))?;
        Ok(())
    }

    async fn nack(self: Box<Self>, delay: Duration) -> Result<(), PinQueueError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        diesel::sql_query(NACK_SQL)
            .bind::<BigInt, _>(interval_millis(delay))
            .bind::<BigInt, _>(self.id)
            .execute(&mut conn)
            .await
            .map_err(map_diesel_error("nack pin message"))?;
        Ok(())
    }

    async fn dead_letter(self: Box<Self>, reason: String) -> Result<(), PinQueueError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        diesel::update(pin_messages::table.filter(pin_messages::id.eq(self.id)))
            .set((
                pin_messages::dead_lettered_at.eq(diesel::dsl::now),
                pin_messages::dead_letter_reason.eq(Some(reason)),
                pin_messages::leased_until.eq(None::<chrono::DateTime<chrono::Utc>>),
            ))
            .execute(&mut conn)
            .await
            .map_err(map_diesel_error("dead-letter pin message"))?;
        Ok(())
    }
}
