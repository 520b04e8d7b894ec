//! Delivery handling and consumption loop for the reconciler.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use rstest::{fixture, rstest};

use super::*;
use crate::domain::{ContentHash, Username, deadline_after};
use crate::test_support::{InMemoryPinQueue, InMemoryUploadRepository, MutableClock, QueueSnapshot};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 10, 8, 30, 0)
        .single()
        .expect("valid time")
}

fn hash() -> ContentHash {
    ContentHash::new("QmReconcilerHash0001").expect("valid hash")
}

fn body(username: &str, hold_months: u32) -> String {
    format!(
        r#"{{"contentHash":"QmReconcilerHash0001","network":"public","username":"{username}","holdMonths":{hold_months},"createdAt":"2026-05-10T08:30:00Z","traceparent":"ignored"}}"#
    )
}

fn config(max_deliveries: u32) -> ReconcilerConfig {
    ReconcilerConfig {
        max_deliveries,
        max_in_flight: 4,
        poll_interval: Duration::from_millis(5),
        initial_backoff: Duration::ZERO,
        max_backoff: Duration::ZERO,
    }
}

struct Rig {
    uploads: Arc<InMemoryUploadRepository>,
    queue: Arc<InMemoryPinQueue>,
    clock: Arc<MutableClock>,
    reconciler: Arc<UploadReconciler>,
}

impl Rig {
    async fn deliver_next(&self, config: &ReconcilerConfig) -> DeliveryOutcome {
        let delivery = self
            .queue
            .next_delivery()
            .await
            .expect("claim succeeds")
            .expect("a message is ready");
        self.reconciler.process_delivery(delivery, config).await
    }

    fn record(&self) -> Option<UploadRecord> {
        self.uploads.record(&hash(), &NetworkName::public())
    }
}

#[fixture]
fn rig() -> Rig {
    let uploads = Arc::new(InMemoryUploadRepository::default());
    let clock = Arc::new(MutableClock::new(now()));
    let reconciler = Arc::new(UploadReconciler::new(
        uploads.clone(),
        clock.clone(),
        RetentionPolicy::default(),
    ));
    Rig {
        uploads,
        queue: Arc::new(InMemoryPinQueue::default()),
        clock,
        reconciler,
    }
}

#[rstest]
#[tokio::test]
async fn first_message_creates_record(rig: Rig) {
    rig.queue.push_raw(body("alice", 1));

    assert_eq!(rig.deliver_next(&config(5)).await, DeliveryOutcome::Applied);

    let record = rig.record().expect("record created");
    assert_eq!(record.gc_deadline, deadline_after(now(), 1).expect("in range"));
    assert_eq!(
        record.uploaders.into_iter().collect::<Vec<_>>(),
        vec![Username::new("alice").expect("valid")]
    );
    assert_eq!(rig.queue.snapshot().acked, 1);
}

#[rstest]
#[tokio::test]
async fn redelivered_message_is_idempotent(rig: Rig) {
    rig.queue.push_raw(body("alice", 2));
    rig.deliver_next(&config(5)).await;
    let once = rig.record().expect("record created");

    rig.clock.advance(TimeDelta::days(3));
    rig.queue.push_raw(body("alice", 2));
    rig.deliver_next(&config(5)).await;

    assert_eq!(rig.record(), Some(once));
}

#[rstest]
#[tokio::test]
async fn missing_timestamp_falls_back_to_clock(rig: Rig) {
    rig.queue.push_raw(
        r#"{"contentHash":"QmReconcilerHash0001","username":"alice","holdMonths":1}"#,
    );

    rig.deliver_next(&config(5)).await;

    let record = rig.record().expect("record created");
    assert_eq!(record.created_at, now());
}

#[rstest]
#[case(b"{not json".as_slice())]
#[case(br#"{"contentHash":"QmReconcilerHash0001","username":"alice","holdMonths":0}"#.as_slice())]
#[tokio::test]
async fn malformed_message_is_acked_and_dropped(rig: Rig, #[case] payload: &[u8]) {
    rig.queue.push_raw(payload);

    assert_eq!(rig.deliver_next(&config(5)).await, DeliveryOutcome::Dropped);
    assert_eq!(rig.uploads.record_count(), 0);
    assert_eq!(
        rig.queue.snapshot(),
        QueueSnapshot {
            acked: 1,
            ..QueueSnapshot::default()
        }
    );
}

#[rstest]
#[tokio::test]
async fn transient_failure_is_redelivered_then_applied(rig: Rig) {
    rig.uploads.fail_upserts(1);
    rig.queue.push_raw(body("alice", 1));

    assert_eq!(rig.deliver_next(&config(5)).await, DeliveryOutcome::Redelivering);
    assert_eq!(rig.queue.snapshot().ready, 1);
    assert_eq!(rig.deliver_next(&config(5)).await, DeliveryOutcome::Applied);
    assert!(rig.record().is_some());
}

#[rstest]
#[tokio::test]
async fn nacked_message_waits_out_its_backoff(rig: Rig) {
    rig.uploads.fail_upserts(1);
    rig.queue.push_raw(body("alice", 1));
    let config = ReconcilerConfig {
        initial_backoff: Duration::from_secs(3600),
        max_backoff: Duration::from_secs(3600),
        ..config(5)
    };

    assert_eq!(rig.deliver_next(&config).await, DeliveryOutcome::Redelivering);

    assert_eq!(rig.queue.snapshot().ready, 1);
    assert!(
        rig.queue
            .next_delivery()
            .await
            .expect("claim succeeds")
            .is_none()
    );
}

#[rstest]
#[case(1, 200)]
#[case(2, 400)]
#[case(4, 1_600)]
#[case(10, 5_000)]
#[case(u32::MAX, 5_000)]
fn redelivery_delay_doubles_up_to_the_cap(#[case] delivery_count: u32, #[case] expected_ms: u64) {
    let config = ReconcilerConfig {
        initial_backoff: Duration::from_millis(200),
        max_backoff: Duration::from_secs(5),
        ..ReconcilerConfig::default()
    };

    assert_eq!(
        config.redelivery_delay(delivery_count),
        Duration::from_millis(expected_ms)
    );
}

#[rstest]
#[tokio::test]
async fn persistent_failure_is_dead_lettered(rig: Rig) {
    rig.uploads.fail_upserts(3);
    rig.queue.push_raw(body("alice", 1));
    let config = config(3);

    assert_eq!(rig.deliver_next(&config).await, DeliveryOutcome::Redelivering);
    assert_eq!(rig.deliver_next(&config).await, DeliveryOutcome::Redelivering);
    assert_eq!(rig.deliver_next(&config).await, DeliveryOutcome::DeadLettered);

    let snapshot = rig.queue.snapshot();
    assert_eq!(snapshot.dead_lettered, 1);
    assert_eq!(snapshot.ready, 0);
    assert!(rig.record().is_none());
    assert_eq!(rig.queue.dead_letter_reasons().len(), 1);
}

#[rstest]
#[tokio::test]
async fn extend_retention_refuses_missing_record(rig: Rig) {
    let result = rig
        .reconciler
        .extend_retention(&hash(), &NetworkName::public(), 1)
        .await;

    assert!(matches!(
        result,
        Err(UploadRepositoryError::Rejected {
            reason: crate::domain::UploadMergeError::NotFound
        })
    ));
}

#[rstest]
#[tokio::test]
async fn run_applies_out_of_order_messages_and_drains(rig: Rig) {
    rig.queue.push_raw(body("userA", 1));
    rig.queue.push_raw(body("userB", 3));
    rig.queue.reverse_ready();
    rig.queue.push_raw(b"garbage".as_slice());

    let queue = Arc::clone(&rig.queue);
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let handle = tokio::spawn(Arc::clone(&rig.reconciler).run(
        queue.clone(),
        config(5),
        async move {
            let _ = stop_rx.await;
        },
    ));

    tokio::time::timeout(Duration::from_secs(5), async {
        while queue.snapshot().acked < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("all messages settled");
    stop_tx.send(()).expect("reconciler still running");
    let summary = handle.await.expect("run completes");

    assert_eq!(summary.applied, 2);
    assert_eq!(summary.dropped, 1);
    let record = rig.record().expect("record created");
    assert_eq!(record.gc_deadline, deadline_after(now(), 3).expect("in range"));
    let uploaders: Vec<&str> = record.uploaders.iter().map(AsRef::as_ref).collect();
    assert_eq!(uploaders, vec!["userA", "userB"]);
}

#[rstest]
#[tokio::test]
async fn run_stops_promptly_when_idle(rig: Rig) {
    let summary = tokio::time::timeout(
        Duration::from_secs(5),
        Arc::clone(&rig.reconciler).run(rig.queue.clone(), config(5), async {}),
    )
    .await
    .expect("run stops");

    assert_eq!(summary, ReconcilerSummary::default());
}
