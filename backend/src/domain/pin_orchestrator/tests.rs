//! Admission, compensation, and rejection behaviour of the orchestrator.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rstest::{fixture, rstest};

use super::*;
use crate::domain::ports::{
    ContentStore, MockCreditLedger, MockPinPublisher, MockUsageMeter, PinQueueError,
};
use crate::domain::{
    AccountUsage, BYTES_PER_GIB, ErrorCode, PriceTable, Tier, UploadRecord, deadline_after,
};
use crate::test_support::{
    InMemoryAccounts, InMemoryContentStore, InMemoryPinQueue, InMemoryUploadRepository,
    MutableClock,
};

const HASH: &str = "QmOrchestratorHash01";

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 4, 1, 10, 0, 0)
        .single()
        .expect("valid time")
}

fn credits(whole: i64) -> Credits {
    Credits::from_whole(whole).expect("in range")
}

fn username(raw: &str) -> Username {
    Username::new(raw).expect("valid username")
}

fn hash() -> ContentHash {
    ContentHash::new(HASH).expect("valid hash")
}

/// Ten credits per GiB-month on every tier.
fn prices() -> PriceTable {
    PriceTable {
        free: credits(10),
        partner: credits(10),
        light: credits(10),
        plus: credits(10),
    }
}

fn fast_compensation() -> CompensationPolicy {
    CompensationPolicy {
        max_attempts: 3,
        retry_delay: std::time::Duration::ZERO,
    }
}

struct Harness {
    accounts: Arc<InMemoryAccounts>,
    uploads: Arc<InMemoryUploadRepository>,
    store: Arc<InMemoryContentStore>,
    queue: Arc<InMemoryPinQueue>,
    reconciler: Arc<UploadReconciler>,
    orchestrator: PinOrchestrator,
}

impl Harness {
    fn alice(&self) -> Username {
        username("alice")
    }

    fn balance(&self) -> Credits {
        self.accounts
            .balance_of(&self.alice())
            .expect("alice exists")
    }

    fn used(&self) -> u64 {
        self.accounts
            .used_bytes_of(&self.alice())
            .expect("alice exists")
    }

    fn pin_request(&self, hold_months: u32) -> PinRequest {
        PinRequest {
            username: self.alice(),
            hash: hash(),
            network: NetworkName::public(),
            hold_months,
        }
    }

    async fn reconcile_published(&self) {
        for message in self.queue.published() {
            self.reconciler
                .apply_message(&message)
                .await
                .expect("reconcile succeeds");
        }
    }
}

#[fixture]
fn harness() -> Harness {
    let accounts = Arc::new(InMemoryAccounts::default());
    accounts.insert(&username("alice"), Tier::Light, credits(100), 10 * BYTES_PER_GIB);
    let uploads = Arc::new(InMemoryUploadRepository::default());
    let store = Arc::new(InMemoryContentStore::default());
    store.insert(&hash(), BYTES_PER_GIB);
    let queue = Arc::new(InMemoryPinQueue::default());
    let clock = Arc::new(MutableClock::new(now()));

    let reconciler = Arc::new(UploadReconciler::new(
        uploads.clone(),
        clock.clone(),
        RetentionPolicy::default(),
    ));
    let orchestrator = PinOrchestrator::new(
        PinOrchestratorPorts {
            ledger: accounts.clone(),
            usage: accounts.clone(),
            uploads: uploads.clone(),
            store: store.clone(),
            publisher: queue.clone(),
        },
        Arc::clone(&reconciler),
        CostCalculator::new(prices(), 24),
        PinPolicy::default(),
        fast_compensation(),
        clock,
    );

    Harness {
        accounts,
        uploads,
        store,
        queue,
        reconciler,
        orchestrator,
    }
}

#[rstest]
#[tokio::test]
async fn published_pin_charges_exactly_once(harness: Harness) {
    let outcome = harness
        .orchestrator
        .pin(harness.pin_request(1))
        .await
        .expect("pin accepted");

    assert_eq!(
        outcome,
        PinOutcome::Published {
            hash: hash(),
            cost: credits(10),
            size_bytes: BYTES_PER_GIB,
        }
    );
    assert_eq!(harness.balance(), credits(90));
    assert_eq!(harness.used(), BYTES_PER_GIB);

    let published = harness.queue.published();
    assert_eq!(published.len(), 1);
    let message = published.first().expect("one message");
    assert_eq!(message.username, harness.alice());
    assert_eq!(message.hold_months, 1);
    assert_eq!(message.size, Some(BYTES_PER_GIB));
    assert_eq!(message.cost, Some(credits(10)));
    assert_eq!(message.created_at, Some(now()));
    assert_eq!(message.kind, UploadKind::Pin);
}

#[rstest]
#[tokio::test]
async fn repeated_pin_after_reconcile_is_not_charged(harness: Harness) {
    harness
        .orchestrator
        .pin(harness.pin_request(1))
        .await
        .expect("first pin accepted");
    harness.reconcile_published().await;

    let outcome = harness
        .orchestrator
        .pin(harness.pin_request(1))
        .await
        .expect("repeat accepted");

    assert_eq!(outcome, PinOutcome::AlreadyOwned { hash: hash() });
    assert_eq!(harness.balance(), credits(90));
    assert_eq!(harness.used(), BYTES_PER_GIB);
    assert_eq!(harness.queue.published().len(), 1);
}

#[rstest]
#[tokio::test]
async fn repeated_pin_before_reconcile_is_not_charged(harness: Harness) {
    harness
        .orchestrator
        .pin(harness.pin_request(1))
        .await
        .expect("first pin accepted");

    let outcome = harness
        .orchestrator
        .pin(harness.pin_request(3))
        .await
        .expect("repeat accepted");

    assert_eq!(outcome, PinOutcome::AlreadyOwned { hash: hash() });
    assert_eq!(harness.balance(), credits(90));
}

#[rstest]
#[case(0)]
#[case(7)]
#[tokio::test]
async fn invalid_hold_time_is_rejected_before_any_charge(harness: Harness, #[case] months: u32) {
    let rejection = harness
        .orchestrator
        .pin(harness.pin_request(months))
        .await
        .expect_err("hold time rejected");

    assert_eq!(rejection.error.code(), ErrorCode::InvalidHoldTime);
    assert_eq!(rejection.state, PinState::UnrecoverableRejected);
    assert_eq!(harness.balance(), credits(100));
    assert!(!harness.uploads.is_reserved(&harness.alice(), &hash(), &NetworkName::public()));
}

#[rstest]
#[tokio::test]
async fn stat_failure_releases_reservation(harness: Harness) {
    harness.store.fail_stats(1);

    let rejection = harness
        .orchestrator
        .pin(harness.pin_request(1))
        .await
        .expect_err("stat failure rejected");

    assert_eq!(rejection.error.code(), ErrorCode::ObjectStatFailed);
    assert_eq!(rejection.state, PinState::UnrecoverableRejected);
    assert!(!harness.uploads.is_reserved(&harness.alice(), &hash(), &NetworkName::public()));
    assert_eq!(harness.balance(), credits(100));
}

#[rstest]
#[tokio::test]
async fn quota_rejection_carries_usage_details(harness: Harness) {
    harness
        .accounts
        .set_used_bytes(&harness.alice(), 9 * BYTES_PER_GIB + 1);

    let rejection = harness
        .orchestrator
        .pin(harness.pin_request(1))
        .await
        .expect_err("quota rejected");

    assert_eq!(rejection.error.code(), ErrorCode::QuotaExceeded);
    assert_eq!(rejection.state, PinState::UnrecoverableRejected);
    let details = rejection.error.details().expect("quota details");
    assert_eq!(details["used_bytes"], serde_json::json!(9 * BYTES_PER_GIB + 1));
    assert_eq!(details["limit_bytes"], serde_json::json!(10 * BYTES_PER_GIB));
    assert_eq!(details["requested_bytes"], serde_json::json!(BYTES_PER_GIB));
    assert_eq!(harness.balance(), credits(100));
}

#[rstest]
#[tokio::test]
async fn insufficient_balance_is_payment_required(harness: Harness) {
    let bob = username("bob");
    harness
        .accounts
        .insert(&bob, Tier::Plus, credits(5), 10 * BYTES_PER_GIB);

    let rejection = harness
        .orchestrator
        .pin(PinRequest {
            username: bob.clone(),
            hash: hash(),
            network: NetworkName::public(),
            hold_months: 1,
        })
        .await
        .expect_err("balance rejected");

    assert_eq!(rejection.error.code(), ErrorCode::InsufficientBalance);
    assert_eq!(rejection.error.code().status_hint(), 402);
    assert_eq!(rejection.state, PinState::UnrecoverableRejected);
    assert_eq!(harness.accounts.balance_of(&bob), Some(credits(5)));
    assert_eq!(harness.accounts.used_bytes_of(&bob), Some(0));
    assert!(!harness.uploads.is_reserved(&bob, &hash(), &NetworkName::public()));
}

#[rstest]
#[tokio::test]
async fn usage_commit_failure_refunds_debit(harness: Harness) {
    harness.accounts.fail_usage_updates(1);

    let rejection = harness
        .orchestrator
        .pin(harness.pin_request(1))
        .await
        .expect_err("usage failure rejected");

    assert_eq!(rejection.error.code(), ErrorCode::UsageUpdateFailed);
    assert_eq!(rejection.state, PinState::CompensatedRejected);
    assert_eq!(harness.balance(), credits(100));
    assert_eq!(harness.used(), 0);
    assert!(harness.queue.published().is_empty());
}

#[rstest]
#[tokio::test]
async fn publish_failure_restores_balance_and_usage(harness: Harness) {
    harness.accounts.set_used_bytes(&harness.alice(), 512);
    harness.queue.fail_publishes(1);

    let rejection = harness
        .orchestrator
        .pin(harness.pin_request(1))
        .await
        .expect_err("publish failure rejected");

    assert_eq!(rejection.error.code(), ErrorCode::QueuePublishFailed);
    assert_eq!(rejection.state, PinState::CompensatedRejected);
    assert_eq!(harness.balance(), credits(100));
    assert_eq!(harness.used(), 512);
    assert!(!harness.uploads.is_reserved(&harness.alice(), &hash(), &NetworkName::public()));
}

/// Publisher whose enqueue never completes.
struct StalledPublisher;

#[async_trait::async_trait]
impl PinPublisher for StalledPublisher {
    async fn publish(&self, _message: &PinRequestMessage) -> Result<(), PinQueueError> {
        std::future::pending().await
    }
}

#[rstest]
#[tokio::test]
async fn cancelled_pin_after_debit_is_compensated(harness: Harness) {
    let stalled = PinOrchestrator::new(
        PinOrchestratorPorts {
            ledger: harness.accounts.clone(),
            usage: harness.accounts.clone(),
            uploads: harness.uploads.clone(),
            store: harness.store.clone(),
            publisher: Arc::new(StalledPublisher),
        },
        Arc::clone(&harness.reconciler),
        CostCalculator::new(prices(), 24),
        PinPolicy::default(),
        fast_compensation(),
        Arc::new(MutableClock::new(now())),
    );

    let cancelled = tokio::time::timeout(
        std::time::Duration::from_millis(100),
        stalled.pin(harness.pin_request(1)),
    )
    .await;
    assert!(cancelled.is_err(), "publish should still be pending");

    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while harness.balance() != credits(100)
            || harness.used() != 0
            || harness
                .uploads
                .is_reserved(&harness.alice(), &hash(), &NetworkName::public())
        {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("abandoned request unwound");

    let retry = harness
        .orchestrator
        .pin(harness.pin_request(1))
        .await
        .expect("retry admitted");
    assert!(matches!(retry, PinOutcome::Published { .. }));
    assert_eq!(harness.balance(), credits(90));
}

#[rstest]
#[tokio::test]
async fn transient_refund_failure_is_retried(harness: Harness) {
    harness.queue.fail_publishes(1);
    harness.accounts.fail_credits(2);

    let rejection = harness
        .orchestrator
        .pin(harness.pin_request(1))
        .await
        .expect_err("publish failure rejected");

    assert_eq!(rejection.state, PinState::CompensatedRejected);
    assert_eq!(harness.balance(), credits(100));
}

#[rstest]
#[tokio::test]
async fn exhausted_refund_does_not_change_the_rejection(harness: Harness) {
    harness.queue.fail_publishes(1);
    harness.accounts.fail_credits(10);

    let rejection = harness
        .orchestrator
        .pin(harness.pin_request(1))
        .await
        .expect_err("publish failure rejected");

    assert_eq!(rejection.error.code(), ErrorCode::QueuePublishFailed);
    assert_eq!(rejection.state, PinState::CompensatedRejected);
    assert_eq!(harness.balance(), credits(90));
    assert_eq!(harness.used(), 0);
}

#[rstest]
#[tokio::test]
async fn extend_pushes_deadline_and_charges(harness: Harness) {
    harness
        .orchestrator
        .pin(harness.pin_request(6))
        .await
        .expect("pin accepted");
    harness.reconcile_published().await;

    let outcome = harness
        .orchestrator
        .extend(ExtendRequest {
            username: harness.alice(),
            hash: hash(),
            network: NetworkName::public(),
            months: 3,
        })
        .await
        .expect("extend accepted");

    assert_eq!(outcome.cost, credits(30));
    assert_eq!(outcome.gc_deadline, deadline_after(now(), 9).expect("in range"));
    assert_eq!(harness.balance(), credits(100 - 60 - 30));
    let record = harness
        .uploads
        .record(&hash(), &NetworkName::public())
        .expect("record exists");
    assert_eq!(record.gc_deadline, outcome.gc_deadline);
    assert_eq!(record.hold_months, 9);
}

#[rstest]
#[tokio::test]
async fn extend_past_lifetime_is_rejected_without_ledger_mutation(harness: Harness) {
    harness.uploads.insert(UploadRecord {
        hash: hash(),
        network: NetworkName::public(),
        kind: UploadKind::Pin,
        hold_months: 22,
        gc_deadline: deadline_after(now(), 22).expect("in range"),
        uploaders: [harness.alice()].into_iter().collect(),
        encrypted: false,
        created_at: now(),
    });

    let rejection = harness
        .orchestrator
        .extend(ExtendRequest {
            username: harness.alice(),
            hash: hash(),
            network: NetworkName::public(),
            months: 3,
        })
        .await
        .expect_err("lifetime exceeded");

    assert_eq!(rejection.error.code(), ErrorCode::MaxRetentionExceeded);
    assert_eq!(rejection.state, PinState::UnrecoverableRejected);
    assert_eq!(harness.balance(), credits(100));
    assert_eq!(harness.used(), 0);
}

#[rstest]
#[tokio::test]
async fn extend_requires_owned_upload(harness: Harness) {
    let rejection = harness
        .orchestrator
        .extend(ExtendRequest {
            username: harness.alice(),
            hash: hash(),
            network: NetworkName::public(),
            months: 1,
        })
        .await
        .expect_err("nothing to extend");

    assert_eq!(rejection.error.code(), ErrorCode::UploadNotFound);
    assert_eq!(harness.balance(), credits(100));
}

#[rstest]
#[tokio::test]
async fn free_tier_cannot_extend(harness: Harness) {
    let carol = username("carol");
    harness
        .accounts
        .insert(&carol, Tier::Free, credits(100), BYTES_PER_GIB);

    let rejection = harness
        .orchestrator
        .extend(ExtendRequest {
            username: carol.clone(),
            hash: hash(),
            network: NetworkName::public(),
            months: 1,
        })
        .await
        .expect_err("free tier rejected");

    assert_eq!(rejection.error.code(), ErrorCode::Forbidden);
    assert_eq!(harness.accounts.balance_of(&carol), Some(credits(100)));
}

#[rstest]
#[tokio::test]
async fn extend_failure_after_debit_is_compensated(harness: Harness) {
    harness
        .orchestrator
        .pin(harness.pin_request(1))
        .await
        .expect("pin accepted");
    harness.reconcile_published().await;
    harness.uploads.fail_upserts(1);

    let rejection = harness
        .orchestrator
        .extend(ExtendRequest {
            username: harness.alice(),
            hash: hash(),
            network: NetworkName::public(),
            months: 1,
        })
        .await
        .expect_err("extend failed");

    assert_eq!(rejection.error.code(), ErrorCode::PinExtendFailed);
    assert_eq!(rejection.state, PinState::CompensatedRejected);
    assert_eq!(harness.balance(), credits(90));
    assert_eq!(harness.used(), BYTES_PER_GIB);
}

#[rstest]
#[tokio::test]
async fn add_file_stores_then_publishes_file_kind(harness: Harness) {
    let bytes = vec![7_u8; 4096];
    let expected_hash = InMemoryContentStore::hash_for(&bytes);

    let outcome = harness
        .orchestrator
        .add_file(AddFileRequest {
            username: harness.alice(),
            network: NetworkName::public(),
            bytes,
            hold_months: 2,
            encrypted: true,
        })
        .await
        .expect("file accepted");

    let PinOutcome::Published { hash, size_bytes, .. } = outcome else {
        panic!("expected a published outcome, got {outcome:?}");
    };
    assert_eq!(hash, expected_hash);
    assert_eq!(size_bytes, 4096);
    assert!(harness.store.contains(&expected_hash));
    let published = harness.queue.published();
    let message = published.first().expect("one message");
    assert_eq!(message.kind, UploadKind::File);
    assert!(message.encrypted);
    assert_eq!(harness.used(), 4096);
}

#[rstest]
#[tokio::test]
async fn add_file_rejects_oversized_content(harness: Harness) {
    let mut policy_harness = harness;
    policy_harness.orchestrator.policy.max_upload_bytes = 16;

    let rejection = policy_harness
        .orchestrator
        .add_file(AddFileRequest {
            username: policy_harness.alice(),
            network: NetworkName::public(),
            bytes: vec![0_u8; 17],
            hold_months: 1,
            encrypted: false,
        })
        .await
        .expect_err("oversized file rejected");

    assert_eq!(rejection.error.code(), ErrorCode::InvalidRequest);
    assert_eq!(rejection.state, PinState::UnrecoverableRejected);
}

#[rstest]
#[tokio::test]
async fn add_file_accepts_content_at_the_size_limit(harness: Harness) {
    let mut policy_harness = harness;
    policy_harness.orchestrator.policy.max_upload_bytes = 16;

    let outcome = policy_harness
        .orchestrator
        .add_file(AddFileRequest {
            username: policy_harness.alice(),
            network: NetworkName::public(),
            bytes: vec![7_u8; 16],
            hold_months: 1,
            encrypted: false,
        })
        .await
        .expect("file at the limit admitted");

    assert!(matches!(
        outcome,
        PinOutcome::Published { size_bytes: 16, .. }
    ));
    assert_eq!(policy_harness.used(), 16);
}

#[rstest]
#[tokio::test]
async fn add_file_storage_failure_is_compensated(harness: Harness) {
    harness.store.fail_adds(1);
    let bytes = vec![1_u8; 100];

    let rejection = harness
        .orchestrator
        .add_file(AddFileRequest {
            username: harness.alice(),
            network: NetworkName::public(),
            bytes: bytes.clone(),
            hold_months: 1,
            encrypted: false,
        })
        .await
        .expect_err("storage failure rejected");

    assert_eq!(rejection.error.code(), ErrorCode::StorageAddFailed);
    assert_eq!(rejection.state, PinState::CompensatedRejected);
    assert_eq!(harness.balance(), credits(100));
    assert_eq!(harness.used(), 0);
    let hash = InMemoryContentStore::hash_for(&bytes);
    assert!(!harness.uploads.is_reserved(&harness.alice(), &hash, &NetworkName::public()));
}

fn light_usage(name: &str) -> AccountUsage {
    AccountUsage {
        username: username(name),
        tier: Tier::Light,
        data_used_bytes: 0,
        data_limit_bytes: 10 * BYTES_PER_GIB,
        pubsub_messages_sent: 0,
        pubsub_messages_limit: 0,
    }
}

fn orchestrator_with(
    ledger: MockCreditLedger,
    usage: MockUsageMeter,
    publisher: MockPinPublisher,
) -> PinOrchestrator {
    let uploads = Arc::new(InMemoryUploadRepository::default());
    let store = Arc::new(InMemoryContentStore::default());
    store.insert(&hash(), BYTES_PER_GIB);
    let clock = Arc::new(MutableClock::new(now()));
    let reconciler = Arc::new(UploadReconciler::new(
        uploads.clone(),
        clock.clone(),
        RetentionPolicy::default(),
    ));
    PinOrchestrator::new(
        PinOrchestratorPorts {
            ledger: Arc::new(ledger),
            usage: Arc::new(usage),
            uploads,
            store: store as Arc<dyn ContentStore>,
            publisher: Arc::new(publisher),
        },
        reconciler,
        CostCalculator::new(prices(), 24),
        PinPolicy::default(),
        fast_compensation(),
        clock,
    )
}

fn expect_usage_lookup(usage: &mut MockUsageMeter) {
    usage
        .expect_find_usage()
        .returning(|username| Ok(light_usage(username.as_ref())));
    usage.expect_can_upload().returning(|_, _| Ok(()));
}

#[rstest]
#[tokio::test]
async fn ledger_outage_never_reaches_usage_commit() {
    let mut usage = MockUsageMeter::new();
    expect_usage_lookup(&mut usage);
    usage.expect_update_usage().never();
    usage.expect_reduce_usage().never();

    let mut ledger = MockCreditLedger::new();
    ledger
        .expect_debit()
        .times(1)
        .returning(|_, _| Err(CreditLedgerError::connection("refused")));
    ledger.expect_credit().never();

    let mut publisher = MockPinPublisher::new();
    publisher.expect_publish().never();

    let orchestrator = orchestrator_with(ledger, usage, publisher);
    let rejection = orchestrator
        .pin(PinRequest {
            username: username("alice"),
            hash: hash(),
            network: NetworkName::public(),
            hold_months: 1,
        })
        .await
        .expect_err("ledger outage rejected");

    assert_eq!(rejection.error.code(), ErrorCode::ServiceUnavailable);
    assert_eq!(rejection.state, PinState::UnrecoverableRejected);
}

#[rstest]
#[tokio::test]
async fn publish_failure_refunds_the_exact_debit() {
    let mut usage = MockUsageMeter::new();
    expect_usage_lookup(&mut usage);
    usage.expect_update_usage().times(1).returning(|_, _| Ok(()));
    usage
        .expect_reduce_usage()
        .withf(|_, bytes| *bytes == BYTES_PER_GIB)
        .times(1)
        .returning(|_, _| Ok(()));

    let mut ledger = MockCreditLedger::new();
    ledger
        .expect_debit()
        .withf(|_, amount| *amount == credits(10))
        .times(1)
        .returning(|_, _| Ok(credits(90)));
    ledger
        .expect_credit()
        .withf(|_, amount| *amount == credits(10))
        .times(1)
        .returning(|_, _| Ok(credits(100)));

    let mut publisher = MockPinPublisher::new();
    publisher
        .expect_publish()
        .times(1)
        .returning(|_| Err(PinQueueError::unavailable("broker down")));

    let orchestrator = orchestrator_with(ledger, usage, publisher);
    let rejection = orchestrator
        .pin(PinRequest {
            username: username("alice"),
            hash: hash(),
            network: NetworkName::public(),
            hold_months: 1,
        })
        .await
        .expect_err("publish failure rejected");

    assert_eq!(rejection.error.code(), ErrorCode::QueuePublishFailed);
    assert_eq!(rejection.state, PinState::CompensatedRejected);
}
