//! Queue Store Integration Tests
//!
//! Exercises the SQLite `QueueStore` implementation through the trait:
//! - Claim ordering by priority, then creation order
//! - Claims never hand out the same item twice
//! - Completion and failure only apply to claimed items
//! - Orphaned claims from a previous owner are failed

use std::collections::HashSet;
use std::sync::Arc;

use chronicle_core::{AnalysisType, QueueItem, QueueStatus};
use chronicle_desktop::services::analysis::QueueStore;
use chronicle_desktop::storage::database::Database;

// ============================================================================
// Helpers
// ============================================================================

fn create_test_db() -> Arc<Database> {
    Arc::new(Database::new_in_memory().expect("Failed to create in-memory test database"))
}

fn item(id: &str, priority: i64, created_at: &str) -> QueueItem {
    QueueItem::new(id, format!("conv-{}", id), AnalysisType::Summarization, priority, created_at)
}

async fn seed(store: &dyn QueueStore, items: &[QueueItem]) {
    for item in items {
        store.insert(item).await.unwrap();
    }
}

// ============================================================================
// Claiming
// ============================================================================

#[tokio::test]
async fn test_claim_orders_by_priority_then_age() {
    let db = create_test_db();
    seed(
        db.as_ref(),
        &[
            item("low-old", 0, "2024-01-01T00:00:00.000000Z"),
            item("high-new", 5, "2024-01-03T00:00:00.000000Z"),
            item("high-old", 5, "2024-01-02T00:00:00.000000Z"),
            item("low-new", 0, "2024-01-04T00:00:00.000000Z"),
        ],
    )
    .await;

    let claimed = db.claim_pending(3, "owner-a").await.unwrap();
    let ids: Vec<&str> = claimed.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["high-old", "high-new", "low-old"]);
    assert!(claimed.iter().all(|i| i.status == QueueStatus::Claimed));
    assert!(claimed.iter().all(|i| i.claimed_by.as_deref() == Some("owner-a")));
    assert!(claimed.iter().all(|i| i.attempt_count == 1));

    assert_eq!(db.pending_count().await.unwrap(), 1);
    let pending = db.fetch_pending().await.unwrap();
    assert_eq!(pending[0].id, "low-new");
}

#[tokio::test]
async fn test_sequential_claims_are_disjoint() {
    let db = create_test_db();
    let items: Vec<QueueItem> = (0..10)
        .map(|i| item(&format!("q{}", i), 0, &format!("2024-01-01T00:00:{:02}.000000Z", i)))
        .collect();
    seed(db.as_ref(), &items).await;

    let first = db.claim_pending(4, "a").await.unwrap();
    let second = db.claim_pending(4, "b").await.unwrap();
    let third = db.claim_pending(4, "c").await.unwrap();
    assert_eq!((first.len(), second.len(), third.len()), (4, 4, 2));

    let all: HashSet<String> = first
        .iter()
        .chain(second.iter())
        .chain(third.iter())
        .map(|i| i.id.clone())
        .collect();
    assert_eq!(all.len(), 10);
    assert!(db.claim_pending(4, "d").await.unwrap().is_empty());
}

#[test]
fn test_concurrent_claims_on_file_database_never_overlap() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path().join("data.db")).unwrap();
    for i in 0..40 {
        db.insert_queue_item(&item(&format!("q{:02}", i), 0, &format!("2024-01-01T00:00:{:02}.000000Z", i)))
            .unwrap();
    }

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let db = db.clone();
            std::thread::spawn(move || {
                let mut mine = Vec::new();
                loop {
                    let batch = db.claim_queue_items(3, &format!("worker-{}", worker)).unwrap();
                    if batch.is_empty() {
                        break;
                    }
                    mine.extend(batch.into_iter().map(|i| i.id));
                }
                mine
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        for id in handle.join().unwrap() {
            assert!(seen.insert(id.clone()), "{} claimed twice", id);
        }
    }
    assert_eq!(seen.len(), 40);
}

#[tokio::test]
async fn test_claim_zero_is_noop() {
    let db = create_test_db();
    seed(db.as_ref(), &[item("q1", 0, "2024-01-01T00:00:00.000000Z")]).await;
    assert!(db.claim_pending(0, "a").await.unwrap().is_empty());
    assert_eq!(db.pending_count().await.unwrap(), 1);
}

// ============================================================================
// Resolution
// ============================================================================

#[tokio::test]
async fn test_complete_and_fail_only_apply_to_claimed_items() {
    let db = create_test_db();
    seed(
        db.as_ref(),
        &[
            item("done", 0, "2024-01-01T00:00:00.000000Z"),
            item("broken", 0, "2024-01-01T00:00:01.000000Z"),
            item("waiting", 0, "2024-01-01T00:00:02.000000Z"),
        ],
    )
    .await;
    db.claim_pending(2, "a").await.unwrap();

    // pending items cannot skip the claim
    assert!(!db.mark_completed("waiting", "{}", "local_cli:claude", None).await.unwrap());
    assert!(!db.mark_failed("waiting", "nope").await.unwrap());

    let payload = r#"{"type":"summarization","summary":"ok","topics":[]}"#;
    assert!(db
        .mark_completed("done", payload, "remote_api:gemini", Some("gemini-2.0-flash"))
        .await
        .unwrap());
    assert!(db.mark_failed("broken", "backend exploded").await.unwrap());

    // terminal states never move again
    assert!(!db.mark_failed("done", "late").await.unwrap());
    assert!(!db.mark_completed("broken", payload, "x", None).await.unwrap());

    let done = db.get("done").await.unwrap().unwrap();
    assert_eq!(done.status, QueueStatus::Completed);
    assert_eq!(done.backend_used.as_deref(), Some("remote_api:gemini"));
    assert_eq!(done.model_used.as_deref(), Some("gemini-2.0-flash"));
    assert!(done.decoded_result().is_some());

    let broken = db.get("broken").await.unwrap().unwrap();
    assert_eq!(broken.status, QueueStatus::Failed);
    assert_eq!(broken.error_message.as_deref(), Some("backend exploded"));

    assert!(db.get("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_fail_orphaned_claims_spares_current_owner() {
    let db = create_test_db();
    let items: Vec<QueueItem> = (0..4)
        .map(|i| item(&format!("q{}", i), 0, &format!("2024-01-01T00:00:0{}.000000Z", i)))
        .collect();
    seed(db.as_ref(), &items).await;

    db.claim_pending(2, "previous-session").await.unwrap();
    db.claim_pending(1, "current-session").await.unwrap();

    let failed = db
        .fail_orphaned_claims("current-session", "claim abandoned")
        .await
        .unwrap();
    assert_eq!(failed, 2);

    let counts = db.count_queue_items_by_status().unwrap();
    let count_of = |status: QueueStatus| {
        counts
            .iter()
            .find(|(s, _)| *s == status)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    };
    assert_eq!(count_of(QueueStatus::Failed), 2);
    assert_eq!(count_of(QueueStatus::Claimed), 1);
    assert_eq!(count_of(QueueStatus::Pending), 1);
}
