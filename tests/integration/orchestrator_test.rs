//! Orchestrator Integration Tests
//!
//! Drives `AnalysisOrchestrator` end-to-end against an in-memory database with
//! a fake remote provider and fixed CLI tool sets:
//! - Every claimed item ends completed or failed
//! - Missing results, oversized batches and backend errors
//! - Deduplication items never reach a backend
//! - Full scans, cancellation and consent gating
//!
//! No network calls are made.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chronicle_core::{
    AnalysisOutput, AnalysisType, Conversation, ConversationMessage, QueueItem, QueueStatus,
    ScanScope,
};
use chronicle_desktop::models::settings::{AnalysisSettings, RemoteProvider};
use chronicle_desktop::services::analysis::{
    AnalysisError, AnalysisOrchestrator, AnalysisProgress, BackendSelector, DetectedTool,
    FixedToolProbe, ToolCapabilities,
};
use chronicle_desktop::storage::database::{now_timestamp, Database};
use chronicle_llm::{LlmError, LlmResult, ProviderConfig, StructuredProvider, StructuredResponse};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Fake provider
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum Behavior {
    AnswerAll,
    DropLast,
    TooLargeAbove(usize),
    RateLimited,
}

struct FakeProvider {
    behavior: Behavior,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
    config: ProviderConfig,
}

impl FakeProvider {
    fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
            config: ProviderConfig::default(),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Ids of the payloads embedded at the end of a batch prompt
fn payload_ids(prompt: &str) -> Vec<String> {
    let body = prompt.rsplit("Conversations:\n").next().unwrap_or_default();
    let payloads: Vec<Value> = serde_json::from_str(body.trim()).unwrap();
    payloads
        .iter()
        .map(|p| p["id"].as_str().unwrap().to_string())
        .collect()
}

fn answer(ids: &[String]) -> String {
    let results: Vec<Value> = ids
        .iter()
        .map(|id| {
            json!({
                "id": id,
                "summary": format!("summary of {}", id),
                "topics": ["testing"],
                "workflows": [{ "name": "debug loop", "steps": ["run", "fix"] }],
                "learnings": [{ "category": "rust", "content": "borrowck wins", "confidence": 0.9 }],
            })
        })
        .collect();
    json!({ "results": results }).to_string()
}

#[async_trait]
impl StructuredProvider for FakeProvider {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn model(&self) -> &str {
        "fake-model"
    }

    async fn generate_structured(&self, prompt: &str, _schema: &Value) -> LlmResult<StructuredResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        let mut ids = payload_ids(prompt);

        let text = match self.behavior {
            Behavior::AnswerAll => answer(&ids),
            Behavior::DropLast => {
                ids.pop();
                answer(&ids)
            }
            Behavior::TooLargeAbove(max) if ids.len() > max => {
                return Err(LlmError::ContextLengthExceeded {
                    message: format!("{} conversations is too many", ids.len()),
                    max_tokens: None,
                })
            }
            Behavior::TooLargeAbove(_) => answer(&ids),
            Behavior::RateLimited => {
                return Err(LlmError::RateLimited {
                    message: "quota exhausted".to_string(),
                    retry_after: None,
                })
            }
        };

        Ok(StructuredResponse {
            text,
            model: "fake-model".to_string(),
            usage: None,
        })
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn remote_settings() -> AnalysisSettings {
    AnalysisSettings {
        external_analysis_enabled: true,
        remote_provider: RemoteProvider::Gemini,
        remote_api_key: Some("test-key".to_string()),
        ..AnalysisSettings::default()
    }
}

fn orchestrator_with(
    db: &Arc<Database>,
    tools: Vec<DetectedTool>,
    provider: Option<Arc<FakeProvider>>,
    settings: AnalysisSettings,
) -> AnalysisOrchestrator {
    let mut selector = BackendSelector::new(Arc::new(FixedToolProbe::new(tools)));
    if let Some(provider) = provider {
        let provider: Arc<dyn StructuredProvider> = provider;
        selector = selector.with_provider_factory(Arc::new(
            move |_config: ProviderConfig| -> Arc<dyn StructuredProvider> { provider.clone() },
        ));
    }
    AnalysisOrchestrator::with_selector(db.clone(), db.clone(), selector, settings)
}

fn seed_conversation(db: &Database, id: &str, provider: &str, updated_at: &str, messages: &[&str]) {
    db.upsert_conversation(&Conversation {
        id: id.to_string(),
        title: format!("Conversation {}", id),
        provider: provider.to_string(),
        project_path: Some("/work/app".to_string()),
        created_at: updated_at.to_string(),
        updated_at: updated_at.to_string(),
    })
    .unwrap();
    for (i, content) in messages.iter().enumerate() {
        db.insert_message(&ConversationMessage {
            id: format!("{}-m{}", id, i),
            conversation_id: id.to_string(),
            role: if i % 2 == 0 { "user" } else { "assistant" }.to_string(),
            content: content.to_string(),
            created_at: format!("2024-01-01T00:00:{:02}.000000Z", i),
        })
        .unwrap();
    }
}

fn seed_conversations(db: &Database, count: usize) -> Vec<String> {
    (0..count)
        .map(|i| {
            let id = format!("conv-{}", i);
            seed_conversation(
                db,
                &id,
                "claude_code",
                &format!("2024-02-{:02}T00:00:00.000000Z", i + 1),
                &["How do I fix this borrow error?", "Clone the Arc before moving it."],
            );
            id
        })
        .collect()
}

fn status_of(db: &Database, id: &str) -> QueueItem {
    db.get_queue_item(id).unwrap().unwrap()
}

fn count_status(db: &Database, status: QueueStatus) -> usize {
    db.count_queue_items_by_status()
        .unwrap()
        .into_iter()
        .find(|(s, _)| *s == status)
        .map(|(_, n)| n)
        .unwrap_or(0)
}

// ============================================================================
// Processing cycles
// ============================================================================

#[tokio::test]
async fn test_remote_cycle_completes_every_item() {
    let db = Arc::new(Database::new_in_memory().unwrap());
    let subjects = seed_conversations(&db, 3);
    let provider = FakeProvider::new(Behavior::AnswerAll);
    let orch = orchestrator_with(&db, vec![], Some(provider.clone()), remote_settings());

    let ids = orch
        .enqueue(&subjects, AnalysisType::Summarization, 0)
        .await
        .unwrap();
    let cycle = orch.process_queue(None, None).await.unwrap();

    assert_eq!(cycle.claimed, 3);
    assert_eq!(cycle.completed, 3);
    assert_eq!(cycle.failed, 0);
    assert_eq!(cycle.backend.as_deref(), Some("remote_api:fake"));
    assert_eq!(provider.calls(), 1);

    for id in &ids {
        let item = status_of(&db, id);
        assert_eq!(item.status, QueueStatus::Completed);
        assert_eq!(item.backend_used.as_deref(), Some("remote_api:fake"));
        assert_eq!(item.model_used.as_deref(), Some("fake-model"));
        match item.decoded_result() {
            Some(AnalysisOutput::Summarization(summary)) => {
                assert_eq!(summary.summary, format!("summary of {}", id));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    let status = orch.status().await;
    assert!(!status.is_processing);
    assert_eq!(status.last_backend.as_deref(), Some("remote_api:fake"));
}

#[tokio::test]
async fn test_missing_result_fails_only_that_item() {
    let db = Arc::new(Database::new_in_memory().unwrap());
    let subjects = seed_conversations(&db, 3);
    let orch = orchestrator_with(&db, vec![], Some(FakeProvider::new(Behavior::DropLast)), remote_settings());

    let ids = orch
        .enqueue(&subjects, AnalysisType::LearningExtraction, 0)
        .await
        .unwrap();
    let cycle = orch.process_queue(None, None).await.unwrap();

    assert_eq!((cycle.completed, cycle.failed), (2, 1));
    let failed = status_of(&db, &ids[2]);
    assert_eq!(failed.status, QueueStatus::Failed);
    assert!(failed.error_message.unwrap().contains("no result"));
    assert_eq!(status_of(&db, &ids[0]).status, QueueStatus::Completed);
}

#[tokio::test]
async fn test_oversized_batch_is_split_until_it_fits() {
    let db = Arc::new(Database::new_in_memory().unwrap());
    let subjects = seed_conversations(&db, 4);
    let provider = FakeProvider::new(Behavior::TooLargeAbove(2));
    let orch = orchestrator_with(&db, vec![], Some(provider.clone()), remote_settings());

    orch.enqueue(&subjects, AnalysisType::WorkflowDetection, 0)
        .await
        .unwrap();
    let cycle = orch.process_queue(None, None).await.unwrap();

    assert_eq!(cycle.completed, 4);
    assert_eq!(cycle.failed, 0);
    // one oversized attempt plus two halves
    assert_eq!(provider.calls(), 3);
    assert_eq!(count_status(&db, QueueStatus::Completed), 4);
}

#[tokio::test]
async fn test_backend_error_fails_group_and_records_last_error() {
    let db = Arc::new(Database::new_in_memory().unwrap());
    let subjects = seed_conversations(&db, 2);
    let orch = orchestrator_with(&db, vec![], Some(FakeProvider::new(Behavior::RateLimited)), remote_settings());

    let ids = orch
        .enqueue(&subjects, AnalysisType::Summarization, 0)
        .await
        .unwrap();
    let cycle = orch.process_queue(None, None).await.unwrap();

    assert_eq!((cycle.completed, cycle.failed), (0, 2));
    for id in &ids {
        let item = status_of(&db, id);
        assert_eq!(item.status, QueueStatus::Failed);
        assert!(item.error_message.unwrap().contains("quota exhausted"));
    }
    assert!(orch.last_error().await.unwrap().contains("quota exhausted"));
    assert_eq!(count_status(&db, QueueStatus::Claimed), 0);
}

#[tokio::test]
async fn test_deduplication_items_fail_without_backend_call() {
    let db = Arc::new(Database::new_in_memory().unwrap());
    seed_conversations(&db, 1);
    let provider = FakeProvider::new(Behavior::AnswerAll);
    let orch = orchestrator_with(&db, vec![], Some(provider.clone()), remote_settings());

    let dedupe = QueueItem::new("dedupe-1", "conv-0", AnalysisType::Deduplication, 0, now_timestamp());
    db.insert_queue_item(&dedupe).unwrap();

    let cycle = orch.process_queue(None, None).await.unwrap();
    assert_eq!((cycle.claimed, cycle.failed), (1, 1));
    assert_eq!(provider.calls(), 0);
    assert_eq!(status_of(&db, "dedupe-1").status, QueueStatus::Failed);
}

#[tokio::test]
async fn test_missing_conversation_fails_only_its_item() {
    let db = Arc::new(Database::new_in_memory().unwrap());
    let mut subjects = seed_conversations(&db, 2);
    subjects.push("ghost".to_string());
    let orch = orchestrator_with(&db, vec![], Some(FakeProvider::new(Behavior::AnswerAll)), remote_settings());

    let ids = orch
        .enqueue(&subjects, AnalysisType::Summarization, 0)
        .await
        .unwrap();
    let cycle = orch.process_queue(None, None).await.unwrap();

    assert_eq!((cycle.completed, cycle.failed), (2, 1));
    let ghost = status_of(&db, &ids[2]);
    assert!(ghost.error_message.unwrap().contains("conversation not found"));
}

#[tokio::test]
async fn test_secrets_never_reach_the_backend() {
    let db = Arc::new(Database::new_in_memory().unwrap());
    seed_conversation(
        &db,
        "leaky",
        "cursor",
        "2024-03-01T00:00:00.000000Z",
        &["my key is sk-abcdefghijklmnopqrstuvwxyz012345 and mail me at dev@example.com"],
    );
    let provider = FakeProvider::new(Behavior::AnswerAll);
    let orch = orchestrator_with(&db, vec![], Some(provider.clone()), remote_settings());

    orch.enqueue(&["leaky".to_string()], AnalysisType::Summarization, 0)
        .await
        .unwrap();
    orch.process_queue(None, None).await.unwrap();

    let prompts = provider.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 1);
    assert!(!prompts[0].contains("sk-abcdefghij"));
    assert!(!prompts[0].contains("dev@example.com"));
    assert!(prompts[0].contains("[API_KEY]"));
}

#[tokio::test]
async fn test_batch_size_bounds_each_cycle() {
    let db = Arc::new(Database::new_in_memory().unwrap());
    let subjects = seed_conversations(&db, 5);
    let orch = orchestrator_with(&db, vec![], Some(FakeProvider::new(Behavior::AnswerAll)), remote_settings());

    orch.enqueue(&subjects, AnalysisType::Summarization, 0)
        .await
        .unwrap();
    let cycle = orch.process_queue(Some(2), None).await.unwrap();

    assert_eq!(cycle.claimed, 2);
    assert_eq!(cycle.completed + cycle.failed, cycle.claimed);
    assert_eq!(orch.pending_count().await.unwrap(), 3);
}

#[tokio::test]
async fn test_consent_off_never_selects_backend() {
    let db = Arc::new(Database::new_in_memory().unwrap());
    let subjects = seed_conversations(&db, 2);
    let provider = FakeProvider::new(Behavior::AnswerAll);
    let settings = AnalysisSettings {
        external_analysis_enabled: false,
        ..remote_settings()
    };
    let orch = orchestrator_with(&db, vec![], Some(provider.clone()), settings);

    orch.enqueue(&subjects, AnalysisType::Summarization, 0)
        .await
        .unwrap();
    let err = orch.process_queue(None, None).await.unwrap_err();

    assert!(matches!(err, AnalysisError::NoBackendAvailable(_)));
    assert_eq!(provider.calls(), 0);
    assert_eq!(orch.pending_count().await.unwrap(), 2);
    assert_eq!(count_status(&db, QueueStatus::Claimed), 0);
}

#[cfg(unix)]
#[tokio::test]
async fn test_local_cli_cycle_parses_json_envelope() {
    let db = Arc::new(Database::new_in_memory().unwrap());
    let subjects = seed_conversations(&db, 2);

    // Build the orchestrator first so the tool can answer with known ids.
    let placeholder = orchestrator_with(&db, vec![], None, AnalysisSettings::default());
    let ids = placeholder
        .enqueue(&subjects, AnalysisType::Summarization, 0)
        .await
        .unwrap();

    let envelope = json!({
        "type": "result",
        "subtype": "success",
        "result": format!("```json\n{}\n```", answer(&ids)),
    })
    .to_string();
    let tool = DetectedTool {
        name: "claude".to_string(),
        path: "/bin/sh".into(),
        capabilities: ToolCapabilities::FULL,
        args: vec![
            "-c".to_string(),
            format!("cat > /dev/null; printf '%s' '{}'", envelope),
        ],
    };
    let settings = AnalysisSettings {
        external_analysis_enabled: true,
        ..AnalysisSettings::default()
    };
    let orch = orchestrator_with(&db, vec![tool], None, settings);

    let cycle = orch.process_queue(None, None).await.unwrap();
    assert_eq!(cycle.backend.as_deref(), Some("local_cli:claude"));
    assert_eq!((cycle.completed, cycle.failed), (2, 0));

    let item = status_of(&db, &ids[0]);
    assert_eq!(item.backend_used.as_deref(), Some("local_cli:claude"));
    assert_eq!(item.model_used, None);
}

// ============================================================================
// Full scan
// ============================================================================

#[tokio::test]
async fn test_full_scan_processes_everything_and_reports_progress() {
    let db = Arc::new(Database::new_in_memory().unwrap());
    seed_conversations(&db, 3);
    let settings = AnalysisSettings {
        batch_size: 4,
        ..remote_settings()
    };
    let orch = orchestrator_with(&db, vec![], Some(FakeProvider::new(Behavior::AnswerAll)), settings);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let summary = orch
        .run_full_scan(
            &[AnalysisType::Summarization, AnalysisType::LearningExtraction],
            &ScanScope::default(),
            &CancellationToken::new(),
            Some(&tx),
        )
        .await
        .unwrap();

    assert_eq!(summary.subjects, 3);
    assert_eq!(summary.total_queued, 6);
    assert_eq!(summary.completed, 6);
    assert_eq!(summary.cycles, 2);
    assert!(!summary.cancelled);
    assert_eq!(orch.pending_count().await.unwrap(), 0);

    drop(tx);
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    assert!(matches!(events.first(), Some(AnalysisProgress::ScanStarted { total_queued: 6, .. })));
    assert!(matches!(
        events.last(),
        Some(AnalysisProgress::ScanFinished { processed: 6, cancelled: false })
    ));
    let last_progress = events
        .iter()
        .filter_map(|e| match e {
            AnalysisProgress::Progress(snapshot) => Some(snapshot.clone()),
            _ => None,
        })
        .last()
        .unwrap();
    assert_eq!(last_progress.processed, 6);
    assert_eq!(orch.status().await.progress.unwrap().processed, 6);
}

#[tokio::test]
async fn test_full_scan_respects_scope() {
    let db = Arc::new(Database::new_in_memory().unwrap());
    seed_conversation(&db, "old", "claude_code", "2023-01-01T00:00:00.000000Z", &["hi"]);
    seed_conversation(&db, "new", "claude_code", "2024-06-01T00:00:00.000000Z", &["hi"]);
    seed_conversation(&db, "other", "cursor", "2024-06-01T00:00:00.000000Z", &["hi"]);
    let orch = orchestrator_with(&db, vec![], Some(FakeProvider::new(Behavior::AnswerAll)), remote_settings());

    let scope = ScanScope {
        since: Some("2024-01-01T00:00:00.000000Z".to_string()),
        providers: vec!["claude_code".to_string()],
        ..ScanScope::default()
    };
    let summary = orch
        .run_full_scan(&[AnalysisType::Summarization], &scope, &CancellationToken::new(), None)
        .await
        .unwrap();

    assert_eq!(summary.subjects, 1);
    assert_eq!(summary.completed, 1);
}

#[tokio::test]
async fn test_cancelled_scan_stops_before_processing() {
    let db = Arc::new(Database::new_in_memory().unwrap());
    seed_conversations(&db, 2);
    let provider = FakeProvider::new(Behavior::AnswerAll);
    let orch = orchestrator_with(&db, vec![], Some(provider.clone()), remote_settings());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let summary = orch
        .run_full_scan(&[AnalysisType::Summarization], &ScanScope::default(), &cancel, None)
        .await
        .unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.cycles, 0);
    assert_eq!(provider.calls(), 0);
    assert_eq!(orch.pending_count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_full_scan_without_backend_enqueues_nothing() {
    let db = Arc::new(Database::new_in_memory().unwrap());
    seed_conversations(&db, 2);
    let orch = orchestrator_with(&db, vec![], None, AnalysisSettings::default());

    let err = orch
        .run_full_scan(
            &[AnalysisType::Summarization],
            &ScanScope::default(),
            &CancellationToken::new(),
            None,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AnalysisError::NoBackendAvailable(_)));
    assert_eq!(orch.pending_count().await.unwrap(), 0);
}

// ============================================================================
// Recovery
// ============================================================================

#[tokio::test]
async fn test_recover_orphaned_claims_and_retry() {
    let db = Arc::new(Database::new_in_memory().unwrap());
    let subjects = seed_conversations(&db, 3);
    let orch = orchestrator_with(&db, vec![], Some(FakeProvider::new(Behavior::AnswerAll)), remote_settings());

    let ids = orch
        .enqueue(&subjects, AnalysisType::Summarization, 0)
        .await
        .unwrap();
    // a crashed session left two items claimed
    db.claim_queue_items(2, "crashed-session").unwrap();

    assert_eq!(orch.recover_orphaned_claims().await.unwrap(), 2);
    assert_eq!(count_status(&db, QueueStatus::Claimed), 0);
    assert_eq!(count_status(&db, QueueStatus::Failed), 2);

    let retried = orch.retry_failed(&ids).await.unwrap();
    assert_eq!(retried.len(), 2);
    assert_eq!(orch.pending_count().await.unwrap(), 3);

    let cycle = orch.process_queue(None, None).await.unwrap();
    assert_eq!(cycle.completed, 3);
}
