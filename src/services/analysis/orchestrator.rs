//! Analysis Orchestrator
//!
//! Drives the queue: select a backend, claim a batch, prepare payloads, run the
//! backend with adaptive splitting, and map results back onto the items. Every
//! claimed item ends the cycle completed or failed.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chronicle_core::{AnalysisType, QueueItem, QueueStatus, ScanScope};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::backend::AnalysisBackend;
use super::cli_tools::CliToolProbe;
use super::error::{AnalysisError, AnalysisResult};
use super::mapper::{apply_failures, map_results, MappingSummary};
use super::payload::{self, apply_budget, ItemFailure, PayloadLimits};
use super::progress::{
    emit, AnalysisProgress, OrchestratorStatus, ProgressSender, ProgressSnapshot, ProgressTracker,
};
use super::selector::{unavailable_reason, BackendSelector};
use super::splitter::run_with_adaptive_split;
use super::store::{ConversationStore, QueueStore};
use crate::models::settings::AnalysisSettings;
use crate::storage::database::now_timestamp;
use crate::utils::error::AppError;

pub const DEDUPLICATION_REASON: &str =
    "deduplication is not processed by the conversation analysis queue";
pub const DROPPED_REASON: &str = "dropped due to truncation: does not fit the request budget";
pub const ORPHANED_REASON: &str = "claim abandoned by a previous session";

/// Result of one claim-and-process cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    pub backend: Option<String>,
    pub claimed: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Result of a full scan
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanSummary {
    pub subjects: usize,
    pub total_queued: usize,
    pub cycles: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: bool,
}

/// Resets the processing flag when a run ends, however it ends
struct ProcessingGuard<'a>(&'a AtomicBool);

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct AnalysisOrchestrator {
    queue: Arc<dyn QueueStore>,
    conversations: Arc<dyn ConversationStore>,
    selector: BackendSelector,
    settings: RwLock<AnalysisSettings>,
    owner_id: String,
    is_processing: AtomicBool,
    last_error: RwLock<Option<String>>,
    last_backend: RwLock<Option<String>>,
    progress: RwLock<Option<ProgressSnapshot>>,
}

impl AnalysisOrchestrator {
    pub fn new(
        queue: Arc<dyn QueueStore>,
        conversations: Arc<dyn ConversationStore>,
        probe: Arc<dyn CliToolProbe>,
        settings: AnalysisSettings,
    ) -> Self {
        Self::with_selector(queue, conversations, BackendSelector::new(probe), settings)
    }

    pub fn with_selector(
        queue: Arc<dyn QueueStore>,
        conversations: Arc<dyn ConversationStore>,
        selector: BackendSelector,
        settings: AnalysisSettings,
    ) -> Self {
        Self {
            queue,
            conversations,
            selector,
            settings: RwLock::new(settings),
            owner_id: Uuid::new_v4().to_string(),
            is_processing: AtomicBool::new(false),
            last_error: RwLock::new(None),
            last_backend: RwLock::new(None),
            progress: RwLock::new(None),
        }
    }

    /// Claim owner id of this session
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub async fn settings(&self) -> AnalysisSettings {
        self.settings.read().await.clone()
    }

    /// Replace the settings used from the next cycle on
    pub async fn update_settings(&self, settings: AnalysisSettings) -> AnalysisResult<()> {
        settings.validate().map_err(AppError::validation)?;
        *self.settings.write().await = settings;
        Ok(())
    }

    pub async fn last_error(&self) -> Option<String> {
        self.last_error.read().await.clone()
    }

    pub async fn status(&self) -> OrchestratorStatus {
        OrchestratorStatus {
            is_processing: self.is_processing.load(Ordering::SeqCst),
            owner_id: self.owner_id.clone(),
            last_backend: self.last_backend.read().await.clone(),
            last_error: self.last_error.read().await.clone(),
            progress: self.progress.read().await.clone(),
        }
    }

    pub async fn pending_count(&self) -> AnalysisResult<usize> {
        Ok(self.queue.pending_count().await?)
    }

    // ========================================================================
    // Queueing
    // ========================================================================

    /// Queue `analysis_type` for each subject. Returns the new item ids.
    pub async fn enqueue(
        &self,
        subject_ids: &[String],
        analysis_type: AnalysisType,
        priority: i64,
    ) -> AnalysisResult<Vec<String>> {
        if !analysis_type.is_conversation_scoped() {
            return Err(AnalysisError::queue(format!(
                "{} cannot be queued per conversation",
                analysis_type
            )));
        }
        if subject_ids.iter().any(|s| s.trim().is_empty()) {
            return Err(AnalysisError::queue("subject id must not be empty"));
        }

        let mut ids = Vec::with_capacity(subject_ids.len());
        for subject_id in subject_ids {
            let item = QueueItem::new(
                Uuid::new_v4().to_string(),
                subject_id.as_str(),
                analysis_type,
                priority,
                now_timestamp(),
            );
            self.queue.insert(&item).await?;
            ids.push(item.id);
        }

        debug!(
            count = ids.len(),
            analysis_type = %analysis_type,
            priority,
            "[AnalysisQueue] Enqueued items"
        );
        Ok(ids)
    }

    /// Re-enqueue failed items as new pending items. Ids that are unknown or
    /// not failed are skipped.
    pub async fn retry_failed(&self, item_ids: &[String]) -> AnalysisResult<Vec<String>> {
        let mut new_ids = Vec::new();
        for id in item_ids {
            match self.queue.get(id).await? {
                Some(item) if item.status == QueueStatus::Failed => {
                    let retry = QueueItem::new(
                        Uuid::new_v4().to_string(),
                        item.subject_id,
                        item.analysis_type,
                        item.priority,
                        now_timestamp(),
                    );
                    self.queue.insert(&retry).await?;
                    new_ids.push(retry.id);
                }
                Some(item) => {
                    debug!(item_id = %id, status = %item.status, "[AnalysisQueue] Not failed, skipping retry");
                }
                None => {
                    debug!(item_id = %id, "[AnalysisQueue] Unknown item, skipping retry");
                }
            }
        }
        Ok(new_ids)
    }

    /// Fail items left claimed by a previous session.
    pub async fn recover_orphaned_claims(&self) -> AnalysisResult<usize> {
        let count = self
            .queue
            .fail_orphaned_claims(&self.owner_id, ORPHANED_REASON)
            .await?;
        if count > 0 {
            warn!(count, "[AnalysisQueue] Failed orphaned claims from a previous session");
        }
        Ok(count)
    }

    // ========================================================================
    // Processing
    // ========================================================================

    fn begin_processing(&self) -> AnalysisResult<ProcessingGuard<'_>> {
        self.is_processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| AnalysisError::queue("analysis is already running"))?;
        Ok(ProcessingGuard(&self.is_processing))
    }

    async fn record_error(&self, err: &AnalysisError) {
        *self.last_error.write().await = Some(err.to_string());
    }

    async fn select_backend(
        &self,
        settings: &AnalysisSettings,
    ) -> AnalysisResult<Arc<dyn AnalysisBackend>> {
        match self.selector.select_for_cycle(settings).await {
            Some(backend) => Ok(backend),
            None => {
                let err = AnalysisError::NoBackendAvailable(unavailable_reason(settings).to_string());
                self.record_error(&err).await;
                Err(err)
            }
        }
    }

    /// Run one cycle over at most `batch_size` items (settings default when `None`).
    pub async fn process_queue(
        &self,
        batch_size: Option<usize>,
        progress: Option<&ProgressSender>,
    ) -> AnalysisResult<CycleSummary> {
        let _guard = self.begin_processing()?;
        let settings = self.settings().await;
        let backend = self.select_backend(&settings).await?;
        let batch_size = batch_size.unwrap_or(settings.batch_size);
        self.run_cycle(backend, batch_size, &PayloadLimits::from(&settings), progress)
            .await
    }

    async fn run_cycle(
        &self,
        backend: Arc<dyn AnalysisBackend>,
        batch_size: usize,
        limits: &PayloadLimits,
        progress: Option<&ProgressSender>,
    ) -> AnalysisResult<CycleSummary> {
        let label = backend.label();
        let claimed = self.queue.claim_pending(batch_size, &self.owner_id).await?;
        let mut cycle = CycleSummary {
            backend: Some(label.clone()),
            claimed: claimed.len(),
            ..Default::default()
        };
        if claimed.is_empty() {
            return Ok(cycle);
        }

        info!(backend = %label, cycle.claimed = claimed.len(), "[AnalysisQueue] Claimed batch");
        *self.last_backend.write().await = Some(label.clone());
        emit(
            progress,
            AnalysisProgress::CycleStarted {
                backend: label,
                claimed: claimed.len(),
            },
        );

        let mut totals = MappingSummary::default();

        let (dedupe, rest): (Vec<QueueItem>, Vec<QueueItem>) = claimed
            .into_iter()
            .partition(|item| item.analysis_type == AnalysisType::Deduplication);
        let mut store_error: Option<AnalysisError> = None;
        if !dedupe.is_empty() {
            let failures: Vec<ItemFailure> = dedupe
                .iter()
                .map(|item| ItemFailure::new(&item.id, DEDUPLICATION_REASON))
                .collect();
            match apply_failures(self.queue.as_ref(), &failures).await {
                Ok(applied) => totals.merge(applied),
                Err(e) => {
                    warn!(error = %e, "[AnalysisQueue] Could not fail deduplication items");
                    self.record_error(&e).await;
                    store_error.get_or_insert(e);
                }
            }
        }

        for (analysis_type, items) in group_by_type(rest) {
            let mut group = MappingSummary::default();
            if let Err(e) = self
                .process_group(&backend, analysis_type, &items, limits, &mut group)
                .await
            {
                warn!(
                    analysis_type = %analysis_type,
                    items = items.len(),
                    error = %e,
                    "[AnalysisQueue] Group failed"
                );
                self.record_error(&e).await;
                let reason = e.to_string();
                let failures: Vec<ItemFailure> = items
                    .iter()
                    .map(|item| ItemFailure::new(&item.id, &reason))
                    .collect();
                match apply_failures(self.queue.as_ref(), &failures).await {
                    Ok(applied) => group.merge(applied),
                    Err(store_err) => {
                        // Later groups still get resolved; the first store error is returned.
                        warn!(
                            analysis_type = %analysis_type,
                            error = %store_err,
                            "[AnalysisQueue] Could not fail group items"
                        );
                        self.record_error(&store_err).await;
                        store_error.get_or_insert(store_err);
                    }
                }
            }

            emit(
                progress,
                AnalysisProgress::GroupFinished {
                    analysis_type,
                    completed: group.completed,
                    failed: group.failed,
                },
            );
            totals.merge(group);
        }

        if let Some(err) = store_error {
            return Err(err);
        }

        cycle.completed = totals.completed;
        cycle.failed = totals.failed;
        info!(
            cycle.completed = cycle.completed,
            cycle.failed = cycle.failed,
            "[AnalysisQueue] Cycle finished"
        );
        emit(
            progress,
            AnalysisProgress::CycleFinished {
                completed: cycle.completed,
                failed: cycle.failed,
            },
        );
        Ok(cycle)
    }

    async fn process_group(
        &self,
        backend: &Arc<dyn AnalysisBackend>,
        analysis_type: AnalysisType,
        items: &[QueueItem],
        limits: &PayloadLimits,
        summary: &mut MappingSummary,
    ) -> AnalysisResult<()> {
        let queue = self.queue.as_ref();

        let prepared = payload::prepare(
            self.conversations.as_ref(),
            items,
            analysis_type,
            limits,
            backend.truncation_mode(),
        )
        .await?;
        summary.merge(apply_failures(queue, &prepared.failures).await?);

        let mut payloads = prepared.payloads;
        if let Some(budget) = backend.request_budget_tokens() {
            let outcome = apply_budget(payloads, budget, limits);
            let dropped: Vec<ItemFailure> = outcome
                .dropped
                .iter()
                .map(|id| ItemFailure::new(id, DROPPED_REASON))
                .collect();
            summary.merge(apply_failures(queue, &dropped).await?);
            payloads = outcome.included;
        }
        if payloads.is_empty() {
            return Ok(());
        }

        let sent: HashSet<String> = payloads.iter().map(|p| p.id.clone()).collect();
        let runner = Arc::clone(backend);
        let split = run_with_adaptive_split(payloads, move |batch| {
            let runner = Arc::clone(&runner);
            async move { runner.execute(analysis_type, &batch).await }
        })
        .await?;
        if split.invocations > 1 {
            debug!(
                invocations = split.invocations,
                failed = split.failures.len(),
                "[AnalysisQueue] Batch was split"
            );
        }
        summary.merge(apply_failures(queue, &split.failures).await?);

        let split_failed: HashSet<&str> = split.failures.iter().map(|f| f.item_id.as_str()).collect();
        let remaining: Vec<QueueItem> = items
            .iter()
            .filter(|item| sent.contains(&item.id) && !split_failed.contains(item.id.as_str()))
            .cloned()
            .collect();

        summary.merge(
            map_results(
                queue,
                &split.output,
                &remaining,
                analysis_type,
                &backend.label(),
                backend.model(),
            )
            .await?,
        );
        Ok(())
    }

    // ========================================================================
    // Full scan
    // ========================================================================

    /// Queue every subject in `scope` for each of `types`, then process until
    /// nothing is pending. `cancel` is checked between cycles.
    pub async fn run_full_scan(
        &self,
        types: &[AnalysisType],
        scope: &ScanScope,
        cancel: &CancellationToken,
        progress: Option<&ProgressSender>,
    ) -> AnalysisResult<ScanSummary> {
        if types.is_empty() {
            return Err(AnalysisError::queue("no analysis types requested"));
        }
        if let Some(t) = types.iter().find(|t| !t.is_conversation_scoped()) {
            return Err(AnalysisError::queue(format!(
                "{} cannot be queued per conversation",
                t
            )));
        }

        let _guard = self.begin_processing()?;

        // Nothing is enqueued when no backend can run.
        let settings = self.settings().await;
        self.select_backend(&settings).await?;

        let subjects = self.conversations.list_subjects(scope).await?;
        let total_queued = subjects.len() * types.len();
        for analysis_type in types {
            self.enqueue(&subjects, *analysis_type, 0).await?;
        }
        info!(
            subjects = subjects.len(),
            total_queued,
            "[AnalysisQueue] Full scan queued"
        );
        emit(
            progress,
            AnalysisProgress::ScanStarted {
                subjects: subjects.len(),
                total_queued,
            },
        );

        let mut tracker = ProgressTracker::new(total_queued);
        *self.progress.write().await = Some(tracker.snapshot());
        let mut summary = ScanSummary {
            subjects: subjects.len(),
            total_queued,
            ..Default::default()
        };

        loop {
            if cancel.is_cancelled() {
                info!("[AnalysisQueue] Full scan cancelled");
                summary.cancelled = true;
                break;
            }
            if self.queue.pending_count().await? == 0 {
                break;
            }

            let settings = self.settings().await;
            let backend = self.select_backend(&settings).await?;
            let cycle = self
                .run_cycle(backend, settings.batch_size, &PayloadLimits::from(&settings), progress)
                .await?;
            if cycle.claimed == 0 {
                break;
            }

            summary.cycles += 1;
            tracker.record(cycle.completed, cycle.failed);
            let snapshot = tracker.snapshot();
            *self.progress.write().await = Some(snapshot.clone());
            emit(progress, AnalysisProgress::Progress(snapshot));
        }

        summary.completed = tracker.snapshot().completed;
        summary.failed = tracker.snapshot().failed;
        emit(
            progress,
            AnalysisProgress::ScanFinished {
                processed: tracker.processed(),
                cancelled: summary.cancelled,
            },
        );
        Ok(summary)
    }
}

/// Group items by analysis type, keeping first-seen order
fn group_by_type(items: Vec<QueueItem>) -> Vec<(AnalysisType, Vec<QueueItem>)> {
    let mut groups: Vec<(AnalysisType, Vec<QueueItem>)> = Vec::new();
    for item in items {
        match groups.iter_mut().find(|(t, _)| *t == item.analysis_type) {
            Some((_, group)) => group.push(item),
            None => groups.push((item.analysis_type, vec![item])),
        }
    }
    groups
}
