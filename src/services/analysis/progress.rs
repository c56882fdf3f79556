//! Analysis Progress
//!
//! Progress events for callers and the processed/ETA gauge of a full scan.

use std::time::{Duration, Instant};

use chronicle_core::AnalysisType;
use serde::Serialize;
use tokio::sync::mpsc;

/// Progress event emitted by the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AnalysisProgress {
    ScanStarted {
        subjects: usize,
        total_queued: usize,
    },
    CycleStarted {
        backend: String,
        claimed: usize,
    },
    GroupFinished {
        analysis_type: AnalysisType,
        completed: usize,
        failed: usize,
    },
    CycleFinished {
        completed: usize,
        failed: usize,
    },
    Progress(ProgressSnapshot),
    ScanFinished {
        processed: usize,
        cancelled: bool,
    },
}

pub type ProgressSender = mpsc::UnboundedSender<AnalysisProgress>;

/// Send an event if anyone is listening
pub fn emit(sender: Option<&ProgressSender>, event: AnalysisProgress) {
    if let Some(tx) = sender {
        // receiver gone means nobody is watching
        let _ = tx.send(event);
    }
}

/// Point-in-time view of a scan's progress
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub processed: usize,
    pub completed: usize,
    pub failed: usize,
    pub elapsed_secs: f64,
    pub eta_secs: Option<f64>,
}

impl ProgressSnapshot {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        (self.processed as f64 / self.total as f64 * 100.0).min(100.0)
    }
}

/// Linear-rate ETA: remaining / (processed / elapsed)
pub fn estimate_eta(processed: usize, total: usize, elapsed: Duration) -> Option<Duration> {
    if processed == 0 || elapsed.is_zero() {
        return None;
    }
    let remaining = total.saturating_sub(processed);
    let rate = processed as f64 / elapsed.as_secs_f64();
    Some(Duration::from_secs_f64(remaining as f64 / rate))
}

/// Accumulates cycle results over a scan
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    started: Instant,
    total: usize,
    completed: usize,
    failed: usize,
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        Self {
            started: Instant::now(),
            total,
            completed: 0,
            failed: 0,
        }
    }

    pub fn record(&mut self, completed: usize, failed: usize) {
        self.completed += completed;
        self.failed += failed;
    }

    pub fn processed(&self) -> usize {
        self.completed + self.failed
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.snapshot_at(self.started.elapsed())
    }

    fn snapshot_at(&self, elapsed: Duration) -> ProgressSnapshot {
        let processed = self.processed();
        ProgressSnapshot {
            total: self.total,
            processed,
            completed: self.completed,
            failed: self.failed,
            elapsed_secs: elapsed.as_secs_f64(),
            eta_secs: estimate_eta(processed, self.total, elapsed).map(|d| d.as_secs_f64()),
        }
    }
}

/// Orchestrator state for display
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OrchestratorStatus {
    pub is_processing: bool,
    pub owner_id: String,
    pub last_backend: Option<String>,
    pub last_error: Option<String>,
    pub progress: Option<ProgressSnapshot>,
}
