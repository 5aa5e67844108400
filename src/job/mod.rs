//! Job orchestration.
//!
//! Analysis and model generation share one state machine:
//!
//! ```text
//!            start
//!   Idle ───────────► Running ──┬──► Complete
//!                               ├──► Error
//!                               └──► Cancelled
//! ```
//!
//! A [`JobHandle`] owns the live state of one job: its snapshot, its ordered
//! event log and its [`CancellationToken`]. Terminal transitions happen once;
//! later attempts are ignored.

mod analysis;
mod handle;
mod model;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::mesh::ModelSummary;
use crate::stats::AnalysisResult;

pub use analysis::{AnalysisJobController, DEFAULT_ANALYSIS_WORKERS};
pub use handle::{JobEvents, JobHandle};
pub use model::{
    ModelJobController, ModelState, ModelStatus, DEFAULT_INCLUDED_TISSUES, DEFAULT_MODEL_WORKERS,
};

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique job identifier.
pub(crate) fn next_job_id() -> u64 {
    NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed)
}

// =============================================================================
// Cancellation
// =============================================================================

/// Cooperative cancellation flag shared between a job and its controllers.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

// =============================================================================
// Job snapshot
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Analysis,
    Model,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Idle,
    Running,
    Complete,
    Error,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Complete | JobStatus::Error | JobStatus::Cancelled
        )
    }
}

/// Pipeline stage a running job is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStep {
    Queued,
    Loading,
    Segmentation,
    Statistics,
    Meshing,
    Storing,
}

/// Result attached to a completed job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum JobPayload {
    Analysis(AnalysisResult),
    Model(ModelSummary),
}

/// Point-in-time view of a job.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: u64,
    pub series_id: String,
    pub kind: JobKind,
    pub status: JobStatus,

    /// 0-100
    pub progress: u8,
    pub message: String,
    pub step: JobStep,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<JobPayload>,
}

// =============================================================================
// Progress events
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Start,
    Progress,
    Complete,
    Error,
    Cancelled,
}

impl EventKind {
    /// Wire name, also used as the SSE event name.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Start => "start",
            EventKind::Progress => "progress",
            EventKind::Complete => "complete",
            EventKind::Error => "error",
            EventKind::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EventKind::Complete | EventKind::Error | EventKind::Cancelled
        )
    }
}

/// One entry of a job's ordered event stream.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub message: String,
    pub progress: u8,
    pub total_images: usize,
    pub current_image: usize,
    pub step: JobStep,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<JobPayload>,
}

/// Integer percentage of `done` out of `total`, clamped to 100.
pub(crate) fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    (done.min(total) * 100 / total) as u8
}
