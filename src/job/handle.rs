//! Live job state and event subscription.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use super::{
    next_job_id, CancellationToken, EventKind, Job, JobKind, JobPayload, JobStatus, JobStep,
    ProgressEvent,
};

/// Snapshot plus the full ordered event log.
#[derive(Debug, Clone)]
struct JobRecord {
    job: Job,
    events: Vec<ProgressEvent>,
}

struct JobShared {
    state: watch::Sender<JobRecord>,
    cancel: CancellationToken,
    subscribers: AtomicUsize,

    /// Started by a caller that does not follow the events
    detached: AtomicBool,
}

/// Shared handle to a running or finished job.
///
/// Cloning is cheap; all clones observe the same job.
#[derive(Clone)]
pub struct JobHandle {
    shared: Arc<JobShared>,
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("job", &self.shared.state.borrow().job)
            .finish()
    }
}

impl JobHandle {
    /// A new job in `Running` / `Queued`.
    pub fn new(series_id: impl Into<String>, kind: JobKind) -> Self {
        let job = Job {
            id: next_job_id(),
            series_id: series_id.into(),
            kind,
            status: JobStatus::Running,
            progress: 0,
            message: "Queued".to_string(),
            step: JobStep::Queued,
            error: None,
            payload: None,
        };
        let (state, _) = watch::channel(JobRecord {
            job,
            events: Vec::new(),
        });

        Self {
            shared: Arc::new(JobShared {
                state,
                cancel: CancellationToken::new(),
                subscribers: AtomicUsize::new(0),
                detached: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.shared.state.borrow().job.id
    }

    pub fn series_id(&self) -> String {
        self.shared.state.borrow().job.series_id.clone()
    }

    pub fn snapshot(&self) -> Job {
        self.shared.state.borrow().job.clone()
    }

    pub fn status(&self) -> JobStatus {
        self.shared.state.borrow().job.status
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Every event emitted so far, in order.
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.shared.state.borrow().events.clone()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.shared.cancel
    }

    /// Request cooperative cancellation.
    pub fn cancel(&self) {
        self.shared.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    pub(crate) fn same_job(&self, other: &JobHandle) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Update step, progress and message without emitting an event.
    ///
    /// Ignored once the job is terminal.
    pub fn update(&self, step: JobStep, progress: u8, message: impl Into<String>) {
        let message = message.into();
        self.shared.state.send_if_modified(|record| {
            if record.job.status.is_terminal() {
                return false;
            }
            record.job.step = step;
            record.job.progress = progress.min(100);
            record.job.message = message;
            true
        });
    }

    /// Append a non-terminal event and mirror it into the snapshot.
    ///
    /// Returns `false` if the job already finished.
    pub fn emit(&self, event: ProgressEvent) -> bool {
        debug_assert!(!event.kind.is_terminal());
        self.shared.state.send_if_modified(|record| {
            if record.job.status.is_terminal() {
                return false;
            }
            record.job.step = event.step;
            record.job.progress = event.progress.min(100);
            record.job.message = event.message.clone();
            record.events.push(event);
            true
        })
    }

    /// Finish successfully. Only the first terminal transition takes effect.
    pub fn complete(
        &self,
        message: impl Into<String>,
        payload: JobPayload,
        event: ProgressEvent,
    ) -> bool {
        let message = message.into();
        self.finish(|record| {
            record.job.status = JobStatus::Complete;
            record.job.progress = 100;
            record.job.message = message;
            record.job.payload = Some(payload);
            record.events.push(ProgressEvent {
                kind: EventKind::Complete,
                progress: 100,
                ..event
            });
        })
    }

    /// Finish with an error.
    pub fn fail(&self, error: impl Into<String>) -> bool {
        let error = error.into();
        self.finish(|record| {
            record.job.status = JobStatus::Error;
            record.job.message = error.clone();
            let event = terminal_event(&record.job, EventKind::Error, &error, &record.events);
            record.job.error = Some(error);
            record.events.push(event);
        })
    }

    /// Finish as cancelled. Also raises the cancellation flag.
    pub fn mark_cancelled(&self, message: impl Into<String>) -> bool {
        self.shared.cancel.cancel();
        let message = message.into();
        self.finish(|record| {
            record.job.status = JobStatus::Cancelled;
            record.job.message = message.clone();
            let event = terminal_event(&record.job, EventKind::Cancelled, &message, &record.events);
            record.events.push(event);
        })
    }

    fn finish(&self, apply: impl FnOnce(&mut JobRecord)) -> bool {
        let applied = self.shared.state.send_if_modified(|record| {
            if record.job.status.is_terminal() {
                return false;
            }
            apply(record);
            true
        });
        if applied {
            let job = self.snapshot();
            debug!(
                job_id = job.id,
                series_id = %job.series_id,
                status = ?job.status,
                "Job finished"
            );
        }
        applied
    }

    // =========================================================================
    // Subscription
    // =========================================================================

    /// Subscribe to the event stream from the beginning.
    ///
    /// When the last subscriber is dropped before the job finishes, the job is
    /// cancelled, unless it was [detached](Self::detach).
    pub fn subscribe(&self) -> JobEvents {
        self.shared.subscribers.fetch_add(1, Ordering::SeqCst);
        JobEvents {
            rx: self.shared.state.subscribe(),
            cursor: 0,
            shared: self.shared.clone(),
        }
    }

    /// Keep the job running when its subscribers leave.
    ///
    /// Used when the job was requested by a caller that polls instead of
    /// listening; only explicit cancellation or a clear stops it then.
    pub fn detach(&self) {
        self.shared.detached.store(true, Ordering::SeqCst);
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.load(Ordering::SeqCst)
    }
}

/// Terminal event carrying the last known image counters.
fn terminal_event(
    job: &Job,
    kind: EventKind,
    message: &str,
    events: &[ProgressEvent],
) -> ProgressEvent {
    let (total_images, current_image) = events
        .last()
        .map(|e| (e.total_images, e.current_image))
        .unwrap_or((0, 0));
    ProgressEvent {
        kind,
        message: message.to_string(),
        progress: job.progress,
        total_images,
        current_image,
        step: job.step,
        data: None,
    }
}

// =============================================================================
// JobEvents
// =============================================================================

/// Ordered reader over a job's events.
///
/// Yields every event from the first one, then ends after the terminal event.
pub struct JobEvents {
    rx: watch::Receiver<JobRecord>,
    cursor: usize,
    shared: Arc<JobShared>,
}

impl JobEvents {
    /// Next event, or `None` once the terminal event has been delivered.
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        loop {
            {
                let record = self.rx.borrow_and_update();
                if let Some(event) = record.events.get(self.cursor) {
                    self.cursor += 1;
                    return Some(event.clone());
                }
                if record.job.status.is_terminal() {
                    return None;
                }
            }
            if self.rx.changed().await.is_err() {
                return None;
            }
        }
    }
}

impl Drop for JobEvents {
    fn drop(&mut self) {
        let remaining = self.shared.subscribers.fetch_sub(1, Ordering::SeqCst) - 1;
        let finished = self.shared.state.borrow().job.status.is_terminal();
        let detached = self.shared.detached.load(Ordering::SeqCst);
        if remaining == 0 && !finished && !detached {
            debug!("Last event subscriber left, cancelling job");
            self.shared.cancel.cancel();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
