//! Analysis jobs: classify every slice and aggregate fat statistics.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::classify::{SliceLabels, TissueClassifier};
use crate::error::{JobError, SliceFault};
use crate::stats::{AnalysisResult, SliceStats, StatsAggregator};
use crate::store::ArtifactStore;
use crate::volume::{VolumeModel, VolumeSource};

use super::{percent, EventKind, Job, JobHandle, JobKind, JobPayload, JobStep, ProgressEvent};

/// Default number of analyses allowed to run at once.
pub const DEFAULT_ANALYSIS_WORKERS: usize = 4;

/// Starts, tracks and cancels analysis jobs, one per series.
pub struct AnalysisJobController<S> {
    source: Arc<S>,
    store: Arc<ArtifactStore>,
    classifier: Arc<TissueClassifier>,
    aggregator: StatsAggregator,
    permits: Arc<Semaphore>,
}

impl<S> Clone for AnalysisJobController<S> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            store: self.store.clone(),
            classifier: self.classifier.clone(),
            aggregator: self.aggregator,
            permits: self.permits.clone(),
        }
    }
}

impl<S: VolumeSource + 'static> AnalysisJobController<S> {
    pub fn new(
        source: Arc<S>,
        store: Arc<ArtifactStore>,
        classifier: TissueClassifier,
        aggregator: StatsAggregator,
        workers: usize,
    ) -> Self {
        Self {
            source,
            store,
            classifier: Arc::new(classifier),
            aggregator,
            permits: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    /// Start an analysis, or return the one already running for the series.
    pub async fn start(&self, series_id: &str) -> JobHandle {
        let mut entry = self.store.lock(series_id).await;

        if let Some(existing) = entry.analysis_job.as_ref().filter(|j| !j.is_terminal()) {
            debug!(series_id = series_id, job_id = existing.id(), "Joining running analysis");
            return existing.clone();
        }

        let handle = JobHandle::new(series_id, JobKind::Analysis);
        entry.analysis_job = Some(handle.clone());
        drop(entry);

        info!(series_id = series_id, job_id = handle.id(), "Analysis started");

        let controller = self.clone();
        let job = handle.clone();
        tokio::spawn(async move { controller.run(job).await });

        handle
    }

    /// Snapshot of the current (or last) analysis job.
    pub async fn status(&self, series_id: &str) -> Option<Job> {
        self.store
            .analysis_job(series_id)
            .await
            .map(|handle| handle.snapshot())
    }

    /// Cached result, reloaded from disk if necessary.
    pub async fn result(&self, series_id: &str) -> Option<Arc<AnalysisResult>> {
        self.store.analysis(series_id).await
    }

    /// Request cancellation of a running analysis. Returns `false` if none
    /// is running.
    pub async fn cancel(&self, series_id: &str) -> bool {
        match self.store.analysis_job(series_id).await {
            Some(handle) if !handle.is_terminal() => {
                handle.cancel();
                true
            }
            _ => false,
        }
    }

    // =========================================================================
    // Processing
    // =========================================================================

    async fn run(self, job: JobHandle) {
        let series_id = job.series_id();

        let _permit = tokio::select! {
            permit = self.permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    job.fail("Analysis workers shut down");
                    return;
                }
            },
            _ = job.cancel_token().cancelled() => {
                job.mark_cancelled("Analysis cancelled");
                return;
            }
        };

        job.update(JobStep::Loading, 0, "Loading volume");
        let volume = match self.source.load(&series_id).await {
            Ok(volume) => volume,
            Err(e) => {
                let err = JobError::from(e);
                warn!(series_id = %series_id, job_id = job.id(), "Analysis failed: {}", err);
                job.fail(err.to_string());
                return;
            }
        };

        let total = volume.slice_count();
        job.emit(ProgressEvent {
            kind: EventKind::Start,
            message: format!("Starting analysis of {} images", total),
            progress: 0,
            total_images: total,
            current_image: 0,
            step: JobStep::Segmentation,
            data: None,
        });

        let mut slice_stats = Vec::with_capacity(total);
        for index in 0..total {
            if job.is_cancelled() {
                info!(series_id = %series_id, job_id = job.id(), slice = index, "Analysis cancelled");
                job.mark_cancelled("Analysis cancelled");
                return;
            }

            let stats = match self.classify(&volume, index).await {
                Ok(labels) => self.aggregator.slice_stats(index, &labels, volume.spacing()),
                Err(fault) => {
                    warn!(series_id = %series_id, slice = index, "Skipping slice: {}", fault);
                    SliceStats::skipped(index)
                }
            };
            slice_stats.push(stats);

            let current = index + 1;
            job.emit(ProgressEvent {
                kind: EventKind::Progress,
                message: format!("Processed image {} of {}", current, total),
                progress: percent(current, total),
                total_images: total,
                current_image: current,
                step: JobStep::Segmentation,
                data: None,
            });
        }

        job.update(JobStep::Statistics, 100, "Aggregating statistics");
        let result = self
            .aggregator
            .aggregate(&series_id, volume.dimensions(), volume.spacing(), slice_stats);

        job.update(JobStep::Storing, 100, "Storing results");
        if !self.store.store_analysis(&series_id, job.id(), result.clone()).await {
            job.mark_cancelled("Analysis superseded");
            return;
        }

        info!(
            series_id = %series_id,
            job_id = job.id(),
            visceral_cm3 = result.total_visceral_fat_volume_cm3,
            subcutaneous_cm3 = result.total_subcutaneous_fat_volume_cm3,
            skipped = result.skipped_slices.len(),
            "Analysis complete"
        );

        let payload = JobPayload::Analysis(result);
        job.complete(
            "Analysis complete",
            payload.clone(),
            ProgressEvent {
                kind: EventKind::Complete,
                message: "Analysis complete".to_string(),
                progress: 100,
                total_images: total,
                current_image: total,
                step: JobStep::Storing,
                data: Some(payload),
            },
        );
    }

    /// Classify one slice off the async runtime.
    async fn classify(
        &self,
        volume: &Arc<VolumeModel>,
        index: usize,
    ) -> Result<SliceLabels, SliceFault> {
        let classifier = self.classifier.clone();
        let volume = volume.clone();
        match tokio::task::spawn_blocking(move || classifier.classify_slice(&volume, index)).await {
            Ok(result) => result,
            Err(e) => {
                error!(slice = index, "Slice worker failed: {}", e);
                Err(SliceFault::Panicked { index })
            }
        }
    }
}
