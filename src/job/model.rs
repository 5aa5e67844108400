//! Model generation jobs: reconstruct tissue surfaces for an analysed series.

use std::ops::ControlFlow;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::classify::{TissueClassifier, TissueLabel};
use crate::error::{ExportError, JobError};
use crate::mesh::{encode, MeshFormat, MeshReconstructor, ModelSummary};
use crate::store::{ArtifactStore, ExportKey};
use crate::volume::VolumeSource;

use super::{EventKind, JobHandle, JobKind, JobPayload, JobStatus, JobStep, ProgressEvent};

/// Default number of model generations allowed to run at once.
pub const DEFAULT_MODEL_WORKERS: usize = 2;

/// Tissues reconstructed when the caller does not choose.
pub const DEFAULT_INCLUDED_TISSUES: [TissueLabel; 3] = [
    TissueLabel::VisceralFat,
    TissueLabel::SubcutaneousFat,
    TissueLabel::Organ,
];

// Progress bands of the model pipeline.
const SEGMENTATION_START: u8 = 5;
const MESHING_START: u8 = 40;
const STORING_START: u8 = 95;

// =============================================================================
// ModelStatus
// =============================================================================

/// Externally visible model state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelState {
    NotStarted,
    Queued,
    Generating,
    Complete,
    Error,
    Cancelled,
}

/// Poll response for model generation.
#[derive(Debug, Clone, Serialize)]
pub struct ModelStatus {
    pub status: ModelState,
    pub progress: u8,
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ModelSummary>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ModelStatus {
    fn not_started() -> Self {
        Self {
            status: ModelState::NotStarted,
            progress: 0,
            message: "No model generated".to_string(),
            data: None,
            error: None,
        }
    }
}

// =============================================================================
// ModelJobController
// =============================================================================

/// Starts, tracks and cancels model generation, one job per series.
pub struct ModelJobController<S> {
    source: Arc<S>,
    store: Arc<ArtifactStore>,
    classifier: Arc<TissueClassifier>,
    reconstructor: Arc<MeshReconstructor>,
    permits: Arc<Semaphore>,
}

impl<S> Clone for ModelJobController<S> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            store: self.store.clone(),
            classifier: self.classifier.clone(),
            reconstructor: self.reconstructor.clone(),
            permits: self.permits.clone(),
        }
    }
}

impl<S: VolumeSource + 'static> ModelJobController<S> {
    pub fn new(
        source: Arc<S>,
        store: Arc<ArtifactStore>,
        classifier: TissueClassifier,
        reconstructor: MeshReconstructor,
        workers: usize,
    ) -> Self {
        Self {
            source,
            store,
            classifier: Arc::new(classifier),
            reconstructor: Arc::new(reconstructor),
            permits: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    /// Start model generation.
    ///
    /// Fails with [`JobError::PreconditionUnmet`] when the series has no
    /// analysis; no job is created in that case. A generation already in
    /// progress is returned unchanged.
    pub async fn start(
        &self,
        series_id: &str,
        include: Option<Vec<TissueLabel>>,
    ) -> Result<JobHandle, JobError> {
        let mut entry = self.store.lock(series_id).await;

        if let Some(existing) = entry.model_job.as_ref().filter(|j| !j.is_terminal()) {
            debug!(series_id = series_id, job_id = existing.id(), "Model generation already running");
            return Ok(existing.clone());
        }

        if entry.analysis.is_none() {
            return Err(JobError::analysis_required(series_id));
        }

        let include = normalize_include(include);
        let revision = entry.analysis_revision;
        let handle = JobHandle::new(series_id, JobKind::Model);
        handle.update(JobStep::Queued, 0, "Waiting for a model worker");
        entry.model_job = Some(handle.clone());
        drop(entry);

        info!(
            series_id = series_id,
            job_id = handle.id(),
            tissues = ?include,
            "Model generation queued"
        );

        let controller = self.clone();
        let job = handle.clone();
        tokio::spawn(async move { controller.run(job, include, revision).await });

        Ok(handle)
    }

    /// Poll the model state of a series.
    pub async fn status(&self, series_id: &str) -> ModelStatus {
        let Some(entry) = self.store.lock_existing(series_id).await else {
            return ModelStatus::not_started();
        };

        match entry.model_job() {
            Some(handle) => {
                let job = handle.snapshot();
                let status = match job.status {
                    JobStatus::Idle => ModelState::NotStarted,
                    JobStatus::Running if job.step == JobStep::Queued => ModelState::Queued,
                    JobStatus::Running => ModelState::Generating,
                    JobStatus::Complete => ModelState::Complete,
                    JobStatus::Error => ModelState::Error,
                    JobStatus::Cancelled => ModelState::Cancelled,
                };
                let data = match job.payload {
                    Some(JobPayload::Model(summary)) => Some(summary),
                    _ => None,
                };
                ModelStatus {
                    status,
                    progress: job.progress,
                    message: job.message,
                    data,
                    error: job.error,
                }
            }
            None => match entry.model() {
                Some(bundle) => ModelStatus {
                    status: ModelState::Complete,
                    progress: 100,
                    message: "Model already exists".to_string(),
                    data: Some(bundle.summary()),
                    error: None,
                },
                None => ModelStatus::not_started(),
            },
        }
    }

    /// Encoded model for download, or `None` if no model is cached.
    pub async fn download(
        &self,
        series_id: &str,
        format: MeshFormat,
    ) -> Result<Option<Bytes>, ExportError> {
        let key = ExportKey::new(series_id, format);
        if let Some(bytes) = self.store.exports().get(&key).await {
            debug!(series_id = series_id, format = format.as_str(), "Export cache hit");
            return Ok(Some(bytes));
        }

        let Some(bundle) = self.store.model(series_id).await else {
            return Ok(None);
        };

        let encoded = {
            let bundle = bundle.clone();
            tokio::task::spawn_blocking(move || encode(&bundle, format))
                .await
                .map_err(|e| ExportError::Io(format!("encoder failed: {}", e)))??
        };
        self.store.cache_export(key, &bundle, encoded.clone()).await;
        Ok(Some(encoded))
    }

    /// Request cancellation of a running generation.
    pub async fn cancel(&self, series_id: &str) -> bool {
        match self.store.model_job(series_id).await {
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

    async fn run(self, job: JobHandle, include: Vec<TissueLabel>, revision: u64) {
        let series_id = job.series_id();

        let _permit = tokio::select! {
            permit = self.permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    job.fail("Model workers shut down");
                    return;
                }
            },
            _ = job.cancel_token().cancelled() => {
                job.mark_cancelled("Model generation cancelled");
                return;
            }
        };

        job.update(JobStep::Loading, 0, "Loading volume");
        let volume = match self.source.load(&series_id).await {
            Ok(volume) => volume,
            Err(e) => {
                let err = JobError::from(e);
                warn!(series_id = %series_id, job_id = job.id(), "Model generation failed: {}", err);
                job.fail(err.to_string());
                return;
            }
        };

        // Segmentation, cancellable between slices.
        job.update(JobStep::Segmentation, SEGMENTATION_START, "Segmenting volume");
        let labels = {
            let classifier = self.classifier.clone();
            let progress = job.clone();
            let volume = volume.clone();
            tokio::task::spawn_blocking(move || {
                let total = volume.slice_count();
                classifier.classify_volume_with(&volume, |index| {
                    if progress.is_cancelled() {
                        return ControlFlow::Break(());
                    }
                    let span = (MESHING_START - SEGMENTATION_START) as usize;
                    let done = SEGMENTATION_START + (span * index / total.max(1)) as u8;
                    progress.update(
                        JobStep::Segmentation,
                        done,
                        format!("Segmenting image {} of {}", index + 1, total),
                    );
                    ControlFlow::Continue(())
                })
            })
            .await
        };

        let labels = match labels {
            Ok(Some(labels)) => Arc::new(labels),
            Ok(None) => {
                job.mark_cancelled("Model generation cancelled");
                return;
            }
            Err(e) => {
                error!(series_id = %series_id, "Segmentation worker failed: {}", e);
                job.fail(JobError::Internal(format!("segmentation failed: {}", e)).to_string());
                return;
            }
        };

        // Meshing, cancellable between tissues.
        let meshes = {
            let reconstructor = self.reconstructor.clone();
            let progress = job.clone();
            let labels = labels.clone();
            let include = include.clone();
            tokio::task::spawn_blocking(move || {
                let span = (STORING_START - MESHING_START) as usize;
                let total = include.len().max(1);
                let mut done = 0;
                reconstructor.reconstruct_all(&labels, &include, |label| {
                    if progress.is_cancelled() {
                        return ControlFlow::Break(());
                    }
                    progress.update(
                        JobStep::Meshing,
                        MESHING_START + (span * done / total) as u8,
                        format!("Building {} surface", label.description().to_lowercase()),
                    );
                    done += 1;
                    ControlFlow::Continue(())
                })
            })
            .await
        };

        let meshes = match meshes {
            Ok(Some(meshes)) => meshes,
            Ok(None) => {
                info!(series_id = %series_id, job_id = job.id(), "Model generation cancelled");
                job.mark_cancelled("Model generation cancelled");
                return;
            }
            Err(e) => {
                error!(series_id = %series_id, "Meshing worker failed: {}", e);
                job.fail(JobError::Internal(format!("meshing failed: {}", e)).to_string());
                return;
            }
        };

        job.update(JobStep::Storing, STORING_START, "Storing model");
        let bundle = MeshReconstructor::bundle(&series_id, &labels, &include, meshes);
        let summary = bundle.summary();

        if !self.store.store_model(&series_id, job.id(), revision, bundle).await {
            job.mark_cancelled("Model superseded");
            return;
        }

        info!(
            series_id = %series_id,
            job_id = job.id(),
            meshes = summary.tissues.len(),
            "Model generation complete"
        );

        let payload = JobPayload::Model(summary);
        let total = volume.slice_count();
        job.complete(
            "Model generated",
            payload.clone(),
            ProgressEvent {
                kind: EventKind::Complete,
                message: "Model generated".to_string(),
                progress: 100,
                total_images: total,
                current_image: total,
                step: JobStep::Storing,
                data: Some(payload),
            },
        );
    }
}

/// Deduplicated include list in request order; Background is dropped and an
/// empty or missing list means the defaults.
fn normalize_include(include: Option<Vec<TissueLabel>>) -> Vec<TissueLabel> {
    let mut tissues: Vec<TissueLabel> = Vec::new();
    for label in include.unwrap_or_default() {
        if label != TissueLabel::Background && !tissues.contains(&label) {
            tissues.push(label);
        }
    }
    if tissues.is_empty() {
        tissues.extend(DEFAULT_INCLUDED_TISSUES);
    }
    tissues
}
