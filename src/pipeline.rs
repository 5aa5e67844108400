//! Pipeline assembly.
//!
//! [`Pipeline`] wires one [`VolumeSource`] to the artifact store and both job
//! controllers. The binary and the HTTP layer only ever talk to this type.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::classify::{ClassifierConfig, TissueClassifier};
use crate::job::{
    AnalysisJobController, ModelJobController, DEFAULT_ANALYSIS_WORKERS, DEFAULT_MODEL_WORKERS,
};
use crate::mesh::{LegendEntry, MeshConfig, MeshReconstructor, TissuePalette};
use crate::stats::{FatDistribution, StatsAggregator};
use crate::store::{ArtifactStore, DiskPersistence, DEFAULT_EXPORT_CACHE_CAPACITY};
use crate::volume::VolumeSource;

/// Everything needed to build a [`Pipeline`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub classifier: ClassifierConfig,
    pub formula: FatDistribution,
    pub mesh: MeshConfig,
    pub analysis_workers: usize,
    pub model_workers: usize,

    /// Directory for persisted artifacts (None = memory only)
    pub artifacts_dir: Option<PathBuf>,

    /// Byte budget of the encoded download cache
    pub export_cache_bytes: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            classifier: ClassifierConfig::default(),
            formula: FatDistribution::default(),
            mesh: MeshConfig::default(),
            analysis_workers: DEFAULT_ANALYSIS_WORKERS,
            model_workers: DEFAULT_MODEL_WORKERS,
            artifacts_dir: None,
            export_cache_bytes: DEFAULT_EXPORT_CACHE_CAPACITY,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.classifier.validate()?;
        if self.analysis_workers == 0 {
            return Err("analysis_workers must be greater than 0".to_string());
        }
        if self.model_workers == 0 {
            return Err("model_workers must be greater than 0".to_string());
        }
        if !(0.0..=1.0).contains(&self.mesh.smoothing_factor) {
            return Err(format!(
                "smoothing factor must be between 0 and 1, got {}",
                self.mesh.smoothing_factor
            ));
        }
        Ok(())
    }
}

/// Store plus both job controllers over one volume source.
pub struct Pipeline<S> {
    store: Arc<ArtifactStore>,
    analysis: AnalysisJobController<S>,
    models: ModelJobController<S>,
    palette: TissuePalette,
}

impl<S> Clone for Pipeline<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            analysis: self.analysis.clone(),
            models: self.models.clone(),
            palette: self.palette.clone(),
        }
    }
}

impl<S: VolumeSource + 'static> Pipeline<S> {
    pub fn new(source: S, config: PipelineConfig) -> Self {
        let source = Arc::new(source);
        let persistence = config.artifacts_dir.clone().map(DiskPersistence::new);
        let store = Arc::new(ArtifactStore::new(persistence, config.export_cache_bytes));
        let classifier = TissueClassifier::new(config.classifier);
        let palette = config.mesh.palette.clone();

        let analysis = AnalysisJobController::new(
            source.clone(),
            store.clone(),
            classifier.clone(),
            StatsAggregator::new(config.formula),
            config.analysis_workers,
        );
        let models = ModelJobController::new(
            source,
            store.clone(),
            classifier,
            MeshReconstructor::new(config.mesh),
            config.model_workers,
        );

        Self {
            store,
            analysis,
            models,
            palette,
        }
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    pub fn analysis(&self) -> &AnalysisJobController<S> {
        &self.analysis
    }

    pub fn models(&self) -> &ModelJobController<S> {
        &self.models
    }

    /// Colour legend of every tissue label.
    pub fn legend(&self) -> Vec<LegendEntry> {
        self.palette.legend()
    }

    /// Cancel jobs and drop artifacts of one series.
    pub async fn clear_series(&self, series_id: &str) {
        self.store.clear_series(series_id).await;
    }

    /// Cancel jobs and drop artifacts of every series.
    pub async fn clear_all(&self) {
        self.store.clear_all().await;
        info!("All series cleared");
    }
}
