//! # tissue-recon
//!
//! Tissue classification, fat statistics and per-tissue surface models for
//! cross-sectional image stacks (CT series).
//!
//! A series is loaded as a [`VolumeModel`] from a [`VolumeSource`]. Every
//! slice is classified into tissue labels, fat volumes are aggregated into an
//! [`AnalysisResult`], and on request each tissue is turned into a smoothed,
//! coloured triangle mesh. Work runs as cancellable background jobs that
//! report ordered progress events.
//!
//! ## Architecture
//!
//! - [`volume`] - Volume model and sources
//! - [`classify`] - Band thresholding, body/cavity geometry, tissue labels
//! - [`stats`] - Per-slice and aggregate fat statistics
//! - [`mesh`] - Surface extraction, smoothing and export encodings
//! - [`job`] - Job state machine, progress events, job controllers
//! - [`store`] - Per-series artifacts, persistence and download cache
//! - [`pipeline`] - Wiring of source, store and controllers
//! - [`server`] - Axum-based HTTP API
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use tissue_recon::{InMemoryVolumeSource, Pipeline, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let pipeline = Pipeline::new(InMemoryVolumeSource::new(), PipelineConfig::default());
//!
//!     let job = pipeline.analysis().start("series-1").await;
//!     let mut events = job.subscribe();
//!     while let Some(event) = events.next().await {
//!         println!("{}% {}", event.progress, event.message);
//!     }
//! }
//! ```

pub mod classify;
pub mod config;
pub mod error;
pub mod job;
pub mod mesh;
pub mod pipeline;
pub mod server;
pub mod stats;
pub mod store;
pub mod volume;

// Re-export commonly used types
pub use classify::{
    BandClass, BandTable, ClassifierConfig, IntensityBand, LabelVolume, SliceLabels,
    TissueClassifier, TissueLabel,
};
pub use config::{AnalyzeConfig, Cli, Command, PipelineArgs, ServeConfig};
pub use error::{ExportError, JobError, SliceFault, StoreError, VolumeError};
pub use job::{
    AnalysisJobController, CancellationToken, EventKind, Job, JobEvents, JobHandle, JobKind,
    JobStatus, JobStep, ModelJobController, ModelState, ModelStatus, ProgressEvent,
};
pub use mesh::{
    encode, MeshConfig, MeshFormat, MeshReconstructor, ModelBundle, ModelSummary, TissueMesh,
    TissuePalette,
};
pub use pipeline::{Pipeline, PipelineConfig};
pub use server::{create_router, AppState, ErrorResponse, RouterConfig};
pub use stats::{AnalysisResult, FatDistribution, SliceStats, StatsAggregator};
pub use store::{ArtifactStore, DiskPersistence, ExportCache};
pub use volume::{InMemoryVolumeSource, RawVolumeSource, Spacing, VolumeModel, VolumeSource};
