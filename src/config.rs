//! Configuration management for tissue-recon.
//!
//! Every option can be given on the command line or through an environment
//! variable with the `TISSUE_` prefix:
//!
//! - `TISSUE_HOST` - Server bind address (default: 0.0.0.0)
//! - `TISSUE_PORT` - Server port (default: 3000)
//! - `TISSUE_VOLUMES_DIR` - Root of the raw slice directories (required)
//! - `TISSUE_ARTIFACTS_DIR` - Directory for persisted results (optional)
//! - `TISSUE_ANALYSIS_WORKERS` - Concurrent analyses (default: 4)
//! - `TISSUE_MODEL_WORKERS` - Concurrent model generations (default: 2)
//! - `TISSUE_CAVITY_MARGIN_MM` - Subcutaneous rim width in mm (default: 10)
//! - `TISSUE_CLOSING_RADIUS` - Body mask closing radius in pixels (default: 2)
//! - `TISSUE_BANDS` - Intensity band table as JSON (default: built-in HU table)
//! - `TISSUE_FAT_FORMULA` - `total-fat` or `body` (default: total-fat)
//! - `TISSUE_SMOOTHING_ITERATIONS` - Mesh smoothing passes (default: 2)
//! - `TISSUE_EXPORT_CACHE_BYTES` - Download cache budget (default: 256MB)
//! - `TISSUE_CORS_ORIGINS` - Allowed CORS origins, comma-separated

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::classify::{
    BandTable, ClassifierConfig, TissueLabel, DEFAULT_CAVITY_MARGIN_MM, DEFAULT_CLOSING_RADIUS,
};
use crate::job::{DEFAULT_ANALYSIS_WORKERS, DEFAULT_MODEL_WORKERS};
use crate::mesh::{MeshConfig, MeshFormat, DEFAULT_SMOOTHING_FACTOR, DEFAULT_SMOOTHING_ITERATIONS};
use crate::pipeline::PipelineConfig;
use crate::stats::FatDistribution;
use crate::store::DEFAULT_EXPORT_CACHE_CAPACITY;
use crate::volume::{RawVolumeSource, DEFAULT_MAX_SLICES};

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 3000;

// =============================================================================
// CLI Arguments
// =============================================================================

/// tissue-recon - tissue classification, fat statistics and surface models
/// for cross-sectional image stacks.
#[derive(Parser, Debug, Clone)]
#[command(name = "tissue-recon")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the HTTP server.
    Serve(ServeConfig),

    /// Analyse one series offline and print the result as JSON.
    Analyze(AnalyzeConfig),
}

/// Options shared by every command that runs the pipeline.
#[derive(Args, Debug, Clone)]
pub struct PipelineArgs {
    /// Root directory holding one raw slice directory per series.
    #[arg(long, env = "TISSUE_VOLUMES_DIR")]
    pub volumes_dir: PathBuf,

    /// Largest slice count accepted from a volume header.
    #[arg(long, default_value_t = DEFAULT_MAX_SLICES, env = "TISSUE_MAX_SLICES")]
    pub max_slices: usize,

    /// Directory where results are persisted across restarts.
    #[arg(long, env = "TISSUE_ARTIFACTS_DIR")]
    pub artifacts_dir: Option<PathBuf>,

    /// Maximum number of analyses running at once.
    #[arg(long, default_value_t = DEFAULT_ANALYSIS_WORKERS, env = "TISSUE_ANALYSIS_WORKERS")]
    pub analysis_workers: usize,

    /// Maximum number of model generations running at once.
    #[arg(long, default_value_t = DEFAULT_MODEL_WORKERS, env = "TISSUE_MODEL_WORKERS")]
    pub model_workers: usize,

    /// Width of the subcutaneous rim in millimetres.
    #[arg(long, default_value_t = DEFAULT_CAVITY_MARGIN_MM, env = "TISSUE_CAVITY_MARGIN_MM")]
    pub cavity_margin_mm: f64,

    /// Radius in pixels of the closing applied to the body outline.
    #[arg(long, default_value_t = DEFAULT_CLOSING_RADIUS, env = "TISSUE_CLOSING_RADIUS")]
    pub closing_radius: usize,

    /// Intensity band table as JSON, replacing the built-in table.
    #[arg(long, env = "TISSUE_BANDS")]
    pub bands: Option<String>,

    /// Fat distribution formula: `total-fat` or `body`.
    #[arg(long, default_value = "total-fat", env = "TISSUE_FAT_FORMULA")]
    pub fat_formula: FatDistribution,

    /// Laplacian smoothing passes applied to every mesh.
    #[arg(long, default_value_t = DEFAULT_SMOOTHING_ITERATIONS, env = "TISSUE_SMOOTHING_ITERATIONS")]
    pub smoothing_iterations: usize,

    /// Laplacian step factor (0-1).
    #[arg(long, default_value_t = DEFAULT_SMOOTHING_FACTOR, env = "TISSUE_SMOOTHING_FACTOR")]
    pub smoothing_factor: f32,

    /// Byte budget of the encoded download cache.
    #[arg(long, default_value_t = DEFAULT_EXPORT_CACHE_CAPACITY, env = "TISSUE_EXPORT_CACHE_BYTES")]
    pub export_cache_bytes: usize,
}

impl PipelineArgs {
    /// Volume source reading from `volumes_dir`.
    pub fn volume_source(&self) -> RawVolumeSource {
        RawVolumeSource::new(&self.volumes_dir).with_max_slices(self.max_slices)
    }

    /// Build and validate the pipeline configuration.
    pub fn pipeline_config(&self) -> Result<PipelineConfig, String> {
        if self.max_slices == 0 {
            return Err("max_slices must be greater than 0".to_string());
        }

        let bands = match &self.bands {
            Some(json) => BandTable::from_json(json)?,
            None => BandTable::default(),
        };

        let config = PipelineConfig {
            classifier: ClassifierConfig {
                bands,
                cavity_margin_mm: self.cavity_margin_mm,
                closing_radius: self.closing_radius,
                ..ClassifierConfig::default()
            },
            formula: self.fat_formula,
            mesh: MeshConfig {
                smoothing_iterations: self.smoothing_iterations,
                smoothing_factor: self.smoothing_factor,
                ..MeshConfig::default()
            },
            analysis_workers: self.analysis_workers,
            model_workers: self.model_workers,
            artifacts_dir: self.artifacts_dir.clone(),
            export_cache_bytes: self.export_cache_bytes,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Options of the `serve` command.
#[derive(Args, Debug, Clone)]
pub struct ServeConfig {
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "TISSUE_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "TISSUE_PORT")]
    pub port: u16,

    #[command(flatten)]
    pub pipeline: PipelineArgs,

    /// Allowed CORS origins (comma-separated).
    ///
    /// If not specified, allows any origin.
    #[arg(long, env = "TISSUE_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl ServeConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 {
            return Err("port must be greater than 0".to_string());
        }
        self.pipeline.pipeline_config().map(|_| ())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Options of the `analyze` command.
#[derive(Args, Debug, Clone)]
pub struct AnalyzeConfig {
    /// Series to analyse (a directory under the volumes root).
    pub series_id: String,

    #[command(flatten)]
    pub pipeline: PipelineArgs,

    /// Also build a model and write it to this file.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Model encoding: `mesh-binary` or `mesh-text`.
    #[arg(long, default_value = "mesh-binary")]
    pub format: MeshFormat,

    /// Tissues to include in the model (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub include: Option<Vec<TissueLabel>>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl AnalyzeConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.series_id.trim().is_empty() {
            return Err("series id must not be empty".to_string());
        }
        self.pipeline.pipeline_config().map(|_| ())
    }
}

// =============================================================================
// Tests
// =============================================================================
