//! Volume sources.
//!
//! The pipeline never parses image formats itself. It asks a [`VolumeSource`]
//! for the volume belonging to a series key and works on the returned
//! [`VolumeModel`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::VolumeError;

use super::model::{Spacing, VolumeModel};

// =============================================================================
// VolumeSource Trait
// =============================================================================

/// Supplies volumes by series key.
///
/// Implementations must return [`VolumeError::NotFound`] for unknown keys so
/// callers can distinguish a missing series from an unreadable one.
#[async_trait]
pub trait VolumeSource: Send + Sync {
    async fn load(&self, series_id: &str) -> Result<Arc<VolumeModel>, VolumeError>;
}

#[async_trait]
impl<T: VolumeSource + ?Sized> VolumeSource for Arc<T> {
    async fn load(&self, series_id: &str) -> Result<Arc<VolumeModel>, VolumeError> {
        (**self).load(series_id).await
    }
}

// =============================================================================
// In-memory source
// =============================================================================

/// Volumes held in memory, keyed by series id.
///
/// Used when the embedding application has already decoded its series, and
/// throughout the tests.
#[derive(Default)]
pub struct InMemoryVolumeSource {
    volumes: RwLock<HashMap<String, Arc<VolumeModel>>>,
}

impl InMemoryVolumeSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with_volume(mut self, series_id: impl Into<String>, volume: VolumeModel) -> Self {
        self.volumes
            .get_mut()
            .insert(series_id.into(), Arc::new(volume));
        self
    }

    pub async fn insert(&self, series_id: impl Into<String>, volume: VolumeModel) {
        self.volumes
            .write()
            .await
            .insert(series_id.into(), Arc::new(volume));
    }

    pub async fn remove(&self, series_id: &str) -> bool {
        self.volumes.write().await.remove(series_id).is_some()
    }

    pub async fn contains(&self, series_id: &str) -> bool {
        self.volumes.read().await.contains_key(series_id)
    }
}

#[async_trait]
impl VolumeSource for InMemoryVolumeSource {
    async fn load(&self, series_id: &str) -> Result<Arc<VolumeModel>, VolumeError> {
        self.volumes
            .read()
            .await
            .get(series_id)
            .cloned()
            .ok_or_else(|| VolumeError::NotFound(series_id.to_string()))
    }
}

// =============================================================================
// Raw slice directory source
// =============================================================================

/// File name of the per-series header.
pub const RAW_HEADER_FILE: &str = "header.json";

/// Default upper bound on `slice_count` accepted from a header.
pub const DEFAULT_MAX_SLICES: usize = 4096;

/// Upper bound on `width * height` accepted from a header.
pub const MAX_SLICE_PIXELS: usize = 8192 * 8192;

/// Header describing a raw slice directory.
///
/// ```text
/// <root>/<series_id>/header.json
/// <root>/<series_id>/slice_0000.raw   little-endian i16, width*height samples
/// <root>/<series_id>/slice_0001.raw
/// ...
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RawVolumeHeader {
    pub width: usize,
    pub height: usize,
    pub slice_count: usize,
    pub spacing: Spacing,

    /// Stored value → intensity: `value * slope + intercept`
    #[serde(default = "default_slope")]
    pub rescale_slope: f32,

    #[serde(default)]
    pub rescale_intercept: f32,
}

fn default_slope() -> f32 {
    1.0
}

impl RawVolumeHeader {
    /// Bytes of one slice file, after checking the header against the limits.
    fn slice_bytes(&self, max_slices: usize) -> Result<usize, VolumeError> {
        if self.width == 0 || self.height == 0 {
            return Err(VolumeError::InvalidGeometry(format!(
                "empty slice {}x{}",
                self.width, self.height
            )));
        }
        if self.slice_count > max_slices {
            return Err(VolumeError::InvalidGeometry(format!(
                "{} slices exceeds the limit of {}",
                self.slice_count, max_slices
            )));
        }

        self.width
            .checked_mul(self.height)
            .filter(|&pixels| pixels <= MAX_SLICE_PIXELS)
            .and_then(|pixels| pixels.checked_mul(2))
            .ok_or_else(|| {
                VolumeError::InvalidGeometry(format!(
                    "slice {}x{} is too large",
                    self.width, self.height
                ))
            })
    }
}

/// Reads volumes from a directory of raw 16-bit slices.
///
/// This stands in for a real format loader: it only understands the trivial
/// layout described on [`RawVolumeHeader`]. Missing or truncated slice files
/// are recorded as unreadable slices rather than failing the whole volume.
#[derive(Debug, Clone)]
pub struct RawVolumeSource {
    root: PathBuf,
    max_slices: usize,
}

impl RawVolumeSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_slices: DEFAULT_MAX_SLICES,
        }
    }

    /// Reject headers declaring more than `max_slices` slices.
    pub fn with_max_slices(mut self, max_slices: usize) -> Self {
        self.max_slices = max_slices;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of one slice file.
    pub fn slice_path(&self, series_id: &str, index: usize) -> PathBuf {
        self.series_dir(series_id)
            .join(format!("slice_{:04}.raw", index))
    }

    fn series_dir(&self, series_id: &str) -> PathBuf {
        self.root.join(series_id)
    }

    async fn read_header(&self, series_id: &str) -> Result<RawVolumeHeader, VolumeError> {
        let path = self.series_dir(series_id).join(RAW_HEADER_FILE);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(VolumeError::NotFound(series_id.to_string()));
            }
            Err(e) => return Err(VolumeError::Io(format!("{}: {}", path.display(), e))),
        };

        serde_json::from_slice(&raw).map_err(|e| VolumeError::Unavailable {
            series_id: series_id.to_string(),
            reason: format!("invalid header: {}", e),
        })
    }
}

#[async_trait]
impl VolumeSource for RawVolumeSource {
    async fn load(&self, series_id: &str) -> Result<Arc<VolumeModel>, VolumeError> {
        // Series keys become directory names; refuse anything that could escape the root.
        if series_id.is_empty()
            || series_id.contains(['/', '\\'])
            || series_id == "."
            || series_id == ".."
        {
            return Err(VolumeError::NotFound(series_id.to_string()));
        }

        let header = self.read_header(series_id).await?;
        let expected_bytes = header.slice_bytes(self.max_slices)?;
        let mut builder = VolumeModel::builder(header.width, header.height, header.spacing);

        for index in 0..header.slice_count {
            let path = self.slice_path(series_id, index);
            match tokio::fs::read(&path).await {
                Ok(bytes) if bytes.len() == expected_bytes => {
                    let pixels = bytes
                        .chunks_exact(2)
                        .map(|b| {
                            i16::from_le_bytes([b[0], b[1]]) as f32 * header.rescale_slope
                                + header.rescale_intercept
                        })
                        .collect();
                    builder = builder.slice(pixels);
                }
                Ok(bytes) => {
                    warn!(
                        series_id = series_id,
                        slice = index,
                        "Slice file has {} bytes, expected {}",
                        bytes.len(),
                        expected_bytes
                    );
                    builder = builder.unreadable(format!(
                        "{} bytes, expected {}",
                        bytes.len(),
                        expected_bytes
                    ));
                }
                Err(e) => {
                    warn!(series_id = series_id, slice = index, "Slice file unreadable: {}", e);
                    builder = builder.unreadable(e.to_string());
                }
            }
        }

        debug!(
            series_id = series_id,
            width = header.width,
            height = header.height,
            slices = header.slice_count,
            "Loaded raw volume"
        );

        builder.build().map(Arc::new)
    }
}

// =============================================================================
// Tests
// =============================================================================
