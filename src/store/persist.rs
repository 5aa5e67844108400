//! On-disk persistence of analysis results and model bundles.
//!
//! ```text
//! <dir>/<key>_analysis.json
//! <dir>/<key>_model.json
//! ```
//!
//! `<key>` is the percent-encoded series id, so arbitrary ids map to safe
//! file names.

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::StoreError;
use crate::mesh::ModelBundle;
use crate::stats::AnalysisResult;

const ANALYSIS_SUFFIX: &str = "_analysis.json";
const MODEL_SUFFIX: &str = "_model.json";

/// Artifact files in one directory.
#[derive(Debug, Clone)]
pub struct DiskPersistence {
    dir: PathBuf,
}

impl DiskPersistence {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn analysis_path(&self, series_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}{}", urlencoding::encode(series_id), ANALYSIS_SUFFIX))
    }

    pub fn model_path(&self, series_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}{}", urlencoding::encode(series_id), MODEL_SUFFIX))
    }

    pub async fn save_analysis(
        &self,
        series_id: &str,
        result: &AnalysisResult,
    ) -> Result<(), StoreError> {
        self.write_json(&self.analysis_path(series_id), result).await
    }

    pub async fn save_model(&self, series_id: &str, bundle: &ModelBundle) -> Result<(), StoreError> {
        self.write_json(&self.model_path(series_id), bundle).await
    }

    pub async fn load_analysis(&self, series_id: &str) -> Result<Option<AnalysisResult>, StoreError> {
        read_json(&self.analysis_path(series_id)).await
    }

    pub async fn load_model(&self, series_id: &str) -> Result<Option<ModelBundle>, StoreError> {
        read_json(&self.model_path(series_id)).await
    }

    /// Whether any artifact exists on disk for the series.
    pub async fn contains(&self, series_id: &str) -> bool {
        let exists = |p: PathBuf| async move { tokio::fs::try_exists(p).await.unwrap_or(false) };
        exists(self.analysis_path(series_id)).await || exists(self.model_path(series_id)).await
    }

    pub async fn remove_model(&self, series_id: &str) -> Result<(), StoreError> {
        remove_if_exists(&self.model_path(series_id)).await
    }

    /// Delete both artifacts of a series. Missing files are not an error.
    pub async fn remove(&self, series_id: &str) -> Result<(), StoreError> {
        remove_if_exists(&self.analysis_path(series_id)).await?;
        remove_if_exists(&self.model_path(series_id)).await
    }

    /// Series ids that have at least one persisted artifact.
    pub async fn list_series(&self) -> Result<Vec<String>, StoreError> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut series = BTreeSet::new();
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let encoded = name
                .strip_suffix(ANALYSIS_SUFFIX)
                .or_else(|| name.strip_suffix(MODEL_SUFFIX));
            if let Some(encoded) = encoded {
                if let Ok(id) = urlencoding::decode(encoded) {
                    series.insert(id.into_owned());
                }
            }
        }
        Ok(series.into_iter().collect())
    }

    /// Delete every persisted artifact.
    pub async fn clear(&self) -> Result<(), StoreError> {
        for series_id in self.list_series().await? {
            self.remove(&series_id).await?;
        }
        Ok(())
    }

    async fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let json = serde_json::to_vec(value)?;

        // Write-then-rename so a crash never leaves a truncated artifact.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, path).await?;

        debug!(path = %path.display(), bytes = json.len(), "Persisted artifact");
        Ok(())
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match tokio::fs::read(path).await {
        Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn remove_if_exists(path: &Path) -> Result<(), StoreError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

// =============================================================================
// Tests
// =============================================================================
