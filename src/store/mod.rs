//! Artifact store.
//!
//! Per series key the store holds at most one analysis job, one model job,
//! one [`AnalysisResult`] and one [`ModelBundle`].
//!
//! ```text
//! ArtifactStore
//!   entries: RwLock<HashMap<key, Arc<Mutex<SeriesEntry>>>>
//!              │
//!              └─ SeriesEntry { analysis_job, model_job, analysis, model }
//!   persistence: Option<DiskPersistence>   (<key>_analysis.json, <key>_model.json)
//!   exports: ExportCache                    (encoded downloads)
//! ```
//!
//! Every operation on a key holds that key's mutex for its whole duration,
//! so `start`, `store` and `clear` for the same series never interleave.
//! Clearing additionally holds the entry map's write lock until the files on
//! disk are gone, so no reader can reload a series that is being cleared.

mod export_cache;
mod persist;

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};

use crate::job::JobHandle;
use crate::mesh::ModelBundle;
use crate::stats::AnalysisResult;

pub use export_cache::{ExportCache, ExportKey, DEFAULT_EXPORT_CACHE_CAPACITY};
pub use persist::DiskPersistence;

// =============================================================================
// SeriesEntry
// =============================================================================

/// Everything the store keeps for one series.
#[derive(Debug, Default)]
pub struct SeriesEntry {
    pub(crate) analysis_job: Option<JobHandle>,
    pub(crate) model_job: Option<JobHandle>,
    pub(crate) analysis: Option<Arc<AnalysisResult>>,
    pub(crate) model: Option<Arc<ModelBundle>>,

    /// Bumped every time a new analysis result is stored
    pub(crate) analysis_revision: u64,

    /// Persisted artifacts have been read (or there are none)
    loaded: bool,
}

impl SeriesEntry {
    pub fn analysis(&self) -> Option<Arc<AnalysisResult>> {
        self.analysis.clone()
    }

    pub fn model(&self) -> Option<Arc<ModelBundle>> {
        self.model.clone()
    }

    pub fn analysis_job(&self) -> Option<&JobHandle> {
        self.analysis_job.as_ref()
    }

    pub fn model_job(&self) -> Option<&JobHandle> {
        self.model_job.as_ref()
    }

    fn is_empty(&self) -> bool {
        self.analysis_job.is_none()
            && self.model_job.is_none()
            && self.analysis.is_none()
            && self.model.is_none()
    }

    /// Cancel running jobs and drop every artifact.
    ///
    /// The entry stays marked as loaded: a caller still holding it after it
    /// left the map must see it empty, not reload it from disk.
    fn reset(&mut self, reason: &str) {
        for job in [&self.analysis_job, &self.model_job].into_iter().flatten() {
            job.mark_cancelled(reason);
        }
        self.analysis_job = None;
        self.model_job = None;
        self.analysis = None;
        self.model = None;
        self.loaded = true;
    }
}

// =============================================================================
// ArtifactStore
// =============================================================================

/// Registry of per-series jobs and artifacts.
pub struct ArtifactStore {
    entries: RwLock<HashMap<String, Arc<Mutex<SeriesEntry>>>>,
    persistence: Option<DiskPersistence>,
    exports: ExportCache,
}

impl Default for ArtifactStore {
    fn default() -> Self {
        Self::new(None, DEFAULT_EXPORT_CACHE_CAPACITY)
    }
}

impl ArtifactStore {
    pub fn new(persistence: Option<DiskPersistence>, export_cache_bytes: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            persistence,
            exports: ExportCache::with_capacity(export_cache_bytes),
        }
    }

    /// In-memory store without persistence.
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn persistence(&self) -> Option<&DiskPersistence> {
        self.persistence.as_ref()
    }

    pub fn exports(&self) -> &ExportCache {
        &self.exports
    }

    // =========================================================================
    // Entry access
    // =========================================================================

    /// Lock the entry for `series_id`, creating it if needed.
    ///
    /// Persisted artifacts are loaded on first access.
    pub async fn lock(&self, series_id: &str) -> OwnedMutexGuard<SeriesEntry> {
        let entry = {
            let entries = self.entries.read().await;
            entries.get(series_id).cloned()
        };
        let entry = match entry {
            Some(entry) => entry,
            None => self
                .entries
                .write()
                .await
                .entry(series_id.to_string())
                .or_default()
                .clone(),
        };
        self.lock_entry(series_id, entry).await
    }

    /// Lock the entry only if the series is known in memory or on disk.
    ///
    /// Queries go through here so unknown keys never create entries. The disk
    /// check runs under the map's write lock, so it cannot interleave with a
    /// clear.
    pub async fn lock_existing(&self, series_id: &str) -> Option<OwnedMutexGuard<SeriesEntry>> {
        let known = self.entries.read().await.get(series_id).cloned();
        let entry = match known {
            Some(entry) => entry,
            None => {
                let persistence = self.persistence.as_ref()?;
                let mut entries = self.entries.write().await;
                match entries.get(series_id) {
                    Some(entry) => entry.clone(),
                    None if persistence.contains(series_id).await => entries
                        .entry(series_id.to_string())
                        .or_default()
                        .clone(),
                    None => return None,
                }
            }
        };
        Some(self.lock_entry(series_id, entry).await)
    }

    async fn lock_entry(
        &self,
        series_id: &str,
        entry: Arc<Mutex<SeriesEntry>>,
    ) -> OwnedMutexGuard<SeriesEntry> {
        let mut guard = entry.lock_owned().await;
        self.ensure_loaded(series_id, &mut guard).await;
        guard
    }

    async fn ensure_loaded(&self, series_id: &str, entry: &mut SeriesEntry) {
        if entry.loaded {
            return;
        }
        entry.loaded = true;

        let Some(persistence) = &self.persistence else {
            return;
        };

        match persistence.load_analysis(series_id).await {
            Ok(Some(result)) => {
                debug!(series_id = series_id, "Reloaded persisted analysis");
                entry.analysis = Some(Arc::new(result));
                entry.analysis_revision += 1;
            }
            Ok(None) => {}
            Err(e) => warn!(series_id = series_id, "Ignoring persisted analysis: {}", e),
        }

        // A bundle is only meaningful next to the analysis it came from.
        if entry.analysis.is_some() {
            match persistence.load_model(series_id).await {
                Ok(Some(bundle)) => {
                    debug!(series_id = series_id, "Reloaded persisted model");
                    entry.model = Some(Arc::new(bundle));
                }
                Ok(None) => {}
                Err(e) => warn!(series_id = series_id, "Ignoring persisted model: {}", e),
            }
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn analysis(&self, series_id: &str) -> Option<Arc<AnalysisResult>> {
        self.lock_existing(series_id).await?.analysis()
    }

    pub async fn model(&self, series_id: &str) -> Option<Arc<ModelBundle>> {
        self.lock_existing(series_id).await?.model()
    }

    pub async fn analysis_job(&self, series_id: &str) -> Option<JobHandle> {
        self.lock_existing(series_id).await?.analysis_job.clone()
    }

    pub async fn model_job(&self, series_id: &str) -> Option<JobHandle> {
        self.lock_existing(series_id).await?.model_job.clone()
    }

    /// Series ids currently held in memory.
    pub async fn series(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Series ids with artifacts on disk.
    pub async fn persisted_series(&self) -> Vec<String> {
        match &self.persistence {
            Some(p) => p.list_series().await.unwrap_or_else(|e| {
                warn!("Failed to list persisted artifacts: {}", e);
                Vec::new()
            }),
            None => Vec::new(),
        }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Store the result of analysis job `job_id`.
    ///
    /// Ignored unless that job still owns the analysis slot, which is not the
    /// case after the series was cleared. A new result drops the model bundle
    /// derived from the previous one.
    pub async fn store_analysis(
        &self,
        series_id: &str,
        job_id: u64,
        result: AnalysisResult,
    ) -> bool {
        let owned = match self.lock_existing(series_id).await {
            Some(entry) if owns_slot(&entry.analysis_job, job_id) => {
                Some(entry)
            }
            _ => None,
        };
        let Some(mut entry) = owned else {
            debug!(series_id = series_id, job_id = job_id, "Discarding orphaned analysis result");
            return false;
        };

        if let Some(persistence) = &self.persistence {
            if let Err(e) = persistence.save_analysis(series_id, &result).await {
                warn!(series_id = series_id, "Failed to persist analysis: {}", e);
            }
            if entry.model.is_some() {
                if let Err(e) = persistence.remove_model(series_id).await {
                    warn!(series_id = series_id, "Failed to remove stale model: {}", e);
                }
            }
        }

        entry.analysis = Some(Arc::new(result));
        entry.analysis_revision += 1;
        entry.model = None;
        if entry.model_job.as_ref().is_some_and(|job| job.is_terminal()) {
            entry.model_job = None;
        }
        self.exports.invalidate_series(series_id).await;
        true
    }

    /// Store the bundle of model job `job_id`, built from analysis revision
    /// `revision`.
    ///
    /// Ignored if the job no longer owns the model slot or the analysis was
    /// replaced in the meantime.
    pub async fn store_model(
        &self,
        series_id: &str,
        job_id: u64,
        revision: u64,
        bundle: ModelBundle,
    ) -> bool {
        let owned = match self.lock_existing(series_id).await {
            Some(entry) if owns_slot(&entry.model_job, job_id) => {
                Some(entry)
            }
            _ => None,
        };
        let Some(mut entry) = owned else {
            debug!(series_id = series_id, job_id = job_id, "Discarding orphaned model bundle");
            return false;
        };
        if entry.analysis.is_none() || entry.analysis_revision != revision {
            debug!(series_id = series_id, job_id = job_id, "Discarding model of superseded analysis");
            return false;
        }

        if let Some(persistence) = &self.persistence {
            if let Err(e) = persistence.save_model(series_id, &bundle).await {
                warn!(series_id = series_id, "Failed to persist model: {}", e);
            }
        }

        entry.model = Some(Arc::new(bundle));
        self.exports.invalidate_series(series_id).await;
        true
    }

    // =========================================================================
    // Clearing
    // =========================================================================

    /// Remove jobs and artifacts of one series. Running jobs are cancelled.
    ///
    /// Clearing an unknown series succeeds and creates nothing.
    pub async fn clear_series(&self, series_id: &str) {
        let mut entries = self.entries.write().await;

        let removed = entries.remove(series_id);
        let mut guard = match &removed {
            Some(entry) => Some(entry.lock().await),
            None => None,
        };
        if let Some(entry) = guard.as_mut() {
            if !entry.is_empty() {
                info!(series_id = series_id, "Cleared series");
            }
            entry.reset("Cleared");
        }

        if let Some(persistence) = &self.persistence {
            if let Err(e) = persistence.remove(series_id).await {
                warn!(series_id = series_id, "Failed to remove persisted artifacts: {}", e);
            }
        }
        self.exports.invalidate_series(series_id).await;
    }

    /// Remove jobs and artifacts of every series.
    pub async fn clear_all(&self) {
        let mut entries = self.entries.write().await;

        let drained: Vec<Arc<Mutex<SeriesEntry>>> = entries.drain().map(|(_, e)| e).collect();
        let mut guards = Vec::with_capacity(drained.len());
        for entry in &drained {
            let mut guard = entry.lock().await;
            guard.reset("Cleared");
            guards.push(guard);
        }
        if !drained.is_empty() {
            info!(series = drained.len(), "Cleared all series");
        }

        if let Some(persistence) = &self.persistence {
            if let Err(e) = persistence.clear().await {
                warn!("Failed to remove persisted artifacts: {}", e);
            }
        }
        self.exports.clear().await;
    }

    // =========================================================================
    // Exports
    // =========================================================================

    /// Cache an encoding of `bundle`, unless the series moved on while it was
    /// being encoded.
    ///
    /// Invalidation always happens under the entry lock, so checking that
    /// `bundle` is still the current model under the same lock keeps stale
    /// bytes out of the cache.
    pub async fn cache_export(&self, key: ExportKey, bundle: &Arc<ModelBundle>, data: Bytes) -> bool {
        let Some(entry) = self.lock_existing(&key.series_id).await else {
            return false;
        };
        let current = entry.model.as_ref().is_some_and(|model| Arc::ptr_eq(model, bundle));
        if !current {
            debug!(series_id = %key.series_id, "Discarding export of a replaced model");
            return false;
        }
        self.exports.put(key, data).await;
        true
    }
}

/// The slot still holds live job `job_id`. A cleared series has its jobs
/// cancelled, so a late result never lands in a detached entry.
fn owns_slot(slot: &Option<JobHandle>, job_id: u64) -> bool {
    slot.as_ref()
        .is_some_and(|job| job.id() == job_id && !job.is_terminal())
}

// =============================================================================
// Tests
// =============================================================================
