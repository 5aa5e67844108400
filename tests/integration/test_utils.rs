//! Test utilities for integration tests.
//!
//! Synthetic abdominal phantoms and a volume source whose loads can be held
//! back, so tests can act on a job while it is still running.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use tissue_recon::error::VolumeError;
use tissue_recon::job::{Job, JobHandle};
use tissue_recon::volume::{InMemoryVolumeSource, Spacing, VolumeModel, VolumeSource};

// =============================================================================
// Phantom
// =============================================================================

pub const PHANTOM_SIZE: usize = 64;

const AIR: f32 = -1000.0;
const FAT: f32 = -100.0;
const MUSCLE: f32 = 25.0;
const ORGAN: f32 = 60.0;
const BONE: f32 = 500.0;

/// Phantom spacing: 1mm in-plane, 2mm between slices.
pub fn phantom_spacing() -> Spacing {
    Spacing::new(1.0, 1.0, 2.0)
}

/// One abdominal cross-section.
///
/// ```text
/// air outside [8, 56)^2
/// body: 4px fat rim, muscle inside
///   visceral fat  [26, 38)^2
///   organ         x [40, 48), y [20, 30)
///   bone          x [20, 24), y [40, 44)
/// ```
pub fn phantom_slice() -> Vec<f32> {
    let n = PHANTOM_SIZE;
    let mut pixels = vec![AIR; n * n];
    for y in 0..n {
        for x in 0..n {
            let value = if !(8..56).contains(&x) || !(8..56).contains(&y) {
                AIR
            } else if x < 12 || x >= 52 || y < 12 || y >= 52 {
                FAT
            } else if (26..38).contains(&x) && (26..38).contains(&y) {
                FAT
            } else if (40..48).contains(&x) && (20..30).contains(&y) {
                ORGAN
            } else if (20..24).contains(&x) && (40..44).contains(&y) {
                BONE
            } else {
                MUSCLE
            };
            pixels[y * n + x] = value;
        }
    }
    pixels
}

/// A phantom stack of `slices` identical cross-sections.
pub fn phantom_volume(slices: usize) -> VolumeModel {
    VolumeModel::from_slices(
        PHANTOM_SIZE,
        PHANTOM_SIZE,
        phantom_spacing(),
        vec![phantom_slice(); slices],
    )
    .unwrap()
}

/// A phantom stack whose slice `bad` could not be decoded.
pub fn phantom_volume_with_unreadable(slices: usize, bad: usize) -> VolumeModel {
    let mut builder = VolumeModel::builder(PHANTOM_SIZE, PHANTOM_SIZE, phantom_spacing());
    for index in 0..slices {
        builder = if index == bad {
            builder.unreadable("truncated pixel data")
        } else {
            builder.slice(phantom_slice())
        };
    }
    builder.build().unwrap()
}

// =============================================================================
// Gated Volume Source
// =============================================================================

/// In-memory source whose loads wait until the test opens the gate.
#[derive(Clone)]
pub struct GatedVolumeSource {
    inner: Arc<InMemoryVolumeSource>,
    gate: Arc<Semaphore>,
    loads: Arc<AtomicUsize>,
}

impl GatedVolumeSource {
    /// Closed gate: every load blocks until [`open`](Self::open).
    pub fn closed(inner: InMemoryVolumeSource) -> Self {
        Self {
            inner: Arc::new(inner),
            gate: Arc::new(Semaphore::new(0)),
            loads: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Let every pending and future load through.
    pub fn open(&self) {
        self.gate.add_permits(Semaphore::MAX_PERMITS / 2);
    }

    /// Number of loads that have been requested.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VolumeSource for GatedVolumeSource {
    async fn load(&self, series_id: &str) -> Result<Arc<VolumeModel>, VolumeError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| VolumeError::Io("gate closed".to_string()))?;
        drop(permit);
        self.inner.load(series_id).await
    }
}

// =============================================================================
// Job helpers
// =============================================================================

/// Follow a job until its terminal event and return the final snapshot.
pub async fn finish(job: &JobHandle) -> Job {
    let mut events = job.subscribe();
    tokio::time::timeout(Duration::from_secs(30), async {
        while events.next().await.is_some() {}
    })
    .await
    .expect("job did not finish in time");
    job.snapshot()
}
