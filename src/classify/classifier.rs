//! Per-slice tissue classification.
//!
//! ```text
//! intensities ──► band threshold ──► body mask ──► cavity mask ──► labels
//!                  (BandTable)      close + largest   chamfer distance
//!                                   component + fill  > margin + fill
//! ```

use std::ops::ControlFlow;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::SliceFault;
use crate::volume::{Spacing, VolumeModel};

use super::bands::{BandClass, BandTable};
use super::labels::{LabelVolume, SliceLabels, TissueLabel};
use super::morphology::{close, distance_to_outside, fill_holes, largest_component, Mask};

/// Default physical width of the subcutaneous rim, in millimetres.
pub const DEFAULT_CAVITY_MARGIN_MM: f64 = 10.0;

/// Default closing radius for the body mask, in pixels.
pub const DEFAULT_CLOSING_RADIUS: usize = 2;

// =============================================================================
// Configuration
// =============================================================================

/// Classifier tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Intensity bands, first match wins
    pub bands: BandTable,

    /// Distance from the body outline beyond which fat counts as visceral
    pub cavity_margin_mm: f64,

    /// Radius (pixels) of the closing applied to the body mask
    pub closing_radius: usize,

    /// Reject components touching the image border when picking the body
    pub exclude_border_components: bool,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            bands: BandTable::default(),
            cavity_margin_mm: DEFAULT_CAVITY_MARGIN_MM,
            closing_radius: DEFAULT_CLOSING_RADIUS,
            exclude_border_components: true,
        }
    }
}

impl ClassifierConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.bands.validate()?;
        if !self.cavity_margin_mm.is_finite() || self.cavity_margin_mm < 0.0 {
            return Err(format!(
                "cavity margin must be a non-negative number of millimetres, got {}",
                self.cavity_margin_mm
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Slice masks
// =============================================================================

/// Intermediate masks derived for one slice.
#[derive(Debug, Clone)]
pub struct SliceMasks {
    /// Band class per pixel before any spatial filtering
    pub bands: Vec<Option<BandClass>>,

    /// The body outline with interior holes filled
    pub body: Mask,

    /// Body pixels further than the margin from the outline
    pub cavity: Mask,
}

// =============================================================================
// TissueClassifier
// =============================================================================

/// Deterministic intensity + geometry classifier.
#[derive(Debug, Clone, Default)]
pub struct TissueClassifier {
    config: ClassifierConfig,
}

impl TissueClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Derive the band, body and cavity masks for a slice.
    pub fn masks(
        &self,
        pixels: &[f32],
        width: usize,
        height: usize,
        spacing: Spacing,
    ) -> SliceMasks {
        let bands: Vec<Option<BandClass>> =
            pixels.iter().map(|&v| self.config.bands.classify(v)).collect();

        let banded = Mask::from_vec(width, height, bands.iter().map(Option::is_some).collect());
        let closed = close(&banded, self.config.closing_radius);
        let body = fill_holes(&largest_component(
            &closed,
            self.config.exclude_border_components,
        ));

        let distance = distance_to_outside(&body, spacing.x, spacing.y);
        let margin = self.config.cavity_margin_mm as f32;
        let inner = Mask::from_vec(width, height, distance.iter().map(|&d| d > margin).collect());
        let cavity = fill_holes(&inner);

        SliceMasks {
            bands,
            body,
            cavity,
        }
    }

    /// Classify a single slice of raw intensities.
    pub fn classify_pixels(
        &self,
        pixels: &[f32],
        width: usize,
        height: usize,
        spacing: Spacing,
    ) -> SliceLabels {
        let masks = self.masks(pixels, width, height, spacing);

        let labels = masks
            .bands
            .iter()
            .zip(masks.body.as_slice())
            .zip(masks.cavity.as_slice())
            .map(|((class, &in_body), &in_cavity)| match class {
                Some(class) if in_body => class.label(in_cavity),
                _ => TissueLabel::Background,
            })
            .collect();

        SliceLabels::new(width, height, labels)
    }

    /// Classify slice `index` of a volume.
    pub fn classify_slice(
        &self,
        volume: &VolumeModel,
        index: usize,
    ) -> Result<SliceLabels, SliceFault> {
        let pixels = volume.slice(index)?;
        Ok(self.classify_pixels(
            pixels,
            volume.width(),
            volume.height(),
            volume.spacing(),
        ))
    }

    /// Classify every slice, asking `before_slice` for permission before each
    /// one. Returns `None` if the callback breaks.
    ///
    /// Faulted slices become all-Background and are listed in
    /// [`LabelVolume::faults`].
    pub fn classify_volume_with<F>(
        &self,
        volume: &VolumeModel,
        mut before_slice: F,
    ) -> Option<LabelVolume>
    where
        F: FnMut(usize) -> ControlFlow<()>,
    {
        let mut slices = Vec::with_capacity(volume.slice_count());
        let mut faults = Vec::new();

        for index in 0..volume.slice_count() {
            if before_slice(index).is_break() {
                debug!(slice = index, "Volume classification interrupted");
                return None;
            }
            slices.push(self.classify_or_skip(volume, index, &mut faults));
        }

        Some(LabelVolume::new(
            volume.width(),
            volume.height(),
            volume.spacing(),
            slices,
            faults,
        ))
    }

    fn classify_or_skip(
        &self,
        volume: &VolumeModel,
        index: usize,
        faults: &mut Vec<SliceFault>,
    ) -> SliceLabels {
        match self.classify_slice(volume, index) {
            Ok(labels) => labels,
            Err(fault) => {
                warn!(slice = index, "Skipping slice: {}", fault);
                faults.push(fault);
                SliceLabels::background(volume.width(), volume.height())
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
