//! Immutable intensity volume.
//!
//! A [`VolumeModel`] is an ordered stack of 2D intensity slices sharing one
//! in-plane geometry, plus the physical spacing between samples. Slice order
//! is physical order. Volumes are assembled through [`VolumeBuilder`] and are
//! read-only afterwards.

use serde::{Deserialize, Serialize};

use crate::error::{SliceFault, VolumeError};

// =============================================================================
// Spacing
// =============================================================================

/// Physical sample spacing in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Spacing {
    /// In-plane spacing along columns (mm)
    pub x: f64,

    /// In-plane spacing along rows (mm)
    pub y: f64,

    /// Distance between consecutive slices (mm)
    pub z: f64,
}

impl Spacing {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Uniform spacing on all three axes.
    pub fn isotropic(mm: f64) -> Self {
        Self::new(mm, mm, mm)
    }

    /// Area of one pixel in mm².
    pub fn pixel_area_mm2(&self) -> f64 {
        self.x * self.y
    }

    /// Volume of one voxel in mm³.
    pub fn voxel_volume_mm3(&self) -> f64 {
        self.x * self.y * self.z
    }

    /// Return a copy with every axis multiplied by `factor`.
    pub fn scaled(&self, factor: f64) -> Self {
        Self::new(self.x * factor, self.y * factor, self.z * factor)
    }

    pub fn is_valid(&self) -> bool {
        [self.x, self.y, self.z]
            .iter()
            .all(|v| v.is_finite() && *v > 0.0)
    }
}

impl Default for Spacing {
    fn default() -> Self {
        Self::isotropic(1.0)
    }
}

// =============================================================================
// Slices
// =============================================================================

/// One entry of the slice stack as delivered by the loader.
#[derive(Debug, Clone)]
enum SliceData {
    Pixels(Vec<f32>),
    Unreadable(String),
}

// =============================================================================
// VolumeModel
// =============================================================================

/// An ordered, immutable stack of intensity slices.
#[derive(Debug, Clone)]
pub struct VolumeModel {
    width: usize,
    height: usize,
    spacing: Spacing,
    slices: Vec<SliceData>,
}

impl VolumeModel {
    /// Start building a volume with the given in-plane geometry.
    pub fn builder(width: usize, height: usize, spacing: Spacing) -> VolumeBuilder {
        VolumeBuilder {
            width,
            height,
            spacing,
            slices: Vec::new(),
        }
    }

    /// Build a volume from fully readable slices.
    pub fn from_slices(
        width: usize,
        height: usize,
        spacing: Spacing,
        slices: Vec<Vec<f32>>,
    ) -> Result<Self, VolumeError> {
        slices
            .into_iter()
            .fold(Self::builder(width, height, spacing), |b, s| b.slice(s))
            .build()
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn slice_count(&self) -> usize {
        self.slices.len()
    }

    /// `(width, height, slice_count)`
    pub fn dimensions(&self) -> [usize; 3] {
        [self.width, self.height, self.slices.len()]
    }

    pub fn spacing(&self) -> Spacing {
        self.spacing
    }

    /// Pixels per slice.
    pub fn slice_len(&self) -> usize {
        self.width * self.height
    }

    /// Access the intensities of one slice.
    ///
    /// Fails with a [`SliceFault`] when the loader could not decode the slice
    /// or delivered the wrong number of pixels.
    pub fn slice(&self, index: usize) -> Result<&[f32], SliceFault> {
        match self.slices.get(index) {
            None => Err(SliceFault::OutOfRange {
                index,
                count: self.slices.len(),
            }),
            Some(SliceData::Unreadable(reason)) => Err(SliceFault::Unreadable {
                index,
                reason: reason.clone(),
            }),
            Some(SliceData::Pixels(pixels)) if pixels.len() != self.slice_len() => {
                Err(SliceFault::DimensionMismatch {
                    index,
                    expected: self.slice_len(),
                    actual: pixels.len(),
                })
            }
            Some(SliceData::Pixels(pixels)) => Ok(pixels),
        }
    }
}

// =============================================================================
// VolumeBuilder
// =============================================================================

/// Incremental constructor for [`VolumeModel`].
///
/// Slices are appended in physical order. A slice with the wrong pixel count
/// or one marked unreadable is kept in place so later stages can skip it
/// without shifting the indices of its neighbours.
#[derive(Debug)]
pub struct VolumeBuilder {
    width: usize,
    height: usize,
    spacing: Spacing,
    slices: Vec<SliceData>,
}

impl VolumeBuilder {
    /// Append a slice of row-major intensities.
    pub fn slice(mut self, pixels: Vec<f32>) -> Self {
        self.slices.push(SliceData::Pixels(pixels));
        self
    }

    /// Append a placeholder for a slice the loader failed to decode.
    pub fn unreadable(mut self, reason: impl Into<String>) -> Self {
        self.slices.push(SliceData::Unreadable(reason.into()));
        self
    }

    pub fn build(self) -> Result<VolumeModel, VolumeError> {
        if self.width == 0 || self.height == 0 {
            return Err(VolumeError::InvalidGeometry(format!(
                "slice dimensions must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        if !self.spacing.is_valid() {
            return Err(VolumeError::InvalidGeometry(format!(
                "spacing must be positive and finite, got ({}, {}, {})",
                self.spacing.x, self.spacing.y, self.spacing.z
            )));
        }
        if self.slices.is_empty() {
            return Err(VolumeError::InvalidGeometry(
                "volume contains no slices".to_string(),
            ));
        }

        Ok(VolumeModel {
            width: self.width,
            height: self.height,
            spacing: self.spacing,
            slices: self.slices,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
