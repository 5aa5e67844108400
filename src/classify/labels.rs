//! Tissue labels and per-slice / per-volume label grids.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::SliceFault;
use crate::volume::Spacing;

// =============================================================================
// TissueLabel
// =============================================================================

/// Tissue class assigned to a single voxel.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum TissueLabel {
    #[default]
    Background = 0,
    Bone = 1,
    Muscle = 2,
    Organ = 3,
    VisceralFat = 4,
    SubcutaneousFat = 5,
}

impl TissueLabel {
    /// Every label, in id order.
    pub const ALL: [TissueLabel; 6] = [
        TissueLabel::Background,
        TissueLabel::Bone,
        TissueLabel::Muscle,
        TissueLabel::Organ,
        TissueLabel::VisceralFat,
        TissueLabel::SubcutaneousFat,
    ];

    /// Every label except Background.
    pub const TISSUES: [TissueLabel; 5] = [
        TissueLabel::Bone,
        TissueLabel::Muscle,
        TissueLabel::Organ,
        TissueLabel::VisceralFat,
        TissueLabel::SubcutaneousFat,
    ];

    /// Numeric id, stable across releases (used in exports).
    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TissueLabel::Background => "background",
            TissueLabel::Bone => "bone",
            TissueLabel::Muscle => "muscle",
            TissueLabel::Organ => "organ",
            TissueLabel::VisceralFat => "visceral_fat",
            TissueLabel::SubcutaneousFat => "subcutaneous_fat",
        }
    }

    /// Human-readable name for legends.
    pub fn description(self) -> &'static str {
        match self {
            TissueLabel::Background => "Background",
            TissueLabel::Bone => "Bone",
            TissueLabel::Muscle => "Muscle Tissue",
            TissueLabel::Organ => "Organs",
            TissueLabel::VisceralFat => "Visceral Fat",
            TissueLabel::SubcutaneousFat => "Subcutaneous Fat",
        }
    }

    pub fn is_fat(self) -> bool {
        matches!(self, TissueLabel::VisceralFat | TissueLabel::SubcutaneousFat)
    }
}

impl fmt::Display for TissueLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown tissue name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown tissue: {0}")]
pub struct ParseTissueError(pub String);

impl FromStr for TissueLabel {
    type Err = ParseTissueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "background" => Ok(TissueLabel::Background),
            "bone" => Ok(TissueLabel::Bone),
            "muscle" => Ok(TissueLabel::Muscle),
            "organ" | "organs" => Ok(TissueLabel::Organ),
            "visceral_fat" | "visceral" => Ok(TissueLabel::VisceralFat),
            "subcutaneous_fat" | "subcutaneous" => Ok(TissueLabel::SubcutaneousFat),
            other => Err(ParseTissueError(other.to_string())),
        }
    }
}

// =============================================================================
// SliceLabels
// =============================================================================

/// Labels for one slice, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct SliceLabels {
    width: usize,
    height: usize,
    labels: Vec<TissueLabel>,
}

impl SliceLabels {
    pub fn new(width: usize, height: usize, labels: Vec<TissueLabel>) -> Self {
        debug_assert_eq!(labels.len(), width * height);
        Self {
            width,
            height,
            labels,
        }
    }

    /// An all-Background slice.
    pub fn background(width: usize, height: usize) -> Self {
        Self::new(width, height, vec![TissueLabel::Background; width * height])
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn get(&self, x: usize, y: usize) -> TissueLabel {
        self.labels[y * self.width + x]
    }

    pub fn as_slice(&self) -> &[TissueLabel] {
        &self.labels
    }

    /// Number of pixels carrying `label`.
    pub fn count(&self, label: TissueLabel) -> usize {
        self.labels.iter().filter(|&&l| l == label).count()
    }

    /// Pixel counts indexed by [`TissueLabel::id`].
    pub fn histogram(&self) -> [usize; 6] {
        let mut counts = [0usize; 6];
        for label in &self.labels {
            counts[label.id() as usize] += 1;
        }
        counts
    }
}

// =============================================================================
// LabelVolume
// =============================================================================

/// Labels for a whole volume, in slice order.
#[derive(Debug, Clone)]
pub struct LabelVolume {
    width: usize,
    height: usize,
    spacing: Spacing,
    slices: Vec<SliceLabels>,
    faults: Vec<SliceFault>,
}

impl LabelVolume {
    pub fn new(
        width: usize,
        height: usize,
        spacing: Spacing,
        slices: Vec<SliceLabels>,
        faults: Vec<SliceFault>,
    ) -> Self {
        Self {
            width,
            height,
            spacing,
            slices,
            faults,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn depth(&self) -> usize {
        self.slices.len()
    }

    pub fn dimensions(&self) -> [usize; 3] {
        [self.width, self.height, self.slices.len()]
    }

    pub fn spacing(&self) -> Spacing {
        self.spacing
    }

    pub fn slices(&self) -> &[SliceLabels] {
        &self.slices
    }

    /// Slices that could not be classified and were left as Background.
    pub fn faults(&self) -> &[SliceFault] {
        &self.faults
    }

    pub fn get(&self, x: usize, y: usize, z: usize) -> TissueLabel {
        self.slices[z].get(x, y)
    }

    pub fn voxel_count(&self, label: TissueLabel) -> usize {
        self.slices.iter().map(|s| s.count(label)).sum()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_names_round_trip() {
        for label in TissueLabel::ALL {
            assert_eq!(label.as_str().parse::<TissueLabel>().unwrap(), label);
        }
        assert_eq!("organs".parse::<TissueLabel>().unwrap(), TissueLabel::Organ);
        assert_eq!(
            " Visceral ".parse::<TissueLabel>().unwrap(),
            TissueLabel::VisceralFat
        );
        assert!("liver".parse::<TissueLabel>().is_err());
    }

    #[test]
    fn test_label_serde() {
        let json = serde_json::to_string(&TissueLabel::SubcutaneousFat).unwrap();
        assert_eq!(json, "\"subcutaneous_fat\"");
    }

    #[test]
    fn test_slice_histogram() {
        use TissueLabel::*;
        let slice = SliceLabels::new(2, 2, vec![Background, VisceralFat, VisceralFat, Bone]);

        assert_eq!(slice.count(VisceralFat), 2);
        assert_eq!(slice.histogram(), [1, 1, 0, 0, 2, 0]);
        assert_eq!(slice.get(1, 1), Bone);
    }
}
