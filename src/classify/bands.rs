//! Intensity band table.
//!
//! Coarse tissue classes are assigned purely from the voxel intensity using an
//! ordered table of ranges. The table is data: it can be replaced wholesale
//! from JSON without touching the classifier.
//!
//! Default table (Hounsfield units):
//!
//! | class  | range          |
//! |--------|----------------|
//! | fat    | `[-190, -30]`  |
//! | muscle | `[10, 40)`     |
//! | organ  | `[40, 80]`     |
//! | bone   | `(300, +inf)`  |

use std::ops::{Bound, RangeBounds};

use serde::{Deserialize, Serialize};

use super::labels::TissueLabel;

/// Coarse class produced by band thresholding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BandClass {
    Fat,
    Muscle,
    Organ,
    Bone,
}

impl BandClass {
    /// Final label for a body voxel of this class.
    ///
    /// Only fat depends on position: inside the cavity it is visceral,
    /// otherwise subcutaneous.
    pub fn label(self, in_cavity: bool) -> TissueLabel {
        match self {
            BandClass::Fat if in_cavity => TissueLabel::VisceralFat,
            BandClass::Fat => TissueLabel::SubcutaneousFat,
            BandClass::Muscle => TissueLabel::Muscle,
            BandClass::Organ => TissueLabel::Organ,
            BandClass::Bone => TissueLabel::Bone,
        }
    }
}

/// A single intensity range mapped to a class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntensityBand {
    pub class: BandClass,
    pub min: Bound<f32>,
    pub max: Bound<f32>,
}

impl IntensityBand {
    /// Band with both ends inclusive.
    pub fn inclusive(class: BandClass, min: f32, max: f32) -> Self {
        Self {
            class,
            min: Bound::Included(min),
            max: Bound::Included(max),
        }
    }

    pub fn contains(&self, value: f32) -> bool {
        !value.is_nan() && (self.min, self.max).contains(&value)
    }

    fn is_well_formed(&self) -> bool {
        let bound_value = |b: &Bound<f32>| match b {
            Bound::Included(v) | Bound::Excluded(v) => Some(*v),
            Bound::Unbounded => None,
        };
        match (bound_value(&self.min), bound_value(&self.max)) {
            (Some(lo), Some(hi)) => lo.is_finite() && hi.is_finite() && lo <= hi,
            (Some(v), None) | (None, Some(v)) => v.is_finite(),
            (None, None) => true,
        }
    }
}

/// Ordered list of bands; the first band containing a value wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandTable {
    pub bands: Vec<IntensityBand>,
}

impl BandTable {
    pub fn new(bands: Vec<IntensityBand>) -> Self {
        Self { bands }
    }

    /// Class for an intensity, or `None` for Background.
    pub fn classify(&self, value: f32) -> Option<BandClass> {
        self.bands
            .iter()
            .find(|band| band.contains(value))
            .map(|band| band.class)
    }

    /// Parse a table from JSON.
    pub fn from_json(json: &str) -> Result<Self, String> {
        let table: BandTable =
            serde_json::from_str(json).map_err(|e| format!("invalid band table: {}", e))?;
        table.validate()?;
        Ok(table)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.bands.is_empty() {
            return Err("band table must contain at least one band".to_string());
        }
        if let Some(band) = self.bands.iter().find(|b| !b.is_well_formed()) {
            return Err(format!("band {:?} has an empty or non-finite range", band.class));
        }
        Ok(())
    }
}

impl Default for BandTable {
    fn default() -> Self {
        Self::new(vec![
            IntensityBand::inclusive(BandClass::Fat, -190.0, -30.0),
            IntensityBand {
                class: BandClass::Muscle,
                min: Bound::Included(10.0),
                max: Bound::Excluded(40.0),
            },
            IntensityBand::inclusive(BandClass::Organ, 40.0, 80.0),
            IntensityBand {
                class: BandClass::Bone,
                min: Bound::Excluded(300.0),
                max: Bound::Unbounded,
            },
        ])
    }
}

// =============================================================================
// Tests
// =============================================================================
