//! Area and volume statistics.
//!
//! Units: pixel spacing is in millimetres, areas are reported in cm² and
//! volumes in cm³.
//!
//! ```text
//! area_cm2   = voxels * spacing.x * spacing.y / 100
//! volume_cm3 = area_cm2 * spacing.z / 10
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::classify::{SliceLabels, TissueLabel};
use crate::volume::Spacing;

const MM2_PER_CM2: f64 = 100.0;
const MM_PER_CM: f64 = 10.0;

// =============================================================================
// Fat distribution
// =============================================================================

/// How the fat-distribution percentage is computed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FatDistribution {
    /// visceral / (visceral + subcutaneous)
    #[default]
    #[serde(rename = "total-fat")]
    VisceralOfTotalFat,

    /// visceral / body
    #[serde(rename = "body")]
    VisceralOfBody,
}

impl FatDistribution {
    pub fn as_str(self) -> &'static str {
        match self {
            FatDistribution::VisceralOfTotalFat => "total-fat",
            FatDistribution::VisceralOfBody => "body",
        }
    }
}

impl fmt::Display for FatDistribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FatDistribution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "total-fat" => Ok(FatDistribution::VisceralOfTotalFat),
            "body" => Ok(FatDistribution::VisceralOfBody),
            other => Err(format!(
                "unknown fat formula '{}', expected 'total-fat' or 'body'",
                other
            )),
        }
    }
}

/// Visceral fat share in percent under `formula`.
///
/// Inputs may be voxel counts or volumes as long as they share a unit.
/// Returns 0 when the denominator is zero.
pub fn fat_distribution_percentage(
    formula: FatDistribution,
    visceral: f64,
    subcutaneous: f64,
    body: f64,
) -> f64 {
    let denominator = match formula {
        FatDistribution::VisceralOfTotalFat => visceral + subcutaneous,
        FatDistribution::VisceralOfBody => body,
    };
    if denominator > 0.0 {
        visceral / denominator * 100.0
    } else {
        0.0
    }
}

// =============================================================================
// SliceStats / AnalysisResult
// =============================================================================

/// Per-slice fat counts and areas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceStats {
    pub index: usize,
    pub visceral_fat_voxels: usize,
    pub subcutaneous_fat_voxels: usize,

    /// Voxels carrying any tissue label
    pub body_voxels: usize,

    pub visceral_fat_area_cm2: f64,
    pub subcutaneous_fat_area_cm2: f64,

    /// The slice faulted and contributes zero
    #[serde(default)]
    pub skipped: bool,
}

impl SliceStats {
    /// Zero statistics for a slice that could not be processed.
    pub fn skipped(index: usize) -> Self {
        Self {
            index,
            visceral_fat_voxels: 0,
            subcutaneous_fat_voxels: 0,
            body_voxels: 0,
            visceral_fat_area_cm2: 0.0,
            subcutaneous_fat_area_cm2: 0.0,
            skipped: true,
        }
    }
}

/// Outcome of a completed analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub series_id: String,
    pub slice_count: usize,
    pub dimensions: [usize; 3],
    pub spacing: Spacing,
    pub slice_stats: Vec<SliceStats>,
    pub total_visceral_fat_volume_cm3: f64,
    pub total_subcutaneous_fat_volume_cm3: f64,
    pub visceral_fat_percentage: f64,
    pub distribution_formula: FatDistribution,

    /// Indices of slices that were skipped
    pub skipped_slices: Vec<usize>,
}

impl AnalysisResult {
    pub fn total_fat_volume_cm3(&self) -> f64 {
        self.total_visceral_fat_volume_cm3 + self.total_subcutaneous_fat_volume_cm3
    }
}

// =============================================================================
// StatsAggregator
// =============================================================================

/// Turns slice labels into [`SliceStats`] and totals.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatsAggregator {
    formula: FatDistribution,
}

impl StatsAggregator {
    pub fn new(formula: FatDistribution) -> Self {
        Self { formula }
    }

    pub fn formula(&self) -> FatDistribution {
        self.formula
    }

    /// Statistics for one classified slice.
    pub fn slice_stats(&self, index: usize, labels: &SliceLabels, spacing: Spacing) -> SliceStats {
        let histogram = labels.histogram();
        let visceral = histogram[TissueLabel::VisceralFat.id() as usize];
        let subcutaneous = histogram[TissueLabel::SubcutaneousFat.id() as usize];
        let body = labels.as_slice().len() - histogram[TissueLabel::Background.id() as usize];

        SliceStats {
            index,
            visceral_fat_voxels: visceral,
            subcutaneous_fat_voxels: subcutaneous,
            body_voxels: body,
            visceral_fat_area_cm2: area_cm2(visceral, spacing),
            subcutaneous_fat_area_cm2: area_cm2(subcutaneous, spacing),
            skipped: false,
        }
    }

    /// Combine per-slice statistics into an [`AnalysisResult`].
    ///
    /// `slice_stats` must be in slice order.
    pub fn aggregate(
        &self,
        series_id: impl Into<String>,
        dimensions: [usize; 3],
        spacing: Spacing,
        slice_stats: Vec<SliceStats>,
    ) -> AnalysisResult {
        let visceral_area: f64 = slice_stats.iter().map(|s| s.visceral_fat_area_cm2).sum();
        let subcutaneous_area: f64 = slice_stats.iter().map(|s| s.subcutaneous_fat_area_cm2).sum();
        let body_area: f64 = slice_stats
            .iter()
            .map(|s| area_cm2(s.body_voxels, spacing))
            .sum();

        let visceral_volume = volume_cm3(visceral_area, spacing);
        let subcutaneous_volume = volume_cm3(subcutaneous_area, spacing);
        let body_volume = volume_cm3(body_area, spacing);

        let skipped_slices = slice_stats
            .iter()
            .filter(|s| s.skipped)
            .map(|s| s.index)
            .collect();

        AnalysisResult {
            series_id: series_id.into(),
            slice_count: slice_stats.len(),
            dimensions,
            spacing,
            total_visceral_fat_volume_cm3: visceral_volume,
            total_subcutaneous_fat_volume_cm3: subcutaneous_volume,
            visceral_fat_percentage: fat_distribution_percentage(
                self.formula,
                visceral_volume,
                subcutaneous_volume,
                body_volume,
            ),
            distribution_formula: self.formula,
            slice_stats,
            skipped_slices,
        }
    }
}

fn area_cm2(voxels: usize, spacing: Spacing) -> f64 {
    voxels as f64 * spacing.pixel_area_mm2() / MM2_PER_CM2
}

fn volume_cm3(area_cm2: f64, spacing: Spacing) -> f64 {
    area_cm2 * spacing.z / MM_PER_CM
}

// =============================================================================
// Tests
// =============================================================================
