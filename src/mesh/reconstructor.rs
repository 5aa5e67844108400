//! Per-tissue surface reconstruction.

use std::ops::ControlFlow;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::classify::{LabelVolume, TissueLabel};
use crate::volume::Spacing;

use super::smooth::laplacian;
use super::surface_nets::{extract, BinaryVolume};

/// Default number of Laplacian smoothing passes.
pub const DEFAULT_SMOOTHING_ITERATIONS: usize = 2;

/// Default Laplacian step factor.
pub const DEFAULT_SMOOTHING_FACTOR: f32 = 0.5;

// =============================================================================
// Palette
// =============================================================================

/// RGBA base colour per tissue label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TissuePalette {
    colors: [[u8; 4]; 6],
}

impl Default for TissuePalette {
    fn default() -> Self {
        let mut colors = [[0, 0, 0, 0]; 6];
        colors[TissueLabel::Bone.id() as usize] = [0xFF, 0xFF, 0xFF, 0xFF];
        colors[TissueLabel::Muscle.id() as usize] = [0xFF, 0x00, 0x00, 0xFF];
        colors[TissueLabel::Organ.id() as usize] = [0x00, 0x80, 0xFF, 0xFF];
        colors[TissueLabel::VisceralFat.id() as usize] = [0xFF, 0xA5, 0x00, 0xFF];
        colors[TissueLabel::SubcutaneousFat.id() as usize] = [0xFF, 0xFF, 0x00, 0xFF];
        Self { colors }
    }
}

impl TissuePalette {
    pub fn color(&self, label: TissueLabel) -> [u8; 4] {
        self.colors[label.id() as usize]
    }

    pub fn set(&mut self, label: TissueLabel, color: [u8; 4]) {
        self.colors[label.id() as usize] = color;
    }

    /// `#RRGGBB` for a label.
    pub fn hex(&self, label: TissueLabel) -> String {
        hex_color(self.color(label))
    }

    /// Legend entries for every tissue label.
    pub fn legend(&self) -> Vec<LegendEntry> {
        TissueLabel::TISSUES
            .iter()
            .map(|&label| LegendEntry {
                label,
                name: label.description().to_string(),
                color: self.hex(label),
            })
            .collect()
    }
}

fn hex_color(rgba: [u8; 4]) -> String {
    format!("#{:02X}{:02X}{:02X}", rgba[0], rgba[1], rgba[2])
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegendEntry {
    pub label: TissueLabel,
    pub name: String,
    pub color: String,
}

// =============================================================================
// Meshes
// =============================================================================

/// Triangulated surface of one tissue, in millimetres.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TissueMesh {
    pub label: TissueLabel,
    pub vertices: Vec<[f32; 3]>,
    pub triangles: Vec<[u32; 3]>,
    pub color: [u8; 4],
}

impl TissueMesh {
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }
}

/// All meshes generated for a series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelBundle {
    pub series_id: String,
    pub meshes: Vec<TissueMesh>,
    pub dimensions: [usize; 3],
    pub spacing: Spacing,

    /// Tissues that were asked for, including those with no voxels
    pub requested: Vec<TissueLabel>,
}

impl ModelBundle {
    pub fn mesh(&self, label: TissueLabel) -> Option<&TissueMesh> {
        self.meshes.iter().find(|m| m.label == label)
    }

    pub fn summary(&self) -> ModelSummary {
        ModelSummary {
            series_id: self.series_id.clone(),
            dimensions: self.dimensions,
            spacing: self.spacing,
            requested: self.requested.clone(),
            tissues: self
                .meshes
                .iter()
                .map(|m| MeshSummary {
                    label: m.label,
                    name: m.label.description().to_string(),
                    color: hex_color(m.color),
                    vertex_count: m.vertex_count(),
                    triangle_count: m.triangle_count(),
                })
                .collect(),
        }
    }
}

/// Lightweight description of a [`ModelBundle`] for status responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub series_id: String,
    pub dimensions: [usize; 3],
    pub spacing: Spacing,
    pub requested: Vec<TissueLabel>,
    pub tissues: Vec<MeshSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshSummary {
    pub label: TissueLabel,
    pub name: String,
    pub color: String,
    pub vertex_count: usize,
    pub triangle_count: usize,
}

// =============================================================================
// MeshReconstructor
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct MeshConfig {
    pub smoothing_iterations: usize,
    pub smoothing_factor: f32,
    pub palette: TissuePalette,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            smoothing_iterations: DEFAULT_SMOOTHING_ITERATIONS,
            smoothing_factor: DEFAULT_SMOOTHING_FACTOR,
            palette: TissuePalette::default(),
        }
    }
}

/// Label volume → tissue meshes.
#[derive(Debug, Clone, Default)]
pub struct MeshReconstructor {
    config: MeshConfig,
}

impl MeshReconstructor {
    pub fn new(config: MeshConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    /// Surface of one tissue, or `None` if it has no voxels.
    ///
    /// Background is never meshed.
    pub fn reconstruct(&self, labels: &LabelVolume, label: TissueLabel) -> Option<TissueMesh> {
        if label == TissueLabel::Background {
            return None;
        }

        let occupancy = BinaryVolume::from_labels(labels, label);
        let voxels = occupancy.count();
        if voxels == 0 {
            return None;
        }

        let surface = extract(&occupancy);
        let spacing = labels.spacing();
        let mut vertices: Vec<[f32; 3]> = surface
            .vertices
            .iter()
            .map(|v| {
                [
                    v[0] * spacing.x as f32,
                    v[1] * spacing.y as f32,
                    v[2] * spacing.z as f32,
                ]
            })
            .collect();

        laplacian(
            &mut vertices,
            &surface.triangles,
            self.config.smoothing_iterations,
            self.config.smoothing_factor,
        );

        debug!(
            tissue = %label,
            voxels = voxels,
            vertices = vertices.len(),
            triangles = surface.triangles.len(),
            "Reconstructed tissue surface"
        );

        Some(TissueMesh {
            label,
            vertices,
            triangles: surface.triangles,
            color: self.config.palette.color(label),
        })
    }

    /// Meshes for every requested tissue, in request order.
    ///
    /// `before_tissue` is consulted between tissues; returning `Break` stops
    /// the reconstruction and yields `None`.
    pub fn reconstruct_all<F>(
        &self,
        labels: &LabelVolume,
        include: &[TissueLabel],
        mut before_tissue: F,
    ) -> Option<Vec<TissueMesh>>
    where
        F: FnMut(TissueLabel) -> ControlFlow<()>,
    {
        let mut meshes = Vec::new();
        for &label in include {
            if before_tissue(label).is_break() {
                return None;
            }
            meshes.extend(self.reconstruct(labels, label));
        }
        Some(meshes)
    }

    /// Assemble a bundle from already reconstructed meshes.
    pub fn bundle(
        series_id: impl Into<String>,
        labels: &LabelVolume,
        include: &[TissueLabel],
        meshes: Vec<TissueMesh>,
    ) -> ModelBundle {
        ModelBundle {
            series_id: series_id.into(),
            meshes,
            dimensions: labels.dimensions(),
            spacing: labels.spacing(),
            requested: include.to_vec(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::SliceLabels;

    fn cube_volume(spacing: Spacing) -> LabelVolume {
        // 6x6x4 volume with a 2x2x2 organ block and a single bone voxel.
        let mut slices = Vec::new();
        for z in 0..4 {
            let mut labels = vec![TissueLabel::Background; 36];
            for y in 0..6 {
                for x in 0..6 {
                    if (2..4).contains(&x) && (2..4).contains(&y) && (1..3).contains(&z) {
                        labels[y * 6 + x] = TissueLabel::Organ;
                    }
                }
            }
            if z == 0 {
                labels[0] = TissueLabel::Bone;
            }
            slices.push(SliceLabels::new(6, 6, labels));
        }
        LabelVolume::new(6, 6, spacing, slices, Vec::new())
    }

    #[test]
    fn test_mesh_per_present_tissue() {
        let labels = cube_volume(Spacing::default());
        let reconstructor = MeshReconstructor::default();
        let meshes = reconstructor
            .reconstruct_all(
                &labels,
                &[TissueLabel::Organ, TissueLabel::VisceralFat, TissueLabel::Bone],
                |_| ControlFlow::Continue(()),
            )
            .unwrap();

        let found: Vec<TissueLabel> = meshes.iter().map(|m| m.label).collect();
        assert_eq!(found, vec![TissueLabel::Organ, TissueLabel::Bone]);
        assert_eq!(meshes[0].color, [0x00, 0x80, 0xFF, 0xFF]);
        assert!(meshes.iter().all(|m| m.triangle_count() > 0));
    }

    #[test]
    fn test_background_never_meshed() {
        let labels = cube_volume(Spacing::default());
        assert!(MeshReconstructor::default()
            .reconstruct(&labels, TissueLabel::Background)
            .is_none());
    }

    #[test]
    fn test_vertices_scaled_by_spacing() {
        let config = MeshConfig {
            smoothing_iterations: 0,
            ..MeshConfig::default()
        };
        let reconstructor = MeshReconstructor::new(config);
        let unit = reconstructor
            .reconstruct(&cube_volume(Spacing::default()), TissueLabel::Organ)
            .unwrap();
        let scaled = reconstructor
            .reconstruct(&cube_volume(Spacing::new(0.5, 0.5, 3.0)), TissueLabel::Organ)
            .unwrap();

        assert_eq!(unit.triangles, scaled.triangles);
        for (a, b) in unit.vertices.iter().zip(&scaled.vertices) {
            assert!((a[0] * 0.5 - b[0]).abs() < 1e-5);
            assert!((a[2] * 3.0 - b[2]).abs() < 1e-5);
        }
    }

    #[test]
    fn test_smoothing_preserves_topology() {
        let labels = cube_volume(Spacing::default());
        let rough = MeshReconstructor::new(MeshConfig {
            smoothing_iterations: 0,
            ..MeshConfig::default()
        })
        .reconstruct(&labels, TissueLabel::Organ)
        .unwrap();
        let smooth = MeshReconstructor::default()
            .reconstruct(&labels, TissueLabel::Organ)
            .unwrap();

        assert_eq!(rough.triangles, smooth.triangles);
        assert_ne!(rough.vertices, smooth.vertices);
    }

    #[test]
    fn test_interrupted_between_tissues() {
        let labels = cube_volume(Spacing::default());
        let mut calls = 0;
        let result = MeshReconstructor::default().reconstruct_all(
            &labels,
            &[TissueLabel::Organ, TissueLabel::Bone],
            |_| {
                calls += 1;
                if calls == 2 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            },
        );
        assert!(result.is_none());
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_summary_and_legend() {
        let labels = cube_volume(Spacing::default());
        let reconstructor = MeshReconstructor::default();
        let include = [TissueLabel::Organ];
        let meshes = reconstructor
            .reconstruct_all(&labels, &include, |_| ControlFlow::Continue(()))
            .unwrap();
        let bundle = MeshReconstructor::bundle("s1", &labels, &include, meshes);
        let summary = bundle.summary();

        assert_eq!(summary.tissues.len(), 1);
        assert_eq!(summary.tissues[0].color, "#0080FF");
        assert!(bundle.mesh(TissueLabel::Organ).is_some());

        let legend = TissuePalette::default().legend();
        assert_eq!(legend.len(), 5);
        assert!(legend
            .iter()
            .any(|e| e.label == TissueLabel::VisceralFat && e.color == "#FFA500"));
    }
}
