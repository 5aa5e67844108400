//! Naive Surface Nets over a binary voxel volume.
//!
//! Voxel centres are the sample points. The sample grid is padded by one empty
//! layer on every side so regions touching the volume boundary still produce
//! closed surfaces.
//!
//! * Every cell (2x2x2 block of samples) with mixed occupancy gets one vertex
//!   at the mean of the midpoints of its sign-changing edges.
//! * Every sign-changing sample edge emits one quad joining the vertices of
//!   the four cells that share it, wound so the normal points out of the
//!   occupied region.

use std::collections::HashMap;

use crate::classify::{LabelVolume, TissueLabel};

/// Occupancy grid for a single tissue.
#[derive(Debug, Clone)]
pub struct BinaryVolume {
    dims: [usize; 3],
    data: Vec<bool>,
}

impl BinaryVolume {
    pub fn new(dims: [usize; 3], data: Vec<bool>) -> Self {
        debug_assert_eq!(data.len(), dims[0] * dims[1] * dims[2]);
        Self { dims, data }
    }

    /// Voxels of `labels` carrying `label`.
    pub fn from_labels(labels: &LabelVolume, label: TissueLabel) -> Self {
        let data = labels
            .slices()
            .iter()
            .flat_map(|slice| slice.as_slice().iter().map(move |&l| l == label))
            .collect();
        Self::new(labels.dimensions(), data)
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn count(&self) -> usize {
        self.data.iter().filter(|&&v| v).count()
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize, z: usize) -> bool {
        self.data[(z * self.dims[1] + y) * self.dims[0] + x]
    }

    /// Occupancy in padded coordinates (`p = voxel + 1`); the padding is empty.
    #[inline]
    fn padded(&self, p: [usize; 3]) -> bool {
        if (0..3).any(|a| p[a] == 0 || p[a] > self.dims[a]) {
            return false;
        }
        self.get(p[0] - 1, p[1] - 1, p[2] - 1)
    }
}

/// Raw surface in voxel-index coordinates.
#[derive(Debug, Clone, Default)]
pub struct Surface {
    pub vertices: Vec<[f32; 3]>,
    pub triangles: Vec<[u32; 3]>,
}

impl Surface {
    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }
}

/// Corner offsets of a cell, bit i of the index selects +1 along axis i.
const CORNERS: [[usize; 3]; 8] = [
    [0, 0, 0],
    [1, 0, 0],
    [0, 1, 0],
    [1, 1, 0],
    [0, 0, 1],
    [1, 0, 1],
    [0, 1, 1],
    [1, 1, 1],
];

/// The 12 cell edges as corner index pairs.
const EDGES: [(usize, usize); 12] = [
    (0, 1),
    (2, 3),
    (4, 5),
    (6, 7),
    (0, 2),
    (1, 3),
    (4, 6),
    (5, 7),
    (0, 4),
    (1, 5),
    (2, 6),
    (3, 7),
];

/// Extract the boundary surface of the occupied region.
pub fn extract(volume: &BinaryVolume) -> Surface {
    let [w, h, d] = volume.dims;
    // Cells per axis in the padded grid.
    let cells = [w + 1, h + 1, d + 1];
    let cell_key = |c: [usize; 3]| (c[2] * cells[1] + c[1]) * cells[0] + c[0];

    let mut surface = Surface::default();
    let mut cell_vertex: HashMap<usize, u32> = HashMap::new();

    // Pass 1: one vertex per mixed cell.
    for cz in 0..cells[2] {
        for cy in 0..cells[1] {
            for cx in 0..cells[0] {
                let mut inside = [false; 8];
                for (i, offset) in CORNERS.iter().enumerate() {
                    inside[i] =
                        volume.padded([cx + offset[0], cy + offset[1], cz + offset[2]]);
                }
                if inside.iter().all(|&v| v) || !inside.iter().any(|&v| v) {
                    continue;
                }

                let mut sum = [0f32; 3];
                let mut crossings = 0f32;
                for &(a, b) in &EDGES {
                    if inside[a] != inside[b] {
                        for axis in 0..3 {
                            sum[axis] += (CORNERS[a][axis] + CORNERS[b][axis]) as f32 * 0.5;
                        }
                        crossings += 1.0;
                    }
                }

                // Padded cell origin minus one gives voxel-index space.
                let vertex = [
                    cx as f32 - 1.0 + sum[0] / crossings,
                    cy as f32 - 1.0 + sum[1] / crossings,
                    cz as f32 - 1.0 + sum[2] / crossings,
                ];
                cell_vertex.insert(cell_key([cx, cy, cz]), surface.vertices.len() as u32);
                surface.vertices.push(vertex);
            }
        }
    }

    // Pass 2: one quad per sign-changing sample edge.
    for pz in 0..=d + 1 {
        for py in 0..=h + 1 {
            for px in 0..=w + 1 {
                let p = [px, py, pz];
                let here = volume.padded(p);

                for axis in 0..3 {
                    let mut q = p;
                    q[axis] += 1;
                    if q[axis] > [w, h, d][axis] + 1 {
                        continue;
                    }
                    if here == volume.padded(q) {
                        continue;
                    }

                    let (u, v) = ((axis + 1) % 3, (axis + 2) % 3);
                    // Sign changes never happen on the padding planes, so
                    // p[u] and p[v] are at least 1 here.
                    let corner = |du: usize, dv: usize| {
                        let mut c = p;
                        c[u] = p[u] - 1 + du;
                        c[v] = p[v] - 1 + dv;
                        cell_vertex.get(&cell_key(c)).copied()
                    };

                    let (Some(a), Some(b), Some(c), Some(e)) =
                        (corner(0, 0), corner(1, 0), corner(1, 1), corner(0, 1))
                    else {
                        continue;
                    };

                    if here {
                        surface.triangles.push([a, b, c]);
                        surface.triangles.push([a, c, e]);
                    } else {
                        surface.triangles.push([a, c, b]);
                        surface.triangles.push([a, e, c]);
                    }
                }
            }
        }
    }

    surface
}

// =============================================================================
// Tests
// =============================================================================
