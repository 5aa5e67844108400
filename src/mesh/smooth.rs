//! Laplacian smoothing.

use std::collections::BTreeSet;

/// Move every vertex towards the centroid of its edge neighbours.
///
/// Each iteration applies `v += factor * (mean(neighbours) - v)` to all
/// vertices simultaneously. Connectivity is never changed.
pub fn laplacian(vertices: &mut [[f32; 3]], triangles: &[[u32; 3]], iterations: usize, factor: f32) {
    if iterations == 0 || vertices.is_empty() {
        return;
    }

    let neighbours = adjacency(vertices.len(), triangles);
    let mut next = vertices.to_vec();

    for _ in 0..iterations {
        for (i, adjacent) in neighbours.iter().enumerate() {
            if adjacent.is_empty() {
                continue;
            }
            let mut centroid = [0f32; 3];
            for &n in adjacent {
                for axis in 0..3 {
                    centroid[axis] += vertices[n as usize][axis];
                }
            }
            let count = adjacent.len() as f32;
            for axis in 0..3 {
                let mean = centroid[axis] / count;
                next[i][axis] = vertices[i][axis] + factor * (mean - vertices[i][axis]);
            }
        }
        vertices.copy_from_slice(&next);
    }
}

fn adjacency(vertex_count: usize, triangles: &[[u32; 3]]) -> Vec<Vec<u32>> {
    let mut sets = vec![BTreeSet::new(); vertex_count];
    for t in triangles {
        for i in 0..3 {
            let (a, b) = (t[i], t[(i + 1) % 3]);
            sets[a as usize].insert(b);
            sets[b as usize].insert(a);
        }
    }
    sets.into_iter().map(|s| s.into_iter().collect()).collect()
}
