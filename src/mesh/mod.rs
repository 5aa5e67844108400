//! Mesh reconstruction.
//!
//! ```text
//! LabelVolume ──► BinaryVolume (per tissue) ──► Surface Nets ──► scale by
//!                                                              spacing
//!                                                                 │
//!          ModelBundle ◄── colour from palette ◄── Laplacian ◄────┘
//!               │                                  smoothing
//!               ▼
//!         export (mesh-binary / mesh-text)
//! ```

mod export;
mod reconstructor;
mod smooth;
pub mod surface_nets;

pub use export::{encode, MeshFormat};
pub use reconstructor::{
    LegendEntry, MeshConfig, MeshReconstructor, MeshSummary, ModelBundle, ModelSummary,
    TissueMesh, TissuePalette, DEFAULT_SMOOTHING_FACTOR, DEFAULT_SMOOTHING_ITERATIONS,
};
pub use smooth::laplacian;
