//! Volume abstraction.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        Job controllers (analysis,       │
//! │           model generation)             │
//! └────────────────────┬────────────────────┘
//!                      │ load(series_id)
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │           VolumeSource trait            │
//! └────────────────────┬────────────────────┘
//!          ┌───────────┴───────────┐
//!          ▼                       ▼
//! ┌─────────────────┐    ┌─────────────────────┐
//! │ InMemoryVolume  │    │  RawVolumeSource    │
//! │     Source      │    │ (raw i16 slices)    │
//! └─────────────────┘    └─────────────────────┘
//! ```

mod model;
mod source;

pub use model::{Spacing, VolumeBuilder, VolumeModel};
pub use source::{
    InMemoryVolumeSource, RawVolumeHeader, RawVolumeSource, VolumeSource, DEFAULT_MAX_SLICES,
    MAX_SLICE_PIXELS, RAW_HEADER_FILE,
};
