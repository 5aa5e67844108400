//! Tissue classification.
//!
//! Each slice is classified independently:
//!
//! 1. Intensities are thresholded into coarse classes by a [`BandTable`].
//! 2. The body mask is the largest closed, hole-filled component that does
//!    not touch the image border.
//! 3. The cavity is the part of the body further than a physical margin from
//!    its outline.
//! 4. Fat inside the cavity is visceral, fat elsewhere in the body is
//!    subcutaneous.

mod bands;
mod classifier;
mod labels;
pub mod morphology;

pub use bands::{BandClass, BandTable, IntensityBand};
pub use classifier::{
    ClassifierConfig, SliceMasks, TissueClassifier, DEFAULT_CAVITY_MARGIN_MM,
    DEFAULT_CLOSING_RADIUS,
};
pub use labels::{LabelVolume, ParseTissueError, SliceLabels, TissueLabel};
