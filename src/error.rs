use thiserror::Error;

/// Errors raised while obtaining a volume from the loading collaborator.
#[derive(Debug, Clone, Error)]
pub enum VolumeError {
    /// No volume is known for the requested series key
    #[error("Series not found: {0}")]
    NotFound(String),

    /// The volume exists but could not be read
    #[error("Volume unavailable for series {series_id}: {reason}")]
    Unavailable { series_id: String, reason: String },

    /// The volume geometry or spacing is unusable
    #[error("Invalid volume geometry: {0}")]
    InvalidGeometry(String),

    /// Filesystem error from a disk-backed source
    #[error("I/O error: {0}")]
    Io(String),
}

/// A fault confined to a single slice.
///
/// Slice faults never abort a job: the slice is skipped and contributes zero
/// to every statistic.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SliceFault {
    /// The loader could not decode this slice
    #[error("Slice {index} is unreadable: {reason}")]
    Unreadable { index: usize, reason: String },

    /// The slice carries a different number of pixels than the volume declares
    #[error("Slice {index} has {actual} pixels, expected {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },

    /// Slice index past the end of the volume
    #[error("Slice {index} is out of range (volume has {count} slices)")]
    OutOfRange { index: usize, count: usize },

    /// The worker processing this slice panicked
    #[error("Processing of slice {index} panicked")]
    Panicked { index: usize },
}

impl SliceFault {
    /// Index of the affected slice.
    pub fn index(&self) -> usize {
        match self {
            SliceFault::Unreadable { index, .. }
            | SliceFault::DimensionMismatch { index, .. }
            | SliceFault::OutOfRange { index, .. }
            | SliceFault::Panicked { index } => *index,
        }
    }
}

/// Errors that end (or prevent) a job.
#[derive(Debug, Clone, Error)]
pub enum JobError {
    /// The volume could not be accessed at all
    #[error("Input unavailable: {0}")]
    InputUnavailable(#[from] VolumeError),

    /// A prerequisite artifact is missing
    #[error("Precondition unmet for series {series_id}: {reason}")]
    PreconditionUnmet { series_id: String, reason: String },

    /// Unexpected internal failure (worker crash, etc.)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl JobError {
    /// Model generation was requested before an analysis completed.
    pub fn analysis_required(series_id: impl Into<String>) -> Self {
        JobError::PreconditionUnmet {
            series_id: series_id.into(),
            reason: "analysis required first".to_string(),
        }
    }
}

/// Errors from the artifact persistence layer.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(String),

    /// Persisted artifact could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Errors that can occur while encoding a model bundle for download.
#[derive(Debug, Clone, Error)]
pub enum ExportError {
    /// Writing the encoded payload failed
    #[error("I/O error: {0}")]
    Io(String),

    /// The bundle holds more vertices than the format can index
    #[error("Mesh too large to encode: {vertices} vertices")]
    TooLarge { vertices: usize },
}

impl From<std::io::Error> for ExportError {
    fn from(err: std::io::Error) -> Self {
        ExportError::Io(err.to_string())
    }
}
