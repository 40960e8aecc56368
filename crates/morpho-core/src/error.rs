//! Error types for sample access and point-set primitives.
//!
//! Everything here is a usage or shape error: the caller asked for a slot,
//! layer or annotation that a sample does not carry, or handed over data
//! whose dimensions do not line up.

use thiserror::Error;

/// Errors raised by the sample data model and host-side primitives.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    /// A coordinate slot is missing from a sample.
    #[error("Sample '{sample}' has no coordinate slot '{key}'")]
    MissingSlot { sample: String, key: String },

    /// A named feature layer is missing from a sample.
    #[error("Sample '{sample}' has no feature layer '{layer}'")]
    MissingLayer { sample: String, layer: String },

    /// A categorical annotation is missing from a sample.
    #[error("Sample '{sample}' has no categorical annotation '{key}'")]
    MissingLabel { sample: String, key: String },

    /// The pair (or the requested gene subset) shares no genes.
    #[error("No common genes between '{first}' and '{second}'")]
    NoCommonGenes { first: String, second: String },

    /// A sample carries no points.
    #[error("Sample '{0}' has an empty point set")]
    EmptyPointSet(String),

    /// Row or column counts disagree.
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Invalid argument to a primitive.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// Create a missing-slot error.
    pub fn missing_slot(sample: impl Into<String>, key: impl Into<String>) -> Self {
        Self::MissingSlot {
            sample: sample.into(),
            key: key.into(),
        }
    }

    /// Create a missing-label error.
    pub fn missing_label(sample: impl Into<String>, key: impl Into<String>) -> Self {
        Self::MissingLabel {
            sample: sample.into(),
            key: key.into(),
        }
    }

    /// Create a dimension mismatch error.
    pub fn dimension_mismatch(msg: impl Into<String>) -> Self {
        Self::DimensionMismatch(msg.into())
    }

    /// Create an invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_slot_display() {
        let err = CoreError::missing_slot("slice_0", "spatial");
        assert_eq!(err.to_string(), "Sample 'slice_0' has no coordinate slot 'spatial'");
    }

    #[test]
    fn test_missing_label_variant() {
        let err = CoreError::missing_label("slice_1", "cell_type");
        assert!(matches!(err, CoreError::MissingLabel { .. }));
        assert!(err.to_string().contains("cell_type"));
    }
}
