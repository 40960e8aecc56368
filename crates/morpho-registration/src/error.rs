//! Error types for registration and alignment operations.
//!
//! Usage errors surface before any registration runs; numerical errors from
//! a pairwise step abort the remaining chain. Nothing is retried locally.

use morpho_core::CoreError;
use thiserror::Error;

/// Main error type for registration operations.
#[derive(Error, Debug)]
pub enum RegistrationError {
    /// Invalid sample data or missing slot, layer or annotation.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A stored field was applied to points it cannot transform.
    #[error("Transform error: {0}")]
    TransformError(String),

    /// Numerical instability detected.
    #[error("Numerical instability: {0}")]
    NumericalInstability(String),

    /// Convergence failure.
    #[error("Convergence failure: {0}")]
    ConvergenceFailure(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Dimension mismatch.
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Shape mismatch.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// A registry lookup used a handle that no field backs.
    #[error("Unknown deformation field handle {0}")]
    UnknownField(usize),

    /// A progress callback requested cancellation.
    #[error("Alignment cancelled after {completed_pairs} of {total_pairs} pairs")]
    Cancelled {
        completed_pairs: usize,
        total_pairs: usize,
    },
}

/// Result type for registration operations.
pub type Result<T> = std::result::Result<T, RegistrationError>;

impl RegistrationError {
    /// Create a transform error.
    pub fn transform(msg: impl Into<String>) -> Self {
        Self::TransformError(msg.into())
    }

    /// Create a numerical instability error.
    pub fn numerical_instability(msg: impl Into<String>) -> Self {
        Self::NumericalInstability(msg.into())
    }

    /// Create a convergence failure error.
    pub fn convergence_failure(msg: impl Into<String>) -> Self {
        Self::ConvergenceFailure(msg.into())
    }

    /// Create an invalid configuration error.
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Create a dimension mismatch error.
    pub fn dimension_mismatch(msg: impl Into<String>) -> Self {
        Self::DimensionMismatch(msg.into())
    }

    /// Whether this is a usage error (bad input rather than bad numerics).
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::Core(_)
                | Self::InvalidConfiguration(_)
                | Self::DimensionMismatch(_)
                | Self::TransformError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = RegistrationError::transform("test error");
        assert!(matches!(err, RegistrationError::TransformError(_)));
    }

    #[test]
    fn test_error_display() {
        let err = RegistrationError::numerical_instability("sigma2 is NaN");
        assert_eq!(err.to_string(), "Numerical instability: sigma2 is NaN");
    }

    #[test]
    fn test_shape_mismatch() {
        let err = RegistrationError::ShapeMismatch {
            expected: vec![10, 10],
            actual: vec![5, 5],
        };
        let err_str = err.to_string();
        assert!(err_str.contains("expected"));
        assert!(err_str.contains("got"));
    }

    #[test]
    fn test_core_errors_are_usage_errors() {
        let err: RegistrationError = CoreError::missing_label("s1", "cell_type").into();
        assert!(err.is_usage_error());
        assert!(err.to_string().contains("cell_type"));
        assert!(!RegistrationError::convergence_failure("x").is_usage_error());
    }
}
