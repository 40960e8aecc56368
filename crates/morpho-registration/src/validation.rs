//! Validation utilities for registration operations.
//!
//! Configuration range checks, and shape checks applied where a pairwise
//! result is stored: downstream consumers assume assignment matrices are
//! `[n_moving, n_fixed]` and coordinates keep their point count.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use morpho_core::tensor::all_finite;

use crate::error::{RegistrationError, Result};

/// Validate iteration count.
pub fn validate_iterations(iterations: usize) -> Result<()> {
    if iterations == 0 {
        return Err(RegistrationError::invalid_configuration(
            "Iterations must be positive",
        ));
    }

    if iterations > 1_000_000 {
        return Err(RegistrationError::invalid_configuration(
            format!("Iterations too large: {}", iterations),
        ));
    }

    Ok(())
}

/// Validate a strictly positive, finite parameter.
pub fn validate_positive(name: &str, value: f64) -> Result<()> {
    if !(value.is_finite() && value > 0.0) {
        return Err(RegistrationError::invalid_configuration(format!(
            "{} must be positive, got {}",
            name, value
        )));
    }
    Ok(())
}

/// Validate a non-negative, finite parameter.
pub fn validate_non_negative(name: &str, value: f64) -> Result<()> {
    if !(value.is_finite() && value >= 0.0) {
        return Err(RegistrationError::invalid_configuration(format!(
            "{} must be non-negative, got {}",
            name, value
        )));
    }
    Ok(())
}

/// Validate the outlier prior, which must lie in `[0, 1)`.
pub fn validate_outlier_weight(weight: f64) -> Result<()> {
    if !(0.0..1.0).contains(&weight) {
        return Err(RegistrationError::invalid_configuration(format!(
            "outlier_weight must be in [0, 1), got {}",
            weight
        )));
    }
    Ok(())
}

/// Validate that an assignment matrix is `[n_moving, n_fixed]` and finite.
pub fn validate_assignment<B: Backend>(
    assignment: &Tensor<B, 2>,
    n_moving: usize,
    n_fixed: usize,
) -> Result<()> {
    let dims = assignment.dims();
    if dims != [n_moving, n_fixed] {
        return Err(RegistrationError::ShapeMismatch {
            expected: vec![n_moving, n_fixed],
            actual: dims.to_vec(),
        });
    }
    if !all_finite(assignment.clone()) {
        return Err(RegistrationError::numerical_instability(
            "assignment matrix contains non-finite values",
        ));
    }
    Ok(())
}

/// Validate that coordinates are `[n_points, d]` and finite.
pub fn validate_coordinates<B: Backend>(
    coords: &Tensor<B, 2>,
    n_points: usize,
    d: usize,
) -> Result<()> {
    let dims = coords.dims();
    if dims != [n_points, d] {
        return Err(RegistrationError::ShapeMismatch {
            expected: vec![n_points, d],
            actual: dims.to_vec(),
        });
    }
    if !all_finite(coords.clone()) {
        return Err(RegistrationError::numerical_instability(
            "coordinates contain non-finite values",
        ));
    }
    Ok(())
}

/// Validate a variance estimate.
pub fn validate_sigma2(sigma2: f64) -> Result<()> {
    if !(sigma2.is_finite() && sigma2 > 0.0) {
        return Err(RegistrationError::numerical_instability(format!(
            "variance estimate must be positive and finite, got {}",
            sigma2
        )));
    }
    Ok(())
}

/// Check for convergence of the variance estimate.
#[derive(Debug, Clone)]
pub struct ConvergenceChecker {
    /// Relative change below which the estimate is considered converged.
    pub tolerance: f64,
}

impl Default for ConvergenceChecker {
    fn default() -> Self {
        Self { tolerance: 1e-5 }
    }
}

impl ConvergenceChecker {
    /// Create a new convergence checker.
    pub fn new(tolerance: f64) -> Self {
        Self { tolerance }
    }

    /// Check if converged based on the σ² history.
    ///
    /// Returns true once the last relative change is below the tolerance.
    pub fn check_convergence(&self, sigma2_history: &[f64]) -> bool {
        match sigma2_history {
            [.., previous, current] => {
                (previous - current).abs() / current.abs().max(f64::MIN_POSITIVE) < self.tolerance
            }
            _ => false,
        }
    }
}
