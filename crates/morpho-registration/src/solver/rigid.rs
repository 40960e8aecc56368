//! Weighted Procrustes for the rigid component.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use morpho_core::tensor::{from_rows, to_host};
use nalgebra::{DMatrix, DVector};

use crate::error::{RegistrationError, Result};

/// Rotation and translation mapping `x ↦ R x + t`.
#[derive(Debug, Clone, PartialEq)]
pub struct RigidParams {
    /// `[d, d]` proper rotation.
    pub rotation: DMatrix<f64>,
    /// `[d]` translation.
    pub translation: DVector<f64>,
}

impl RigidParams {
    /// The identity mapping in `d` dimensions.
    pub fn identity(d: usize) -> Self {
        Self {
            rotation: DMatrix::identity(d, d),
            translation: DVector::zeros(d),
        }
    }

    /// Apply to `[n, d]` row points: `X Rᵀ + t`.
    pub fn apply<B: Backend>(&self, points: Tensor<B, 2>) -> Tensor<B, 2> {
        let d = self.translation.len();
        let device = points.device();
        // column-major storage of R read row-major is Rᵀ
        let rotation_t = from_rows::<B>(self.rotation.as_slice().to_vec(), d, d, &device);
        let translation = from_rows::<B>(self.translation.as_slice().to_vec(), 1, d, &device);
        points.matmul(rotation_t) + translation
    }
}

/// Solve for the rotation and translation that best map the moving points
/// onto their posterior-weighted targets.
///
/// # Arguments
/// * `moving` - `[n, d]` moving points
/// * `fixed` - `[m, d]` fixed points
/// * `assignment` - `[n, m]` posterior
pub fn weighted_procrustes<B: Backend>(
    moving: Tensor<B, 2>,
    fixed: Tensor<B, 2>,
    assignment: Tensor<B, 2>,
) -> Result<RigidParams> {
    let [_, d] = moving.dims();
    let p1 = assignment.clone().sum_dim(1); // [n, 1]
    let pt1 = assignment.clone().sum_dim(0); // [1, m]
    let np: f64 = to_host(p1.clone()).iter().sum();
    if np <= 0.0 || !np.is_finite() {
        return Err(RegistrationError::numerical_instability(
            "posterior mass vanished during rigid update",
        ));
    }

    let mu_x = p1.transpose().matmul(moving.clone()).div_scalar(np); // [1, d]
    let mu_y = pt1.matmul(fixed.clone()).div_scalar(np); // [1, d]
    // Σ_ij P_ij y_j x_iᵀ − Np μy μxᵀ
    let cross = assignment
        .matmul(fixed)
        .transpose()
        .matmul(moving)
        - mu_y.clone().transpose().matmul(mu_x.clone()).mul_scalar(np);

    let a = DMatrix::from_row_slice(d, d, &to_host(cross));
    let mu_x = DVector::from_vec(to_host(mu_x));
    let mu_y = DVector::from_vec(to_host(mu_y));
    procrustes_from_cross_covariance(&a, &mu_x, &mu_y)
}

/// Proper rotation maximising `tr(Rᵀ A)`, with the matching translation.
pub fn procrustes_from_cross_covariance(
    a: &DMatrix<f64>,
    mu_x: &DVector<f64>,
    mu_y: &DVector<f64>,
) -> Result<RigidParams> {
    let d = a.nrows();
    let svd = a.clone().svd(true, true);
    let (u, v_t) = match (svd.u, svd.v_t) {
        (Some(u), Some(v_t)) => (u, v_t),
        _ => {
            return Err(RegistrationError::numerical_instability(
                "SVD of the cross-covariance failed",
            ))
        }
    };

    // reflection guard
    let mut c = DMatrix::<f64>::identity(d, d);
    if (&u * &v_t).determinant() < 0.0 {
        c[(d - 1, d - 1)] = -1.0;
    }
    let rotation = &u * c * &v_t;
    let translation = mu_y - &rotation * mu_x;

    if rotation.iter().chain(translation.iter()).any(|v| !v.is_finite()) {
        return Err(RegistrationError::numerical_instability(
            "rigid update produced non-finite parameters",
        ));
    }
    Ok(RigidParams { rotation, translation })
}
