//! Distance kernels and the E-step posterior.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use std::f64::consts::PI;

/// Floor for denominators.
pub(crate) const EPS: f64 = 1e-10;

/// Squared Euclidean distances `[n, m]` between the rows of `x` and `y`.
pub fn squared_distances<B: Backend>(x: Tensor<B, 2>, y: Tensor<B, 2>) -> Tensor<B, 2> {
    let x2 = x.clone().powf_scalar(2.0).sum_dim(1); // [n, 1]
    let y2 = y.clone().powf_scalar(2.0).sum_dim(1).transpose(); // [1, m]
    let cross = x.matmul(y.transpose()).mul_scalar(2.0);
    (x2 + y2 - cross).clamp_min(0.0)
}

/// Gaussian kernel `exp(-‖x_i − y_j‖² / 2β²)`.
pub fn gaussian_kernel<B: Backend>(x: Tensor<B, 2>, y: Tensor<B, 2>, beta: f64) -> Tensor<B, 2> {
    squared_distances(x, y)
        .mul_scalar(-1.0 / (2.0 * beta * beta))
        .exp()
}

/// Expression-similarity kernel `exp(-D / 2b)` from a dissimilarity matrix.
pub fn feature_kernel<B: Backend>(dissimilarity: Tensor<B, 2>, bandwidth: f64) -> Tensor<B, 2> {
    dissimilarity.mul_scalar(-1.0 / (2.0 * bandwidth)).exp()
}

/// Posterior `[n, m]` that fixed point `j` was generated by moving point `i`.
///
/// Each column is normalised over the moving points plus a uniform outlier
/// term, so columns sum to at most one.
pub fn posterior<B: Backend>(
    moving: Tensor<B, 2>,
    fixed: Tensor<B, 2>,
    feature_kernel: Option<Tensor<B, 2>>,
    sigma2: f64,
    outlier_weight: f64,
) -> Tensor<B, 2> {
    let [n, d] = moving.dims();
    let [m, _] = fixed.dims();

    let mut kernel = squared_distances(moving, fixed)
        .mul_scalar(-1.0 / (2.0 * sigma2))
        .exp();
    if let Some(features) = feature_kernel {
        kernel = kernel * features;
    }

    let outlier = (2.0 * PI * sigma2).powf(d as f64 / 2.0) * outlier_weight / (1.0 - outlier_weight)
        * n as f64
        / m as f64;
    let denom = kernel.clone().sum_dim(0).add_scalar(outlier).clamp_min(EPS);
    kernel / denom
}
