//! Fitted deformation field: rigid component plus a Gaussian-smoothed
//! displacement over the moving control points.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use morpho_core::Dissimilarity;

use super::kernel::{gaussian_kernel, EPS};
use super::rigid::RigidParams;
use crate::error::{RegistrationError, Result};
use crate::registrar::FieldOutput;

/// Per-pair normalisation: `x̂ = (x − μ_moving) / s`, `y = ŷ · s + μ_fixed`.
#[derive(Debug, Clone)]
pub struct Normalization<B: Backend> {
    /// `[1, d]` moving centroid.
    pub moving_mean: Tensor<B, 2>,
    /// `[1, d]` fixed centroid.
    pub fixed_mean: Tensor<B, 2>,
    /// Shared scale.
    pub scale: f64,
}

impl<B: Backend> Normalization<B> {
    /// Fit from raw moving and fixed coordinates.
    pub fn fit(moving: &Tensor<B, 2>, fixed: &Tensor<B, 2>) -> Self {
        let moving_mean = moving.clone().mean_dim(0);
        let fixed_mean = fixed.clone().mean_dim(0);
        let rms = |points: &Tensor<B, 2>, mean: &Tensor<B, 2>| -> f64 {
            let centred = points.clone() - mean.clone();
            let [n, _] = centred.dims();
            (morpho_core::tensor::sum_scalar(centred.powf_scalar(2.0)) / n as f64).sqrt()
        };
        let scale = rms(moving, &moving_mean).max(rms(fixed, &fixed_mean));
        let scale = if scale.is_finite() && scale > EPS {
            scale
        } else {
            tracing::warn!("Degenerate point sets (scale {}), normalising with unit scale", scale);
            1.0
        };

        Self {
            moving_mean,
            fixed_mean,
            scale,
        }
    }

    /// Map raw moving points into the normalised frame.
    pub fn moving_to_unit(&self, points: Tensor<B, 2>) -> Tensor<B, 2> {
        (points - self.moving_mean.clone()).div_scalar(self.scale)
    }

    /// Map raw fixed points into the normalised frame.
    pub fn fixed_to_unit(&self, points: Tensor<B, 2>) -> Tensor<B, 2> {
        (points - self.fixed_mean.clone()).div_scalar(self.scale)
    }

    /// Map normalised points into the fixed frame.
    pub fn unit_to_fixed(&self, points: Tensor<B, 2>) -> Tensor<B, 2> {
        points.mul_scalar(self.scale) + self.fixed_mean.clone()
    }
}

/// Smooth displacement `V(q) = G(q, X) W / (G(q, X) P1 + λσ²)`.
#[derive(Debug, Clone)]
pub struct ControlPoints<B: Backend> {
    /// `[n, d]` normalised moving points.
    pub points: Tensor<B, 2>,
    /// `[n, d]` residuals weighted by `P1`.
    pub weighted_residual: Tensor<B, 2>,
    /// `[n, 1]` posterior mass per control point.
    pub weights: Tensor<B, 2>,
    /// `λσ²` at fit time.
    pub regularizer: f64,
    /// Kernel bandwidth.
    pub beta: f64,
}

impl<B: Backend> ControlPoints<B> {
    /// Displacement at normalised query points.
    pub fn displacement(&self, query: Tensor<B, 2>) -> Tensor<B, 2> {
        let g = gaussian_kernel(query, self.points.clone(), self.beta);
        let numerator = g.clone().matmul(self.weighted_residual.clone());
        let denominator = g.matmul(self.weights.clone()).add_scalar(self.regularizer + EPS);
        numerator / denominator
    }
}

/// Settings needed to recompute correspondences after fitting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssignmentParams {
    /// Expression dissimilarity.
    pub dissimilarity: Dissimilarity,
    /// Expression kernel scale.
    pub feature_bandwidth: f64,
    /// Outlier prior.
    pub outlier_weight: f64,
    /// Variance lower bound.
    pub sigma2_min: f64,
}

/// Deformation field fitted by [`super::MorphoRegistrar`].
#[derive(Debug, Clone)]
pub struct GaussianVectorField<B: Backend> {
    /// Frame normalisation of the pair.
    pub normalization: Normalization<B>,
    /// Rigid component in the normalised frame.
    pub rigid: RigidParams,
    /// Nonrigid component; `None` for rigid-only fits.
    pub control: Option<ControlPoints<B>>,
    /// Final variance estimate (normalised units).
    pub sigma2: f64,
    /// Correspondence settings.
    pub params: AssignmentParams,
}

impl<B: Backend> GaussianVectorField<B> {
    /// Spatial dimensionality.
    pub fn dims(&self) -> usize {
        self.rigid.translation.len()
    }

    /// Apply in the normalised frame: returns `(rigid, displacement)`.
    pub fn apply_unit(&self, unit_points: Tensor<B, 2>) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let rigid = self.rigid.apply(unit_points.clone());
        let displacement = match &self.control {
            Some(control) => control.displacement(unit_points),
            None => rigid.zeros_like(),
        };
        (rigid, displacement)
    }

    /// Apply to raw moving-frame points.
    pub fn apply(&self, points: Tensor<B, 2>) -> Result<FieldOutput<B>> {
        let [_, d] = points.dims();
        if d != self.dims() {
            return Err(RegistrationError::transform(format!(
                "field is {}-dimensional, query points are {}-dimensional",
                self.dims(),
                d
            )));
        }

        let unit = self.normalization.moving_to_unit(points);
        let (rigid, displacement) = self.apply_unit(unit);
        let transformed = self.normalization.unit_to_fixed(rigid.clone() + displacement.clone());

        Ok(FieldOutput {
            transformed,
            displacement: displacement.mul_scalar(self.normalization.scale),
            rigid: self.normalization.unit_to_fixed(rigid),
        })
    }
}
