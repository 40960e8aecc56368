//! EM solver combining spatial proximity with expression similarity.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use morpho_core::features::{common_genes, dissimilarity_matrix, select_features};
use morpho_core::tensor::{sum_scalar, to_host};
use morpho_core::{FeatureLayer, Sample};

use super::field::{AssignmentParams, ControlPoints, GaussianVectorField, Normalization};
use super::kernel::{feature_kernel, posterior, squared_distances, EPS};
use super::rigid::{weighted_procrustes, RigidParams};
use crate::config::RegistrationConfig;
use crate::error::{RegistrationError, Result};
use crate::registrar::{AssignInput, Assignment, FieldOutput, PairInput, PairwiseFit, Registrar};
use crate::validation::{validate_sigma2, ConvergenceChecker};

/// Variance cap used when re-assigning a projected sample at full resolution.
pub const SMALL_VARIANCE: f64 = 1e-3;

/// Built-in registrar.
///
/// Each pair is solved in a normalised frame. The E-step weighs a Gaussian
/// spatial likelihood by an expression-similarity kernel; the M-step
/// updates a rigid transform (weighted Procrustes), a kernel-smoothed
/// displacement and the variance.
#[derive(Debug, Clone, Copy, Default)]
pub struct MorphoRegistrar;

impl MorphoRegistrar {
    /// Create the registrar.
    pub fn new() -> Self {
        Self
    }
}

/// Expression kernel `[n_moving, n_fixed]`, including the label term.
fn expression_kernel<B: Backend>(
    fixed: &Sample<B>,
    moving: &Sample<B>,
    layer: &FeatureLayer,
    genes: Option<&[String]>,
    params: &AssignmentParams,
    label_similarity: Option<Tensor<B, 2>>,
) -> Result<Tensor<B, 2>> {
    let genes = common_genes(fixed, moving, genes)?;
    let moving_features = select_features(moving, layer, &genes)?;
    let fixed_features = select_features(fixed, layer, &genes)?;
    let mut dissimilarity =
        dissimilarity_matrix(moving_features, fixed_features, params.dissimilarity)?;

    if let Some(labels) = label_similarity {
        let expected = dissimilarity.dims();
        if labels.dims() != expected {
            return Err(RegistrationError::ShapeMismatch {
                expected: expected.to_vec(),
                actual: labels.dims().to_vec(),
            });
        }
        dissimilarity = dissimilarity + labels.to_device(&moving.x().device());
    }

    Ok(feature_kernel(dissimilarity, params.feature_bandwidth))
}

fn check_dims<B: Backend>(moving: &Tensor<B, 2>, fixed: &Tensor<B, 2>) -> Result<usize> {
    let [n, d_moving] = moving.dims();
    let [m, d_fixed] = fixed.dims();
    if n == 0 || m == 0 {
        return Err(RegistrationError::dimension_mismatch("cannot register an empty point set"));
    }
    if d_moving != d_fixed {
        return Err(RegistrationError::dimension_mismatch(format!(
            "moving points are {}-dimensional, fixed points are {}-dimensional",
            d_moving, d_fixed
        )));
    }
    Ok(d_moving)
}

/// Mean squared distance over all pairs, used as the initial variance.
fn initial_sigma2<B: Backend>(moving: Tensor<B, 2>, fixed: Tensor<B, 2>) -> f64 {
    let [n, d] = moving.dims();
    let [m, _] = fixed.dims();
    sum_scalar(squared_distances(moving, fixed)) / (n * m * d) as f64
}

fn params_from(config: &RegistrationConfig) -> AssignmentParams {
    AssignmentParams {
        dissimilarity: config.dissimilarity,
        feature_bandwidth: config.feature_bandwidth,
        outlier_weight: config.outlier_weight,
        sigma2_min: config.sigma2_min,
    }
}

impl<B: Backend> Registrar<B> for MorphoRegistrar {
    type Field = GaussianVectorField<B>;

    fn register(&self, input: PairInput<'_, B>) -> Result<PairwiseFit<B, Self::Field>> {
        let config = input.config;
        config.validate()?;

        let moving_raw = input.moving.obsm(input.spatial_key)?.clone();
        let fixed_raw = input
            .fixed
            .obsm(input.spatial_key)?
            .clone()
            .to_device(&moving_raw.device());
        let d = check_dims(&moving_raw, &fixed_raw)?;

        let params = params_from(config);
        let kf = expression_kernel(
            input.fixed,
            input.moving,
            input.layer,
            input.genes,
            &params,
            input.label_similarity,
        )?;

        let normalization = Normalization::fit(&moving_raw, &fixed_raw);
        let x = normalization.moving_to_unit(moving_raw.clone());
        let y = normalization.fixed_to_unit(fixed_raw);

        let mut sigma2 = initial_sigma2(x.clone(), y.clone()).max(config.sigma2_min);
        let mut rigid = RigidParams::identity(d);
        let mut control: Option<ControlPoints<B>> = None;
        let mut transformed = x.clone();
        let mut history = Vec::new();
        let mut sigma2_history = vec![sigma2];
        let checker = ConvergenceChecker::new(config.tolerance);
        let mut iterations = 0;

        tracing::debug!(
            "Registering '{}' onto '{}' ({} x {} points, mode {})",
            input.moving.name(),
            input.fixed.name(),
            x.dims()[0],
            y.dims()[0],
            config.mode
        );

        for iteration in 0..config.max_iter {
            iterations = iteration + 1;

            // E-step
            let p = posterior(
                transformed.clone(),
                y.clone(),
                Some(kf.clone()),
                sigma2,
                config.outlier_weight,
            );
            let p1 = p.clone().sum_dim(1); // [n, 1]
            let np = sum_scalar(p1.clone());
            if !(np.is_finite() && np > EPS) {
                return Err(RegistrationError::numerical_instability(format!(
                    "posterior mass vanished at iteration {}",
                    iteration
                )));
            }

            // M-step
            if config.mode.has_rigid() {
                rigid = weighted_procrustes(x.clone(), y.clone(), p.clone())?;
            }
            let rigid_x = rigid.apply(x.clone());

            let displacement = if config.mode.has_nonrigid() {
                let weighted_residual = p.clone().matmul(y.clone()) - rigid_x.clone() * p1.clone();
                let points = ControlPoints {
                    points: x.clone(),
                    weighted_residual,
                    weights: p1,
                    regularizer: config.lambda * sigma2,
                    beta: config.beta,
                };
                let v = points.displacement(x.clone());
                control = Some(points);
                v
            } else {
                rigid_x.zeros_like()
            };
            transformed = rigid_x + displacement;

            let residual = sum_scalar(p * squared_distances(transformed.clone(), y.clone()));
            sigma2 = (residual / (np * d as f64)).max(config.sigma2_min);
            sigma2_history.push(sigma2);

            if input.record_history {
                history.push(normalization.unit_to_fixed(transformed.clone()));
            }

            tracing::trace!("Iteration {}: sigma2 {:.6e}", iteration, sigma2);

            if checker.check_convergence(&sigma2_history) {
                break;
            }
        }
        validate_sigma2(sigma2)?;

        let assignment = posterior(transformed, y, Some(kf), sigma2, config.outlier_weight);
        let field = GaussianVectorField {
            normalization,
            rigid,
            control,
            sigma2,
            params,
        };
        let FieldOutput { transformed: aligned, rigid, .. } = field.apply(moving_raw)?;

        tracing::debug!(
            "Registered '{}' in {} iterations, sigma2 {:.6e}",
            input.moving.name(),
            iterations,
            sigma2
        );

        Ok(PairwiseFit {
            aligned,
            rigid,
            assignment,
            sigma2,
            field,
            history,
            iterations,
        })
    }

    fn transform(&self, field: &Self::Field, points: Tensor<B, 2>) -> Result<FieldOutput<B>> {
        field.apply(points)
    }

    fn transform_and_assign(
        &self,
        field: &Self::Field,
        input: AssignInput<'_, B>,
    ) -> Result<Assignment<B>> {
        let moving_raw = input.moving.obsm(input.moving_key)?.clone();
        let output = field.apply(moving_raw)?;
        let fixed = input
            .fixed
            .obsm(input.fixed_key)?
            .clone()
            .to_device(&output.transformed.device());
        check_dims(&output.transformed, &fixed)?;

        let params = field.params;
        let kf = expression_kernel(
            input.fixed,
            input.moving,
            input.layer,
            input.genes,
            &params,
            None,
        )?;

        let sigma2 = if input.small_variance {
            field.sigma2.min(SMALL_VARIANCE)
        } else {
            field.sigma2
        }
        .max(params.sigma2_min);

        // both sides already live in the fixed frame
        let normalization = &field.normalization;
        let moving_unit = normalization.fixed_to_unit(output.transformed.clone());
        let fixed_unit = normalization.fixed_to_unit(fixed);
        let assignment =
            posterior(moving_unit, fixed_unit, Some(kf), sigma2, params.outlier_weight);

        tracing::debug!(
            "Re-assigned '{}' against '{}' at sigma2 {:.3e}",
            input.moving.name(),
            input.fixed.name(),
            sigma2
        );

        Ok(Assignment {
            assignment,
            transformed: output.transformed,
        })
    }
}

/// Index of the largest entry in each row of a `[n, m]` matrix.
pub fn row_argmax<B: Backend>(matrix: Tensor<B, 2>) -> Vec<usize> {
    let [_, m] = matrix.dims();
    if m == 0 {
        return Vec::new();
    }
    to_host(matrix)
        .chunks_exact(m)
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f64::NEG_INFINITY), |best, (j, v)| {
                    if *v > best.1 {
                        (j, *v)
                    } else {
                        best
                    }
                })
                .0
        })
        .collect()
}
