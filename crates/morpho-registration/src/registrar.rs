//! Registrar trait: the pairwise primitives the aligners are built on.
//!
//! The chain aligners never look inside a fitted deformation field; they
//! only ask a [`Registrar`] to fit one (`register`), re-apply one
//! (`transform`) or re-apply one and recompute correspondences
//! (`transform_and_assign`). Any solver honouring these contracts can be
//! injected, including deterministic stubs for testing the orchestration.
//!
//! Orientation: sample A is fixed, sample B is moving, and every assignment
//! matrix is `[n_B, n_A]`.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use morpho_core::{FeatureLayer, Sample};
use std::fmt::Debug;

use crate::config::RegistrationConfig;
use crate::error::Result;

/// Inputs of one pairwise registration.
#[derive(Debug, Clone)]
pub struct PairInput<'a, B: Backend> {
    /// Sample A, the target frame.
    pub fixed: &'a Sample<B>,
    /// Sample B, the sample being moved.
    pub moving: &'a Sample<B>,
    /// Slot read on both samples.
    pub spatial_key: &'a str,
    /// Expression matrix used for dissimilarity.
    pub layer: &'a FeatureLayer,
    /// Optional gene subset.
    pub genes: Option<&'a [String]>,
    /// Solver settings.
    pub config: &'a RegistrationConfig,
    /// Additive `[n_B, n_A]` dissimilarity term from labels.
    pub label_similarity: Option<Tensor<B, 2>>,
    /// Keep per-iteration coordinates.
    pub record_history: bool,
}

/// Result of one pairwise registration.
#[derive(Debug, Clone)]
pub struct PairwiseFit<B: Backend, F> {
    /// B's coordinates mapped into A's frame.
    pub aligned: Tensor<B, 2>,
    /// B's coordinates under the rigid component only.
    pub rigid: Tensor<B, 2>,
    /// Soft correspondences `[n_B, n_A]`.
    pub assignment: Tensor<B, 2>,
    /// Final variance estimate.
    pub sigma2: f64,
    /// Fitted deformation field.
    pub field: F,
    /// Coordinates after each iteration, empty unless requested.
    pub history: Vec<Tensor<B, 2>>,
    /// Iterations actually run.
    pub iterations: usize,
}

/// Output of applying a field to query points.
#[derive(Debug, Clone)]
pub struct FieldOutput<B: Backend> {
    /// Points under the full (rigid + nonrigid) mapping.
    pub transformed: Tensor<B, 2>,
    /// Nonrigid displacement in the target frame's units.
    pub displacement: Tensor<B, 2>,
    /// Points under the rigid component only.
    pub rigid: Tensor<B, 2>,
}

/// Inputs of a joint transform and re-assignment.
#[derive(Debug, Clone)]
pub struct AssignInput<'a, B: Backend> {
    /// Sample whose points are transformed.
    pub moving: &'a Sample<B>,
    /// Slot holding the moving points to transform.
    pub moving_key: &'a str,
    /// Sample providing the target frame.
    pub fixed: &'a Sample<B>,
    /// Slot holding the target points.
    pub fixed_key: &'a str,
    /// Expression matrix used for dissimilarity.
    pub layer: &'a FeatureLayer,
    /// Optional gene subset.
    pub genes: Option<&'a [String]>,
    /// Use a small fixed variance instead of the fitted one.
    pub small_variance: bool,
}

/// Output of a joint transform and re-assignment.
#[derive(Debug, Clone)]
pub struct Assignment<B: Backend> {
    /// Soft correspondences `[n_moving, n_fixed]`.
    pub assignment: Tensor<B, 2>,
    /// Moving points in the target frame.
    pub transformed: Tensor<B, 2>,
}

/// Pairwise registration primitives.
///
/// # Type Parameters
/// * `B` - The burn backend
pub trait Registrar<B: Backend> {
    /// Fitted deformation field.
    type Field: Clone + Debug;

    /// Register `input.moving` onto `input.fixed`.
    fn register(&self, input: PairInput<'_, B>) -> Result<PairwiseFit<B, Self::Field>>;

    /// Apply a fitted field to `[n, d]` points.
    fn transform(&self, field: &Self::Field, points: Tensor<B, 2>) -> Result<FieldOutput<B>>;

    /// Apply a fitted field and recompute the soft assignment against the
    /// target frame.
    fn transform_and_assign(
        &self,
        field: &Self::Field,
        input: AssignInput<'_, B>,
    ) -> Result<Assignment<B>>;
}
