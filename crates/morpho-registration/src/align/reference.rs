//! Chain alignment on downsampled reference samples.
//!
//! Registration runs on the reference chain; each fitted field is then
//! projected back onto the matching full-resolution sample, either with a
//! plain transform or with a transform followed by a fresh full-resolution
//! assignment.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use morpho_core::{slots, Downsampler, PointDownsampler, Sample, UnsValue};

use super::{check_cancel, finish, label_term, pair_mut, run_tracker, validate_samples};
use crate::cache::{ComputeCache, NoopCache};
use crate::config::{AlignConfig, ReferenceConfig};
use crate::error::{RegistrationError, Result};
use crate::progress::ProgressTracker;
use crate::registrar::{AssignInput, PairInput, Registrar};
use crate::registry::FieldRegistry;
use crate::validation::{validate_assignment, validate_coordinates, validate_sigma2};

/// Output of [`ReferenceAligner::align_ref`].
#[derive(Debug, Clone)]
pub struct ReferenceAlignment<B: Backend, F> {
    /// Full-resolution aligned copies, in input order.
    pub samples: Vec<Sample<B>>,
    /// Reference copies aligned on the reduced chain.
    pub reference_samples: Vec<Sample<B>>,
    /// Full-resolution assignment per pair when full assignment is enabled,
    /// otherwise the reference assignment.
    pub assignments: Vec<Tensor<B, 2>>,
    /// Reference-resolution assignment per pair.
    pub reference_assignments: Vec<Tensor<B, 2>>,
    /// Variance estimate per pair.
    pub sigma2s: Vec<f64>,
    /// Fields fitted on the reference chain.
    pub fields: FieldRegistry<F>,
}

/// Chain aligner that registers reduced samples and back-projects.
///
/// # Type Parameters
/// * `R` - Pairwise registrar
/// * `D` - Downsampler building the reference samples
/// * `C` - Device cache hook
#[derive(Debug, Clone)]
pub struct ReferenceAligner<R, D = PointDownsampler, C = NoopCache> {
    registrar: R,
    downsampler: D,
    cache: C,
    config: AlignConfig,
    reference: ReferenceConfig,
    progress: ProgressTracker,
}

impl<R> ReferenceAligner<R, PointDownsampler, NoopCache> {
    /// Create an aligner with the default downsampler and cache hook.
    pub fn new(registrar: R, config: AlignConfig, reference: ReferenceConfig) -> Self {
        Self {
            registrar,
            downsampler: PointDownsampler::default(),
            cache: NoopCache,
            config,
            reference,
            progress: ProgressTracker::new(),
        }
    }
}

impl<R, D, C> ReferenceAligner<R, D, C> {
    /// Replace the downsampler.
    pub fn with_downsampler<D2>(self, downsampler: D2) -> ReferenceAligner<R, D2, C> {
        ReferenceAligner {
            registrar: self.registrar,
            downsampler,
            cache: self.cache,
            config: self.config,
            reference: self.reference,
            progress: self.progress,
        }
    }

    /// Replace the cache hook.
    pub fn with_cache<C2>(self, cache: C2) -> ReferenceAligner<R, D, C2> {
        ReferenceAligner {
            registrar: self.registrar,
            downsampler: self.downsampler,
            cache,
            config: self.config,
            reference: self.reference,
            progress: self.progress,
        }
    }

    /// Attach progress callbacks.
    pub fn with_progress(mut self, progress: ProgressTracker) -> Self {
        self.progress = progress;
        self
    }

    /// Pipeline settings.
    pub fn config(&self) -> &AlignConfig {
        &self.config
    }

    /// The pairwise registrar.
    pub fn registrar(&self) -> &R {
        &self.registrar
    }

    /// The cache hook.
    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// Reference-path settings.
    pub fn reference_config(&self) -> &ReferenceConfig {
        &self.reference
    }

    /// Align `samples` through reduced reference samples.
    ///
    /// Without `references`, the reference list is built by downsampling
    /// each sample to `n_sampling` points. The output slot is seeded on
    /// every reference sample but only on the first full-resolution
    /// sample; later full-resolution samples receive it from their
    /// back-projection step. A field fitted on reference pair `(k, k + 1)`
    /// is shared by handle between reference and full-resolution sample
    /// `k + 1`.
    ///
    /// # Errors
    /// Usage errors, including a reference list of the wrong length, are
    /// reported before any registration runs. Solver failures abort the
    /// chain; no partial result is returned.
    pub fn align_ref<B: Backend>(
        &self,
        samples: &[Sample<B>],
        references: Option<&[Sample<B>]>,
        device: &B::Device,
    ) -> Result<ReferenceAlignment<B, R::Field>>
    where
        R: Registrar<B>,
        D: Downsampler<B>,
        C: ComputeCache<B>,
    {
        self.config.validate()?;
        self.reference.validate()?;
        validate_samples(samples, &self.config)?;

        let references = match references {
            Some(given) => {
                if given.len() != samples.len() {
                    return Err(RegistrationError::invalid_configuration(format!(
                        "{} reference samples supplied for {} samples",
                        given.len(),
                        samples.len()
                    )));
                }
                given.to_vec()
            }
            None => self.downsampler.downsample(
                samples,
                self.reference.n_sampling,
                self.reference.sampling_method,
                &self.config.spatial_key,
            )?,
        };
        validate_samples(&references, &self.config)?;

        let tracker = run_tracker(&self.progress, self.config.verbose);
        tracker.start(
            &format!(
                "Models alignment with ref-models based on morpho, mode: {}.",
                self.config.registration.mode
            ),
            samples.len().saturating_sub(1),
        );
        finish(&tracker, self.run(samples, references, device, &tracker))
    }

    fn run<B: Backend>(
        &self,
        samples: &[Sample<B>],
        references: Vec<Sample<B>>,
        device: &B::Device,
        tracker: &ProgressTracker,
    ) -> Result<ReferenceAlignment<B, R::Field>>
    where
        R: Registrar<B>,
        C: ComputeCache<B>,
    {
        let config = &self.config;
        let total = samples.len().saturating_sub(1);

        let reference_samples = references
            .into_iter()
            .map(|r| {
                let mut copy = r.to_device(device);
                copy.seed_slot(&config.spatial_key, &config.key_added)?;
                Ok(copy)
            })
            .collect::<Result<Vec<_>>>()?;
        let mut full: Vec<Sample<B>> =
            samples.iter().map(|s| s.clone().to_device(device)).collect();
        if let Some(first) = full.first_mut() {
            first.seed_slot(&config.spatial_key, &config.key_added)?;
        }

        let initial = ReferenceAlignment {
            samples: full,
            reference_samples,
            assignments: Vec::with_capacity(total),
            reference_assignments: Vec::with_capacity(total),
            sigma2s: Vec::with_capacity(total),
            fields: FieldRegistry::new(),
        };

        (1..samples.len()).try_fold(initial, |mut state, i| -> Result<ReferenceAlignment<_, _>> {
            check_cancel(tracker, i - 1, total)?;

            // register the reference pair
            let (ref_fixed, ref_moving) = pair_mut(&mut state.reference_samples, i);
            let (n_moving, n_fixed) = (ref_moving.n_points(), ref_fixed.n_points());
            let d = ref_moving.n_dims(&config.key_added)?;

            let fit = self.registrar.register(PairInput {
                fixed: ref_fixed,
                moving: &*ref_moving,
                spatial_key: &config.key_added,
                layer: &config.layer,
                genes: config.genes.as_deref(),
                config: &config.registration,
                label_similarity: label_term(
                    ref_fixed,
                    &*ref_moving,
                    config.label_key.as_deref(),
                    device,
                )?,
                record_history: config.iter_key_added.is_some(),
            })?;
            validate_assignment(&fit.assignment, n_moving, n_fixed)?;
            validate_coordinates(&fit.aligned, n_moving, d)?;
            validate_sigma2(fit.sigma2)?;

            ref_moving.set_obsm(&config.key_added, fit.aligned)?;
            if let Some(key) = &config.iter_key_added {
                ref_moving.set_uns(key, UnsValue::History(fit.history));
            }
            let handle = state.fields.insert(fit.field);
            ref_moving.set_uns(&config.vecfld_key_added, UnsValue::Field(handle));
            let fixed_name = ref_fixed.name().to_string();
            let moving_name = ref_moving.name().to_string();

            // back-project onto the full-resolution pair
            let field = state.fields.get(handle)?;
            let (full_fixed, full_moving) = pair_mut(&mut state.samples, i);
            full_moving.set_uns(&config.vecfld_key_added, UnsValue::Field(handle));
            let (n_moving, n_fixed) = (full_moving.n_points(), full_fixed.n_points());

            let assignment = if self.reference.return_full_assignment {
                let out = self.registrar.transform_and_assign(
                    field,
                    AssignInput {
                        moving: &*full_moving,
                        moving_key: &config.spatial_key,
                        fixed: full_fixed,
                        fixed_key: &config.spatial_key,
                        layer: &config.layer,
                        genes: config.genes.as_deref(),
                        small_variance: true,
                    },
                )?;
                validate_assignment(&out.assignment, n_moving, n_fixed)?;
                validate_coordinates(&out.transformed, n_moving, d)?;
                full_moving.set_obsm(&config.key_added, out.transformed)?;
                out.assignment
            } else {
                let raw = full_moving.obsm(&config.spatial_key)?.clone();
                let out = self.registrar.transform(field, raw)?;
                validate_coordinates(&out.transformed, n_moving, d)?;
                validate_coordinates(&out.rigid, n_moving, d)?;
                full_moving.set_obsm(&config.key_added, out.transformed)?;
                full_moving.set_obsm(slots::RIGID, out.rigid)?;
                fit.assignment.clone()
            };

            tracker.update(i, &fixed_name, &moving_name, fit.sigma2, fit.iterations);
            state.assignments.push(assignment);
            state.reference_assignments.push(fit.assignment);
            state.sigma2s.push(fit.sigma2);

            self.cache.reset(device);
            Ok(state)
        })
    }
}
