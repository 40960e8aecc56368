//! Direct chain alignment.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use morpho_core::{slots, Sample, UnsValue};

use super::{check_cancel, finish, label_term, pair_mut, run_tracker, validate_samples};
use crate::cache::{ComputeCache, NoopCache};
use crate::config::AlignConfig;
use crate::error::Result;
use crate::progress::ProgressTracker;
use crate::registrar::{PairInput, Registrar};
use crate::registry::FieldRegistry;
use crate::validation::{validate_assignment, validate_coordinates, validate_sigma2};

/// Output of [`ChainAligner::align`].
#[derive(Debug, Clone)]
pub struct ChainAlignment<B: Backend, F> {
    /// Aligned copies of the input samples, in input order.
    pub samples: Vec<Sample<B>>,
    /// `assignments[k]` is `[n_{k+1}, n_k]` for the pair `(k, k + 1)`.
    pub assignments: Vec<Tensor<B, 2>>,
    /// Variance estimate per pair.
    pub sigma2s: Vec<f64>,
    /// Fitted fields, one per pair; samples reference them by handle.
    pub fields: FieldRegistry<F>,
}

/// Registers each sample onto its aligned predecessor.
///
/// # Type Parameters
/// * `R` - Pairwise registrar
/// * `C` - Device cache hook
#[derive(Debug, Clone)]
pub struct ChainAligner<R, C = NoopCache> {
    registrar: R,
    cache: C,
    config: AlignConfig,
    progress: ProgressTracker,
}

impl<R> ChainAligner<R, NoopCache> {
    /// Create an aligner with the no-op cache hook.
    pub fn new(registrar: R, config: AlignConfig) -> Self {
        Self {
            registrar,
            cache: NoopCache,
            config,
            progress: ProgressTracker::new(),
        }
    }
}

impl<R, C> ChainAligner<R, C> {
    /// Replace the cache hook.
    pub fn with_cache<C2>(self, cache: C2) -> ChainAligner<R, C2> {
        ChainAligner {
            registrar: self.registrar,
            cache,
            config: self.config,
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

    /// Align `samples` into the frame of the first one.
    ///
    /// Every returned sample carries the output slot, the rigid and coarse
    /// tracking slots and the running optimal slot, all seeded to its raw
    /// coordinates. For each moving sample these are then overwritten with
    /// the pair's results, and the fitted field handle (plus the iteration
    /// history, if enabled) is stored in its auxiliary store.
    ///
    /// # Errors
    /// Usage errors are reported before any registration runs. Solver
    /// failures abort the chain; no partial result is returned.
    pub fn align<B: Backend>(
        &self,
        samples: &[Sample<B>],
        device: &B::Device,
    ) -> Result<ChainAlignment<B, R::Field>>
    where
        R: Registrar<B>,
        C: ComputeCache<B>,
    {
        self.config.validate()?;
        validate_samples(samples, &self.config)?;

        let tracker = run_tracker(&self.progress, self.config.verbose);
        tracker.start(
            &format!(
                "Models alignment based on morpho, mode: {}.",
                self.config.registration.mode
            ),
            samples.len().saturating_sub(1),
        );
        finish(&tracker, self.run(samples, device, &tracker))
    }

    fn run<B: Backend>(
        &self,
        samples: &[Sample<B>],
        device: &B::Device,
        tracker: &ProgressTracker,
    ) -> Result<ChainAlignment<B, R::Field>>
    where
        R: Registrar<B>,
        C: ComputeCache<B>,
    {
        let config = &self.config;
        let total = samples.len().saturating_sub(1);

        let copies = samples
            .iter()
            .map(|s| {
                let mut copy = s.clone().to_device(device);
                let seeded = [
                    config.key_added.as_str(),
                    slots::RIGID,
                    slots::COARSE,
                    slots::OPTIMAL,
                ];
                for slot in seeded {
                    copy.seed_slot(&config.spatial_key, slot)?;
                }
                Ok(copy)
            })
            .collect::<Result<Vec<_>>>()?;

        let initial = ChainAlignment {
            samples: copies,
            assignments: Vec::with_capacity(total),
            sigma2s: Vec::with_capacity(total),
            fields: FieldRegistry::new(),
        };

        (1..samples.len()).try_fold(initial, |mut state, i| -> Result<ChainAlignment<B, R::Field>> {
            check_cancel(tracker, i - 1, total)?;

            let (fixed, moving) = pair_mut(&mut state.samples, i);
            let (n_moving, n_fixed) = (moving.n_points(), fixed.n_points());
            let d = moving.n_dims(&config.spatial_key)?;

            let fit = self.registrar.register(PairInput {
                fixed,
                moving: &*moving,
                spatial_key: slots::OPTIMAL,
                layer: &config.layer,
                genes: config.genes.as_deref(),
                config: &config.registration,
                label_similarity: label_term(fixed, &*moving, config.label_key.as_deref(), device)?,
                record_history: config.iter_key_added.is_some(),
            })?;
            validate_assignment(&fit.assignment, n_moving, n_fixed)?;
            validate_coordinates(&fit.aligned, n_moving, d)?;
            validate_sigma2(fit.sigma2)?;

            let raw = moving.obsm(&config.spatial_key)?.clone();
            let rigid = self.registrar.transform(&fit.field, raw)?.rigid;
            validate_coordinates(&rigid, n_moving, d)?;

            moving.set_obsm(&config.key_added, fit.aligned.clone())?;
            moving.set_obsm(slots::OPTIMAL, fit.aligned)?;
            moving.set_obsm(slots::COARSE, fit.rigid)?;
            moving.set_obsm(slots::RIGID, rigid)?;
            if let Some(key) = &config.iter_key_added {
                moving.set_uns(key, UnsValue::History(fit.history));
            }
            let handle = state.fields.insert(fit.field);
            moving.set_uns(&config.vecfld_key_added, UnsValue::Field(handle));

            tracker.update(i, fixed.name(), moving.name(), fit.sigma2, fit.iterations);
            state.assignments.push(fit.assignment);
            state.sigma2s.push(fit.sigma2);

            self.cache.reset(device);
            Ok(state)
        })
    }
}
