//! Chain orchestration over ordered sample lists.
//!
//! Both aligners walk `N` samples as `N − 1` adjacent pairs `(k, k + 1)`,
//! sample `k` fixed and `k + 1` moving. The walk is a fold: each step reads
//! the coordinates the previous step wrote, so pairs are strictly serial.
//! Input samples are cloned on entry; callers' data is never written.

mod chain;
mod reference;

pub use chain::{ChainAligner, ChainAlignment};
pub use reference::{ReferenceAligner, ReferenceAlignment};

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use morpho_core::features::common_genes;
use morpho_core::labels::label_similarity;
use morpho_core::{CoreError, FeatureLayer, Sample};
use std::sync::Arc;

use crate::config::AlignConfig;
use crate::error::{RegistrationError, Result};
use crate::progress::{ConsoleProgressCallback, ProgressTracker};

/// Fixed and moving members of pair `(i − 1, i)`.
pub(crate) fn pair_mut<T>(items: &mut [T], i: usize) -> (&T, &mut T) {
    let (head, tail) = items.split_at_mut(i);
    (&head[i - 1], &mut tail[0])
}

/// Additive label term `[n_moving, n_fixed]`, or `None` without a label key.
pub(crate) fn label_term<B: Backend>(
    fixed: &Sample<B>,
    moving: &Sample<B>,
    label_key: Option<&str>,
    device: &B::Device,
) -> Result<Option<Tensor<B, 2>>> {
    let Some(key) = label_key else {
        return Ok(None);
    };
    let fixed_labels = fixed.label(key)?;
    let moving_labels = moving.label(key)?;
    Ok(Some(label_similarity(fixed_labels, moving_labels, device)))
}

/// Fail fast on usage errors before any pair is registered.
///
/// Checks the coordinate slot, the feature layer, the label key and the
/// shared genes of every adjacent pair, so a bad sample deep in the chain
/// is reported without spending time on the pairs before it.
pub(crate) fn validate_samples<B: Backend>(
    samples: &[Sample<B>],
    config: &AlignConfig,
) -> Result<()> {
    let mut dims = None;
    for sample in samples {
        let d = sample.n_dims(&config.spatial_key)?;
        if sample.n_points() == 0 {
            return Err(CoreError::EmptyPointSet(sample.name().to_string()).into());
        }
        match dims {
            Some(expected) if expected != d => {
                return Err(RegistrationError::dimension_mismatch(format!(
                    "sample '{}' is {}-dimensional, expected {}",
                    sample.name(),
                    d,
                    expected
                )))
            }
            _ => dims = Some(d),
        }
        if let FeatureLayer::Layer(name) = &config.layer {
            sample.layer(name)?;
        }
        if let Some(key) = &config.label_key {
            sample.label(key)?;
        }
    }

    for pair in samples.windows(2) {
        common_genes(&pair[0], &pair[1], config.genes.as_deref())?;
    }
    Ok(())
}

/// Caller's tracker plus console logging when verbose.
pub(crate) fn run_tracker(base: &ProgressTracker, verbose: bool) -> ProgressTracker {
    let mut tracker = base.clone();
    if verbose {
        tracker.add_callback(Arc::new(ConsoleProgressCallback::default()));
    }
    tracker
}

/// Stop before pair `completed + 1` if a callback asked to.
pub(crate) fn check_cancel(
    tracker: &ProgressTracker,
    completed: usize,
    total: usize,
) -> Result<()> {
    if tracker.should_cancel() {
        tracing::warn!("Alignment cancelled after {} of {} pairs", completed, total);
        return Err(RegistrationError::Cancelled {
            completed_pairs: completed,
            total_pairs: total,
        });
    }
    Ok(())
}

/// Report the outcome of a run to the tracker.
pub(crate) fn finish<T>(tracker: &ProgressTracker, result: Result<T>) -> Result<T> {
    match &result {
        Ok(_) => tracker.complete(),
        Err(e) => tracker.error(&e.to_string()),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use morpho_core::tensor::from_rows;
    use morpho_core::Categorical;

    type B = NdArray<f32>;

    fn sample(name: &str, genes: &[&str]) -> Sample<B> {
        let device = Default::default();
        let coords = from_rows::<B>(vec![0.0, 0.0, 1.0, 1.0], 2, 2, &device);
        let x = from_rows::<B>(vec![1.0; 2 * genes.len()], 2, genes.len(), &device);
        let names = genes.iter().map(|g| g.to_string()).collect();
        Sample::new(name, "spatial", coords, x, names).unwrap()
    }

    #[test]
    fn test_pair_mut_splits_neighbours() {
        let mut items = vec![1, 2, 3];
        let (fixed, moving) = pair_mut(&mut items, 2);
        assert_eq!(*fixed, 2);
        *moving = 30;
        assert_eq!(items, vec![1, 2, 30]);
    }

    #[test]
    fn test_label_term_shape() {
        let device = Default::default();
        let a = sample("a", &["g"])
            .with_label("type", Categorical::from_labels(&["x", "y"]))
            .unwrap();
        let b = sample("b", &["g"])
            .with_label("type", Categorical::from_labels(&["y", "y"]))
            .unwrap();
        assert!(label_term(&a, &b, None, &device).unwrap().is_none());
        let term = label_term(&a, &b, Some("type"), &device).unwrap().unwrap();
        assert_eq!(term.dims(), [2, 2]);
    }

    #[test]
    fn test_validate_samples_reports_missing_label() {
        let a = sample("a", &["g"])
            .with_label("type", Categorical::from_labels(&["x", "y"]))
            .unwrap();
        let b = sample("b", &["g"]);
        let config = AlignConfig::new().with_label_key("type");
        let err = validate_samples(&[a, b], &config).unwrap_err();
        assert!(err.is_usage_error());
    }

    #[test]
    fn test_validate_samples_reports_disjoint_genes() {
        let a = sample("a", &["g1"]);
        let b = sample("b", &["g2"]);
        let err = validate_samples(&[a, b], &AlignConfig::new()).unwrap_err();
        assert!(matches!(err, RegistrationError::Core(CoreError::NoCommonGenes { .. })));
    }
}
