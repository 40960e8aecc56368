use burn::tensor::Tensor;
use burn_ndarray::NdArray;
use morpho_core::tensor::{from_rows, to_host};
use morpho_core::{slots, PointDownsampler, Sample, SamplingMethod};
use morpho_registration::{
    AlignConfig, AlignMode, AssignInput, Assignment, ChainAligner, FieldOutput, MorphoRegistrar,
    PairInput, PairwiseFit, ReferenceAligner, ReferenceConfig, Registrar, RegistrationConfig,
    RegistrationError, Result,
};
use std::cell::RefCell;

type B = NdArray<f64>;

/// A 6 x 6 grid, rotated by `angle` and shifted by `offset`.
fn grid_sample(name: &str, offset: (f64, f64), angle: f64) -> Sample<B> {
    let device = Default::default();
    let (s, c) = angle.sin_cos();
    let mut coords = Vec::new();
    let mut expression = Vec::new();
    for i in 0..6 {
        for j in 0..6 {
            let (px, py) = (i as f64, j as f64);
            coords.extend([c * px - s * py + offset.0, s * px + c * py + offset.1]);
            expression.extend([1.0 + i as f64, 1.0 + j as f64, 1.0 + (i * j) as f64]);
        }
    }
    Sample::new(
        name,
        "spatial",
        from_rows::<B>(coords, 36, 2, &device),
        from_rows::<B>(expression, 36, 3, &device),
        vec!["g1".into(), "g2".into(), "g3".into()],
    )
    .unwrap()
}

fn chain() -> Vec<Sample<B>> {
    vec![
        grid_sample("s0", (0.0, 0.0), 0.0),
        grid_sample("s1", (4.0, 1.0), 0.1),
        grid_sample("s2", (-2.0, 3.0), 0.2),
    ]
}

fn config() -> AlignConfig {
    AlignConfig::new()
        .with_verbose(false)
        .with_registration(RegistrationConfig::new().with_mode(AlignMode::S).with_max_iter(60))
}

fn assert_close(a: Vec<f64>, b: Vec<f64>, tol: f64) {
    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(&b) {
        assert!((x - y).abs() < tol, "{x} vs {y}");
    }
}

#[test]
fn test_full_resolution_reference_matches_direct_chain() {
    let samples = chain();
    let device = Default::default();

    let direct = ChainAligner::new(MorphoRegistrar, config())
        .align(&samples, &device)
        .unwrap();
    let reference = ReferenceAligner::new(
        MorphoRegistrar,
        config(),
        ReferenceConfig::new().with_n_sampling(36).with_full_assignment(false),
    )
    .align_ref(&samples, None, &device)
    .unwrap();

    assert_eq!(reference.samples.len(), 3);
    assert_eq!(reference.assignments.len(), 2);
    for k in 0..3 {
        assert_close(
            to_host(reference.samples[k].obsm("align_spatial").unwrap().clone()),
            to_host(direct.samples[k].obsm("align_spatial").unwrap().clone()),
            1e-6,
        );
    }
    for k in 0..2 {
        assert_close(
            to_host(reference.assignments[k].clone()),
            to_host(direct.assignments[k].clone()),
            1e-6,
        );
        assert!((reference.sigma2s[k] - direct.sigma2s[k]).abs() < 1e-9);
    }
    assert_close(
        to_host(reference.samples[2].obsm(slots::RIGID).unwrap().clone()),
        to_host(direct.samples[2].obsm(slots::RIGID).unwrap().clone()),
        1e-6,
    );
}

#[test]
fn test_downsampled_chain_with_full_assignment() {
    let samples = chain();
    let device = Default::default();
    let aligner = ReferenceAligner::new(
        MorphoRegistrar,
        config(),
        ReferenceConfig::new().with_n_sampling(20),
    );
    let result = aligner.align_ref(&samples, None, &device).unwrap();

    assert_eq!(result.reference_samples.len(), 3);
    assert!(result.reference_samples.iter().all(|s| s.n_points() == 20));
    for k in 0..2 {
        assert_eq!(result.reference_assignments[k].dims(), [20, 20]);
        // full assignment is recomputed at full resolution
        assert_eq!(result.assignments[k].dims(), [36, 36]);
    }
    assert_eq!(result.sigma2s.len(), 2);

    // the rigid grid copies land near the anchor
    let aligned = to_host(result.samples[2].obsm("align_spatial").unwrap().clone());
    let anchor = to_host(samples[0].obsm("spatial").unwrap().clone());
    let total_error: f64 = aligned.iter().zip(&anchor).map(|(a, b)| (a - b).abs()).sum();
    let mean_error = total_error / aligned.len() as f64;
    assert!(mean_error < 0.5, "mean error {mean_error}");
}

#[test]
fn test_field_handle_is_shared_with_full_sample() {
    let samples = chain();
    let aligner = ReferenceAligner::new(
        MorphoRegistrar,
        config(),
        ReferenceConfig::new().with_n_sampling(16).with_full_assignment(false),
    );
    let result = aligner.align_ref(&samples, None, &Default::default()).unwrap();

    assert_eq!(result.fields.len(), 2);
    for k in 1..3 {
        let full = result.samples[k].field_handle("VecFld_morpho").unwrap();
        let reduced = result.reference_samples[k].field_handle("VecFld_morpho").unwrap();
        assert_eq!(full, reduced);
        assert!(result.fields.get(full).is_ok());
    }
    // plain back-projection reuses the reference assignment
    assert_eq!(result.assignments[0].dims(), [16, 16]);
}

#[test]
fn test_single_sample_seeds_only_output_slot() {
    let samples = vec![grid_sample("s0", (0.0, 0.0), 0.0)];
    let reference = ReferenceConfig::new().with_n_sampling(10);
    let aligner = ReferenceAligner::new(MorphoRegistrar, config(), reference);
    let result = aligner.align_ref(&samples, None, &Default::default()).unwrap();

    assert!(result.assignments.is_empty());
    assert!(result.reference_assignments.is_empty());
    assert_eq!(
        to_host(result.samples[0].obsm("align_spatial").unwrap().clone()),
        to_host(samples[0].obsm("spatial").unwrap().clone())
    );
    assert!(!result.samples[0].has_obsm(slots::OPTIMAL));
    assert_eq!(result.reference_samples[0].n_points(), 10);
}

#[test]
fn test_supplied_references_are_used() {
    let samples = chain();
    let downsampler = PointDownsampler::new(3);
    let references: Vec<_> = samples
        .iter()
        .map(|s| {
            let coords = to_host(s.obsm("spatial").unwrap().clone());
            let picked = downsampler.select_indices(&coords, 2, 12, SamplingMethod::Random, 0);
            s.subset(&picked).unwrap()
        })
        .collect();

    let aligner = ReferenceAligner::new(MorphoRegistrar, config(), ReferenceConfig::new());
    let result = aligner
        .align_ref(&samples, Some(references.as_slice()), &Default::default())
        .unwrap();
    assert!(result.reference_samples.iter().all(|s| s.n_points() == 12));
    assert_eq!(result.assignments[1].dims(), [36, 36]);

    // references were copied, not written
    assert!(!references[1].has_obsm("align_spatial"));
}

#[test]
fn test_reference_list_length_mismatch() {
    let samples = chain();
    let references = vec![samples[0].clone()];
    let aligner = ReferenceAligner::new(MorphoRegistrar, config(), ReferenceConfig::new());
    let err = aligner
        .align_ref(&samples, Some(references.as_slice()), &Default::default())
        .unwrap_err();
    assert!(matches!(err, RegistrationError::InvalidConfiguration(_)));
}

/// What a back-projection call saw on the full-resolution pair.
#[derive(Debug, Clone, PartialEq)]
struct BackProjection {
    moving: String,
    moving_key: String,
    fixed_key: String,
    moving_has_output: bool,
    fixed_has_output: bool,
}

/// Centroid-shift registrar that records every back-projection call.
#[derive(Debug, Default)]
struct RecordingRegistrar {
    seen: RefCell<Vec<BackProjection>>,
}

fn centroid(points: &Tensor<B, 2>) -> Vec<f64> {
    to_host(points.clone().mean_dim(0))
}

impl Registrar<B> for RecordingRegistrar {
    type Field = Vec<f64>;

    fn register(&self, input: PairInput<'_, B>) -> Result<PairwiseFit<B, Vec<f64>>> {
        let moving = input.moving.obsm(input.spatial_key)?.clone();
        let fixed = input.fixed.obsm(input.spatial_key)?.clone();
        let shift: Vec<f64> = centroid(&fixed)
            .iter()
            .zip(centroid(&moving))
            .map(|(f, m)| f - m)
            .collect();
        let out = self.transform(&shift, moving)?;
        let (n, m) = (input.moving.n_points(), input.fixed.n_points());
        Ok(PairwiseFit {
            aligned: out.transformed,
            rigid: out.rigid,
            assignment: Tensor::ones([n, m], &Default::default()),
            sigma2: 1.0,
            field: shift,
            history: Vec::new(),
            iterations: 1,
        })
    }

    fn transform(&self, field: &Vec<f64>, points: Tensor<B, 2>) -> Result<FieldOutput<B>> {
        let shift = from_rows::<B>(field.clone(), 1, field.len(), &points.device());
        let transformed = points + shift;
        Ok(FieldOutput {
            displacement: transformed.zeros_like(),
            rigid: transformed.clone(),
            transformed,
        })
    }

    fn transform_and_assign(
        &self,
        field: &Vec<f64>,
        input: AssignInput<'_, B>,
    ) -> Result<Assignment<B>> {
        self.seen.borrow_mut().push(BackProjection {
            moving: input.moving.name().to_string(),
            moving_key: input.moving_key.to_string(),
            fixed_key: input.fixed_key.to_string(),
            moving_has_output: input.moving.has_obsm("align_spatial"),
            fixed_has_output: input.fixed.has_obsm("align_spatial"),
        });
        let out = self.transform(field, input.moving.obsm(input.moving_key)?.clone())?;
        let (n, m) = (input.moving.n_points(), input.fixed.n_points());
        Ok(Assignment {
            assignment: Tensor::zeros([n, m], &Default::default()),
            transformed: out.transformed,
        })
    }
}

#[test]
fn test_full_assignment_uses_raw_slots() {
    let samples = chain();
    let aligner = ReferenceAligner::new(
        RecordingRegistrar::default(),
        config(),
        ReferenceConfig::new().with_n_sampling(16),
    );
    aligner.align_ref(&samples, None, &Default::default()).unwrap();

    let seen = aligner.registrar().seen.borrow();
    assert_eq!(seen.len(), 2);
    for (call, moving) in seen.iter().zip(["s1", "s2"]) {
        assert_eq!(call.moving, moving);
        assert_eq!(call.moving_key, "spatial");
        assert_eq!(call.fixed_key, "spatial");
    }
}

#[test]
fn test_output_slot_appears_only_after_back_projection() {
    let samples = chain();
    let aligner = ReferenceAligner::new(
        RecordingRegistrar::default(),
        config(),
        ReferenceConfig::new().with_n_sampling(16),
    );
    let result = aligner.align_ref(&samples, None, &Default::default()).unwrap();

    // the moving sample is unseeded when projected; its predecessor already
    // carries the output slot (seeded for s0, back-projected for s1)
    let seen = aligner.registrar().seen.borrow();
    assert!(seen.iter().all(|call| !call.moving_has_output));
    assert!(seen.iter().all(|call| call.fixed_has_output));
    assert!(result.samples.iter().all(|s| s.has_obsm("align_spatial")));
}

#[test]
fn test_reference_inputs_are_not_mutated() {
    let samples = chain();
    let before: Vec<Vec<f64>> = samples
        .iter()
        .map(|s| to_host(s.obsm("spatial").unwrap().clone()))
        .collect();

    for full_assignment in [true, false] {
        let aligner = ReferenceAligner::new(
            RecordingRegistrar::default(),
            config(),
            ReferenceConfig::new()
                .with_n_sampling(16)
                .with_full_assignment(full_assignment),
        );
        aligner.align_ref(&samples, None, &Default::default()).unwrap();

        for (sample, coords) in samples.iter().zip(&before) {
            assert_eq!(&to_host(sample.obsm("spatial").unwrap().clone()), coords);
            assert_eq!(sample.n_points(), 36);
            assert!(!sample.has_obsm("align_spatial"));
            assert!(!sample.has_obsm(slots::RIGID));
            assert!(sample.uns("VecFld_morpho").is_none());
        }
    }
}
