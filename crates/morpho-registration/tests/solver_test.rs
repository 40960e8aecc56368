use burn::tensor::Tensor;
use burn_ndarray::NdArray;
use morpho_core::tensor::{from_rows, to_host};
use morpho_core::{Categorical, FeatureLayer, Sample};
use morpho_registration::solver::row_argmax;
use morpho_registration::{
    AlignConfig, AlignMode, ChainAligner, MorphoRegistrar, PairInput, Registrar, RegistrationConfig,
};

type B = NdArray<f64>;

/// 10 x 10 jittered grid with position-dependent expression.
fn tissue(name: &str) -> Sample<B> {
    let device = Default::default();
    let mut coords = Vec::with_capacity(200);
    let mut expression = Vec::with_capacity(400);
    for i in 0..10 {
        for j in 0..10 {
            let jitter = ((i * 7 + j * 3) % 5) as f64 * 0.05;
            coords.extend([i as f64 + jitter, j as f64 - jitter]);
            expression.extend([
                1.0 + i as f64,
                1.0 + j as f64,
                10.0 - i as f64,
                1.0 + ((i + j) % 3) as f64,
            ]);
        }
    }
    Sample::new(
        name,
        "spatial",
        from_rows::<B>(coords, 100, 2, &device),
        from_rows::<B>(expression, 100, 4, &device),
        vec!["a".into(), "b".into(), "c".into(), "d".into()],
    )
    .unwrap()
}

fn transformed(sample: &Sample<B>, name: &str, angle: f64, shift: (f64, f64)) -> Sample<B> {
    let (s, c) = angle.sin_cos();
    let coords: Vec<f64> = to_host(sample.obsm("spatial").unwrap().clone())
        .chunks_exact(2)
        .flat_map(|p| [c * p[0] - s * p[1] + shift.0, s * p[0] + c * p[1] + shift.1])
        .collect();
    let device = Default::default();
    Sample::new(
        name,
        "spatial",
        from_rows::<B>(coords, sample.n_points(), 2, &device),
        sample.x().clone(),
        sample.var_names().to_vec(),
    )
    .unwrap()
}

#[test]
fn test_identical_samples_give_identity_assignment() {
    let a = tissue("a");
    let b = tissue("b");
    let config = AlignConfig::new()
        .with_verbose(false)
        .with_registration(RegistrationConfig::new().with_mode(AlignMode::SN));
    let result = ChainAligner::new(MorphoRegistrar, config)
        .align(&[a, b], &Default::default())
        .unwrap();

    let p = result.assignments[0].clone();
    assert_eq!(p.dims(), [100, 100]);
    assert_eq!(row_argmax(p), (0..100).collect::<Vec<_>>());
    assert!(result.sigma2s[0] < 1e-3, "sigma2 = {}", result.sigma2s[0]);

    let raw = to_host(result.samples[0].obsm("spatial").unwrap().clone());
    let aligned = to_host(result.samples[1].obsm("align_spatial").unwrap().clone());
    for (x, y) in aligned.iter().zip(&raw) {
        assert!((x - y).abs() < 1e-2);
    }
}

#[test]
fn test_rigid_chain_recovers_anchor_frame() {
    let a = tissue("a");
    let b = transformed(&a, "b", 0.15, (5.0, -3.0));
    let c = transformed(&a, "c", -0.1, (-8.0, 2.0));
    let config = AlignConfig::new()
        .with_verbose(false)
        .with_registration(RegistrationConfig::new().with_mode(AlignMode::S));
    let result = ChainAligner::new(MorphoRegistrar, config)
        .align(&[a.clone(), b, c], &Default::default())
        .unwrap();

    let anchor = to_host(a.obsm("spatial").unwrap().clone());
    for sample in &result.samples[1..] {
        let aligned = to_host(sample.obsm("align_spatial").unwrap().clone());
        for (x, y) in aligned.iter().zip(&anchor) {
            assert!((x - y).abs() < 1e-2, "{}: {x} vs {y}", sample.name());
        }
    }
    assert!(result.sigma2s.iter().all(|s| *s < 1e-3));
}

#[test]
fn test_labels_break_expression_ties() {
    let device = Default::default();
    // two coincident points per site; only the label tells them apart
    let coords = from_rows::<B>(vec![0.0, 0.0, 0.0, 0.0, 3.0, 0.0, 3.0, 0.0], 4, 2, &device);
    let x = from_rows::<B>(vec![1.0; 4], 4, 1, &device);
    let make = |name: &str, labels: &[&str]| {
        Sample::new(name, "spatial", coords.clone(), x.clone(), vec!["g".into()])
            .unwrap()
            .with_label("type", Categorical::from_labels(labels))
            .unwrap()
    };
    let fixed = make("a", &["u", "v", "u", "v"]);
    let moving = make("b", &["v", "u", "v", "u"]);

    let config = RegistrationConfig::new().with_mode(AlignMode::S).with_max_iter(20);
    let similarity = morpho_core::labels::label_similarity::<B>(
        fixed.label("type").unwrap(),
        moving.label("type").unwrap(),
        &device,
    );
    let fit = MorphoRegistrar
        .register(PairInput {
            fixed: &fixed,
            moving: &moving,
            spatial_key: "spatial",
            layer: &FeatureLayer::X,
            genes: None,
            config: &config,
            label_similarity: Some(similarity),
            record_history: false,
        })
        .unwrap();

    assert_eq!(row_argmax(fit.assignment), vec![1, 0, 3, 2]);
}

#[test]
fn test_history_is_recorded_per_iteration() {
    let a = tissue("a");
    let b = transformed(&a, "b", 0.0, (1.0, 1.0));
    let config = RegistrationConfig::new().with_max_iter(5).with_tolerance(0.0);
    let fit = MorphoRegistrar
        .register(PairInput {
            fixed: &a,
            moving: &b,
            spatial_key: "spatial",
            layer: &FeatureLayer::X,
            genes: Some(&["a".to_string(), "b".to_string()]),
            config: &config,
            label_similarity: None,
            record_history: true,
        })
        .unwrap();

    assert_eq!(fit.iterations, 5);
    assert_eq!(fit.history.len(), 5);
    let last: Tensor<B, 2> = fit.history[4].clone();
    for (x, y) in to_host(last).iter().zip(to_host(fit.aligned)) {
        assert!((x - y).abs() < 1e-9);
    }
}
