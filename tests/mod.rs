use morpho::align::{gpa, superimpose, GpaOptions, Superimposition};
use morpho::data::{Dataset, DatasetSnapshot, LandmarkObject, VariableValue};
use morpho::error::Stage;
use morpho::pipeline::{
    run, AnalysisConfig, CancelToken, Monitor, ProgressEvent, RegressionSpec
};
use morpho::table::{cva_score_table, pca_score_table};
use nalgebra::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::sync::mpsc::channel;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn base_triangle() -> DMatrix<f64> {
    DMatrix::from_row_slice(3, 2, &[0.0, 0.0, 1.0, 0.0, 0.4, 0.9])
}

/// Applies a random rotation, translation and scale to a configuration.
fn rigid_jumble(shape : &DMatrix<f64>, rng : &mut StdRng) -> DMatrix<f64> {
    let theta : f64 = rng.gen_range(0.0, std::f64::consts::TAU);
    let scale : f64 = rng.gen_range(0.5, 3.0);
    let (tx, ty) = (rng.gen_range(-5.0, 5.0), rng.gen_range(-5.0, 5.0));
    let r = DMatrix::from_row_slice(2, 2, &[
        theta.cos(), theta.sin(),
        -theta.sin(), theta.cos()
    ]);
    let mut out = (shape * r) * scale;
    for mut row in out.row_iter_mut() {
        row[0] += tx;
        row[1] += ty;
    }
    out
}

fn noisy_shapes(n : usize, noise_sd : f64, seed : u64) -> Vec<DMatrix<f64>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, noise_sd).unwrap();
    (0..n).map(|_| {
        let mut shape = base_triangle();
        if noise_sd > 0.0 {
            for v in shape.iter_mut() {
                *v += normal.sample(&mut rng);
            }
        }
        rigid_jumble(&shape, &mut rng)
    }).collect()
}

fn snapshot_from(shapes : Vec<DMatrix<f64>>, groups : &[&str], sizes : &[f64]) -> DatasetSnapshot {
    let mut dataset = Dataset::new(1, "integration", 2);
    dataset.variable_names = vec![String::from("group"), String::from("size")];
    let objects = shapes.into_iter().enumerate().map(|(i, lms)| {
        let mut obj = LandmarkObject::new(i as i64 + 1, 1, format!("spec{}", i), lms);
        obj.sequence = i;
        obj.variables = vec![
            VariableValue::Categorical(groups[i].to_string()),
            VariableValue::Continuous(sizes[i])
        ];
        obj
    }).collect();
    DatasetSnapshot::from_dataset(&dataset, objects)
}

#[test]
fn identical_shapes_under_rigid_motion_converge_fast() {
    init_logging();
    let shapes = noisy_shapes(10, 0.0, 7);
    let ids : Vec<i64> = (0..10i64).collect();
    let out = superimpose(
        &shapes,
        &ids,
        Superimposition::Procrustes,
        &GpaOptions::default(),
        &[],
        &Monitor::silent()
    ).unwrap();
    assert!(out.converged);
    assert!(out.iterations < 10, "took {} iterations", out.iterations);
    for c in &out.coords {
        assert!((c - &out.coords[0]).norm() < 1e-6);
    }
}

#[test]
fn mismatched_landmark_counts_fail_before_alignment() {
    let mut shapes = noisy_shapes(4, 0.02, 11);
    shapes.push(DMatrix::from_row_slice(4, 2, &[
        0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0
    ]));
    let groups = ["a", "a", "b", "b", "b"];
    let sizes = [1.0, 2.0, 3.0, 4.0, 5.0];
    let snap = snapshot_from(shapes, &groups, &sizes);
    let err = run(&snap, &AnalysisConfig::default(), &Monitor::silent()).unwrap_err();
    assert_eq!(err.stage(), Stage::Validation);
    assert_eq!(err.objects(), &[5]);
}

#[test]
fn alignment_is_invariant_to_rigid_transforms_of_the_input() {
    let shapes = noisy_shapes(8, 0.03, 3);
    let mut rng = StdRng::seed_from_u64(99);
    let moved : Vec<DMatrix<f64>> = shapes.iter().map(|s| rigid_jumble(s, &mut rng) ).collect();
    let opts = GpaOptions { tolerance : 1e-12, ..GpaOptions::default() };
    let a = gpa(&shapes, &opts, &Monitor::silent()).unwrap();
    let b = gpa(&moved, &opts, &Monitor::silent()).unwrap();
    assert!((&a.mean_shape - &b.mean_shape).norm() < 1e-8);
    for (ca, cb) in a.coords.iter().zip(&b.coords) {
        assert!((ca - cb).norm() < 1e-8);
    }
}

#[test]
fn cancellation_is_a_clean_outcome() {
    let shapes = noisy_shapes(6, 0.02, 5);
    let groups = ["a", "b", "a", "b", "a", "b"];
    let sizes = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
    let snap = snapshot_from(shapes, &groups, &sizes);
    let token = CancelToken::new();
    token.cancel();
    let monitor = Monitor::new(Some(token), None);
    let outcome = run(&snap, &AnalysisConfig::default(), &monitor).unwrap();
    assert!(outcome.was_cancelled());
}

#[test]
fn progress_is_monotone_per_stage_and_reaches_completion() {
    let shapes = noisy_shapes(8, 0.02, 13);
    let groups = ["a", "a", "a", "a", "b", "b", "b", "b"];
    let sizes = [1.0, 1.5, 2.0, 2.5, 3.0, 3.5, 4.0, 4.5];
    let snap = snapshot_from(shapes, &groups, &sizes);
    let config = AnalysisConfig {
        grouping : Some(0),
        regression : Some(RegressionSpec { variable : 1, degree : 1 }),
        ..AnalysisConfig::default()
    };
    let (tx, rx) = channel();
    let monitor = Monitor::new(None, Some(tx));
    let outcome = run(&snap, &config, &monitor).unwrap();
    assert!(!outcome.was_cancelled());
    drop(monitor);

    let events : Vec<ProgressEvent> = rx.iter().collect();
    assert!(!events.is_empty());
    let mut last_per_stage : Vec<(Stage, u8)> = Vec::new();
    for event in &events {
        match last_per_stage.iter_mut().find(|(s, _)| *s == event.stage ) {
            Some((_, last)) => {
                assert!(event.percent >= *last, "{:?} went backwards", event.stage);
                *last = event.percent;
            },
            None => last_per_stage.push((event.stage, event.percent))
        }
    }
    // every stage that reported at all finished at 100
    for (stage, last) in &last_per_stage {
        assert_eq!(*last, 100, "{:?} stopped at {}", stage, last);
    }
    assert_eq!(events.last().unwrap().percent, 100);
}

#[test]
fn full_analysis_round_trips_through_json() {
    init_logging();
    let mut shapes = Vec::new();
    let mut rng = StdRng::seed_from_u64(21);
    let normal = Normal::new(0.0, 0.02).unwrap();
    for i in 0..12 {
        let mut shape = base_triangle();
        // two groups with distinct apex heights
        if i >= 6 {
            shape[(2, 1)] += 0.4;
        }
        for v in shape.iter_mut() {
            *v += normal.sample(&mut rng);
        }
        shapes.push(rigid_jumble(&shape, &mut rng));
    }
    let groups = ["a", "a", "a", "a", "a", "a", "b", "b", "b", "b", "b", "b"];
    let sizes : Vec<f64> = (0..12).map(|i| 1.0 + i as f64 * 0.25 ).collect();
    let snap = snapshot_from(shapes, &groups, &sizes);
    let config = AnalysisConfig {
        grouping : Some(0),
        regression : Some(RegressionSpec { variable : 1, degree : 1 }),
        ..AnalysisConfig::default()
    };
    let result = run(&snap, &config, &Monitor::silent()).unwrap().completed().unwrap();

    assert_eq!(result.object_ids.len(), 12);
    let pca = result.pca.as_ref().unwrap().ok().unwrap();
    assert!(pca.axis_count() >= 1);
    assert!(result.regression.as_ref().unwrap().ok().is_some());

    // score tables build from the result without further bookkeeping
    let names : Vec<String> = (0..12).map(|i| format!("spec{}", i) ).collect();
    let table = pca_score_table(pca, &names);
    assert_eq!(table.rows.len(), 12);
    if let Some(cva) = result.cva.as_ref().and_then(|o| o.ok() ) {
        let labels : Vec<String> = groups.iter().map(|g| g.to_string() ).collect();
        let cva_table = cva_score_table(cva, &names, &labels);
        assert_eq!(cva_table.rows.len(), 12);
        assert_eq!(cva_table.header[1], "Group");
    }

    let json = result.to_json().unwrap();
    let back = morpho::pipeline::AnalysisResult::from_json(&json).unwrap();
    assert_eq!(back.schema_version, result.schema_version);
    assert_eq!(back.object_ids, result.object_ids);
    assert!((back.alignment.mean_shape - &result.alignment.mean_shape).norm() < 1e-12);
}
