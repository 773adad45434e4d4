//! Fail-fast behaviour on malformed input and divergence, plus solver
//! determinism.

use std::io::Write;

use qsir::math::ode::OdeOptions;
use qsir::model::qsir::{QsirModel, RegionConfig};
use qsir::{fit_region, FitError, Observations};

fn small_cfg(iters: usize) -> RegionConfig {
    RegionConfig {
        name: "validation".into(),
        population: 10_000.0,
        s0: 9_950.0,
        i0: 50.0,
        r0: 0.0,
        q0: 0.0,
        beta0: 0.5,
        gamma0: 0.1,
        delta0: 0.05,
        iters,
        learning_rate: 0.01,
        seed: 11,
    }
}

fn small_obs() -> Observations {
    let days: Vec<f64> = (0..10).map(f64::from).collect();
    let infected: Vec<f64> = (0..10).map(|k| 50.0 + 10.0 * k as f64).collect();
    let recovered: Vec<f64> = (0..10).map(|k| 2.0 * k as f64).collect();
    let dead = vec![0.0; 10];
    Observations::new(days, infected, recovered, dead).unwrap()
}

#[test]
fn mismatched_array_lengths_fail_before_any_solve() {
    let err = Observations::new(
        vec![0.0, 1.0, 2.0, 3.0],
        vec![50.0, 60.0, 75.0, 95.0],
        vec![0.0, 2.0, 5.0],
        vec![0.0; 4],
    )
    .unwrap_err();
    assert!(matches!(err, FitError::DataShape { .. }), "got {err:?}");
}

#[test]
fn malformed_csv_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.csv");
    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(f, "day,infected,recovered,dead").unwrap();
    writeln!(f, "0,50.0,0.0,0.0").unwrap();
    writeln!(f, "1,not-a-number,0.0,0.0").unwrap();
    drop(f);

    let err = Observations::from_csv(path.to_str().unwrap()).unwrap_err();
    assert!(matches!(err, FitError::Read(_)), "got {err:?}");
}

#[test]
fn nan_initial_state_diverges_on_first_forward_solve() {
    let cfg = small_cfg(1);
    let model = QsirModel::new(cfg.population).unwrap();
    let theta = cfg.initial_theta();
    let grid: Vec<f64> = (0..10).map(f64::from).collect();
    let u0 = [f64::NAN, 50.0, 0.0, 0.0];

    let err = model.simulate(&theta, &u0, &grid, &OdeOptions::default()).unwrap_err();
    assert!(matches!(err, FitError::IntegrationDivergence { .. }), "got {err:?}");
}

#[test]
fn nan_in_config_initial_state_is_rejected_up_front() {
    let mut cfg = small_cfg(1);
    cfg.s0 = f64::NAN;
    let err = fit_region(&cfg, &small_obs()).unwrap_err();
    assert!(matches!(err, FitError::Config { .. }), "got {err:?}");
}

#[test]
fn repeated_fits_are_deterministic() {
    let cfg = small_cfg(20);
    let obs = small_obs();

    let a = fit_region(&cfg, &obs).unwrap();
    let b = fit_region(&cfg, &obs).unwrap();

    assert_eq!(a.params, b.params);
    assert_eq!(a.weights, b.weights);
    assert_eq!(a.trajectory, b.trajectory);
    assert_eq!(a.loss_history, b.loss_history);
}
