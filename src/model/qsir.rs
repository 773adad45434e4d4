use serde::{Deserialize, Serialize};

use crate::error::{FitError, FitResult};
use crate::math::ode::{rk45_grid, OdeOptions};
use crate::model::net;

/// State layout: S | I | R | Q.
pub const N_STATE: usize = 4;
pub const IDX_S: usize = 0;
pub const IDX_I: usize = 1;
pub const IDX_R: usize = 2;
pub const IDX_Q: usize = 3;

/// Number of scalar ODE parameters (beta, gamma, delta).
pub const N_ODE_PARAMS: usize = 3;

/// Full trainable parameter vector: beta | gamma | delta | net weights.
pub const N_THETA: usize = N_ODE_PARAMS + net::N_WEIGHTS;

/// Compartmental rates learned alongside the quarantine network.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QsirParams {
    /// Transmission rate (per day).
    pub beta: f64,
    /// Recovery rate (per day).
    pub gamma: f64,
    /// Quarantine-exit rate (per day).
    pub delta: f64,
}

impl QsirParams {
    pub fn from_theta(theta: &[f64]) -> Self {
        Self { beta: theta[0], gamma: theta[1], delta: theta[2] }
    }
}

/// Per-region configuration for one fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionConfig {
    pub name: String,

    /// Fixed population size N.
    pub population: f64,

    // Initial compartments
    pub s0: f64,
    pub i0: f64,
    pub r0: f64,
    #[serde(default)]
    pub q0: f64,

    // Initial parameter guess
    pub beta0: f64,
    pub gamma0: f64,
    pub delta0: f64,

    /// Training iteration budget; the fit runs this many steps, no early exit.
    #[serde(default = "default_iters")]
    pub iters: usize,

    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,

    /// Seed for the network weight initialization.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_iters() -> usize {
    30_000
}

fn default_learning_rate() -> f64 {
    0.01
}

fn default_seed() -> u64 {
    1
}

impl RegionConfig {
    pub fn check(&self) -> FitResult<()> {
        let ensure = |ok: bool, msg: &str| -> FitResult<()> {
            if ok { Ok(()) } else { Err(FitError::config(format!("{}: {msg}", self.name))) }
        };
        ensure(self.population.is_finite() && self.population > 0.0, "population must be > 0")?;
        for (v, name) in [
            (self.s0, "s0"),
            (self.i0, "i0"),
            (self.r0, "r0"),
            (self.q0, "q0"),
            (self.beta0, "beta0"),
            (self.gamma0, "gamma0"),
            (self.delta0, "delta0"),
        ] {
            ensure(v.is_finite() && v >= 0.0, &format!("{name} must be finite and >= 0"))?;
        }
        ensure(
            self.s0 <= self.population && self.i0 <= self.population,
            "s0/i0 must not exceed population",
        )?;
        ensure(self.iters >= 1, "iters must be >= 1")?;
        ensure(
            self.learning_rate.is_finite() && self.learning_rate > 0.0,
            "learning_rate must be > 0",
        )?;
        Ok(())
    }

    pub fn u0(&self) -> [f64; N_STATE] {
        [self.s0, self.i0, self.r0, self.q0]
    }

    pub fn initial_theta(&self) -> Vec<f64> {
        let mut theta = Vec::with_capacity(N_THETA);
        theta.extend_from_slice(&[self.beta0, self.gamma0, self.delta0]);
        theta.extend(net::init_weights(self.seed));
        theta
    }
}

/// The four-compartment QSIR dynamics for one region.
pub struct QsirModel {
    /// Fixed population size.
    pub n: f64,
}

impl QsirModel {
    pub fn new(n: f64) -> FitResult<Self> {
        if !(n.is_finite() && n > 0.0) {
            return Err(FitError::config("population must be finite and > 0"));
        }
        Ok(Self { n })
    }

    /// Network input: instantaneous (S, I, R) scaled by 1/N so activations
    /// stay O(1) regardless of region size.
    pub fn net_input(&self, y: &[f64]) -> [f64; net::N_IN] {
        [
            y[IDX_S].clamp(0.0, self.n) / self.n,
            y[IDX_I].clamp(0.0, self.n) / self.n,
            y[IDX_R] / self.n,
        ]
    }

    /// Quarantine strength at the given state under the given net weights.
    pub fn quarantine_at(&self, weights: &[f64], y: &[f64]) -> f64 {
        net::forward(weights, &self.net_input(y))
    }

    /// Instantaneous derivative given an externally supplied quarantine
    /// strength. S and I are clamped to [0, N] before entering any product,
    /// so numerical overshoot cannot feed negative mass into later
    /// compartments.
    pub fn deriv(&self, _t: f64, y: &[f64], q_t: f64, p: &QsirParams, dy: &mut [f64]) {
        let s = y[IDX_S].clamp(0.0, self.n);
        let i = y[IDX_I].clamp(0.0, self.n);
        let infection = p.beta * s * i / self.n;

        dy[IDX_S] = -infection;
        dy[IDX_I] = infection - p.gamma * i - q_t * i;
        dy[IDX_R] = p.gamma * i;
        dy[IDX_Q] = q_t * i - p.delta * y[IDX_Q];
    }

    /// Derivative under the full parameter vector theta, with Q_t supplied
    /// by the network. This is the right-hand side the solvers see.
    pub fn rhs(&self, t: f64, y: &[f64], theta: &[f64], dy: &mut [f64]) {
        let p = QsirParams::from_theta(theta);
        let q_t = self.quarantine_at(&theta[N_ODE_PARAMS..], y);
        self.deriv(t, y, q_t, &p, dy);
    }

    /// Forward solve over the observation grid: one state per grid point.
    pub fn simulate(
        &self,
        theta: &[f64],
        u0: &[f64; N_STATE],
        grid: &[f64],
        opts: &OdeOptions,
    ) -> FitResult<Vec<Vec<f64>>> {
        rk45_grid(u0, grid, opts, |t, y, dy| self.rhs(t, y, theta, dy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> QsirParams {
        QsirParams { beta: 0.5, gamma: 0.1, delta: 0.05 }
    }

    fn small_cfg() -> RegionConfig {
        RegionConfig {
            name: "test".into(),
            population: 10_000.0,
            s0: 9_950.0,
            i0: 50.0,
            r0: 0.0,
            q0: 0.0,
            beta0: 0.5,
            gamma0: 0.1,
            delta0: 0.05,
            iters: 100,
            learning_rate: 0.01,
            seed: 3,
        }
    }

    #[test]
    fn derivative_is_finite_and_susceptibles_never_increase() {
        let model = QsirModel::new(10_000.0).unwrap();
        let mut dy = [0.0; N_STATE];
        for y in [
            [9_000.0, 800.0, 150.0, 50.0],
            [10_000.0, 0.0, 0.0, 0.0],
            [0.0, 10_000.0, 0.0, 0.0],
            [5_000.0, 2_000.0, 2_000.0, 1_000.0],
        ] {
            model.deriv(0.0, &y, 0.3, &params(), &mut dy);
            assert!(dy.iter().all(|v| v.is_finite()), "non-finite derivative for {y:?}");
            assert!(dy[IDX_S] <= 0.0, "dS/dt must be <= 0, got {}", dy[IDX_S]);
        }
    }

    #[test]
    fn overshoot_is_clamped_out_of_products() {
        let model = QsirModel::new(1_000.0).unwrap();
        let mut dy = [0.0; N_STATE];
        // Negative S from overshoot: the infection term must vanish rather
        // than produce a positive dS/dt.
        model.deriv(0.0, &[-5.0, 100.0, 0.0, 0.0], 0.3, &params(), &mut dy);
        assert_eq!(dy[IDX_S], 0.0);
        assert!(dy[IDX_R] > 0.0);
    }

    #[test]
    fn config_check_rejects_bad_values() {
        let mut cfg = small_cfg();
        assert!(cfg.check().is_ok());

        cfg.population = 0.0;
        assert!(matches!(cfg.check(), Err(FitError::Config { .. })));

        cfg = small_cfg();
        cfg.beta0 = -0.1;
        assert!(matches!(cfg.check(), Err(FitError::Config { .. })));

        cfg = small_cfg();
        cfg.learning_rate = 0.0;
        assert!(matches!(cfg.check(), Err(FitError::Config { .. })));
    }

    #[test]
    fn simulate_returns_one_state_per_grid_point() {
        let cfg = small_cfg();
        let model = QsirModel::new(cfg.population).unwrap();
        let theta = cfg.initial_theta();
        let grid: Vec<f64> = (0..=20).map(f64::from).collect();
        let traj = model.simulate(&theta, &cfg.u0(), &grid, &OdeOptions::default()).unwrap();
        assert_eq!(traj.len(), grid.len());
        assert!(traj.iter().flatten().all(|v| v.is_finite()));
    }
}
