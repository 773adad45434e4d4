//! Fixed-budget training loop: forward solve, adjoint sweep, Adam step.

use tracing::info;

use crate::error::{FitError, FitResult};
use crate::fit::adjoint;
use crate::io::observations::Observations;
use crate::math::ode::OdeOptions;
use crate::model::qsir::{QsirModel, QsirParams, RegionConfig, N_ODE_PARAMS, N_THETA};

/// First-order adaptive-moment optimizer with a fixed learning rate.
///
/// m = b1*m + (1-b1)*g, v = b2*v + (1-b2)*g^2,
/// theta -= lr * m_hat / (sqrt(v_hat) + eps).
pub struct Adam {
    lr: f64,
    beta1: f64,
    beta2: f64,
    eps: f64,
    m: Vec<f64>,
    v: Vec<f64>,
    t: i32,
}

impl Adam {
    pub fn new(n: usize, lr: f64) -> Self {
        Self { lr, beta1: 0.9, beta2: 0.999, eps: 1e-8, m: vec![0.0; n], v: vec![0.0; n], t: 0 }
    }

    pub fn step(&mut self, theta: &mut [f64], grad: &[f64]) {
        self.t += 1;
        let bc1 = 1.0 - self.beta1.powi(self.t);
        let bc2 = 1.0 - self.beta2.powi(self.t);
        for i in 0..theta.len() {
            self.m[i] = self.beta1 * self.m[i] + (1.0 - self.beta1) * grad[i];
            self.v[i] = self.beta2 * self.v[i] + (1.0 - self.beta2) * grad[i] * grad[i];
            let m_hat = self.m[i] / bc1;
            let v_hat = self.v[i] / bc2;
            theta[i] -= self.lr * m_hat / (v_hat.sqrt() + self.eps);
        }
    }
}

/// Everything the result store and metrics need from one converged fit.
#[derive(Debug, Clone)]
pub struct FitOutcome {
    pub params: QsirParams,
    pub weights: Vec<f64>,
    /// Observation time grid (day offsets).
    pub times: Vec<f64>,
    /// One (S, I, R, Q) state per grid point under the final parameters.
    pub trajectory: Vec<Vec<f64>>,
    /// Learned Q(t) evaluated along the final trajectory.
    pub quarantine: Vec<f64>,
    pub loss_history: Vec<f64>,
}

impl FitOutcome {
    pub fn final_loss(&self) -> f64 {
        self.loss_history.last().copied().unwrap_or(f64::NAN)
    }
}

/// Fit one region: validates inputs, then runs the full iteration budget.
/// The iteration count is the only stopping criterion; there is no
/// convergence tolerance and no learning-rate schedule.
///
/// A non-finite loss or gradient at any iteration aborts with
/// [`FitError::OptimizationDivergence`]; the operator must supply a
/// different initial guess and rerun.
pub fn fit_region(cfg: &RegionConfig, obs: &Observations) -> FitResult<FitOutcome> {
    cfg.check()?;
    obs.validate()?;

    let model = QsirModel::new(cfg.population)?;
    let grid = obs.times();
    let obs_infected = obs.infected.clone();
    let obs_removed = obs.removed();
    let u0 = cfg.u0();
    let opts = OdeOptions::default();

    let mut theta = cfg.initial_theta();
    let mut adam = Adam::new(N_THETA, cfg.learning_rate);
    let mut loss_history = Vec::with_capacity(cfg.iters);

    let log_every = (cfg.iters / 20).max(1);

    for iter in 0..cfg.iters {
        let traj = model.simulate(&theta, &u0, &grid, &opts)?;
        let (loss, grad) =
            adjoint::loss_and_grad(&model, &theta, &grid, &traj, &obs_infected, &obs_removed)?;

        if !loss.is_finite() {
            return Err(FitError::OptimizationDivergence {
                iteration: iter,
                message: "non-finite loss".to_string(),
            });
        }
        if grad.iter().any(|g| !g.is_finite()) {
            return Err(FitError::OptimizationDivergence {
                iteration: iter,
                message: "non-finite gradient".to_string(),
            });
        }

        adam.step(&mut theta, &grad);
        // Rates are non-negative by definition; project back after the step.
        for v in &mut theta[..N_ODE_PARAMS] {
            *v = v.max(0.0);
        }

        loss_history.push(loss);
        if iter % log_every == 0 {
            info!(region = %cfg.name, iter, loss, "fit progress");
        }
    }

    // One more forward pass under the final parameters.
    let trajectory = model.simulate(&theta, &u0, &grid, &opts)?;
    let weights = theta[N_ODE_PARAMS..].to_vec();
    let quarantine: Vec<f64> =
        trajectory.iter().map(|y| model.quarantine_at(&weights, y)).collect();

    info!(
        region = %cfg.name,
        final_loss = loss_history.last().copied().unwrap_or(f64::NAN),
        "fit finished"
    );

    Ok(FitOutcome {
        params: QsirParams::from_theta(&theta),
        weights,
        times: grid,
        trajectory,
        quarantine,
        loss_history,
    })
}
