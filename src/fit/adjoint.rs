//! Adjoint sensitivity pass for the trajectory-matching loss.

use crate::error::{FitError, FitResult};
use crate::math::ode::{rk4_step_ws, Rk4Workspace};
use crate::model::net;
use crate::model::qsir::{QsirModel, QsirParams, IDX_I, IDX_Q, IDX_R, IDX_S, N_ODE_PARAMS, N_STATE, N_THETA};

const N_AUG: usize = 2 * N_STATE + N_THETA;

/// Fixed RK4 substeps per unit of observation time in the backward sweep.
const SUBSTEPS_PER_UNIT: f64 = 8.0;

/// Summed squared error between predicted (I, R) and the observed
/// infected / removed series on the grid.
pub fn trajectory_loss(traj: &[Vec<f64>], obs_infected: &[f64], obs_removed: &[f64]) -> f64 {
    let mut loss = 0.0;
    for (k, y) in traj.iter().enumerate() {
        let di = y[IDX_I] - obs_infected[k];
        let dr = y[IDX_R] - obs_removed[k];
        loss += di * di + dr * dr;
    }
    loss
}

/// Loss and its gradient w.r.t. the full parameter vector theta =
/// (beta, gamma, delta, net weights), via the augmented system
/// [y, lambda, g] integrated backward in time:
///
///   dlambda/dt = -lambda^T df/dy         dg/dt = -lambda^T df/dtheta
///
/// with lambda jumps of dl_k/dy at each observation time. `traj` is the
/// forward solution on `grid` under the same `theta`; it doubles as the
/// checkpoint store, with y reset to the stored value at each segment
/// boundary so the sweep never keeps internal solver steps.
pub fn loss_and_grad(
    model: &QsirModel,
    theta: &[f64],
    grid: &[f64],
    traj: &[Vec<f64>],
    obs_infected: &[f64],
    obs_removed: &[f64],
) -> FitResult<(f64, Vec<f64>)> {
    debug_assert_eq!(theta.len(), N_THETA);
    debug_assert_eq!(traj.len(), grid.len());

    let loss = trajectory_loss(traj, obs_infected, obs_removed);

    let k_last = grid.len() - 1;
    let mut z = vec![0.0; N_AUG];
    z[..N_STATE].copy_from_slice(&traj[k_last]);
    z[N_STATE + IDX_I] = 2.0 * (traj[k_last][IDX_I] - obs_infected[k_last]);
    z[N_STATE + IDX_R] = 2.0 * (traj[k_last][IDX_R] - obs_removed[k_last]);

    let mut ws = Rk4Workspace::new(N_AUG);
    let mut vjp_y = [0.0; N_STATE];
    let mut fy = [0.0; N_STATE];

    for k in (1..=k_last).rev() {
        let t_hi = grid[k];
        let dt_seg = t_hi - grid[k - 1];
        let n_sub = ((dt_seg * SUBSTEPS_PER_UNIT).ceil() as usize).max(4);
        let h = dt_seg / n_sub as f64;

        // Reset y to the forward checkpoint before sweeping the segment.
        z[..N_STATE].copy_from_slice(&traj[k]);

        let mut tau = 0.0;
        for _ in 0..n_sub {
            rk4_step_ws(&mut z, tau, h, &mut ws, |tau, z, dz| {
                let t = t_hi - tau;
                let (y, rest) = z.split_at(N_STATE);
                let lam = &rest[..N_STATE];

                model.rhs(t, y, theta, &mut fy);
                let (dy, drest) = dz.split_at_mut(N_STATE);
                let (dlam, dg) = drest.split_at_mut(N_STATE);
                for i in 0..N_STATE {
                    dy[i] = -fy[i];
                }
                // Reversed time flips the sign of the adjoint dynamics and
                // turns the gradient quadrature into a plain accumulation.
                rhs_vjp(model, theta, y, lam, &mut vjp_y, dg);
                dlam.copy_from_slice(&vjp_y);
            });
            tau += h;
        }

        if z[N_STATE..].iter().any(|v| !v.is_finite()) {
            return Err(FitError::IntegrationDivergence {
                t: grid[k - 1],
                message: "non-finite adjoint state in backward pass".to_string(),
            });
        }

        // Loss jump at the interior observation time. The k = 0 term has no
        // gradient through the fixed initial condition, so no jump there.
        if k > 1 {
            z[N_STATE + IDX_I] += 2.0 * (traj[k - 1][IDX_I] - obs_infected[k - 1]);
            z[N_STATE + IDX_R] += 2.0 * (traj[k - 1][IDX_R] - obs_removed[k - 1]);
        }
    }

    Ok((loss, z[2 * N_STATE..].to_vec()))
}

/// Writes `lam^T df/dy` into `vjp_y` and `lam^T df/dtheta` into
/// `vjp_theta` (overwritten, not accumulated). All partials are analytic;
/// the network contribution enters through [`net::vjp`].
fn rhs_vjp(
    model: &QsirModel,
    theta: &[f64],
    y: &[f64],
    lam: &[f64],
    vjp_y: &mut [f64; N_STATE],
    vjp_theta: &mut [f64],
) {
    let p = QsirParams::from_theta(theta);
    let weights = &theta[N_ODE_PARAMS..];
    let n = model.n;

    let s = y[IDX_S].clamp(0.0, n);
    let i = y[IDX_I].clamp(0.0, n);
    let q = y[IDX_Q];

    let x = model.net_input(y);
    let q_t = net::forward(weights, &x);

    let (a, b, c, d) = (lam[IDX_S], lam[IDX_I], lam[IDX_R], lam[IDX_Q]);

    // Q_t multiplies I in both dI/dt (-) and dQ/dt (+).
    let upstream_q = (d - b) * i;

    vjp_theta.fill(0.0);
    let mut grad_x = [0.0; net::N_IN];
    net::vjp(weights, &x, upstream_q, &mut grad_x, &mut vjp_theta[N_ODE_PARAMS..]);

    // Net inputs are (S, I, R)/N, so each input gradient carries 1/N.
    vjp_y[IDX_S] = (b - a) * p.beta * i / n + grad_x[0] / n;
    vjp_y[IDX_I] =
        (b - a) * p.beta * s / n + (c - b) * p.gamma + (d - b) * q_t + grad_x[1] / n;
    vjp_y[IDX_R] = grad_x[2] / n;
    vjp_y[IDX_Q] = -d * p.delta;

    vjp_theta[0] = (b - a) * s * i / n;
    vjp_theta[1] = (c - b) * i;
    vjp_theta[2] = -d * q;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::ode::OdeOptions;
    use crate::model::qsir::RegionConfig;

    fn cfg(seed: u64) -> RegionConfig {
        RegionConfig {
            name: "adjoint-test".into(),
            population: 1_000.0,
            s0: 950.0,
            i0: 50.0,
            r0: 0.0,
            q0: 0.0,
            beta0: 0.4,
            gamma0: 0.15,
            delta0: 0.05,
            iters: 1,
            learning_rate: 0.01,
            seed,
        }
    }

    #[test]
    fn adjoint_gradient_matches_finite_differences() {
        let c = cfg(5);
        let model = QsirModel::new(c.population).unwrap();
        let grid: Vec<f64> = (0..=6).map(f64::from).collect();
        let opts = OdeOptions { rtol: 1e-9, atol: 1e-10, ..OdeOptions::default() };

        // Targets from a perturbed parameter set, so the loss is nonzero.
        let mut theta_true = cfg(9).initial_theta();
        theta_true[0] = 0.5;
        let target = model.simulate(&theta_true, &c.u0(), &grid, &opts).unwrap();
        let obs_i: Vec<f64> = target.iter().map(|y| y[IDX_I]).collect();
        let obs_r: Vec<f64> = target.iter().map(|y| y[IDX_R]).collect();

        let theta = c.initial_theta();
        let traj = model.simulate(&theta, &c.u0(), &grid, &opts).unwrap();
        let (loss, grad) = loss_and_grad(&model, &theta, &grid, &traj, &obs_i, &obs_r).unwrap();
        assert!(loss.is_finite() && loss > 0.0);

        let loss_at = |theta: &[f64]| -> f64 {
            let traj = model.simulate(theta, &c.u0(), &grid, &opts).unwrap();
            trajectory_loss(&traj, &obs_i, &obs_r)
        };

        // Spot-check the ODE parameters and a spread of net weights. The
        // tolerance leaves room for the fixed-step backward discretization
        // and the adaptive forward solver's step-acceptance jitter.
        for &idx in &[0usize, 1, 2, 3, 12, 33, 45, 53] {
            let eps = 1e-4;
            let mut tp = theta.clone();
            let mut tm = theta.clone();
            tp[idx] += eps;
            tm[idx] -= eps;
            let fd = (loss_at(&tp) - loss_at(&tm)) / (2.0 * eps);
            let tol = 3e-2 * fd.abs().max(grad[idx].abs()) + 1.0;
            assert!(
                (fd - grad[idx]).abs() < tol,
                "theta[{idx}]: fd={fd:.6e} adjoint={:.6e}",
                grad[idx]
            );
        }
    }

    #[test]
    fn non_finite_trajectory_surfaces_as_divergence() {
        let c = cfg(5);
        let model = QsirModel::new(c.population).unwrap();
        let grid: Vec<f64> = (0..=6).map(f64::from).collect();
        let opts = OdeOptions::default();

        let theta = c.initial_theta();
        let mut traj = model.simulate(&theta, &c.u0(), &grid, &opts).unwrap();
        let obs_i: Vec<f64> = traj.iter().map(|y| y[IDX_I]).collect();
        let obs_r: Vec<f64> = traj.iter().map(|y| y[IDX_R]).collect();

        // A poisoned checkpoint makes the terminal lambda jump NaN; the
        // backward sweep must report it instead of returning a NaN gradient.
        let last = traj.len() - 1;
        traj[last][IDX_I] = f64::NAN;
        let err = loss_and_grad(&model, &theta, &grid, &traj, &obs_i, &obs_r).unwrap_err();
        assert!(matches!(err, FitError::IntegrationDivergence { .. }));
    }

    #[test]
    fn perfect_fit_has_small_gradient_on_ode_params() {
        let c = cfg(5);
        let model = QsirModel::new(c.population).unwrap();
        let grid: Vec<f64> = (0..=6).map(f64::from).collect();
        let opts = OdeOptions::default();

        let theta = c.initial_theta();
        let traj = model.simulate(&theta, &c.u0(), &grid, &opts).unwrap();
        let obs_i: Vec<f64> = traj.iter().map(|y| y[IDX_I]).collect();
        let obs_r: Vec<f64> = traj.iter().map(|y| y[IDX_R]).collect();

        let (loss, grad) = loss_and_grad(&model, &theta, &grid, &traj, &obs_i, &obs_r).unwrap();
        assert!(loss.abs() < 1e-18);
        assert!(grad.iter().all(|g| g.abs() < 1e-6), "gradient not ~0 at the optimum");
    }
}
