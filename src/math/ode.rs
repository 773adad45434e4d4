use crate::error::{FitError, FitResult};

/// Workspace for allocation-free RK4 steps.
pub struct Rk4Workspace {
    pub k1: Vec<f64>,
    pub k2: Vec<f64>,
    pub k3: Vec<f64>,
    pub k4: Vec<f64>,
    pub ytmp: Vec<f64>,
}

impl Rk4Workspace {
    pub fn new(n: usize) -> Self {
        Self {
            k1: vec![0.0; n],
            k2: vec![0.0; n],
            k3: vec![0.0; n],
            k4: vec![0.0; n],
            ytmp: vec![0.0; n],
        }
    }

    pub fn resize(&mut self, n: usize) {
        if self.k1.len() != n {
            self.k1.resize(n, 0.0);
            self.k2.resize(n, 0.0);
            self.k3.resize(n, 0.0);
            self.k4.resize(n, 0.0);
            self.ytmp.resize(n, 0.0);
        }
    }
}

/// Fixed-step RK4 using a preallocated workspace to avoid allocations per step.
///
/// Used for the backward adjoint segments, where the integration interval is
/// one observation step and the state is reset to a checkpoint afterwards.
pub fn rk4_step_ws<F>(y: &mut [f64], t: f64, dt: f64, ws: &mut Rk4Workspace, mut f: F)
where
    F: FnMut(f64, &[f64], &mut [f64]),
{
    let n = y.len();
    ws.resize(n);

    let (k1, k2, k3, k4, ytmp) = (&mut ws.k1, &mut ws.k2, &mut ws.k3, &mut ws.k4, &mut ws.ytmp);

    f(t, y, k1);

    for i in 0..n {
        ytmp[i] = y[i] + 0.5 * dt * k1[i];
    }
    f(t + 0.5 * dt, ytmp, k2);

    for i in 0..n {
        ytmp[i] = y[i] + 0.5 * dt * k2[i];
    }
    f(t + 0.5 * dt, ytmp, k3);

    for i in 0..n {
        ytmp[i] = y[i] + dt * k3[i];
    }
    f(t + dt, ytmp, k4);

    for i in 0..n {
        y[i] += (dt / 6.0) * (k1[i] + 2.0 * k2[i] + 2.0 * k3[i] + k4[i]);
    }
}

/// Configuration for the adaptive forward solver.
#[derive(Debug, Clone)]
pub struct OdeOptions {
    /// Relative tolerance.
    pub rtol: f64,
    /// Absolute tolerance.
    pub atol: f64,
    /// Initial step size; 0.0 picks one from the grid spacing.
    pub h0: f64,
    /// Minimum step size before the solver gives up.
    pub h_min: f64,
    /// Maximum number of internal steps over the whole grid.
    pub max_steps: usize,
}

impl Default for OdeOptions {
    fn default() -> Self {
        Self { rtol: 1e-6, atol: 1e-8, h0: 0.0, h_min: 1e-12, max_steps: 500_000 }
    }
}

/// Integrate `dy/dt = f(t, y)` over a strictly increasing output grid with
/// the Dormand-Prince 4(5) embedded pair and PI step-size control.
///
/// Returns exactly one state per grid point, the first being `y0` at
/// `grid[0]`. Internal steps are clamped so each grid point is hit
/// exactly; no interpolation is involved.
///
/// Any non-finite state, including a non-finite `y0`, and step starvation
/// surface as [`FitError::IntegrationDivergence`].
pub fn rk45_grid<F>(y0: &[f64], grid: &[f64], opts: &OdeOptions, mut f: F) -> FitResult<Vec<Vec<f64>>>
where
    F: FnMut(f64, &[f64], &mut [f64]),
{
    let n = y0.len();
    if let Some(bad) = y0.iter().position(|v| !v.is_finite()) {
        return Err(FitError::IntegrationDivergence {
            t: grid.first().copied().unwrap_or(0.0),
            message: format!("non-finite initial state at component {bad}"),
        });
    }
    if grid.len() < 2 || grid.windows(2).any(|w| w[1] <= w[0]) {
        return Err(FitError::data_shape("output grid must be strictly increasing with >= 2 points"));
    }

    // Dormand-Prince tableau.
    const A21: f64 = 1.0 / 5.0;
    const A31: f64 = 3.0 / 40.0;
    const A32: f64 = 9.0 / 40.0;
    const A41: f64 = 44.0 / 45.0;
    const A42: f64 = -56.0 / 15.0;
    const A43: f64 = 32.0 / 9.0;
    const A51: f64 = 19372.0 / 6561.0;
    const A52: f64 = -25360.0 / 2187.0;
    const A53: f64 = 64448.0 / 6561.0;
    const A54: f64 = -212.0 / 729.0;
    const A61: f64 = 9017.0 / 3168.0;
    const A62: f64 = -355.0 / 33.0;
    const A63: f64 = 46732.0 / 5247.0;
    const A64: f64 = 49.0 / 176.0;
    const A65: f64 = -5103.0 / 18656.0;

    // 5th-order weights (advancing solution, local extrapolation).
    const B1: f64 = 35.0 / 384.0;
    const B3: f64 = 500.0 / 1113.0;
    const B4: f64 = 125.0 / 192.0;
    const B5: f64 = -2187.0 / 6784.0;
    const B6: f64 = 11.0 / 84.0;

    // 4th-order weights, for the embedded error estimate.
    const BE1: f64 = 5179.0 / 57600.0;
    const BE3: f64 = 7571.0 / 16695.0;
    const BE4: f64 = 393.0 / 640.0;
    const BE5: f64 = -92097.0 / 339200.0;
    const BE6: f64 = 187.0 / 2100.0;
    const BE7: f64 = 1.0 / 40.0;

    const E1: f64 = B1 - BE1;
    const E3: f64 = B3 - BE3;
    const E4: f64 = B4 - BE4;
    const E5: f64 = B5 - BE5;
    const E6: f64 = B6 - BE6;
    const E7: f64 = -BE7;

    let mut out: Vec<Vec<f64>> = Vec::with_capacity(grid.len());
    out.push(y0.to_vec());

    let mut t = grid[0];
    let mut y = y0.to_vec();
    let span = grid[grid.len() - 1] - grid[0];
    let mut h = if opts.h0 > 0.0 { opts.h0 } else { (grid[1] - grid[0]) * 0.1 };
    h = h.min(span).max(opts.h_min);

    let mut k1 = vec![0.0; n];
    let mut k2 = vec![0.0; n];
    let mut k3 = vec![0.0; n];
    let mut k4 = vec![0.0; n];
    let mut k5 = vec![0.0; n];
    let mut k6 = vec![0.0; n];
    let mut k7 = vec![0.0; n];
    let mut y_tmp = vec![0.0; n];
    let mut y_new = vec![0.0; n];

    f(t, &y, &mut k1);

    let mut steps = 0usize;
    for &t_next in &grid[1..] {
        while t < t_next - 1e-12 {
            steps += 1;
            if steps > opts.max_steps {
                return Err(FitError::IntegrationDivergence {
                    t,
                    message: format!("exceeded max_steps={} before t={t_next}", opts.max_steps),
                });
            }
            // Land exactly on the next requested output time.
            let h_try = h.min(t_next - t);

            for i in 0..n {
                y_tmp[i] = y[i] + h_try * A21 * k1[i];
            }
            f(t + h_try / 5.0, &y_tmp, &mut k2);

            for i in 0..n {
                y_tmp[i] = y[i] + h_try * (A31 * k1[i] + A32 * k2[i]);
            }
            f(t + 3.0 * h_try / 10.0, &y_tmp, &mut k3);

            for i in 0..n {
                y_tmp[i] = y[i] + h_try * (A41 * k1[i] + A42 * k2[i] + A43 * k3[i]);
            }
            f(t + 4.0 * h_try / 5.0, &y_tmp, &mut k4);

            for i in 0..n {
                y_tmp[i] =
                    y[i] + h_try * (A51 * k1[i] + A52 * k2[i] + A53 * k3[i] + A54 * k4[i]);
            }
            f(t + 8.0 * h_try / 9.0, &y_tmp, &mut k5);

            for i in 0..n {
                y_tmp[i] = y[i]
                    + h_try * (A61 * k1[i] + A62 * k2[i] + A63 * k3[i] + A64 * k4[i] + A65 * k5[i]);
            }
            f(t + h_try, &y_tmp, &mut k6);

            for i in 0..n {
                y_new[i] = y[i]
                    + h_try * (B1 * k1[i] + B3 * k3[i] + B4 * k4[i] + B5 * k5[i] + B6 * k6[i]);
            }

            // FSAL stage, reused as k1 on acceptance.
            f(t + h_try, &y_new, &mut k7);

            let mut err_norm = 0.0;
            for i in 0..n {
                let ei = h_try
                    * (E1 * k1[i] + E3 * k3[i] + E4 * k4[i] + E5 * k5[i] + E6 * k6[i] + E7 * k7[i]);
                let sc = opts.atol + opts.rtol * y[i].abs().max(y_new[i].abs());
                err_norm += (ei / sc) * (ei / sc);
            }
            err_norm = (err_norm / n as f64).sqrt();

            if !err_norm.is_finite() {
                return Err(FitError::IntegrationDivergence {
                    t,
                    message: "non-finite error estimate".to_string(),
                });
            }

            if err_norm <= 1.0 {
                t += h_try;
                y.copy_from_slice(&y_new);
                k1.copy_from_slice(&k7);
                if let Some(bad) = y.iter().position(|v| !v.is_finite()) {
                    return Err(FitError::IntegrationDivergence {
                        t,
                        message: format!("non-finite state at component {bad}"),
                    });
                }
            }

            let factor = if err_norm == 0.0 {
                5.0
            } else {
                (0.9 * err_norm.powf(-0.2)).clamp(0.2, 5.0)
            };
            h = (h_try * factor).max(opts.h_min);
        }
        t = t_next;
        out.push(y.clone());
    }

    Ok(out)
}
