//! Quarantine-strength approximator, weights in one flat parameter slice.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const N_IN: usize = 3;
pub const N_HIDDEN: usize = 10;

/// Total number of weights: W1 (10x3) + b1 (10) + w2 (10) + b2 (1).
pub const N_WEIGHTS: usize = N_HIDDEN * N_IN + N_HIDDEN + N_HIDDEN + 1;

// Flat layout: W1 row-major | b1 | w2 | b2.
const OFF_B1: usize = N_HIDDEN * N_IN;
const OFF_W2: usize = OFF_B1 + N_HIDDEN;
const OFF_B2: usize = OFF_W2 + N_HIDDEN;

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Xavier-style initialization from a seeded RNG; biases start at zero.
pub fn init_weights(seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut w = vec![0.0; N_WEIGHTS];
    let s1 = (2.0 / (N_IN + N_HIDDEN) as f64).sqrt();
    let s2 = (2.0 / (N_HIDDEN + 1) as f64).sqrt();
    for v in &mut w[..OFF_B1] {
        *v = (rng.gen::<f64>() - 0.5) * 2.0 * s1;
    }
    for v in &mut w[OFF_W2..OFF_B2] {
        *v = (rng.gen::<f64>() - 0.5) * 2.0 * s2;
    }
    w
}

/// Forward pass on (S, I, R)/N: dense 3 -> 10 with ReLU, dense 10 -> 1,
/// then a sigmoid clamp so the learned rate stays in (0, 1).
pub fn forward(w: &[f64], x: &[f64; N_IN]) -> f64 {
    debug_assert_eq!(w.len(), N_WEIGHTS);
    let mut out = w[OFF_B2];
    for j in 0..N_HIDDEN {
        let mut z = w[OFF_B1 + j];
        for k in 0..N_IN {
            z += w[j * N_IN + k] * x[k];
        }
        if z > 0.0 {
            out += w[OFF_W2 + j] * z;
        }
    }
    sigmoid(out)
}

/// Vector-Jacobian product for one evaluation.
///
/// Writes `upstream * dQ/dx` into `grad_x` and accumulates
/// `upstream * dQ/dw` into `grad_w` (callers zero `grad_w` once per
/// backward sweep and accumulate over time).
pub fn vjp(w: &[f64], x: &[f64; N_IN], upstream: f64, grad_x: &mut [f64; N_IN], grad_w: &mut [f64]) {
    debug_assert_eq!(w.len(), N_WEIGHTS);
    debug_assert_eq!(grad_w.len(), N_WEIGHTS);

    let mut z = [0.0; N_HIDDEN];
    let mut out = w[OFF_B2];
    for j in 0..N_HIDDEN {
        let mut zj = w[OFF_B1 + j];
        for k in 0..N_IN {
            zj += w[j * N_IN + k] * x[k];
        }
        z[j] = zj;
        if zj > 0.0 {
            out += w[OFF_W2 + j] * zj;
        }
    }

    let s = sigmoid(out);
    let d_out = upstream * s * (1.0 - s);

    grad_x.fill(0.0);
    grad_w[OFF_B2] += d_out;
    for j in 0..N_HIDDEN {
        let h = z[j].max(0.0);
        grad_w[OFF_W2 + j] += d_out * h;
        if z[j] > 0.0 {
            let dh = d_out * w[OFF_W2 + j];
            grad_w[OFF_B1 + j] += dh;
            for k in 0..N_IN {
                grad_w[j * N_IN + k] += dh * x[k];
                grad_x[k] += dh * w[j * N_IN + k];
            }
        }
    }
}
