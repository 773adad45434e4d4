//! Post-fit metrics: effective reproduction number and transition point.

use crate::fit::train::FitOutcome;
use crate::model::qsir::IDX_S;

/// Effective reproduction number along the fitted trajectory,
/// Re(t) = beta / (gamma + Q(t)) * S(t)/N.
#[derive(Debug, Clone)]
pub struct ReproductionCurve {
    /// (time, Re) pairs on the observation grid.
    pub points: Vec<(f64, f64)>,
}

impl ReproductionCurve {
    pub fn from_outcome(outcome: &FitOutcome, n: f64) -> Self {
        let beta = outcome.params.beta;
        let gamma = outcome.params.gamma;
        let points = outcome
            .times
            .iter()
            .zip(outcome.trajectory.iter().zip(&outcome.quarantine))
            .map(|(&t, (y, &q))| {
                let s_frac = (y[IDX_S] / n).clamp(0.0, 1.0);
                (t, beta / (gamma + q) * s_frac)
            })
            .collect();
        Self { points }
    }

    /// Grid index of the transition point: the earliest index from which
    /// Re stays below 1 through the end of the horizon (the last sustained
    /// crossing). A dip below 1 that later recovers does not count. `None`
    /// when Re is at or above 1 at the end of the horizon.
    pub fn transition_index(&self) -> Option<usize> {
        let mut idx = None;
        for (k, &(_, r)) in self.points.iter().enumerate() {
            if r < 1.0 {
                if idx.is_none() {
                    idx = Some(k);
                }
            } else {
                idx = None;
            }
        }
        idx
    }

    /// Time of the transition point, if defined.
    pub fn transition_time(&self) -> Option<f64> {
        self.transition_index().map(|k| self.points[k].0)
    }

    /// Number of distinct downward crossings of 1. More than one means the
    /// curve oscillates around the threshold and the sustained-crossing
    /// tie-break applied.
    pub fn downward_crossings(&self) -> usize {
        self.points
            .windows(2)
            .filter(|w| w[0].1 >= 1.0 && w[1].1 < 1.0)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn curve(values: &[f64]) -> ReproductionCurve {
        ReproductionCurve {
            points: values.iter().enumerate().map(|(k, &r)| (k as f64, r)).collect(),
        }
    }

    #[test]
    fn single_sustained_crossing() {
        let c = curve(&[2.0, 1.5, 1.1, 0.9, 0.7, 0.5]);
        assert_eq!(c.transition_index(), Some(3));
        assert_eq!(c.transition_time(), Some(3.0));
        assert_eq!(c.downward_crossings(), 1);
        // Monotone-crossing property: >= 1 strictly before, < 1 at and after.
        let k = c.transition_index().unwrap();
        assert!(c.points[..k].iter().all(|&(_, r)| r >= 1.0));
        assert!(c.points[k..].iter().all(|&(_, r)| r < 1.0));
    }

    #[test]
    fn dip_that_recovers_is_not_a_transition() {
        let c = curve(&[1.8, 0.9, 1.2, 0.8, 0.6]);
        // First dip at index 1 recovers; the sustained crossing is index 3.
        assert_eq!(c.transition_index(), Some(3));
        assert_eq!(c.downward_crossings(), 2);
    }

    #[test]
    fn never_below_one_is_undefined() {
        let c = curve(&[2.0, 1.6, 1.3, 1.1, 1.0]);
        assert_eq!(c.transition_index(), None);
        assert_eq!(c.transition_time(), None);
    }

    #[test]
    fn below_one_at_the_end_only() {
        let c = curve(&[1.4, 1.2, 0.95]);
        assert_eq!(c.transition_index(), Some(2));
    }

    #[test]
    fn below_one_from_the_start() {
        let c = curve(&[0.8, 0.7, 0.6]);
        assert_eq!(c.transition_index(), Some(0));
        assert_eq!(c.downward_crossings(), 0);
    }
}
