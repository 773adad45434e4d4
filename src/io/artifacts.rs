use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::fit::train::FitOutcome;
use crate::io::observations::Observations;
use crate::metrics::ReproductionCurve;
use crate::model::qsir::{QsirParams, IDX_I, IDX_R};

/// Persisted result of one region's fit: enough to reconstruct the
/// learned Q(t) function and the fitted trajectory.
#[derive(Debug, Serialize, Deserialize)]
pub struct FitArtifact {
    pub region: String,
    pub population: f64,
    pub params: QsirParams,
    /// Flat quarantine-network weight vector.
    pub weights: Vec<f64>,
    pub iterations: usize,
    pub final_loss: f64,
    /// Day of the sustained Re < 1 crossing; `None` when Re never crosses.
    pub transition_day: Option<f64>,
}

impl FitArtifact {
    pub fn new(
        region: &str,
        population: f64,
        outcome: &FitOutcome,
        curve: &ReproductionCurve,
    ) -> Self {
        Self {
            region: region.to_string(),
            population,
            params: outcome.params,
            weights: outcome.weights.clone(),
            iterations: outcome.loss_history.len(),
            final_loss: outcome.final_loss(),
            transition_day: curve.transition_time(),
        }
    }
}

/// Write the fit artifact as pretty JSON: `<out_dir>/<region>_fit.json`.
pub fn write_fit_json(
    out_dir: impl AsRef<std::path::Path>,
    artifact: &FitArtifact,
) -> anyhow::Result<std::path::PathBuf> {
    std::fs::create_dir_all(out_dir.as_ref()).context("create output dir failed")?;
    let path = out_dir.as_ref().join(format!("{}_fit.json", artifact.region));
    let f = std::fs::File::create(&path)
        .with_context(|| format!("create fit artifact failed (path={:?})", path))?;
    serde_json::to_writer_pretty(f, artifact).context("serialize fit artifact failed")?;
    Ok(path)
}

pub fn read_fit_json(path: impl AsRef<std::path::Path>) -> anyhow::Result<FitArtifact> {
    let f = std::fs::File::open(path.as_ref())
        .with_context(|| format!("open fit artifact failed (path={:?})", path.as_ref()))?;
    serde_json::from_reader(f).context("parse fit artifact failed")
}

/// Write the per-day series handed to the presentation layer:
/// `<out_dir>/<region>_series.csv` with observed vs predicted I and R,
/// the learned Q(t), and Re(t).
pub fn write_series_csv(
    out_dir: impl AsRef<std::path::Path>,
    region: &str,
    obs: &Observations,
    outcome: &FitOutcome,
    curve: &ReproductionCurve,
) -> anyhow::Result<std::path::PathBuf> {
    use std::io::Write;

    anyhow::ensure!(
        outcome.times.len() == obs.len() && curve.points.len() == obs.len(),
        "series lengths mismatch: times={} obs={} curve={}",
        outcome.times.len(),
        obs.len(),
        curve.points.len()
    );

    std::fs::create_dir_all(out_dir.as_ref()).context("create output dir failed")?;
    let path = out_dir.as_ref().join(format!("{region}_series.csv"));
    let mut f = std::fs::File::create(&path)
        .with_context(|| format!("create series file failed (path={:?})", path))?;

    writeln!(f, "t,observed_infected,predicted_infected,observed_removed,predicted_removed,quarantine,r_eff")?;
    let removed = obs.removed();
    for (k, &t) in outcome.times.iter().enumerate() {
        let y = &outcome.trajectory[k];
        writeln!(
            f,
            "{:.1},{:.3},{:.3},{:.3},{:.3},{:.6},{:.6}",
            t, obs.infected[k], y[IDX_I], removed[k], y[IDX_R], outcome.quarantine[k], curve.points[k].1
        )?;
    }

    Ok(path)
}
