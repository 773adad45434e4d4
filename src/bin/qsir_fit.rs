use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use rayon::prelude::*;
use serde::Deserialize;

use qsir::io::artifacts::{write_fit_json, write_series_csv, FitArtifact};
use qsir::io::observations::Observations;
use qsir::metrics::ReproductionCurve;
use qsir::model::qsir::RegionConfig;

/// Fit the neural-augmented QSIR model to per-region case-count series and
/// write the learned parameters, Q(t) and Re(t) artifacts.
#[derive(Parser, Debug)]
#[command(name = "qsir_fit", version, about)]
struct Cli {
    /// JSON file holding an array of region entries.
    #[arg(long)]
    config: PathBuf,

    /// Directory observation CSV paths are resolved against.
    #[arg(long, default_value = ".")]
    data_dir: PathBuf,

    /// Output directory for fit artifacts.
    #[arg(long, default_value = "out")]
    out_dir: PathBuf,
}

/// One region entry in the config file: the model config plus the path to
/// its observation CSV.
#[derive(Debug, Deserialize)]
struct RegionSpec {
    #[serde(flatten)]
    config: RegionConfig,
    /// Observation CSV, relative to `--data-dir`.
    data: String,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("qsir=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    let raw = std::fs::read_to_string(&cli.config)
        .with_context(|| format!("failed to read config {:?}", cli.config))?;
    let regions: Vec<RegionSpec> =
        serde_json::from_str(&raw).context("failed to parse region config JSON")?;
    anyhow::ensure!(!regions.is_empty(), "region config is empty");

    tracing::info!(regions = regions.len(), "starting batch fit");

    // Regions are independent: no shared mutable state, one output file
    // pair each, so they run in parallel.
    let failures: Vec<String> = regions
        .par_iter()
        .filter_map(|entry| {
            match run_region(entry, &cli.data_dir, &cli.out_dir) {
                Ok(()) => None,
                Err(e) => {
                    tracing::error!(region = %entry.config.name, error = %format!("{e:#}"), "region fit failed");
                    Some(entry.config.name.clone())
                }
            }
        })
        .collect();

    if !failures.is_empty() {
        anyhow::bail!(
            "{} of {} region fits failed: {}",
            failures.len(),
            regions.len(),
            failures.join(", ")
        );
    }
    Ok(())
}

fn run_region(entry: &RegionSpec, data_dir: &Path, out_dir: &Path) -> anyhow::Result<()> {
    let cfg = &entry.config;
    let data_path = data_dir.join(&entry.data);
    let obs = Observations::from_csv(
        data_path.to_str().context("observation path is not valid UTF-8")?,
    )
    .with_context(|| format!("loading observations for {}", cfg.name))?;

    tracing::info!(region = %cfg.name, points = obs.len(), iters = cfg.iters, "fitting");

    let outcome = qsir::fit_region(cfg, &obs)
        .with_context(|| format!("fitting region {}", cfg.name))?;

    let curve = ReproductionCurve::from_outcome(&outcome, cfg.population);
    if curve.downward_crossings() > 1 {
        tracing::warn!(
            region = %cfg.name,
            crossings = curve.downward_crossings(),
            "Re(t) oscillates around 1; transition point uses the last sustained crossing"
        );
    }
    match curve.transition_time() {
        Some(day) => tracing::info!(region = %cfg.name, day, "transition point (Re < 1 sustained)"),
        None => tracing::info!(region = %cfg.name, "no transition point: Re never falls below 1"),
    }

    let artifact = FitArtifact::new(&cfg.name, cfg.population, &outcome, &curve);
    let json_path = write_fit_json(out_dir, &artifact)?;
    let csv_path = write_series_csv(out_dir, &cfg.name, &obs, &outcome, &curve)?;
    tracing::info!(region = %cfg.name, ?json_path, ?csv_path, "artifacts written");
    Ok(())
}
