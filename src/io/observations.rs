use serde::Deserialize;

use crate::error::{FitError, FitResult};

#[derive(Debug, Deserialize)]
struct ObsRow {
    day: u32,
    infected: f64,
    recovered: f64,
    dead: f64,
}

/// Observed case-count series for one region, immutable once loaded.
///
/// All four arrays share the same length and the day grid is strictly
/// increasing; [`Observations::new`] and the CSV loader enforce this once,
/// so the fitting engine never re-checks input shape mid-run.
#[derive(Debug, Clone)]
pub struct Observations {
    /// Integer day offsets, as floats for the integration grid.
    pub days: Vec<f64>,
    /// Cumulative infected counts.
    pub infected: Vec<f64>,
    /// Cumulative recovered counts.
    pub recovered: Vec<f64>,
    /// Cumulative death counts.
    pub dead: Vec<f64>,
}

impl Observations {
    pub fn new(
        days: Vec<f64>,
        infected: Vec<f64>,
        recovered: Vec<f64>,
        dead: Vec<f64>,
    ) -> FitResult<Self> {
        let obs = Self { days, infected, recovered, dead };
        obs.validate()?;
        Ok(obs)
    }

    /// Load from a CSV file with columns `day,infected,recovered,dead`
    /// holding cumulative counts per integer day offset.
    pub fn from_csv(path: &str) -> FitResult<Self> {
        let mut rdr = csv::Reader::from_path(path)?;
        let mut days = Vec::new();
        let mut infected = Vec::new();
        let mut recovered = Vec::new();
        let mut dead = Vec::new();
        for result in rdr.deserialize::<ObsRow>() {
            let row = result?;
            days.push(f64::from(row.day));
            infected.push(row.infected);
            recovered.push(row.recovered);
            dead.push(row.dead);
        }
        Self::new(days, infected, recovered, dead)
    }

    pub fn validate(&self) -> FitResult<()> {
        let n = self.days.len();
        if n < 2 {
            return Err(FitError::data_shape(format!("need at least 2 observations, got {n}")));
        }
        if self.infected.len() != n || self.recovered.len() != n || self.dead.len() != n {
            return Err(FitError::data_shape(format!(
                "array lengths differ: days={n} infected={} recovered={} dead={}",
                self.infected.len(),
                self.recovered.len(),
                self.dead.len()
            )));
        }
        if self.days.windows(2).any(|w| w[1] <= w[0]) {
            return Err(FitError::data_shape("day grid must be strictly increasing"));
        }
        for (name, series) in
            [("days", &self.days), ("infected", &self.infected), ("recovered", &self.recovered), ("dead", &self.dead)]
        {
            if let Some(k) = series.iter().position(|v| !v.is_finite() || *v < 0.0) {
                return Err(FitError::data_shape(format!(
                    "{name}[{k}] is not a finite non-negative number"
                )));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    /// Integration grid (a copy of the day offsets).
    pub fn times(&self) -> Vec<f64> {
        self.days.clone()
    }

    /// Removed counts used for fitting: recovered + dead.
    pub fn removed(&self) -> Vec<f64> {
        self.recovered.iter().zip(&self.dead).map(|(r, d)| r + d).collect()
    }
}
