use thiserror::Error;

/// Result alias for fitting-engine operations.
pub type FitResult<T> = std::result::Result<T, FitError>;

/// Terminal failures for a single region's fit.
///
/// Every variant ends the fit for that region; none is retried
/// automatically. A batch driver logs the failure and moves on to the
/// remaining regions.
#[derive(Debug, Error)]
pub enum FitError {
    /// Region configuration rejected before any solve.
    #[error("invalid region config: {message}")]
    Config { message: String },

    /// Observation arrays of mismatched shape or a non-monotonic time grid.
    #[error("observation data malformed: {message}")]
    DataShape { message: String },

    /// Observation file could not be read or parsed.
    #[error("observation read failed: {0}")]
    Read(#[from] csv::Error),

    /// Solver produced non-finite state or ran out of steps, in either
    /// the forward or the backward (adjoint) pass.
    #[error("integration diverged at t={t}: {message}")]
    IntegrationDivergence { t: f64, message: String },

    /// Loss or gradient became non-finite during training.
    #[error("optimization diverged at iteration {iteration}: {message}")]
    OptimizationDivergence { iteration: usize, message: String },
}

impl FitError {
    pub fn config(message: impl Into<String>) -> Self {
        FitError::Config { message: message.into() }
    }

    pub fn data_shape(message: impl Into<String>) -> Self {
        FitError::DataShape { message: message.into() }
    }
}
