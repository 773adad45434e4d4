pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod metrics;
pub mod model;

pub use error::{FitError, FitResult};
pub use fit::train::{fit_region, FitOutcome};
pub use io::observations::Observations;
pub use metrics::ReproductionCurve;
pub use model::qsir::{QsirModel, QsirParams, RegionConfig};
