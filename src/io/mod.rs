pub mod artifacts;
pub mod observations;
