//! Pipeline composition and execution for per-taxon testing.

mod runner;

pub use runner::{Pipeline, PipelineConfig};
