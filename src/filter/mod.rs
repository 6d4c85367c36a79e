//! Filtering primitives for count matrices.

pub mod prevalence;

pub use prevalence::{
    filter_prevalence, prevalence, Comparison, Detection, FilterResult, PrevalenceFilter,
};
