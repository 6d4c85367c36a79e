//! Abundance transforms and library-size normalization.
//!
//! - **transform**: per-value transforms applied before parametric tests
//! - **size_factors**: median-of-ratios size factors for count models

pub mod size_factors;
pub mod transform;

pub use size_factors::{size_factors, SizeFactorMethod};
pub use transform::Transform;
