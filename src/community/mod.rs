//! Community-level comparisons across whole samples.
//!
//! - **distance**: Bray-Curtis dissimilarity between samples
//! - **permanova**: permutational multivariate ANOVA on a distance matrix

pub mod distance;
pub mod permanova;

pub use distance::{bray_curtis, bray_curtis_matrix};
pub use permanova::{permanova, PermanovaConfig, PermanovaResult};
