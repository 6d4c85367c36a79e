//! Per-taxon value transforms applied before parametric tests.

use crate::error::{DaaError, Result};
use serde::{Deserialize, Serialize};

/// Transform applied to a taxon's abundances before parametric tests
/// (t-test, Gaussian model). Rank tests and count models always see raw
/// counts.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Transform {
    /// Raw counts.
    #[default]
    Identity,
    /// Natural log of (1 + x).
    Log1p,
    /// Natural log of (x + pseudocount).
    Log { pseudocount: f64 },
    /// Proportion of the sample's library size, times `scale`.
    Relative { scale: f64 },
}

impl Transform {
    /// Reject parameters that would produce non-finite values.
    pub fn validate(&self) -> Result<()> {
        match self {
            Transform::Log { pseudocount } if !(*pseudocount > 0.0) => Err(
                DaaError::InvalidParameter("Pseudocount must be positive".to_string()),
            ),
            Transform::Relative { scale } if !(*scale > 0.0) => Err(DaaError::InvalidParameter(
                "Relative abundance scale must be positive".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Whether the transform needs per-sample library sizes.
    pub fn needs_library_sizes(&self) -> bool {
        matches!(self, Transform::Relative { .. })
    }

    /// Apply to one value given its sample's library size.
    #[inline]
    pub fn apply(&self, count: f64, library_size: f64) -> f64 {
        match self {
            Transform::Identity => count,
            Transform::Log1p => count.ln_1p(),
            Transform::Log { pseudocount } => (count + pseudocount).ln(),
            Transform::Relative { scale } => count / library_size * scale,
        }
    }

    pub fn name(&self) -> String {
        match self {
            Transform::Identity => "identity".to_string(),
            Transform::Log1p => "log1p".to_string(),
            Transform::Log { pseudocount } => format!("log(x+{})", pseudocount),
            Transform::Relative { scale } => format!("relative(x{})", scale),
        }
    }
}
