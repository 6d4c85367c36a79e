//! Structured model specification for per-taxon regression.
//!
//! The response is always the taxon's abundance (transformed for the
//! Gaussian family, raw counts for count families). Predictors and
//! interactions name metadata columns.

use crate::data::{Metadata, VariableType};
use crate::error::{DaaError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Error distribution of a per-taxon model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    /// Ordinary least squares on (optionally transformed) abundances.
    #[default]
    Gaussian,
    /// Poisson GLM with log link on raw counts.
    Poisson,
    /// Negative binomial GLM with log link on raw counts.
    NegativeBinomial,
}

impl Family {
    /// Whether this family models raw counts rather than transformed values.
    pub fn is_count_model(&self) -> bool {
        !matches!(self, Family::Gaussian)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Family::Gaussian => "gaussian",
            Family::Poisson => "poisson",
            Family::NegativeBinomial => "negative_binomial",
        }
    }
}

/// A two-way interaction between metadata columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interaction {
    pub left: String,
    pub right: String,
}

impl std::fmt::Display for Interaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.left, self.right)
    }
}

fn default_true() -> bool {
    true
}

/// Model for one taxon: `abundance ~ [1 +] predictors + interactions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Main-effect columns, in design order.
    pub predictors: Vec<String>,
    /// Interaction terms, appended after main effects.
    #[serde(default)]
    pub interactions: Vec<Interaction>,
    #[serde(default = "default_true")]
    pub intercept: bool,
    #[serde(default)]
    pub family: Family,
    /// Reference level per categorical column. Defaults to the
    /// alphabetically first level.
    #[serde(default)]
    pub reference_levels: BTreeMap<String, String>,
    /// Use median-of-ratios size factors as a log offset (count families).
    #[serde(default)]
    pub use_size_factors: bool,
}

impl ModelSpec {
    /// Intercept-only model of the given family.
    pub fn new(family: Family) -> Self {
        Self {
            predictors: Vec::new(),
            interactions: Vec::new(),
            intercept: true,
            family,
            reference_levels: BTreeMap::new(),
            use_size_factors: false,
        }
    }

    /// Negative binomial model with size-factor offsets, DESeq2 style.
    pub fn deseq(predictors: &[&str]) -> Self {
        let mut spec = Self::new(Family::NegativeBinomial);
        spec.predictors = predictors.iter().map(|p| p.to_string()).collect();
        spec.use_size_factors = true;
        spec
    }

    pub fn predictor(mut self, name: &str) -> Self {
        self.predictors.push(name.to_string());
        self
    }

    pub fn interaction(mut self, left: &str, right: &str) -> Self {
        self.interactions.push(Interaction {
            left: left.to_string(),
            right: right.to_string(),
        });
        self
    }

    pub fn without_intercept(mut self) -> Self {
        self.intercept = false;
        self
    }

    pub fn reference(mut self, column: &str, level: &str) -> Self {
        self.reference_levels
            .insert(column.to_string(), level.to_string());
        self
    }

    pub fn with_size_factors(mut self) -> Self {
        self.use_size_factors = true;
        self
    }

    /// All metadata columns the model reads, sorted and deduplicated.
    pub fn variables(&self) -> Vec<&str> {
        let mut vars: Vec<&str> = self
            .predictors
            .iter()
            .map(|p| p.as_str())
            .chain(
                self.interactions
                    .iter()
                    .flat_map(|i| [i.left.as_str(), i.right.as_str()]),
            )
            .collect();
        vars.sort();
        vars.dedup();
        vars
    }

    /// Check the model against the metadata it will be fitted with.
    pub fn validate(&self, metadata: &Metadata) -> Result<()> {
        if !self.intercept && self.predictors.is_empty() && self.interactions.is_empty() {
            return Err(DaaError::InvalidParameter(
                "Model must have an intercept or at least one term".to_string(),
            ));
        }
        if self.use_size_factors && !self.family.is_count_model() {
            return Err(DaaError::InvalidParameter(
                "Size factors apply only to count families".to_string(),
            ));
        }
        for var in self.variables() {
            if !metadata.has_column(var) {
                return Err(DaaError::MissingColumn(var.to_string()));
            }
        }
        for (column, level) in &self.reference_levels {
            if metadata.column_type(column) != Some(VariableType::Categorical) {
                return Err(DaaError::InvalidVariableType {
                    column: column.clone(),
                    reason: "reference level given for a non-categorical column".to_string(),
                });
            }
            if !metadata.levels(column)?.contains(level) {
                return Err(DaaError::InvalidParameter(format!(
                    "Level '{}' not found for variable '{}'",
                    level, column
                )));
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut terms: Vec<String> = Vec::new();
        if !self.intercept {
            terms.push("0".to_string());
        }
        terms.extend(self.predictors.iter().cloned());
        terms.extend(self.interactions.iter().map(|i| i.to_string()));
        if terms.is_empty() {
            terms.push("1".to_string());
        }
        write!(f, "{}(abundance ~ {})", self.family.name(), terms.join(" + "))
    }
}
