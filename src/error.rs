//! Error types for the taxon-da library.

use thiserror::Error;

/// Main error type for the library.
///
/// Every variant here aborts the stage that raised it. Failures of a single
/// test on a single taxon are not errors at this level; they are recorded
/// as [`TestFailure`] values in the result table.
#[derive(Error, Debug)]
pub enum DaaError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid count value '{value}' at row {row}, column {col}")]
    InvalidCount {
        value: String,
        row: usize,
        col: usize,
    },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Sample identifiers of the abundance table and the metadata do not
    /// correspond one to one, in order.
    #[error("Sample alignment error: {0}")]
    Alignment(String),

    #[error("Duplicate identifier '{0}'")]
    DuplicateId(String),

    #[error("Missing column '{0}' in metadata")]
    MissingColumn(String),

    #[error("Invalid variable type for column '{column}': {reason}")]
    InvalidVariableType { column: String, reason: String },

    /// Nothing left to work on: no taxa survived filtering, or no p-values
    /// to correct.
    #[error("Empty data: {0}")]
    EmptyData(String),

    /// A missing raw p-value was found while correcting under the
    /// fail-fast missing-value policy.
    #[error("Incomplete data: {0}")]
    IncompleteData(String),

    #[error("Numerical error: {0}")]
    Numerical(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A pipeline stage failed; `source` is the underlying error.
    #[error("Pipeline stage '{stage}' failed: {source}")]
    Pipeline {
        stage: String,
        #[source]
        source: Box<DaaError>,
    },

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DaaError {
    /// Wrap an error with the name of the pipeline stage that raised it.
    pub fn in_stage(stage: &str, source: DaaError) -> Self {
        DaaError::Pipeline {
            stage: stage.to_string(),
            source: Box::new(source),
        }
    }

    /// The innermost error, looking through pipeline stage wrappers.
    pub fn root(&self) -> &DaaError {
        match self {
            DaaError::Pipeline { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, DaaError>;

/// Why a single test could not be computed for a single taxon.
///
/// These are recovered locally: the taxon keeps its row, the p-value for
/// that test is recorded as missing and the reason is kept alongside it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TestFailure {
    #[error("group '{level}' has {found} observation(s), need at least {required}")]
    TooFewObservations {
        level: String,
        found: usize,
        required: usize,
    },

    #[error("expected {expected} group level(s), found {found}")]
    WrongLevelCount { expected: String, found: usize },

    #[error("response has zero variance")]
    ZeroVariance,

    #[error("all observations are tied")]
    AllTied,

    #[error("design is singular or coefficient '{0}' is not estimable")]
    Singular(String),

    #[error("coefficient '{0}' is not part of the design")]
    UnknownCoefficient(String),

    #[error("model did not converge after {0} iterations")]
    NotConverged(usize),

    #[error("not enough residual degrees of freedom")]
    Saturated,

    #[error("{0}")]
    Numerical(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_wrapping_keeps_root() {
        let err = DaaError::in_stage("align", DaaError::Alignment("order differs".into()));
        assert!(matches!(err.root(), DaaError::Alignment(_)));
        assert_eq!(
            err.to_string(),
            "Pipeline stage 'align' failed: Sample alignment error: order differs"
        );
    }

    #[test]
    fn test_failure_messages() {
        let failure = TestFailure::TooFewObservations {
            level: "A".into(),
            found: 1,
            required: 2,
        };
        assert_eq!(
            failure.to_string(),
            "group 'A' has 1 observation(s), need at least 2"
        );
    }
}
