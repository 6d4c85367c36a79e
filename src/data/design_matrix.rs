//! Design matrix construction from a model spec and a taxon frame.

use crate::data::{ModelSpec, TaxonFrame, Variable};
use crate::error::TestFailure;
use nalgebra::DMatrix;

/// A design matrix for one taxon's model.
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    /// samples × coefficients
    matrix: DMatrix<f64>,
    coefficient_names: Vec<String>,
    /// Frame rows used, i.e. rows with every predictor observed.
    rows: Vec<usize>,
}

/// One block of design columns contributed by a single variable.
type Columns = Vec<(String, Vec<f64>)>;

impl DesignMatrix {
    /// Create a design matrix directly from components.
    pub fn from_matrix(matrix: DMatrix<f64>, coefficient_names: Vec<String>) -> Self {
        let rows = (0..matrix.nrows()).collect();
        Self {
            matrix,
            coefficient_names,
            rows,
        }
    }

    /// Build the design of `spec` over the samples of `frame`.
    ///
    /// Categorical columns are treatment-coded against their reference
    /// level. Without an intercept the first categorical main effect keeps
    /// all of its levels. Samples with a missing predictor are left out.
    pub fn from_spec(spec: &ModelSpec, frame: &TaxonFrame) -> Result<Self, TestFailure> {
        let n = frame.n();
        let mut observed = vec![true; n];
        for var in spec.variables() {
            let values = frame.covariates.get(var).ok_or_else(|| {
                TestFailure::Numerical(format!("column '{}' not available to the model", var))
            })?;
            for (i, v) in values.iter().enumerate() {
                if v.is_missing() {
                    observed[i] = false;
                }
            }
        }
        let rows: Vec<usize> = (0..n).filter(|&i| observed[i]).collect();

        let mut coefficient_names = Vec::new();
        let mut columns: Vec<Vec<f64>> = Vec::new();

        if spec.intercept {
            coefficient_names.push("(Intercept)".to_string());
            columns.push(vec![1.0; rows.len()]);
        }

        let mut full_coding_used = spec.intercept;
        for var in &spec.predictors {
            let is_categorical = frame.categorical_levels.contains_key(var.as_str());
            let drop_reference = full_coding_used || !is_categorical;
            if is_categorical {
                full_coding_used = true;
            }
            for (name, col) in variable_columns(spec, frame, var, &rows, drop_reference)? {
                coefficient_names.push(name);
                columns.push(col);
            }
        }

        for interaction in &spec.interactions {
            let left = variable_columns(spec, frame, &interaction.left, &rows, true)?;
            let right = variable_columns(spec, frame, &interaction.right, &rows, true)?;
            for (name1, col1) in &left {
                for (name2, col2) in &right {
                    coefficient_names.push(format!("{}:{}", name1, name2));
                    columns.push(col1.iter().zip(col2.iter()).map(|(a, b)| a * b).collect());
                }
            }
        }

        let mut matrix = DMatrix::zeros(rows.len(), columns.len());
        for (col_idx, col) in columns.iter().enumerate() {
            for (row_idx, &val) in col.iter().enumerate() {
                matrix[(row_idx, col_idx)] = val;
            }
        }

        Ok(Self {
            matrix,
            coefficient_names,
            rows,
        })
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    pub fn coefficient_names(&self) -> &[String] {
        &self.coefficient_names
    }

    /// Frame rows the design covers.
    pub fn rows(&self) -> &[usize] {
        &self.rows
    }

    pub fn n_samples(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn n_coefficients(&self) -> usize {
        self.matrix.ncols()
    }

    /// Get the index of a coefficient by name.
    pub fn coefficient_index(&self, name: &str) -> Option<usize> {
        self.coefficient_names.iter().position(|n| n == name)
    }
}

/// Design columns of one variable over the selected rows.
fn variable_columns(
    spec: &ModelSpec,
    frame: &TaxonFrame,
    var: &str,
    rows: &[usize],
    drop_reference: bool,
) -> Result<Columns, TestFailure> {
    let values = frame.covariates.get(var).ok_or_else(|| {
        TestFailure::Numerical(format!("column '{}' not available to the model", var))
    })?;

    match frame.categorical_levels.get(var) {
        None => {
            let col = rows
                .iter()
                .map(|&i| values[i].as_numeric().unwrap_or(f64::NAN))
                .collect();
            Ok(vec![(var.to_string(), col)])
        }
        Some(levels) => {
            let reference = spec
                .reference_levels
                .get(var)
                .or_else(|| levels.first())
                .cloned();
            let mut ordered: Vec<&String> = Vec::with_capacity(levels.len());
            if let Some(reference) = reference.as_ref() {
                ordered.push(reference);
            }
            ordered.extend(levels.iter().filter(|l| Some(*l) != reference.as_ref()));

            Ok(ordered
                .into_iter()
                .filter(|level| !(drop_reference && Some(*level) == reference.as_ref()))
                .map(|level| {
                    let col = rows
                        .iter()
                        .map(|&i| match &values[i] {
                            Variable::Categorical(s) if s == level => 1.0,
                            _ => 0.0,
                        })
                        .collect();
                    (format!("{}{}", var, level), col)
                })
                .collect())
        }
    }
}
