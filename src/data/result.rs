//! Per-taxon test records and the results table.

use crate::error::{DaaError, Result, TestFailure};
use crate::test::TestOutput;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

/// Token written for missing values in delimited output.
const NA: &str = "NA";

/// Outcome of one test on one taxon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRecord {
    pub method: String,
    /// `None` when the test failed for this taxon.
    pub p_value: Option<f64>,
    /// Filled in by multiple testing correction.
    pub adjusted_p: Option<f64>,
    pub statistic: Option<f64>,
    pub effect: Option<f64>,
    /// Why the test could not be computed.
    pub failure: Option<String>,
}

impl TestRecord {
    pub fn from_outcome(
        method: &str,
        outcome: std::result::Result<TestOutput, TestFailure>,
    ) -> Self {
        match outcome {
            Ok(out) => Self {
                method: method.to_string(),
                p_value: Some(out.p_value),
                adjusted_p: None,
                statistic: Some(out.statistic),
                effect: out.effect,
                failure: None,
            },
            Err(failure) => Self {
                method: method.to_string(),
                p_value: None,
                adjusted_p: None,
                statistic: None,
                effect: None,
                failure: Some(failure.to_string()),
            },
        }
    }

    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }
}

/// One row of the results table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxonRecord {
    pub taxon_id: String,
    /// Fraction of samples in which the taxon is detected.
    pub prevalence: f64,
    /// Mean raw count over the run's samples.
    pub mean_abundance: f64,
    /// One record per test, in the run's test order.
    pub tests: Vec<TestRecord>,
}

impl TaxonRecord {
    pub fn test(&self, method: &str) -> Option<&TestRecord> {
        self.tests.iter().find(|t| t.method == method)
    }
}

/// Results of a run: one row per tested taxon, in request order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultTable {
    /// Test names, in column order.
    pub methods: Vec<String>,
    /// Name of the correction applied to every method.
    pub correction: String,
    pub rows: Vec<TaxonRecord>,
}

impl ResultTable {
    pub fn new(methods: Vec<String>, correction: &str, rows: Vec<TaxonRecord>) -> Self {
        Self {
            methods,
            correction: correction.to_string(),
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn taxon_ids(&self) -> Vec<&str> {
        self.rows.iter().map(|r| r.taxon_id.as_str()).collect()
    }

    /// Get the row of a specific taxon.
    pub fn get(&self, taxon_id: &str) -> Option<&TaxonRecord> {
        self.rows.iter().find(|r| r.taxon_id == taxon_id)
    }

    fn method_index(&self, method: &str) -> Result<usize> {
        self.methods
            .iter()
            .position(|m| m == method)
            .ok_or_else(|| {
                DaaError::InvalidParameter(format!(
                    "Unknown method '{}'. Available: {:?}",
                    method, self.methods
                ))
            })
    }

    /// Raw p-value column of one method.
    pub fn p_values(&self, method: &str) -> Result<Vec<Option<f64>>> {
        let idx = self.method_index(method)?;
        Ok(self.rows.iter().map(|r| r.tests[idx].p_value).collect())
    }

    /// Adjusted p-value column of one method.
    pub fn adjusted_p_values(&self, method: &str) -> Result<Vec<Option<f64>>> {
        let idx = self.method_index(method)?;
        Ok(self.rows.iter().map(|r| r.tests[idx].adjusted_p).collect())
    }

    pub(crate) fn set_adjusted(&mut self, method: &str, adjusted: Vec<Option<f64>>) -> Result<()> {
        let idx = self.method_index(method)?;
        if adjusted.len() != self.rows.len() {
            return Err(DaaError::DimensionMismatch {
                expected: self.rows.len(),
                actual: adjusted.len(),
            });
        }
        for (row, q) in self.rows.iter_mut().zip(adjusted) {
            row.tests[idx].adjusted_p = q;
        }
        Ok(())
    }

    /// Rows whose adjusted p-value for `method` is below `alpha`.
    pub fn significant_at(&self, method: &str, alpha: f64) -> Result<Vec<&TaxonRecord>> {
        let idx = self.method_index(method)?;
        Ok(self
            .rows
            .iter()
            .filter(|r| r.tests[idx].adjusted_p.is_some_and(|q| q < alpha))
            .collect())
    }

    /// Count significant results at various thresholds for one method.
    pub fn summary(&self, method: &str) -> Result<ResultSummary> {
        let idx = self.method_index(method)?;
        let adjusted: Vec<f64> = self
            .rows
            .iter()
            .filter_map(|r| r.tests[idx].adjusted_p)
            .collect();
        let below = |alpha: f64| adjusted.iter().filter(|&&q| q < alpha).count();
        Ok(ResultSummary {
            method: method.to_string(),
            total: self.rows.len(),
            failed: self.rows.iter().filter(|r| r.tests[idx].is_failure()).count(),
            significant_001: below(0.001),
            significant_01: below(0.01),
            significant_05: below(0.05),
            significant_10: below(0.10),
        })
    }

    /// Write the table as TSV; missing values are written as `NA`.
    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = std::fs::File::create(path)?;
        self.write_delimited(file, b'\t')
    }

    /// Write the table as CSV; missing values are written as `NA`.
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = std::fs::File::create(path)?;
        self.write_delimited(file, b',')
    }

    /// Write the wide table: one row per taxon, five columns per method.
    pub fn write_delimited<W: Write>(&self, writer: W, delimiter: u8) -> Result<()> {
        let mut wtr = csv::WriterBuilder::new()
            .delimiter(delimiter)
            .from_writer(writer);

        let mut header = vec![
            "taxon_id".to_string(),
            "prevalence".to_string(),
            "mean_abundance".to_string(),
        ];
        for m in &self.methods {
            for suffix in ["statistic", "effect", "p_value", "p_adjusted", "failure"] {
                header.push(format!("{}_{}", m, suffix));
            }
        }
        wtr.write_record(&header)?;

        for row in &self.rows {
            let mut record = vec![
                row.taxon_id.clone(),
                row.prevalence.to_string(),
                row.mean_abundance.to_string(),
            ];
            for t in &row.tests {
                record.push(fmt_opt(t.statistic));
                record.push(fmt_opt(t.effect));
                record.push(fmt_opt(t.p_value));
                record.push(fmt_opt(t.adjusted_p));
                record.push(t.failure.clone().unwrap_or_else(|| NA.to_string()));
            }
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), self)?;
        Ok(())
    }
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map_or_else(|| NA.to_string(), |v| v.to_string())
}

/// Summary statistics for one method of a result table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultSummary {
    pub method: String,
    pub total: usize,
    pub failed: usize,
    pub significant_001: usize,
    pub significant_01: usize,
    pub significant_05: usize,
    pub significant_10: usize,
}

impl std::fmt::Display for ResultSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Method: {}", self.method)?;
        writeln!(f, "Total taxa tested: {}", self.total)?;
        writeln!(f, "Failed tests: {}", self.failed)?;
        writeln!(f, "Significant at q < 0.001: {}", self.significant_001)?;
        writeln!(f, "Significant at q < 0.01:  {}", self.significant_01)?;
        writeln!(f, "Significant at q < 0.05:  {}", self.significant_05)?;
        writeln!(f, "Significant at q < 0.10:  {}", self.significant_10)?;
        Ok(())
    }
}
