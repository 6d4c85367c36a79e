//! Sample metadata: grouping variables and covariates, one row per sample.

use crate::error::{DaaError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

/// One metadata cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Variable {
    Categorical(String),
    Continuous(f64),
    /// Integer-ranked level.
    Ordinal(i64),
    Missing,
}

impl Variable {
    pub fn is_missing(&self) -> bool {
        matches!(self, Variable::Missing)
    }

    pub fn as_categorical(&self) -> Option<&str> {
        match self {
            Variable::Categorical(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view of continuous and ordinal values.
    pub fn as_numeric(&self) -> Option<f64> {
        match self {
            Variable::Continuous(v) => Some(*v),
            Variable::Ordinal(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Level label used when a value acts as a grouping factor.
    ///
    /// Numeric codes (e.g. a 0/1 column) are accepted as labels.
    pub fn as_level(&self) -> Option<String> {
        match self {
            Variable::Categorical(s) => Some(s.clone()),
            Variable::Continuous(v) => Some(v.to_string()),
            Variable::Ordinal(v) => Some(v.to_string()),
            Variable::Missing => None,
        }
    }

    /// Parse a raw cell as the given type; unparseable cells become missing.
    fn parse(raw: &str, kind: VariableType) -> Self {
        let raw = raw.trim();
        if is_missing_token(raw) {
            return Variable::Missing;
        }
        match kind {
            VariableType::Categorical => Variable::Categorical(raw.to_string()),
            VariableType::Continuous => raw
                .parse()
                .map(Variable::Continuous)
                .unwrap_or(Variable::Missing),
            VariableType::Ordinal => raw.parse().map(Variable::Ordinal).unwrap_or(Variable::Missing),
        }
    }

    fn retype(&self, kind: VariableType) -> Self {
        match (self, kind) {
            (Variable::Missing, _) => Variable::Missing,
            (Variable::Categorical(s), _) => Variable::parse(s, kind),
            (Variable::Continuous(v), VariableType::Ordinal) => Variable::Ordinal(*v as i64),
            (Variable::Ordinal(v), VariableType::Continuous) => Variable::Continuous(*v as f64),
            (v, VariableType::Categorical) => v
                .as_level()
                .map(Variable::Categorical)
                .unwrap_or(Variable::Missing),
            (v, _) => v.clone(),
        }
    }

    fn kind(&self) -> Option<VariableType> {
        match self {
            Variable::Categorical(_) => Some(VariableType::Categorical),
            Variable::Continuous(_) => Some(VariableType::Continuous),
            Variable::Ordinal(_) => Some(VariableType::Ordinal),
            Variable::Missing => None,
        }
    }
}

/// Column type, inferred on load or set with [`Metadata::with_column_types`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariableType {
    Categorical,
    Continuous,
    Ordinal,
}

#[derive(Debug, Clone)]
struct Column {
    name: String,
    kind: VariableType,
    /// One value per sample, in sample order.
    values: Vec<Variable>,
}

/// Sample metadata stored column-wise.
///
/// Rows keep the order in which samples were read; that order is what
/// alignment against a count matrix is checked against.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    sample_ids: Vec<String>,
    sample_index: HashMap<String, usize>,
    column_names: Vec<String>,
    columns: Vec<Column>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build metadata from in-memory columns.
    ///
    /// A column's type is that of its first non-missing value; all-missing
    /// columns are categorical.
    pub fn from_columns(
        sample_ids: Vec<String>,
        columns: Vec<(String, Vec<Variable>)>,
    ) -> Result<Self> {
        let mut meta = Self::with_samples(sample_ids)?;
        for (name, values) in columns {
            let kind = values
                .iter()
                .find_map(Variable::kind)
                .unwrap_or(VariableType::Categorical);
            meta.push_column(name, kind, values)?;
        }
        Ok(meta)
    }

    /// Load metadata from a TSV file.
    ///
    /// The first column holds sample IDs, the header names the variables.
    /// A column is continuous when every non-missing cell parses as a
    /// number, otherwise categorical. `""`, `NA` and `na` are missing.
    pub fn from_tsv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .flexible(true)
            .from_path(path)?;

        let header: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        if header.len() < 2 {
            return Err(DaaError::EmptyData(
                "Metadata must have at least one variable column".to_string(),
            ));
        }

        let mut sample_ids = Vec::new();
        let mut cells: Vec<Vec<String>> = vec![Vec::new(); header.len() - 1];
        for record in reader.records() {
            let record = record?;
            let sample_id = record.get(0).unwrap_or("").trim();
            if sample_id.is_empty() {
                continue;
            }
            sample_ids.push(sample_id.to_string());
            for (c, column) in cells.iter_mut().enumerate() {
                column.push(record.get(c + 1).unwrap_or("").to_string());
            }
        }
        if sample_ids.is_empty() {
            return Err(DaaError::EmptyData("No samples in metadata".to_string()));
        }

        let mut meta = Self::with_samples(sample_ids)?;
        for (name, raw) in header.into_iter().skip(1).zip(cells) {
            let numeric = raw
                .iter()
                .map(|r| r.trim())
                .all(|r| is_missing_token(r) || r.parse::<f64>().is_ok());
            let kind = if numeric {
                VariableType::Continuous
            } else {
                VariableType::Categorical
            };
            let values = raw.iter().map(|r| Variable::parse(r, kind)).collect();
            meta.push_column(name, kind, values)?;
        }
        Ok(meta)
    }

    /// Override the type of specific columns, re-interpreting their values.
    pub fn with_column_types(mut self, types: HashMap<String, VariableType>) -> Self {
        for column in &mut self.columns {
            if let Some(&kind) = types.get(&column.name) {
                column.kind = kind;
                column.values = column.values.iter().map(|v| v.retype(kind)).collect();
            }
        }
        self
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    /// Value of `column` for one sample.
    pub fn get(&self, sample_id: &str, column: &str) -> Option<&Variable> {
        let row = *self.sample_index.get(sample_id)?;
        self.find(column).map(|c| &c.values[row])
    }

    /// All values of a column, in sample order.
    pub fn column(&self, column: &str) -> Result<&[Variable]> {
        self.find(column)
            .map(|c| c.values.as_slice())
            .ok_or_else(|| DaaError::MissingColumn(column.to_string()))
    }

    pub fn column_type(&self, column: &str) -> Option<VariableType> {
        self.find(column).map(|c| c.kind)
    }

    /// Sorted distinct levels of a column used as a grouping factor.
    pub fn levels(&self, column: &str) -> Result<Vec<String>> {
        let levels: BTreeSet<String> = self
            .column(column)?
            .iter()
            .filter_map(Variable::as_level)
            .collect();
        Ok(levels.into_iter().collect())
    }

    /// Fail unless this table lists exactly `sample_ids`, in the same order.
    pub fn check_alignment(&self, sample_ids: &[String]) -> Result<()> {
        if self.sample_ids.len() != sample_ids.len() {
            return Err(DaaError::Alignment(format!(
                "abundance table has {} samples, metadata has {}",
                sample_ids.len(),
                self.sample_ids.len()
            )));
        }
        if let Some((pos, (expected, found))) = sample_ids
            .iter()
            .zip(self.sample_ids.iter())
            .enumerate()
            .find(|(_, (a, b))| a != b)
        {
            return Err(DaaError::Alignment(format!(
                "sample at position {} is '{}' in the abundance table but '{}' in metadata",
                pos, expected, found
            )));
        }
        Ok(())
    }

    /// Reorder (and subset) metadata to follow the given sample order.
    ///
    /// This is an explicit, caller-side repair; the pipeline itself never
    /// realigns.
    pub fn align_to(&self, sample_ids: &[String]) -> Result<Self> {
        let rows = sample_ids
            .iter()
            .map(|sid| {
                self.sample_index.get(sid).copied().ok_or_else(|| {
                    DaaError::Alignment(format!("Sample '{}' not found in metadata", sid))
                })
            })
            .collect::<Result<Vec<usize>>>()?;

        let mut aligned = Self::with_samples(sample_ids.to_vec())?;
        for column in &self.columns {
            let values = rows.iter().map(|&r| column.values[r].clone()).collect();
            aligned.push_column(column.name.clone(), column.kind, values)?;
        }
        Ok(aligned)
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.find(column).is_some()
    }

    fn with_samples(sample_ids: Vec<String>) -> Result<Self> {
        let mut sample_index = HashMap::with_capacity(sample_ids.len());
        for (i, sid) in sample_ids.iter().enumerate() {
            if sample_index.insert(sid.clone(), i).is_some() {
                return Err(DaaError::DuplicateId(sid.clone()));
            }
        }
        Ok(Self {
            sample_ids,
            sample_index,
            ..Self::default()
        })
    }

    fn push_column(&mut self, name: String, kind: VariableType, values: Vec<Variable>) -> Result<()> {
        if values.len() != self.sample_ids.len() {
            return Err(DaaError::DimensionMismatch {
                expected: self.sample_ids.len(),
                actual: values.len(),
            });
        }
        if self.has_column(&name) {
            return Err(DaaError::DuplicateId(name));
        }
        self.column_names.push(name.clone());
        self.columns.push(Column { name, kind, values });
        Ok(())
    }

    fn find(&self, column: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == column)
    }
}

fn is_missing_token(raw: &str) -> bool {
    matches!(raw, "" | "NA" | "na")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_tsv(lines: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        file.flush().unwrap();
        file
    }

    fn study() -> Metadata {
        let file = write_tsv(&[
            "sample_id\tgroup\tage\tseverity",
            "S1\tcontrol\t25\t1",
            "S2\ttreatment\t30\t2",
            "S3\tcontrol\t35\t1",
            "S4\ttreatment\t28\t3",
        ]);
        Metadata::from_tsv(file.path()).unwrap()
    }

    #[test]
    fn test_load_metadata() {
        let meta = study();
        assert_eq!(meta.n_samples(), 4);
        assert_eq!(meta.sample_ids(), &["S1", "S2", "S3", "S4"]);
        assert_eq!(meta.column_names(), &["group", "age", "severity"]);
        assert_eq!(meta.column_type("group"), Some(VariableType::Categorical));
        assert_eq!(meta.column_type("age"), Some(VariableType::Continuous));
        assert_eq!(meta.get("S2", "age").unwrap().as_numeric(), Some(30.0));
    }

    #[test]
    fn test_with_column_types() {
        let mut types = HashMap::new();
        types.insert("severity".to_string(), VariableType::Categorical);
        let meta = study().with_column_types(types);

        assert_eq!(meta.get("S2", "severity").unwrap().as_categorical(), Some("2"));
        assert_eq!(meta.levels("severity").unwrap(), vec!["1", "2", "3"]);
    }

    #[test]
    fn test_levels() {
        let meta = study();
        assert_eq!(meta.levels("group").unwrap(), vec!["control", "treatment"]);
        assert!(matches!(meta.levels("nope"), Err(DaaError::MissingColumn(_))));
    }

    #[test]
    fn test_missing_values() {
        let file = write_tsv(&[
            "sample_id\tgroup\tage",
            "S1\tcontrol\t25",
            "S2\ttreatment\tNA",
            "S3\t\t30",
        ]);
        let meta = Metadata::from_tsv(file.path()).unwrap();
        assert_eq!(meta.column_type("age"), Some(VariableType::Continuous));
        assert!(meta.get("S2", "age").unwrap().is_missing());
        assert!(meta.get("S3", "group").unwrap().is_missing());
        assert_eq!(meta.levels("group").unwrap(), vec!["control", "treatment"]);
    }

    #[test]
    fn test_duplicate_sample_rejected() {
        let file = write_tsv(&["sample_id\tgroup", "S1\tA", "S1\tB"]);
        assert!(matches!(
            Metadata::from_tsv(file.path()),
            Err(DaaError::DuplicateId(_))
        ));
    }

    #[test]
    fn test_check_alignment() {
        let meta = study();
        let same: Vec<String> = ["S1", "S2", "S3", "S4"].iter().map(|s| s.to_string()).collect();
        let swapped: Vec<String> = ["S2", "S1", "S3", "S4"].iter().map(|s| s.to_string()).collect();

        assert!(meta.check_alignment(&same).is_ok());
        assert!(matches!(meta.check_alignment(&swapped), Err(DaaError::Alignment(_))));
        assert!(matches!(meta.check_alignment(&same[..3]), Err(DaaError::Alignment(_))));
    }

    #[test]
    fn test_align_to_reorders() {
        let meta = study();
        let order: Vec<String> = vec!["S3".into(), "S1".into()];
        let aligned = meta.align_to(&order).unwrap();
        assert_eq!(aligned.sample_ids(), &["S3", "S1"]);
        assert_eq!(aligned.get("S3", "age").unwrap().as_numeric(), Some(35.0));
        assert!(aligned.check_alignment(&order).is_ok());
        assert!(meta.align_to(&["S9".to_string()]).is_err());
    }

    #[test]
    fn test_from_columns() {
        let meta = Metadata::from_columns(
            vec!["a".into(), "b".into()],
            vec![
                ("g".into(), vec![Variable::Missing, Variable::Categorical("x".into())]),
                ("dose".into(), vec![Variable::Continuous(1.0), Variable::Continuous(2.0)]),
            ],
        )
        .unwrap();
        assert_eq!(meta.column_type("g"), Some(VariableType::Categorical));
        assert_eq!(meta.column_type("dose"), Some(VariableType::Continuous));
        assert!(Metadata::from_columns(vec!["a".into(), "a".into()], vec![]).is_err());
        assert!(Metadata::from_columns(
            vec!["a".into()],
            vec![("g".into(), vec![Variable::Missing, Variable::Missing])]
        )
        .is_err());
    }
}
