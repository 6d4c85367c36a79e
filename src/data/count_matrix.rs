//! Abundance table with sparse storage for microbiome read counts.

use crate::error::{DaaError, Result};
use rayon::prelude::*;
use sprs::{CsMat, TriMat};
use std::collections::HashSet;
use std::path::Path;

/// A sparse table of read counts, taxa × samples.
///
/// Rows are taxa, columns are samples. Stored in CSR format since almost
/// every consumer walks one taxon at a time. The table is immutable once
/// built; filtering produces a new table.
#[derive(Debug, Clone)]
pub struct CountMatrix {
    /// Sparse matrix in CSR format (taxa × samples)
    data: CsMat<u64>,
    /// Taxon identifiers (row names)
    taxon_ids: Vec<String>,
    /// Sample identifiers (column names)
    sample_ids: Vec<String>,
}

impl CountMatrix {
    /// Create a new CountMatrix from a sparse matrix and identifiers.
    ///
    /// Fails if the identifier lists do not match the matrix shape or
    /// contain duplicates.
    pub fn new(data: CsMat<u64>, taxon_ids: Vec<String>, sample_ids: Vec<String>) -> Result<Self> {
        let (nrows, ncols) = data.shape();
        if nrows != taxon_ids.len() {
            return Err(DaaError::DimensionMismatch {
                expected: nrows,
                actual: taxon_ids.len(),
            });
        }
        if ncols != sample_ids.len() {
            return Err(DaaError::DimensionMismatch {
                expected: ncols,
                actual: sample_ids.len(),
            });
        }
        check_unique(&taxon_ids)?;
        check_unique(&sample_ids)?;
        Ok(Self {
            data,
            taxon_ids,
            sample_ids,
        })
    }

    /// Build from dense rows, one `Vec` of counts per taxon.
    pub fn from_rows(
        taxon_ids: Vec<String>,
        sample_ids: Vec<String>,
        rows: &[Vec<u64>],
    ) -> Result<Self> {
        if rows.len() != taxon_ids.len() {
            return Err(DaaError::DimensionMismatch {
                expected: taxon_ids.len(),
                actual: rows.len(),
            });
        }
        let n_samples = sample_ids.len();
        let mut tri_mat = TriMat::new((rows.len(), n_samples));
        for (r, row) in rows.iter().enumerate() {
            if row.len() != n_samples {
                return Err(DaaError::DimensionMismatch {
                    expected: n_samples,
                    actual: row.len(),
                });
            }
            for (c, &value) in row.iter().enumerate() {
                if value > 0 {
                    tri_mat.add_triplet(r, c, value);
                }
            }
        }
        Self::new(tri_mat.to_csr(), taxon_ids, sample_ids)
    }

    /// Load a count matrix from a TSV file.
    ///
    /// The header lists sample IDs after a leading taxon-ID column; every
    /// other row is a taxon ID followed by one non-negative integer count
    /// per sample.
    pub fn from_tsv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .flexible(true)
            .from_path(path)?;

        let sample_ids: Vec<String> = reader
            .headers()?
            .iter()
            .skip(1)
            .map(|s| s.trim().to_string())
            .collect();
        if sample_ids.is_empty() {
            return Err(DaaError::EmptyData(
                "Count table must have at least one sample".to_string(),
            ));
        }
        let n_samples = sample_ids.len();

        let mut taxon_ids = Vec::new();
        let mut triplets = Vec::new();
        for record in reader.records() {
            let record = record?;
            let row = taxon_ids.len();
            if record.len() != n_samples + 1 {
                return Err(DaaError::DimensionMismatch {
                    expected: n_samples,
                    actual: record.len().saturating_sub(1),
                });
            }
            taxon_ids.push(record[0].trim().to_string());
            for (col, field) in record.iter().skip(1).enumerate() {
                let value: u64 = field.trim().parse().map_err(|_| DaaError::InvalidCount {
                    value: field.to_string(),
                    row,
                    col,
                })?;
                if value > 0 {
                    triplets.push((row, col, value));
                }
            }
        }
        if taxon_ids.is_empty() {
            return Err(DaaError::EmptyData("No taxa in count table".to_string()));
        }

        let mut tri_mat = TriMat::new((taxon_ids.len(), n_samples));
        for (row, col, value) in triplets {
            tri_mat.add_triplet(row, col, value);
        }
        Self::new(tri_mat.to_csr(), taxon_ids, sample_ids)
    }

    /// Write the table as TSV, in the layout [`CountMatrix::from_tsv`] reads.
    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_path(path)?;

        let header = std::iter::once("taxon_id").chain(self.sample_ids.iter().map(String::as_str));
        writer.write_record(header)?;
        for (row, taxon_id) in self.taxon_ids.iter().enumerate() {
            let counts = self.row_dense(row).into_iter().map(|c| c.to_string());
            writer.write_record(std::iter::once(taxon_id.clone()).chain(counts))?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Get the value at (row, col), returning 0 for missing entries.
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> u64 {
        self.data.get(row, col).copied().unwrap_or(0)
    }

    /// Number of taxa (rows).
    #[inline]
    pub fn n_taxa(&self) -> usize {
        self.data.rows()
    }

    /// Number of samples (columns).
    #[inline]
    pub fn n_samples(&self) -> usize {
        self.data.cols()
    }

    /// Taxon identifiers.
    #[inline]
    pub fn taxon_ids(&self) -> &[String] {
        &self.taxon_ids
    }

    /// Sample identifiers.
    #[inline]
    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Row index of a taxon.
    pub fn taxon_index(&self, taxon_id: &str) -> Option<usize> {
        self.taxon_ids.iter().position(|t| t == taxon_id)
    }

    /// Number of samples in which a taxon has a non-zero count.
    pub fn row_nnz(&self, row: usize) -> usize {
        self.data.outer_view(row).map(|v| v.nnz()).unwrap_or(0)
    }

    /// Stored non-zero counts of a row, in column order.
    pub fn row_nonzero(&self, row: usize) -> Vec<u64> {
        self.data
            .outer_view(row)
            .map(|v| v.iter().map(|(_, &val)| val).collect())
            .unwrap_or_default()
    }

    /// Get a dense vector for a specific row (taxon).
    pub fn row_dense(&self, row: usize) -> Vec<u64> {
        let mut dense = vec![0u64; self.n_samples()];
        if let Some(row_vec) = self.data.outer_view(row) {
            for (col, &val) in row_vec.iter() {
                dense[col] = val;
            }
        }
        dense
    }

    /// Get a dense vector for a specific column (sample).
    pub fn col_dense(&self, col: usize) -> Vec<u64> {
        (0..self.n_taxa()).map(|row| self.get(row, col)).collect()
    }

    /// Compute row sums (total counts per taxon).
    pub fn row_sums(&self) -> Vec<u64> {
        (0..self.n_taxa())
            .into_par_iter()
            .map(|row| {
                self.data
                    .outer_view(row)
                    .map(|v| v.iter().map(|(_, &val)| val).sum())
                    .unwrap_or(0)
            })
            .collect()
    }

    /// Compute column sums (library sizes per sample).
    pub fn col_sums(&self) -> Vec<u64> {
        let mut sums = vec![0u64; self.n_samples()];
        for row_vec in self.data.outer_iterator() {
            for (col, &val) in row_vec.iter() {
                sums[col] += val;
            }
        }
        sums
    }

    /// Subset the table to the given rows, in the given order.
    pub fn subset_taxa(&self, indices: &[usize]) -> Result<Self> {
        let mut tri_mat = TriMat::new((indices.len(), self.n_samples()));
        let mut new_taxon_ids = Vec::with_capacity(indices.len());

        for (new_row, &old_row) in indices.iter().enumerate() {
            if old_row >= self.n_taxa() {
                return Err(DaaError::InvalidParameter(format!(
                    "Taxon index {} out of bounds",
                    old_row
                )));
            }
            new_taxon_ids.push(self.taxon_ids[old_row].clone());

            if let Some(row_vec) = self.data.outer_view(old_row) {
                for (col, &val) in row_vec.iter() {
                    tri_mat.add_triplet(new_row, col, val);
                }
            }
        }

        Self::new(tri_mat.to_csr(), new_taxon_ids, self.sample_ids.clone())
    }
}

fn check_unique(ids: &[String]) -> Result<()> {
    let mut seen = HashSet::with_capacity(ids.len());
    for id in ids {
        if !seen.insert(id.as_str()) {
            return Err(DaaError::DuplicateId(id.clone()));
        }
    }
    Ok(())
}
