//! Double lookup of clonotype neighbors: clonotype -> label -> distance matrix
//! row -> labels -> clonotypes.

use crate::clonotype_table::{ClonotypeColumn, ClonotypeTable};
use crate::errors::{LookupError, ValidationError};
use crate::label::Label;
use anyhow::Result;
use fxhash::FxHashMap;
use log::debug;
use sprs::{CsMat, CsVec};
use std::sync::Arc;

/// A square symmetric sparse distance matrix over labelled rows and columns.
/// An explicit zero is no different from a missing entry: no recorded neighbor.
#[derive(Debug, Clone)]
pub struct DistanceMatrix {
    matrix: CsMat<f64>,
    labels: Vec<Label>,
    label_index: FxHashMap<Label, usize>,
}

impl DistanceMatrix {
    pub fn new(name: &str, matrix: CsMat<f64>, labels: Vec<Label>) -> Result<Self> {
        let (rows, cols) = matrix.shape();
        if rows != labels.len() || cols != labels.len() {
            return Err(ValidationError::ShapeMismatch {
                name: name.to_string(),
                rows,
                cols,
                n_labels: labels.len(),
            }
            .into());
        }
        let invalid = matrix
            .iter()
            .find(|(v, _)| !(v.is_finite() && **v >= 0.0));
        if let Some((&value, (row, col))) = invalid {
            return Err(ValidationError::InvalidDistance {
                name: name.to_string(),
                row,
                col,
                value,
            }
            .into());
        }
        let asymmetric = matrix
            .iter()
            .find(|&(&v, (row, col))| matrix.get(col, row).copied().unwrap_or(0.0) != v);
        if let Some((_, (row, col))) = asymmetric {
            return Err(ValidationError::AsymmetricDistance {
                name: name.to_string(),
                row,
                col,
            }
            .into());
        }

        let mut label_index = FxHashMap::default();
        for (i, label) in labels.iter().enumerate() {
            if label_index.insert(label.clone(), i).is_some() {
                return Err(ValidationError::DuplicateLabel {
                    name: name.to_string(),
                    label: label.to_string(),
                }
                .into());
            }
        }

        let matrix = if matrix.is_csr() {
            matrix
        } else {
            matrix.to_csr()
        };
        Ok(DistanceMatrix {
            matrix,
            labels,
            label_index,
        })
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    pub fn shape(&self) -> (usize, usize) {
        self.matrix.shape()
    }

    pub fn index_of(&self, label: &Label) -> Option<usize> {
        self.label_index.get(label).copied()
    }
}

/// Resolved lookup table, for lookups without name resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LookupHandle(usize);

#[derive(Debug, Clone)]
struct LookupTable {
    name: String,
    matrix: usize,
    /// Label index of every query clonotype, `None` if it has no label.
    forward: Vec<Option<usize>>,
    /// For every label index, the reference clonotypes carrying it, sorted.
    reverse: Vec<Vec<usize>>,
}

/// Finds the neighbors of query clonotypes among reference clonotypes via the
/// distance matrices between their labels. Without a separate reference
/// dataset, query and reference are the same table.
#[derive(Debug, Clone)]
pub struct DoubleLookupNeighborFinder {
    query: Arc<ClonotypeTable>,
    reference: Arc<ClonotypeTable>,
    matrices: Vec<DistanceMatrix>,
    matrix_names: FxHashMap<String, usize>,
    tables: Vec<LookupTable>,
    table_names: FxHashMap<String, LookupHandle>,
}

impl DoubleLookupNeighborFinder {
    pub fn new(query: Arc<ClonotypeTable>, reference: Arc<ClonotypeTable>) -> Self {
        DoubleLookupNeighborFinder {
            query,
            reference,
            matrices: Vec::new(),
            matrix_names: FxHashMap::default(),
            tables: Vec::new(),
            table_names: FxHashMap::default(),
        }
    }

    pub fn n_query(&self) -> usize {
        self.query.len()
    }

    pub fn n_reference(&self) -> usize {
        self.reference.len()
    }

    /// Register a distance matrix under a unique `name`.
    pub fn add_distance_matrix(
        &mut self,
        name: &str,
        matrix: CsMat<f64>,
        labels: Vec<Label>,
    ) -> Result<()> {
        if self.matrix_names.contains_key(name) {
            return Err(LookupError::DuplicateDistanceMatrix(name.to_string()).into());
        }
        let matrix = DistanceMatrix::new(name, matrix, labels)?;
        debug!(
            "distance matrix '{}' of shape {:?} with {} entries",
            name,
            matrix.shape(),
            matrix.matrix.nnz()
        );
        self.matrix_names.insert(name.to_string(), self.matrices.len());
        self.matrices.push(matrix);
        Ok(())
    }

    /// Resolve `column` of every clonotype to a label of the distance matrix
    /// `matrix_name`. Values without a label are never looked up as neighbors.
    pub fn add_lookup_table(
        &mut self,
        name: &str,
        column: ClonotypeColumn,
        matrix_name: &str,
    ) -> Result<LookupHandle> {
        if self.table_names.contains_key(name) {
            return Err(LookupError::DuplicateLookupTable(name.to_string()).into());
        }
        let matrix_idx = *self
            .matrix_names
            .get(matrix_name)
            .ok_or_else(|| LookupError::UnknownDistanceMatrix(matrix_name.to_string()))?;
        let matrix = &self.matrices[matrix_idx];

        let forward: Vec<Option<usize>> = self
            .query
            .labels(column)
            .map(|label| label.and_then(|l| matrix.index_of(&l)))
            .collect();

        let mut reverse = vec![Vec::new(); matrix.labels().len()];
        for (ct_idx, label) in self.reference.labels(column).enumerate() {
            if let Some(label_idx) = label.and_then(|l| matrix.index_of(&l)) {
                reverse[label_idx].push(ct_idx);
            }
        }

        let handle = LookupHandle(self.tables.len());
        self.tables.push(LookupTable {
            name: name.to_string(),
            matrix: matrix_idx,
            forward,
            reverse,
        });
        self.table_names.insert(name.to_string(), handle);
        Ok(handle)
    }

    pub fn handle(&self, name: &str) -> Result<LookupHandle> {
        self.table_names
            .get(name)
            .copied()
            .ok_or_else(|| LookupError::UnknownLookupTable(name.to_string()).into())
    }

    fn table(&self, handle: LookupHandle) -> Result<&LookupTable> {
        self.tables
            .get(handle.0)
            .ok_or_else(|| LookupError::UnknownLookupTable(format!("#{}", handle.0)).into())
    }

    /// Distances from query clonotype `ct_id` to all reference clonotypes,
    /// resolving the query's label via `forward_table` and the reference
    /// clonotypes via `reverse_table`.
    pub fn lookup(
        &self,
        ct_id: usize,
        forward_table: &str,
        reverse_table: &str,
    ) -> Result<CsVec<f64>> {
        self.lookup_by_handle(ct_id, self.handle(forward_table)?, self.handle(reverse_table)?)
    }

    /// Like [`Self::lookup`], with resolved tables. The returned row has one
    /// entry per reference clonotype and is empty if the query clonotype has
    /// no label in `forward`.
    pub fn lookup_by_handle(
        &self,
        ct_id: usize,
        forward: LookupHandle,
        reverse: LookupHandle,
    ) -> Result<CsVec<f64>> {
        let forward = self.table(forward)?;
        let reverse = self.table(reverse)?;
        if forward.matrix != reverse.matrix {
            return Err(LookupError::MatrixMismatch {
                forward: forward.name.clone(),
                reverse: reverse.name.clone(),
            }
            .into());
        }
        let label_idx = *forward
            .forward
            .get(ct_id)
            .ok_or(LookupError::ClonotypeOutOfRange {
                index: ct_id,
                n_clonotypes: forward.forward.len(),
            })?;

        let n_reference = self.reference.len();
        let Some(label_idx) = label_idx else {
            return Ok(CsVec::empty(n_reference));
        };
        let Some(row) = self.matrices[forward.matrix].matrix.outer_view(label_idx) else {
            return Ok(CsVec::empty(n_reference));
        };

        let mut entries: Vec<(usize, f64)> = row
            .iter()
            .filter(|&(_, &dist)| dist != 0.0)
            .flat_map(|(neighbor, &dist)| {
                reverse.reverse[neighbor]
                    .iter()
                    .map(move |&ct| (ct, dist))
            })
            .collect();
        entries.sort_unstable_by_key(|&(ct, _)| ct);
        let (indices, data): (Vec<_>, Vec<_>) = entries.into_iter().unzip();
        CsVec::try_new(n_reference, indices, data).map_err(|(_, _, err)| err.into())
    }
}
