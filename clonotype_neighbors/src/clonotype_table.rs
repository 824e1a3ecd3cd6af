//! Deduplication of cells into clonotypes: unique combinations of receptor
//! chain sequences, optionally v-genes and grouping columns.

use crate::cell::CellRecord;
use crate::errors::{ConsistencyError, ValidationError};
use crate::label::{GroupKey, Label};
use crate::params::NeighborParams;
use anyhow::Result;
use fxhash::{FxHashMap, FxHashSet};
use itertools::Itertools;
use log::debug;
use std::fmt;
use vdj_types::{ChainSlot, ReceptorArm, SequenceKind};

/// The features that make up a clonotype.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClonotypeFeatures {
    pub arms: Vec<ReceptorArm>,
    pub slots: Vec<ChainSlot>,
    pub sequence: SequenceKind,
    pub v_gene: bool,
    pub group_columns: Vec<String>,
}

impl ClonotypeFeatures {
    pub fn from_params(params: &NeighborParams) -> Self {
        ClonotypeFeatures {
            arms: params.receptor_arms.arms().to_vec(),
            slots: params.dual_ir.slots().to_vec(),
            sequence: params.sequence,
            v_gene: params.same_v_gene,
            group_columns: params.group_columns().to_vec(),
        }
    }

    pub fn sequence_columns(&self) -> Vec<ClonotypeColumn> {
        self.arms
            .iter()
            .cartesian_product(&self.slots)
            .map(|(&arm, &slot)| ClonotypeColumn::Sequence(arm, slot))
            .collect()
    }

    /// Empty unless v-genes are part of the clonotype definition.
    pub fn v_gene_columns(&self) -> Vec<ClonotypeColumn> {
        if !self.v_gene {
            return Vec::new();
        }
        self.arms
            .iter()
            .cartesian_product(&self.slots)
            .map(|(&arm, &slot)| ClonotypeColumn::VGene(arm, slot))
            .collect()
    }

    fn has_group(&self) -> bool {
        !self.group_columns.is_empty()
    }
}

/// A column of the clonotype table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClonotypeColumn {
    Sequence(ReceptorArm, ChainSlot),
    VGene(ReceptorArm, ChainSlot),
    /// The composite key of all grouping columns
    Group,
}

impl fmt::Display for ClonotypeColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClonotypeColumn::Sequence(arm, slot) => write!(f, "{arm}_{slot}"),
            ClonotypeColumn::VGene(arm, slot) => write!(f, "{arm}_{slot}_v_gene"),
            ClonotypeColumn::Group => write!(f, "group"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ChainFields {
    pub sequence: Option<String>,
    pub v_gene: Option<String>,
}

/// One unique receptor configuration. Fields that are not part of the
/// clonotype definition are always `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Clonotype {
    chains: [[ChainFields; 2]; 2],
    group: Option<GroupKey>,
}

impl Clonotype {
    fn from_cell(cell: &CellRecord, features: &ClonotypeFeatures) -> Self {
        let mut clonotype = Clonotype::default();
        for (&arm, &slot) in features.arms.iter().cartesian_product(&features.slots) {
            let chain = cell.get_chain(arm, slot);
            let fields = &mut clonotype.chains[arm.index()][slot.index()];
            fields.sequence = chain
                .and_then(|c| c.sequence(features.sequence))
                .map(str::to_string);
            if features.v_gene {
                fields.v_gene = chain.and_then(|c| c.v_gene()).map(str::to_string);
            }
        }
        if features.has_group() {
            clonotype.group = Some(GroupKey(
                features
                    .group_columns
                    .iter()
                    .map(|col| cell.get_field(col).map(str::to_string))
                    .collect(),
            ));
        }
        clonotype
    }

    pub fn chain(&self, arm: ReceptorArm, slot: ChainSlot) -> &ChainFields {
        &self.chains[arm.index()][slot.index()]
    }

    pub fn sequence(&self, arm: ReceptorArm, slot: ChainSlot) -> Option<&str> {
        self.chain(arm, slot).sequence.as_deref()
    }

    pub fn v_gene(&self, arm: ReceptorArm, slot: ChainSlot) -> Option<&str> {
        self.chain(arm, slot).v_gene.as_deref()
    }

    pub fn group(&self) -> Option<&GroupKey> {
        self.group.as_ref()
    }

    /// The distance matrix label of this clonotype in `column`, `None` if
    /// missing. A missing v-gene is labelled [`Label::Missing`], so clonotypes
    /// lacking one agree on it.
    pub fn label(&self, column: ClonotypeColumn) -> Option<Label> {
        match column {
            ClonotypeColumn::Sequence(arm, slot) => self.sequence(arm, slot).map(Label::from),
            ClonotypeColumn::VGene(arm, slot) => {
                Some(self.v_gene(arm, slot).map_or(Label::Missing, Label::from))
            }
            ClonotypeColumn::Group => self.group.clone().map(Label::from),
        }
    }

    /// Number of `columns` this clonotype has no value in.
    pub fn missing_count(&self, columns: &[ClonotypeColumn]) -> usize {
        columns
            .iter()
            .filter(|&&col| self.label(col).is_none())
            .count()
    }
}

/// Unique clonotypes in order of first appearance, along with the cells
/// that collapse into each of them.
#[derive(Debug, Clone, PartialEq)]
pub struct ClonotypeTable {
    features: ClonotypeFeatures,
    clonotypes: Vec<Clonotype>,
    cell_indices: Vec<Vec<String>>,
}

impl ClonotypeTable {
    /// Group all cells with immune receptor information into clonotypes.
    pub fn build(cells: &[CellRecord], features: &ClonotypeFeatures) -> Result<Self> {
        let mut seen_ids = FxHashSet::default();
        for cell in cells {
            if !seen_ids.insert(cell.cell_id.as_str()) {
                return Err(ValidationError::DuplicateCellId {
                    cell_id: cell.cell_id.clone(),
                }
                .into());
            }
        }

        let mut index_of: FxHashMap<Clonotype, usize> = FxHashMap::default();
        let mut clonotypes = Vec::new();
        let mut cell_indices: Vec<Vec<String>> = Vec::new();
        let mut n_ir_cells = 0;
        for cell in cells.iter().filter(|c| c.has_ir) {
            n_ir_cells += 1;
            let clonotype = Clonotype::from_cell(cell, features);
            let idx = *index_of.entry(clonotype).or_insert_with_key(|ct| {
                clonotypes.push(ct.clone());
                cell_indices.push(Vec::new());
                clonotypes.len() - 1
            });
            cell_indices[idx].push(cell.cell_id.clone());
        }

        if clonotypes.is_empty() {
            return Err(ValidationError::NoReceptorCells {
                n_cells: cells.len(),
            }
            .into());
        }
        debug!(
            "{} of {} cells carry receptor information, forming {} clonotypes",
            n_ir_cells,
            cells.len(),
            clonotypes.len()
        );

        let table = ClonotypeTable {
            features: features.clone(),
            clonotypes,
            cell_indices,
        };
        table.check_no_orphan_secondary()?;
        Ok(table)
    }

    fn check_no_orphan_secondary(&self) -> Result<()> {
        if !self.features.slots.contains(&ChainSlot::Secondary) {
            return Ok(());
        }
        for (idx, clonotype) in self.clonotypes.iter().enumerate() {
            for &arm in &self.features.arms {
                if clonotype.sequence(arm, ChainSlot::Primary).is_none()
                    && clonotype.sequence(arm, ChainSlot::Secondary).is_some()
                {
                    return Err(ConsistencyError::OrphanSecondaryChain {
                        clonotype: idx,
                        arm,
                        cell_id: self.cell_indices[idx][0].clone(),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.clonotypes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clonotypes.is_empty()
    }

    pub fn features(&self) -> &ClonotypeFeatures {
        &self.features
    }

    pub fn clonotypes(&self) -> &[Clonotype] {
        &self.clonotypes
    }

    pub fn clonotype(&self, idx: usize) -> &Clonotype {
        &self.clonotypes[idx]
    }

    /// For every clonotype, the identifiers of its cells in input order.
    pub fn cell_indices(&self) -> &[Vec<String>] {
        &self.cell_indices
    }

    /// Labels of every clonotype in `column`, in table order.
    pub fn labels(&self, column: ClonotypeColumn) -> impl Iterator<Item = Option<Label>> + '_ {
        self.clonotypes.iter().map(move |ct| ct.label(column))
    }
}

/// Sorted unique labels found in any of `columns` of any of `tables`.
pub fn unique_labels(tables: &[&ClonotypeTable], columns: &[ClonotypeColumn]) -> Vec<Label> {
    tables
        .iter()
        .copied()
        .flat_map(|table| columns.iter().flat_map(move |&col| table.labels(col)))
        .flatten()
        .sorted()
        .dedup()
        .collect()
}
