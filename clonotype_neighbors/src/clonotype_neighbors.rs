//! Clonotype x clonotype distances from per-arm sequence distances.

use crate::cell::CellRecord;
use crate::chain_distance::{reduce_and, reduce_or, ChainDistance};
use crate::clonotype_table::{unique_labels, ClonotypeColumn, ClonotypeFeatures, ClonotypeTable};
use crate::distance_bundle::DistanceBundle;
use crate::label::Label;
use crate::neighbor_finder::{DoubleLookupNeighborFinder, LookupHandle};
use crate::params::NeighborParams;
use anyhow::Result;
use itertools::Itertools;
use log::{debug, info};
use par_proc::{process_in_order, process_sequential, Proc};
use sprs::{CsMat, CsVec};
use std::sync::Arc;
use std::time::Instant;
use vdj_types::{ArmPolicy, ChainSlot, DualIrPolicy, ReceptorArm};

const V_GENE_MATRIX: &str = "v_gene";
const GROUP_MATRIX: &str = "group";

/// Result of [`ClonotypeNeighbors::compute`].
#[derive(Debug, Clone, PartialEq)]
pub struct ClonotypeDistances {
    /// Query clonotypes x reference clonotypes. Zero means "not a neighbor".
    pub distances: CsMat<f64>,
    /// Cells of every query clonotype.
    pub cell_indices: Vec<Vec<String>>,
    /// Cells of every reference clonotype, if a separate reference was given.
    pub reference_cell_indices: Option<Vec<Vec<String>>>,
}

/// Lookup tables indexed by [arm][slot].
#[derive(Debug, Clone, Default)]
struct LookupHandles {
    sequence: [[Option<LookupHandle>; 2]; 2],
    v_gene: [[Option<LookupHandle>; 2]; 2],
    group: Option<LookupHandle>,
}

/// Lookup rows indexed by [arm][query slot][reference slot].
type ChainPairRows = [[[Option<CsVec<f64>>; 2]; 2]; 2];

/// Computes the distances between clonotypes, or between query and reference
/// clonotypes.
#[derive(Debug)]
pub struct ClonotypeNeighbors {
    params: NeighborParams,
    query: Arc<ClonotypeTable>,
    reference: Arc<ClonotypeTable>,
    has_reference: bool,
    neighbor_finder: DoubleLookupNeighborFinder,
    handles: LookupHandles,
}

impl ClonotypeNeighbors {
    /// Prepare the distance computation between all clonotypes of `cells`.
    pub fn new(
        cells: &[CellRecord],
        bundle: &DistanceBundle,
        params: NeighborParams,
    ) -> Result<Self> {
        Self::prepare(cells, None, bundle, params)
    }

    /// Prepare the distance computation between the clonotypes of `cells` and
    /// the clonotypes of `reference`. `bundle` must cover the sequences of both.
    pub fn with_reference(
        cells: &[CellRecord],
        reference: &[CellRecord],
        bundle: &DistanceBundle,
        params: NeighborParams,
    ) -> Result<Self> {
        Self::prepare(cells, Some(reference), bundle, params)
    }

    fn prepare(
        cells: &[CellRecord],
        reference: Option<&[CellRecord]>,
        bundle: &DistanceBundle,
        params: NeighborParams,
    ) -> Result<Self> {
        params.validate(reference.is_some())?;
        bundle.check_params(&params)?;
        params.log_non_defaults();

        let start = Instant::now();
        info!("Initializing lookup tables.");

        let features = ClonotypeFeatures::from_params(&params);
        let query = Arc::new(ClonotypeTable::build(cells, &features)?);
        let reference_table = match reference {
            Some(reference) => Arc::new(ClonotypeTable::build(reference, &features)?),
            None => query.clone(),
        };
        let mut neighbor_finder =
            DoubleLookupNeighborFinder::new(query.clone(), reference_table.clone());

        for &arm in params.receptor_arms.arms() {
            let arm_distances = bundle.require_arm(arm)?;
            let labels = arm_distances
                .seqs
                .iter()
                .map(|s| Label::from(s.as_str()))
                .collect();
            neighbor_finder.add_distance_matrix(
                &arm.to_string(),
                arm_distances.distances.clone(),
                labels,
            )?;
        }

        let tables = [query.as_ref(), reference_table.as_ref()];
        if features.v_gene {
            let v_genes = unique_labels(&tables, &features.v_gene_columns());
            neighbor_finder.add_distance_matrix(
                V_GENE_MATRIX,
                CsMat::eye(v_genes.len()),
                v_genes,
            )?;
        }
        if !features.group_columns.is_empty() {
            let groups = unique_labels(&tables, &[ClonotypeColumn::Group]);
            neighbor_finder.add_distance_matrix(GROUP_MATRIX, CsMat::eye(groups.len()), groups)?;
        }

        let mut handles = LookupHandles::default();
        for (&arm, &slot) in features.arms.iter().cartesian_product(&features.slots) {
            let column = ClonotypeColumn::Sequence(arm, slot);
            let handle =
                neighbor_finder.add_lookup_table(&column.to_string(), column, &arm.to_string())?;
            handles.sequence[arm.index()][slot.index()] = Some(handle);
            if features.v_gene {
                let column = ClonotypeColumn::VGene(arm, slot);
                let handle =
                    neighbor_finder.add_lookup_table(&column.to_string(), column, V_GENE_MATRIX)?;
                handles.v_gene[arm.index()][slot.index()] = Some(handle);
            }
        }
        if !features.group_columns.is_empty() {
            let column = ClonotypeColumn::Group;
            handles.group =
                Some(neighbor_finder.add_lookup_table(&column.to_string(), column, GROUP_MATRIX)?);
        }

        debug!(
            "{} query clonotypes, {} reference clonotypes",
            query.len(),
            reference_table.len()
        );
        info!("Done initializing lookup tables ({:.2?}).", start.elapsed());

        Ok(ClonotypeNeighbors {
            params,
            query,
            reference: reference_table,
            has_reference: reference.is_some(),
            neighbor_finder,
            handles,
        })
    }

    pub fn params(&self) -> &NeighborParams {
        &self.params
    }

    pub fn clonotypes(&self) -> &ClonotypeTable {
        &self.query
    }

    /// The clonotypes distances are computed against; the query clonotypes
    /// themselves unless a reference was given.
    pub fn reference_clonotypes(&self) -> &ClonotypeTable {
        &self.reference
    }

    pub fn neighbor_finder(&self) -> &DoubleLookupNeighborFinder {
        &self.neighbor_finder
    }

    fn handle(
        handles: &[[Option<LookupHandle>; 2]; 2],
        arm: ReceptorArm,
        slot: ChainSlot,
    ) -> Result<LookupHandle> {
        handles[arm.index()][slot.index()]
            .ok_or_else(|| anyhow::anyhow!("no lookup table for {arm}_{slot}"))
    }

    /// Distance row of query clonotype `ct_id` against all reference clonotypes.
    pub fn dist_for_clonotype(&self, ct_id: usize) -> Result<CsVec<f64>> {
        use ChainSlot::{Primary, Secondary};
        let arms = self.params.receptor_arms.arms();
        let chain_pairs = self.params.dual_ir.chain_pairs();

        let mut rows = ChainPairRows::default();
        for &arm in arms {
            for &(query_slot, reference_slot) in chain_pairs {
                let mut row = self.neighbor_finder.lookup_by_handle(
                    ct_id,
                    Self::handle(&self.handles.sequence, arm, query_slot)?,
                    Self::handle(&self.handles.sequence, arm, reference_slot)?,
                )?;
                if self.params.same_v_gene {
                    let same_v_gene = self.neighbor_finder.lookup_by_handle(
                        ct_id,
                        Self::handle(&self.handles.v_gene, arm, query_slot)?,
                        Self::handle(&self.handles.v_gene, arm, reference_slot)?,
                    )?;
                    row = restrict_to(&row, &same_v_gene);
                }
                rows[arm.index()][query_slot.index()][reference_slot.index()] = Some(row);
            }
        }

        let n_reference = self.reference.len();
        // only columns with at least one recorded distance can be neighbors
        let has_distance: Vec<usize> = rows
            .iter()
            .flatten()
            .flatten()
            .flatten()
            .map(|row| row.indices().iter().copied())
            .kmerge()
            .dedup()
            .collect();
        if has_distance.is_empty() {
            return Ok(CsVec::empty(n_reference));
        }

        let same_group = match self.handles.group {
            Some(h) => Some(self.neighbor_finder.lookup_by_handle(ct_id, h, h)?),
            None => None,
        };

        let query = self.query.clonotype(ct_id);
        let primary_columns: Vec<_> = arms
            .iter()
            .map(|&arm| ClonotypeColumn::Sequence(arm, ChainSlot::Primary))
            .collect();
        let n_missing_primary = query.missing_count(&primary_columns);
        let n_missing_per_arm: Vec<usize> = arms
            .iter()
            .map(|&arm| {
                query.missing_count(&[
                    ClonotypeColumn::Sequence(arm, ChainSlot::Primary),
                    ClonotypeColumn::Sequence(arm, ChainSlot::Secondary),
                ])
            })
            .collect();

        let mut indices = Vec::with_capacity(has_distance.len());
        let mut data = Vec::with_capacity(has_distance.len());
        for col in has_distance {
            if let Some(same_group) = &same_group {
                if same_group.get(col).map_or(true, |&v| v == 0.0) {
                    continue;
                }
            }
            let target = self.reference.clonotype(col);
            let pair = |arm: ReceptorArm, query_slot: ChainSlot, reference_slot: ChainSlot| {
                let distance = rows[arm.index()][query_slot.index()][reference_slot.index()]
                    .as_ref()
                    .and_then(|row| row.get(col))
                    .copied()
                    .unwrap_or(0.0);
                ChainDistance::from_lookup(distance, target.sequence(arm, reference_slot).is_some())
            };

            let per_arm = arms.iter().zip(&n_missing_per_arm).map(|(&arm, &n_missing)| {
                match self.params.dual_ir {
                    DualIrPolicy::PrimaryOnly => pair(arm, Primary, Primary),
                    DualIrPolicy::All => reduce_or([
                        reduce_and(
                            [pair(arm, Primary, Primary), pair(arm, Secondary, Secondary)],
                            n_missing,
                        ),
                        reduce_and(
                            [pair(arm, Primary, Secondary), pair(arm, Secondary, Primary)],
                            n_missing,
                        ),
                    ]),
                    DualIrPolicy::Any => reduce_or([
                        pair(arm, Primary, Primary),
                        pair(arm, Primary, Secondary),
                        pair(arm, Secondary, Secondary),
                        pair(arm, Secondary, Primary),
                    ]),
                }
            });
            // the primary chains suffice here: a secondary chain never comes
            // without a primary one
            let distance = match self.params.receptor_arms {
                ArmPolicy::All => reduce_and(per_arm, n_missing_primary),
                ArmPolicy::Any | ArmPolicy::VJ | ArmPolicy::VDJ => reduce_or(per_arm),
            }
            .value();
            if distance != 0.0 {
                indices.push(col);
                data.push(distance);
            }
        }

        Ok(CsVec::try_new(n_reference, indices, data).map_err(|(_, _, err)| err)?)
    }

    /// Distances between all query clonotypes (rows) and all reference
    /// clonotypes (columns), in table order.
    pub fn compute_distances(&self) -> Result<CsMat<f64>> {
        let start = Instant::now();
        info!("Computing clonotype x clonotype distances.");

        let n_clonotypes = self.query.len();
        let n_jobs = self.params.n_jobs();
        let chunk_size = self.params.chunk_size;
        debug!("{n_clonotypes} rows on {n_jobs} threads in chunks of {chunk_size}");

        let rows = if n_jobs == 1 {
            process_sequential(0..n_clonotypes, RowProcessor { neighbors: self })?
        } else {
            let processors = (0..n_jobs).map(|_| RowProcessor { neighbors: self }).collect();
            process_in_order(0..n_clonotypes, processors, chunk_size)?
        };
        let dist = stack_rows(rows, self.reference.len())?;

        info!(
            "Done computing clonotype x clonotype distances ({:.2?}).",
            start.elapsed()
        );
        Ok(dist)
    }

    /// Compute the distances along with the cells of every clonotype.
    pub fn compute(&self) -> Result<ClonotypeDistances> {
        Ok(ClonotypeDistances {
            distances: self.compute_distances()?,
            cell_indices: self.query.cell_indices().to_vec(),
            reference_cell_indices: self
                .has_reference
                .then(|| self.reference.cell_indices().to_vec()),
        })
    }
}

struct RowProcessor<'a> {
    neighbors: &'a ClonotypeNeighbors,
}

impl Proc for RowProcessor<'_> {
    type Item = usize;
    type Output = CsVec<f64>;
    type Err = anyhow::Error;

    fn process(&mut self, ct_id: usize) -> Result<CsVec<f64>> {
        self.neighbors.dist_for_clonotype(ct_id)
    }
}

/// Entries of `row` where `mask` has a nonzero entry.
fn restrict_to(row: &CsVec<f64>, mask: &CsVec<f64>) -> CsVec<f64> {
    let mut restricted = CsVec::empty(row.dim());
    for (idx, &value) in row.iter() {
        if mask.get(idx).is_some_and(|&m| m != 0.0) {
            restricted.append(idx, value);
        }
    }
    restricted
}

/// Stack rows into a CSR matrix, dropping explicit zeros.
fn stack_rows(rows: Vec<CsVec<f64>>, n_cols: usize) -> Result<CsMat<f64>> {
    let n_rows = rows.len();
    let mut indptr = Vec::with_capacity(n_rows + 1);
    let mut indices = Vec::new();
    let mut data = Vec::new();
    indptr.push(0);
    for row in rows {
        for (idx, &value) in row.iter() {
            if value != 0.0 {
                indices.push(idx);
                data.push(value);
            }
        }
        indptr.push(indices.len());
    }
    Ok(CsMat::try_new((n_rows, n_cols), indptr, indices, data).map_err(|(_, _, _, err)| err)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::ChainAnnotation;
    use crate::errors::{ConsistencyError, ValidationError};
    use crate::testing::{bundle, cell, seq_distances};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use vdj_types::SequenceKind;

    fn params(receptor_arms: ArmPolicy, dual_ir: DualIrPolicy) -> NeighborParams {
        NeighborParams {
            receptor_arms,
            dual_ir,
            n_jobs: Some(1),
            ..Default::default()
        }
    }

    fn dense(matrix: &CsMat<f64>) -> Vec<Vec<f64>> {
        matrix
            .to_dense()
            .outer_iter()
            .map(|row| row.to_vec())
            .collect()
    }

    #[test]
    fn test_primary_only_ignores_secondary_chains() -> Result<()> {
        let cells = vec![
            cell("c0", &["AAA", "XXX"], &["KKK"]),
            cell("c1", &["AAA", "YYY"], &["RRR"]),
            cell("c2", &["AAB"], &["KKK"]),
            cell("c3", &["CCC"], &["KKK"]),
        ];
        let bundle = bundle(
            seq_distances(&["AAA", "AAB", "CCC", "XXX", "YYY"], &[(0, 1, 2.0)]),
            seq_distances(&["KKK", "RRR"], &[]),
        );
        let ctn = ClonotypeNeighbors::new(
            &cells,
            &bundle,
            params(ArmPolicy::VJ, DualIrPolicy::PrimaryOnly),
        )?;
        // c0 and c1 only differ in their secondary chain
        assert_eq!(ctn.clonotypes().len(), 3);
        assert_eq!(
            ctn.clonotypes().cell_indices()[0],
            vec!["c0".to_string(), "c1".to_string()]
        );
        assert_eq!(
            dense(&ctn.compute_distances()?),
            vec![
                vec![1.0, 2.0, 0.0],
                vec![2.0, 1.0, 0.0],
                vec![0.0, 0.0, 1.0],
            ]
        );
        Ok(())
    }

    #[test]
    fn test_arms_all_requires_both_arms() -> Result<()> {
        let cells = vec![
            cell("c0", &["AAA"], &["KKK"]),
            cell("c1", &["AAA"], &["RRR"]),
            cell("c2", &["AAB"], &["KKR"]),
        ];
        let bundle = bundle(
            seq_distances(&["AAA", "AAB"], &[(0, 1, 3.0)]),
            seq_distances(&["KKK", "KKR", "RRR"], &[(0, 1, 5.0)]),
        );
        let ctn = ClonotypeNeighbors::new(
            &cells,
            &bundle,
            params(ArmPolicy::All, DualIrPolicy::PrimaryOnly),
        )?;
        assert_eq!(
            dense(&ctn.compute_distances()?),
            vec![
                vec![1.0, 0.0, 5.0],
                vec![0.0, 1.0, 0.0],
                vec![5.0, 0.0, 1.0],
            ]
        );

        let ctn = ClonotypeNeighbors::new(
            &cells,
            &bundle,
            params(ArmPolicy::Any, DualIrPolicy::PrimaryOnly),
        )?;
        assert_eq!(
            dense(&ctn.compute_distances()?),
            vec![
                vec![1.0, 1.0, 3.0],
                vec![1.0, 1.0, 3.0],
                vec![3.0, 3.0, 1.0],
            ]
        );
        Ok(())
    }

    #[test]
    fn test_arms_all_with_missing_arm() -> Result<()> {
        let cells = vec![
            cell("c0", &["AAA"], &[]),
            cell("c1", &["AAA"], &["KKK"]),
            cell("c2", &["AAA"], &[]),
            cell("c3", &[], &["KKK"]),
        ];
        let bundle = bundle(
            seq_distances(&["AAA"], &[]),
            seq_distances(&["KKK"], &[]),
        );
        let ctn = ClonotypeNeighbors::new(
            &cells,
            &bundle,
            params(ArmPolicy::All, DualIrPolicy::PrimaryOnly),
        )?;
        // c0 and c2 share a clonotype; VJ-only and full receptors are not neighbors
        assert_eq!(ctn.clonotypes().len(), 3);
        assert_eq!(
            dense(&ctn.compute_distances()?),
            vec![
                vec![1.0, 0.0, 0.0],
                vec![0.0, 1.0, 0.0],
                vec![0.0, 0.0, 1.0],
            ]
        );
        Ok(())
    }

    #[test]
    fn test_same_v_gene() -> Result<()> {
        let with_v = |id: &str, v_call: &str| {
            cell(id, &[], &[]).chain(
                ReceptorArm::VJ,
                ChainSlot::Primary,
                ChainAnnotation::with_junction_aa("AAA").v_call(v_call),
            )
        };
        let cells = vec![
            with_v("c0", "TRAV1"),
            with_v("c1", "TRAV2"),
            with_v("c2", "TRAV1"),
            cell("c3", &["AAA"], &[]),
        ];
        let bundle = bundle(seq_distances(&["AAA"], &[]), seq_distances(&[], &[]));
        let mut p = params(ArmPolicy::VJ, DualIrPolicy::PrimaryOnly);

        let ctn = ClonotypeNeighbors::new(&cells, &bundle, p.clone())?;
        assert_eq!(ctn.clonotypes().len(), 1);
        assert_eq!(dense(&ctn.compute_distances()?), vec![vec![1.0]]);

        p.same_v_gene = true;
        let ctn = ClonotypeNeighbors::new(&cells, &bundle, p)?;
        assert_eq!(ctn.clonotypes().len(), 3);
        // a missing v-gene only matches another missing v-gene
        assert_eq!(
            dense(&ctn.compute_distances()?),
            vec![
                vec![1.0, 0.0, 0.0],
                vec![0.0, 1.0, 0.0],
                vec![0.0, 0.0, 1.0],
            ]
        );
        Ok(())
    }

    #[test]
    fn test_same_v_gene_without_annotations() -> Result<()> {
        let cells = vec![
            cell("c0", &["AAA"], &["KKK"]),
            cell("c1", &["AAA"], &["KKK"]),
            cell("c2", &["CCC"], &["KKK"]),
        ];
        let bundle = bundle(
            seq_distances(&["AAA", "CCC"], &[(0, 1, 2.0)]),
            seq_distances(&["KKK"], &[]),
        );
        let p = NeighborParams {
            same_v_gene: true,
            ..params(ArmPolicy::All, DualIrPolicy::Any)
        };
        let ctn = ClonotypeNeighbors::new(&cells, &bundle, p)?;
        assert_eq!(ctn.clonotypes().len(), 2);
        assert_eq!(
            dense(&ctn.compute_distances()?),
            vec![vec![1.0, 2.0], vec![2.0, 1.0]]
        );
        Ok(())
    }

    #[test]
    fn test_within_group() -> Result<()> {
        let cells = vec![
            cell("c0", &["AAA"], &["KKK"]).field("patient", "P1"),
            cell("c1", &["AAA"], &["KKK"]).field("patient", "P2"),
            cell("c2", &["AAB"], &["KKK"]).field("patient", "P1"),
        ];
        let bundle = bundle(
            seq_distances(&["AAA", "AAB"], &[(0, 1, 2.0)]),
            seq_distances(&["KKK"], &[]),
        );
        let p = NeighborParams {
            within_group: vec!["patient".to_string()],
            ..params(ArmPolicy::All, DualIrPolicy::Any)
        };
        let ctn = ClonotypeNeighbors::new(&cells, &bundle, p)?;
        assert_eq!(
            dense(&ctn.compute_distances()?),
            vec![
                vec![1.0, 0.0, 2.0],
                vec![0.0, 1.0, 0.0],
                vec![2.0, 0.0, 1.0],
            ]
        );
        Ok(())
    }

    #[test]
    fn test_dual_ir_all() -> Result<()> {
        let cells = vec![
            cell("c0", &["AAA", "BBB"], &[]),
            cell("c1", &["BBB", "AAA"], &[]),
            cell("c2", &["AAA"], &[]),
            cell("c3", &["AAA", "CCC"], &[]),
        ];
        let bundle = bundle(
            seq_distances(&["AAA", "BBB", "CCC"], &[(1, 2, 4.0)]),
            seq_distances(&[], &[]),
        );
        let ctn = ClonotypeNeighbors::new(
            &cells,
            &bundle,
            params(ArmPolicy::VJ, DualIrPolicy::All),
        )?;
        assert_eq!(
            dense(&ctn.compute_distances()?),
            vec![
                vec![1.0, 1.0, 0.0, 4.0],
                vec![1.0, 1.0, 0.0, 4.0],
                vec![0.0, 0.0, 1.0, 0.0],
                vec![4.0, 4.0, 0.0, 1.0],
            ]
        );

        let ctn = ClonotypeNeighbors::new(
            &cells,
            &bundle,
            params(ArmPolicy::VJ, DualIrPolicy::Any),
        )?;
        assert_eq!(
            dense(&ctn.compute_distances()?),
            vec![
                vec![1.0, 1.0, 1.0, 1.0],
                vec![1.0, 1.0, 1.0, 1.0],
                vec![1.0, 1.0, 1.0, 1.0],
                vec![1.0, 1.0, 1.0, 1.0],
            ]
        );
        Ok(())
    }

    #[test]
    fn test_query_reference() -> Result<()> {
        let query = vec![
            cell("q0", &["AAA"], &["KKK"]).field("hla", "A2"),
            cell("q1", &["AAB"], &["KKK"]).field("hla", "A1"),
            cell("q2", &["CCC"], &["KKK"]).field("hla", "A2"),
        ];
        let reference = vec![
            cell("r0", &["AAB"], &["KKK"]).field("hla", "A2"),
            cell("r1", &["AAA"], &["KKK"]).field("hla", "A1"),
            cell("r2", &["AAA"], &["KKK"]).field("hla", "A2"),
        ];
        let bundle = bundle(
            seq_distances(&["AAA", "AAB", "CCC"], &[(0, 1, 2.0)]),
            seq_distances(&["KKK"], &[]),
        );

        let p = params(ArmPolicy::All, DualIrPolicy::PrimaryOnly);
        let ctn = ClonotypeNeighbors::with_reference(&query, &reference, &bundle, p.clone())?;
        let res = ctn.compute()?;
        // without match_columns, r1 and r2 are one clonotype
        assert_eq!(res.distances.shape(), (3, 2));
        assert_eq!(
            dense(&res.distances),
            vec![vec![2.0, 1.0], vec![1.0, 2.0], vec![0.0, 0.0]]
        );
        assert_eq!(
            res.reference_cell_indices,
            Some(vec![
                vec!["r0".to_string()],
                vec!["r1".to_string(), "r2".to_string()]
            ])
        );

        let p = NeighborParams {
            match_columns: vec!["hla".to_string()],
            ..p
        };
        let ctn = ClonotypeNeighbors::with_reference(&query, &reference, &bundle, p)?;
        let res = ctn.compute()?;
        assert_eq!(
            dense(&res.distances),
            vec![
                vec![2.0, 0.0, 1.0],
                vec![0.0, 2.0, 0.0],
                vec![0.0, 0.0, 0.0],
            ]
        );
        assert_eq!(res.cell_indices.len(), 3);
        Ok(())
    }

    #[test]
    fn test_compute_is_idempotent_and_parallel_safe() -> Result<()> {
        let seqs = ["AAA", "AAB", "ABB", "BBB", "CCC"];
        let cells: Vec<_> = (0..60)
            .map(|i| {
                cell(
                    &format!("c{i}"),
                    &[seqs[i % 5], seqs[(i / 5) % 5]],
                    &[seqs[(i / 2) % 5]],
                )
            })
            .collect();
        let dist = || seq_distances(&seqs, &[(0, 1, 2.0), (1, 2, 3.0), (2, 3, 2.0)]);
        let bundle = bundle(dist(), dist());

        let sequential = ClonotypeNeighbors::new(&cells, &bundle, params(ArmPolicy::All, DualIrPolicy::Any))?;
        let first = sequential.compute()?;
        let second = sequential.compute()?;
        assert_eq!(first, second);

        let parallel = ClonotypeNeighbors::new(
            &cells,
            &bundle,
            NeighborParams {
                n_jobs: Some(4),
                chunk_size: 3,
                ..params(ArmPolicy::All, DualIrPolicy::Any)
            },
        )?;
        assert_eq!(parallel.compute()?, first);
        Ok(())
    }

    #[test]
    fn test_lookup_names() -> Result<()> {
        let cells = vec![cell("c0", &["AAA"], &["KKK"])];
        let bundle = bundle(seq_distances(&["AAA"], &[]), seq_distances(&["KKK"], &[]));
        let p = NeighborParams {
            same_v_gene: true,
            within_group: vec!["patient".to_string()],
            ..params(ArmPolicy::All, DualIrPolicy::Any)
        };
        let ctn = ClonotypeNeighbors::new(&cells, &bundle, p)?;
        let finder = ctn.neighbor_finder();
        for name in ["VJ_1", "VJ_2", "VDJ_1", "VDJ_2", "VJ_1_v_gene", "VDJ_2_v_gene", "group"] {
            assert!(finder.handle(name).is_ok(), "{name}");
        }
        assert_eq!(finder.lookup(0, "VJ_1", "VJ_1")?.nnz(), 1);
        assert!(finder.lookup(0, "VJ_1", "VDJ_1").is_err());
        Ok(())
    }

    #[test]
    fn test_prepare_errors() {
        let cells = vec![cell("c0", &["AAA"], &["KKK"])];
        let vj_only = DistanceBundle::new(SequenceKind::Aa, "identity")
            .with_arm(ReceptorArm::VJ, seq_distances(&["AAA"], &[]));

        let err = ClonotypeNeighbors::new(&cells, &vj_only, params(ArmPolicy::All, DualIrPolicy::Any))
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<ValidationError>(),
            Some(&ValidationError::MissingArmDistances {
                arm: ReceptorArm::VDJ
            })
        );
        assert!(
            ClonotypeNeighbors::new(&cells, &vj_only, params(ArmPolicy::VJ, DualIrPolicy::Any)).is_ok()
        );

        let p = NeighborParams {
            sequence: SequenceKind::Nt,
            ..params(ArmPolicy::VJ, DualIrPolicy::Any)
        };
        let err = ClonotypeNeighbors::new(&cells, &vj_only, p).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ValidationError>(),
            Some(ValidationError::BundleMismatch { field: "sequence", .. })
        ));

        let orphan = vec![cell("c0", &["nan", "AAA"], &[])];
        let err = ClonotypeNeighbors::new(&orphan, &vj_only, params(ArmPolicy::VJ, DualIrPolicy::Any))
            .unwrap_err();
        assert!(err.downcast_ref::<ConsistencyError>().is_some());

        let p = NeighborParams {
            match_columns: vec!["hla".to_string()],
            ..params(ArmPolicy::VJ, DualIrPolicy::Any)
        };
        let err = ClonotypeNeighbors::new(&cells, &vj_only, p).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ValidationError>(),
            Some(ValidationError::InvalidParameter { name: "match_columns", .. })
        ));

        let bad = DistanceBundle::new(SequenceKind::Aa, "identity").with_arm(
            ReceptorArm::VJ,
            crate::distance_bundle::ArmDistances {
                distances: CsMat::eye(2),
                seqs: vec!["AAA".to_string()],
            },
        );
        let err = ClonotypeNeighbors::new(&cells, &bad, params(ArmPolicy::VJ, DualIrPolicy::Any))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ValidationError>(),
            Some(ValidationError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_stack_rows_drops_zeros() -> Result<()> {
        let rows = vec![
            CsVec::new(3, vec![0, 2], vec![1.0, 0.0]),
            CsVec::empty(3),
            CsVec::new(3, vec![1], vec![2.5]),
        ];
        let stacked = stack_rows(rows, 3)?;
        assert_eq!(stacked.nnz(), 2);
        assert_eq!(stacked.get(0, 0), Some(&1.0));
        assert_eq!(stacked.get(0, 2), None);
        assert_eq!(stacked.get(2, 1), Some(&2.5));
        Ok(())
    }

    #[test]
    fn test_restrict_to() {
        let row = CsVec::new(4, vec![0, 1, 3], vec![1.0, 2.0, 3.0]);
        let mask = CsVec::new(4, vec![1, 2, 3], vec![1.0, 1.0, 0.0]);
        assert_eq!(restrict_to(&row, &mask), CsVec::new(4, vec![1], vec![2.0]));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]
        #[test]
        fn test_parallel_matches_sequential(
            chains in proptest::collection::vec((0..4usize, 0..5usize, 0..4usize), 1..30),
            n_jobs in 2..5usize,
            chunk_size in 1..8usize,
        ) {
            let seqs = ["AAA", "AAB", "BBB", "CCC"];
            let cells: Vec<_> = chains
                .iter()
                .enumerate()
                .map(|(i, &(vj, vj2, vdj))| {
                    let vj_chains: Vec<&str> = if vj2 < 4 { vec![seqs[vj], seqs[vj2]] } else { vec![seqs[vj]] };
                    cell(&format!("c{i}"), &vj_chains, &[seqs[vdj]])
                })
                .collect();
            let dist = || seq_distances(&seqs, &[(0, 1, 2.0), (1, 2, 2.0)]);
            let bundle = bundle(dist(), dist());
            for dual_ir in DualIrPolicy::all() {
                let sequential = ClonotypeNeighbors::new(
                    &cells,
                    &bundle,
                    params(ArmPolicy::All, dual_ir),
                ).unwrap();
                let parallel = ClonotypeNeighbors::new(
                    &cells,
                    &bundle,
                    NeighborParams { n_jobs: Some(n_jobs), chunk_size, ..params(ArmPolicy::All, dual_ir) },
                ).unwrap();
                let expected = sequential.compute_distances().unwrap();
                let observed = parallel.compute_distances().unwrap();
                prop_assert_eq!(observed.shape(), (sequential.clonotypes().len(), sequential.clonotypes().len()));
                prop_assert_eq!(observed, expected);
            }
        }
    }
}
