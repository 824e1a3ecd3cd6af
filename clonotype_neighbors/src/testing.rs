//! Fixtures shared by the unit tests.

use crate::cell::{CellRecord, ChainAnnotation};
use crate::distance_bundle::{ArmDistances, DistanceBundle};
use sprs::TriMat;
use vdj_types::{ChainSlot, ReceptorArm, SequenceKind};

/// A cell with receptor information. `vj` and `vdj` hold the amino acid CDR3
/// sequences of the primary and (optionally) secondary chain of each arm.
pub(crate) fn cell(cell_id: &str, vj: &[&str], vdj: &[&str]) -> CellRecord {
    let mut cell = CellRecord::new(cell_id);
    for (arm, seqs) in [(ReceptorArm::VJ, vj), (ReceptorArm::VDJ, vdj)] {
        for (slot, seq) in ChainSlot::all().into_iter().zip(seqs) {
            cell = cell.chain(arm, slot, ChainAnnotation::with_junction_aa(seq));
        }
    }
    cell
}

/// Symmetric sequence distances with 1 on the diagonal and `(i, j, dist)` off
/// the diagonal.
pub(crate) fn seq_distances(seqs: &[&str], pairs: &[(usize, usize, f64)]) -> ArmDistances {
    let mut tri = TriMat::new((seqs.len(), seqs.len()));
    for i in 0..seqs.len() {
        tri.add_triplet(i, i, 1.0);
    }
    for &(i, j, dist) in pairs {
        tri.add_triplet(i, j, dist);
        tri.add_triplet(j, i, dist);
    }
    ArmDistances {
        distances: tri.to_csr(),
        seqs: seqs.iter().map(|s| s.to_string()).collect(),
    }
}

pub(crate) fn bundle(vj: ArmDistances, vdj: ArmDistances) -> DistanceBundle {
    DistanceBundle::new(SequenceKind::Aa, "identity")
        .with_arm(ReceptorArm::VJ, vj)
        .with_arm(ReceptorArm::VDJ, vdj)
}
