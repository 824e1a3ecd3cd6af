//! Precomputed sequence distances, one sparse matrix per receptor arm.

use crate::errors::ValidationError;
use crate::params::NeighborParams;
use anyhow::Result;
use sprs::CsMat;
use vdj_types::{ReceptorArm, SequenceKind};

/// Sequence distances of one receptor arm. Row and column `i` of `distances`
/// belong to `seqs[i]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ArmDistances {
    pub distances: CsMat<f64>,
    pub seqs: Vec<String>,
}

/// Output of the upstream sequence distance computation.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceBundle {
    pub sequence: SequenceKind,
    pub metric: String,
    arms: [Option<ArmDistances>; 2],
}

impl DistanceBundle {
    pub fn new(sequence: SequenceKind, metric: &str) -> Self {
        DistanceBundle {
            sequence,
            metric: metric.to_string(),
            arms: [None, None],
        }
    }

    pub fn with_arm(mut self, arm: ReceptorArm, distances: ArmDistances) -> Self {
        self.insert_arm(arm, distances);
        self
    }

    pub fn insert_arm(&mut self, arm: ReceptorArm, distances: ArmDistances) {
        self.arms[arm.index()] = Some(distances);
    }

    pub fn arm(&self, arm: ReceptorArm) -> Option<&ArmDistances> {
        self.arms[arm.index()].as_ref()
    }

    /// Distances of `arm`, or an error if they were not computed.
    pub fn require_arm(&self, arm: ReceptorArm) -> Result<&ArmDistances> {
        self.arm(arm)
            .ok_or_else(|| ValidationError::MissingArmDistances { arm }.into())
    }

    /// The bundle must have been computed with the same sequence kind and
    /// metric that `params` asks for.
    pub fn check_params(&self, params: &NeighborParams) -> Result<()> {
        if self.sequence != params.sequence {
            return Err(ValidationError::BundleMismatch {
                field: "sequence",
                expected: params.sequence.to_string(),
                found: self.sequence.to_string(),
            }
            .into());
        }
        if self.metric != params.metric {
            return Err(ValidationError::BundleMismatch {
                field: "metric",
                expected: params.metric.clone(),
                found: self.metric.clone(),
            }
            .into());
        }
        Ok(())
    }
}
