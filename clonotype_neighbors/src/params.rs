//! Parameters of the clonotype distance computation, loadable from TOML.

use crate::errors::ValidationError;
use anyhow::{Context, Result};
use fxhash::FxHashSet;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;
use vdj_types::{ArmPolicy, DualIrPolicy, SequenceKind};

/// Parameters of a clonotype distance computation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NeighborParams {
    /// Which receptor arms are compared, and whether both (`all`) or either
    /// (`any`) of them need to match.
    pub receptor_arms: ArmPolicy,
    /// How primary and secondary chains of an arm are combined.
    pub dual_ir: DualIrPolicy,
    /// Only consider chains with identical V genes as neighbors.
    pub same_v_gene: bool,
    /// Only consider clonotypes with identical values in these cell columns as
    /// neighbors. Single dataset only.
    pub within_group: Vec<String>,
    /// Cell columns that must be equal between query and reference. Query mode only.
    pub match_columns: Vec<String>,
    /// Sequence kind the distance bundle was computed on.
    pub sequence: SequenceKind,
    /// Metric the distance bundle was computed with.
    pub metric: String,
    /// Number of worker threads, defaults to the available parallelism.
    pub n_jobs: Option<usize>,
    /// Number of clonotypes handed to a worker at once.
    pub chunk_size: usize,
}

impl Default for NeighborParams {
    fn default() -> Self {
        NeighborParams {
            receptor_arms: ArmPolicy::All,
            dual_ir: DualIrPolicy::Any,
            same_v_gene: false,
            within_group: Vec::new(),
            match_columns: Vec::new(),
            sequence: SequenceKind::Aa,
            metric: "identity".to_string(),
            n_jobs: None,
            chunk_size: 2000,
        }
    }
}

macro_rules! log_non_default {
    ($params:expr, $default:expr, $($field:ident),+) => {
        $(
            if $params.$field != $default.$field {
                info!("using non-default {} = {:?}", stringify!($field), $params.$field);
            }
        )+
    };
}

impl NeighborParams {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path).with_context(|| path.display().to_string())?;
        Self::from_toml_str(&s).with_context(|| path.display().to_string())
    }

    /// Check the parameters for internal consistency. `with_reference` tells
    /// whether query and reference are different datasets.
    pub fn validate(&self, with_reference: bool) -> Result<()> {
        if self.n_jobs == Some(0) {
            return Err(invalid("n_jobs", "must be at least 1".to_string()));
        }
        if self.chunk_size == 0 {
            return Err(invalid("chunk_size", "must be at least 1".to_string()));
        }
        if with_reference && !self.within_group.is_empty() {
            return Err(invalid(
                "within_group",
                "is not supported when querying a reference, use match_columns instead"
                    .to_string(),
            ));
        }
        if !with_reference && !self.match_columns.is_empty() {
            return Err(invalid(
                "match_columns",
                "requires a reference dataset, use within_group instead".to_string(),
            ));
        }
        for (name, columns) in [
            ("within_group", &self.within_group),
            ("match_columns", &self.match_columns),
        ] {
            let mut seen = FxHashSet::default();
            if let Some(dup) = columns.iter().find(|c| !seen.insert(c.as_str())) {
                return Err(invalid(name, format!("column '{dup}' is listed more than once")));
            }
        }
        Ok(())
    }

    /// Grouping columns folded into the composite group key, if any.
    pub fn group_columns(&self) -> &[String] {
        if self.match_columns.is_empty() {
            &self.within_group
        } else {
            &self.match_columns
        }
    }

    pub fn n_jobs(&self) -> usize {
        self.n_jobs.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(1)
        })
    }

    pub(crate) fn log_non_defaults(&self) {
        let default = NeighborParams::default();
        log_non_default!(
            self,
            default,
            receptor_arms,
            dual_ir,
            same_v_gene,
            within_group,
            match_columns,
            sequence,
            metric,
            n_jobs,
            chunk_size
        );
    }
}

fn invalid(name: &'static str, reason: String) -> anyhow::Error {
    ValidationError::InvalidParameter { name, reason }.into()
}
