//! Per-cell immune receptor annotations, as handed over by the dataset layer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use vdj_types::{ChainSlot, ReceptorArm, SequenceKind};

/// String values that upstream annotation tables use to mean "no value".
const MISSING_VALUES: [&str; 7] = ["", "nan", "NaN", "None", "none", "NA", "null"];

/// Map every spelling of a missing annotation to `None`.
pub fn normalize_missing(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !MISSING_VALUES.contains(v))
}

/// Annotation of a single receptor chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainAnnotation {
    /// CDR3 amino acid sequence
    pub junction_aa: Option<String>,
    /// CDR3 nucleotide sequence
    pub junction: Option<String>,
    pub v_call: Option<String>,
}

impl ChainAnnotation {
    pub fn with_junction_aa(junction_aa: &str) -> Self {
        ChainAnnotation {
            junction_aa: Some(junction_aa.to_string()),
            ..Default::default()
        }
    }

    pub fn v_call(mut self, v_call: &str) -> Self {
        self.v_call = Some(v_call.to_string());
        self
    }

    /// Value of the AIRR field `name`, `None` if missing or not a chain field.
    pub fn field(&self, name: &str) -> Option<&str> {
        let value = match name {
            "junction_aa" => self.junction_aa.as_deref(),
            "junction" => self.junction.as_deref(),
            "v_call" => self.v_call.as_deref(),
            _ => None,
        };
        normalize_missing(value)
    }

    /// The CDR3 sequence of the requested kind, `None` if missing.
    pub fn sequence(&self, kind: SequenceKind) -> Option<&str> {
        self.field(kind.field_name())
    }

    pub fn v_gene(&self) -> Option<&str> {
        self.field("v_call")
    }
}

/// Primary and secondary chain of one receptor arm.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArmChains {
    pub primary: Option<ChainAnnotation>,
    pub secondary: Option<ChainAnnotation>,
}

impl ArmChains {
    pub fn slot(&self, slot: ChainSlot) -> Option<&ChainAnnotation> {
        match slot {
            ChainSlot::Primary => self.primary.as_ref(),
            ChainSlot::Secondary => self.secondary.as_ref(),
        }
    }
}

/// One cell of the dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellRecord {
    pub cell_id: String,
    /// Whether the cell carries any immune receptor information. Cells without
    /// it never form a clonotype.
    pub has_ir: bool,
    #[serde(default)]
    pub vj: ArmChains,
    #[serde(default)]
    pub vdj: ArmChains,
    /// Free-form annotations (sample, patient, cell type, ...) usable as grouping columns.
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl CellRecord {
    pub fn new(cell_id: &str) -> Self {
        CellRecord {
            cell_id: cell_id.to_string(),
            has_ir: true,
            vj: ArmChains::default(),
            vdj: ArmChains::default(),
            fields: BTreeMap::new(),
        }
    }

    /// Set the chain in `slot` of `arm`.
    pub fn chain(mut self, arm: ReceptorArm, slot: ChainSlot, chain: ChainAnnotation) -> Self {
        let chains = match arm {
            ReceptorArm::VJ => &mut self.vj,
            ReceptorArm::VDJ => &mut self.vdj,
        };
        match slot {
            ChainSlot::Primary => chains.primary = Some(chain),
            ChainSlot::Secondary => chains.secondary = Some(chain),
        }
        self
    }

    pub fn field(mut self, name: &str, value: &str) -> Self {
        self.fields.insert(name.to_string(), value.to_string());
        self
    }

    pub fn without_ir(mut self) -> Self {
        self.has_ir = false;
        self
    }

    pub fn arm(&self, arm: ReceptorArm) -> &ArmChains {
        match arm {
            ReceptorArm::VJ => &self.vj,
            ReceptorArm::VDJ => &self.vdj,
        }
    }

    pub fn get_chain(&self, arm: ReceptorArm, slot: ChainSlot) -> Option<&ChainAnnotation> {
        self.arm(arm).slot(slot)
    }

    /// Value of a grouping column. A column the cell does not carry counts as missing.
    pub fn get_field(&self, name: &str) -> Option<&str> {
        normalize_missing(self.fields.get(name).map(String::as_str))
    }
}
