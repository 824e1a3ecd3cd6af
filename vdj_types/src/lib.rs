//! vdj_types
// Copyright (c) 2021 10x Genomics, Inc. All rights reserved.

use serde::{Deserialize, Serialize};
use std::fmt;

// From https://danielkeep.github.io/tlborm/book/blk-counting.html
macro_rules! replace_expr {
    ($_t:tt $sub:expr) => {
        $sub
    };
}

macro_rules! count_tts {
    ($($tts:tt)*) => {0usize $(+ replace_expr!($tts 1usize))*};
}

macro_rules! make_enum {
    (
        name: $name:ident,
        variants:[$( ($field:ident, $lit: literal) ,)*],
        const_var_name: $const_var_name:ident,
    ) => {
        pub const $const_var_name: [&str; count_tts!($($field)*)] = [
            $($lit,)*
        ];

        #[derive(
            Debug,
            Copy,
            Clone,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Serialize,
            Deserialize,
            Hash,
        )]
        pub enum $name {
            $(
                #[serde(rename = $lit)]
                $field,
            )*
        }

        impl $name {
            pub fn all() -> [Self; count_tts!($($field)*)] {
                [
                    $($name::$field,)*
                ]
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", match self {
                    $(
                        $name::$field => $lit,
                    )*
                })
            }
        }

        impl From<$name> for &'static str {
            fn from(src: $name) -> &'static str {
                match src {
                    $(
                        $name::$field => $lit,
                    )*
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $(
                        $lit => Ok($name::$field),
                    )*
                    unknown => Err(
                        format!("Unknown variant '{}' for {}. Supported variants are: [{}]", unknown, stringify!($name), $const_var_name.join(", "))
                    )
                }
            }
        }
    };
}

make_enum! {
    name: ReceptorArm,
    variants: [
        (VJ, "VJ"),   // TRA, TRG, IGK, IGL
        (VDJ, "VDJ"), // TRB, TRD, IGH
    ],
    const_var_name: RECEPTOR_ARMS,
}

make_enum! {
    name: ChainSlot,
    variants: [
        (Primary, "1"),
        (Secondary, "2"),
    ],
    const_var_name: CHAIN_SLOTS,
}

make_enum! {
    name: ArmPolicy,
    variants: [
        (VJ, "VJ"),
        (VDJ, "VDJ"),
        (All, "all"),
        (Any, "any"),
    ],
    const_var_name: ARM_POLICIES,
}

make_enum! {
    name: DualIrPolicy,
    variants: [
        (PrimaryOnly, "primary_only"),
        (All, "all"),
        (Any, "any"),
    ],
    const_var_name: DUAL_IR_POLICIES,
}

make_enum! {
    name: SequenceKind,
    variants: [
        (Aa, "aa"),
        (Nt, "nt"),
    ],
    const_var_name: SEQUENCE_KINDS,
}

impl ReceptorArm {
    /// Fixed position of the arm in per-arm arrays.
    pub fn index(self) -> usize {
        match self {
            ReceptorArm::VJ => 0,
            ReceptorArm::VDJ => 1,
        }
    }
}

impl ChainSlot {
    /// Fixed position of the slot in per-slot arrays.
    pub fn index(self) -> usize {
        match self {
            ChainSlot::Primary => 0,
            ChainSlot::Secondary => 1,
        }
    }
}

impl ArmPolicy {
    /// The receptor arms whose distances are considered under this policy.
    pub fn arms(self) -> &'static [ReceptorArm] {
        match self {
            ArmPolicy::VJ => &[ReceptorArm::VJ],
            ArmPolicy::VDJ => &[ReceptorArm::VDJ],
            ArmPolicy::All | ArmPolicy::Any => &[ReceptorArm::VJ, ReceptorArm::VDJ],
        }
    }
}

impl DualIrPolicy {
    /// The chain slots of each arm that take part in the comparison.
    pub fn slots(self) -> &'static [ChainSlot] {
        match self {
            DualIrPolicy::PrimaryOnly => &[ChainSlot::Primary],
            DualIrPolicy::All | DualIrPolicy::Any => &[ChainSlot::Primary, ChainSlot::Secondary],
        }
    }

    /// Pairs of (query slot, reference slot) that are looked up for every arm.
    pub fn chain_pairs(self) -> &'static [(ChainSlot, ChainSlot)] {
        use ChainSlot::{Primary, Secondary};
        match self {
            DualIrPolicy::PrimaryOnly => &[(Primary, Primary)],
            DualIrPolicy::All | DualIrPolicy::Any => &[
                (Primary, Primary),
                (Secondary, Secondary),
                (Primary, Secondary),
                (Secondary, Primary),
            ],
        }
    }
}

impl SequenceKind {
    /// Name of the AIRR field that holds the CDR3 sequence of this kind.
    pub fn field_name(self) -> &'static str {
        match self {
            SequenceKind::Aa => "junction_aa",
            SequenceKind::Nt => "junction",
        }
    }
}
