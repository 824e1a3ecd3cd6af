//! Labels of distance matrix rows and columns.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Composite value of all grouping columns of a clonotype, in column order.
/// Missing members are kept, so two clonotypes that both lack a value still
/// share a group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKey(pub Vec<Option<String>>);

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match value {
                Some(v) => write!(f, "{v}")?,
                None => write!(f, "nan")?,
            }
        }
        write!(f, ")")
    }
}

/// Row/column label of a distance matrix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Label {
    /// A sequence or a gene name
    Text(String),
    Group(GroupKey),
    /// A value the clonotype lacks, where lacking it is a value of its own
    Missing,
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Text(s) => write!(f, "{s}"),
            Label::Group(g) => write!(f, "{g}"),
            Label::Missing => write!(f, "nan"),
        }
    }
}

impl From<&str> for Label {
    fn from(s: &str) -> Self {
        Label::Text(s.to_string())
    }
}

impl From<String> for Label {
    fn from(s: String) -> Self {
        Label::Text(s)
    }
}

impl From<GroupKey> for Label {
    fn from(g: GroupKey) -> Self {
        Label::Group(g)
    }
}
