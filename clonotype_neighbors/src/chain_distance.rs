//! Missing-aware combination of chain distances.

/// Outcome of comparing one chain of a query clonotype with one chain of a
/// candidate clonotype.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChainDistance {
    /// The candidate has no chain in the compared slot.
    Absent,
    /// Both chains exist but are not neighbors.
    NoMatch,
    /// The chains are neighbors at this (nonzero) distance.
    Match(f64),
}

impl ChainDistance {
    /// Interpret a looked up distance. `target_present` tells whether the
    /// candidate has a chain in the compared slot.
    pub fn from_lookup(distance: f64, target_present: bool) -> Self {
        if !target_present {
            ChainDistance::Absent
        } else if distance == 0.0 {
            ChainDistance::NoMatch
        } else {
            ChainDistance::Match(distance)
        }
    }

    pub fn is_absent(self) -> bool {
        self == ChainDistance::Absent
    }

    /// The distance to store in a sparse matrix; 0 unless matching.
    pub fn value(self) -> f64 {
        match self {
            ChainDistance::Match(d) => d,
            ChainDistance::Absent | ChainDistance::NoMatch => 0.0,
        }
    }
}

/// Either of the alternatives suffices: the smallest matching distance wins.
/// Without any match, the result is `NoMatch` if any operand is `NoMatch`,
/// `Absent` otherwise (including no operands at all).
pub fn reduce_or(values: impl IntoIterator<Item = ChainDistance>) -> ChainDistance {
    values
        .into_iter()
        .fold(ChainDistance::Absent, |acc, value| match (acc, value) {
            (ChainDistance::Match(a), ChainDistance::Match(b)) => ChainDistance::Match(a.min(b)),
            (ChainDistance::Match(a), _) | (_, ChainDistance::Match(a)) => ChainDistance::Match(a),
            (ChainDistance::NoMatch, _) | (_, ChainDistance::NoMatch) => ChainDistance::NoMatch,
            (ChainDistance::Absent, ChainDistance::Absent) => ChainDistance::Absent,
        })
}

/// All operands need to match: the largest distance wins.
///
/// The candidate must be missing exactly as many of the compared chains as
/// the query (`expected_absent`), otherwise the chain configurations differ
/// and the result is `NoMatch`. Any `NoMatch` operand makes the result
/// `NoMatch`. Only absent operands yield `Absent`.
pub fn reduce_and(
    values: impl IntoIterator<Item = ChainDistance>,
    expected_absent: usize,
) -> ChainDistance {
    let mut n_absent = 0;
    let mut any_no_match = false;
    let mut max: Option<f64> = None;
    for value in values {
        match value {
            ChainDistance::Absent => n_absent += 1,
            ChainDistance::NoMatch => any_no_match = true,
            ChainDistance::Match(d) => max = Some(max.map_or(d, |m| m.max(d))),
        }
    }
    if n_absent != expected_absent || any_no_match {
        return ChainDistance::NoMatch;
    }
    match max {
        Some(d) => ChainDistance::Match(d),
        None => ChainDistance::Absent,
    }
}
