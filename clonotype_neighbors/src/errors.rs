use vdj_types::ReceptorArm;

/// Invalid inputs, detected before any distance is computed.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Cell identifiers need to be unique, but '{cell_id}' occurs more than once.")]
    DuplicateCellId { cell_id: String },

    #[error(
        "Error computing clonotypes. None of the {n_cells} cells carries immune receptor \
         information (has_ir is false for every cell)."
    )]
    NoReceptorCells { n_cells: usize },

    #[error(
        "The distance bundle has no {arm} distances. Compute sequence distances for the {arm} \
         arm before computing clonotype distances."
    )]
    MissingArmDistances { arm: ReceptorArm },

    #[error(
        "The distance bundle was computed with {field} = {found:?}, but clonotype distances \
         were requested with {field} = {expected:?}. Recompute the sequence distances with \
         matching parameters."
    )]
    BundleMismatch {
        field: &'static str,
        expected: String,
        found: String,
    },

    #[error(
        "Distance matrix '{name}' has shape {rows}x{cols}, but {n_labels} labels were given. \
         The matrix must be square with one row per label."
    )]
    ShapeMismatch {
        name: String,
        rows: usize,
        cols: usize,
        n_labels: usize,
    },

    #[error(
        "Distance matrix '{name}' has the invalid entry {value} at ({row}, {col}). Distances \
         must be finite and non-negative."
    )]
    InvalidDistance {
        name: String,
        row: usize,
        col: usize,
        value: f64,
    },

    #[error(
        "Distance matrix '{name}' is not symmetric: the entry at ({row}, {col}) differs from \
         the entry at ({col}, {row})."
    )]
    AsymmetricDistance { name: String, row: usize, col: usize },

    #[error("Distance matrix '{name}' has the label {label} more than once.")]
    DuplicateLabel { name: String, label: String },

    #[error("Invalid value for parameter '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

/// Malformed receptor annotations.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConsistencyError {
    #[error(
        "Clonotype {clonotype} (cell '{cell_id}') has a secondary {arm} chain but no primary \
         {arm} chain. There must not be a secondary chain if there is no primary one."
    )]
    OrphanSecondaryChain {
        clonotype: usize,
        arm: ReceptorArm,
        cell_id: String,
    },
}

/// Misuse of the double lookup neighbor finder.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    #[error("A distance matrix named '{0}' was already added.")]
    DuplicateDistanceMatrix(String),

    #[error("A lookup table named '{0}' was already added.")]
    DuplicateLookupTable(String),

    #[error("No distance matrix named '{0}' was added.")]
    UnknownDistanceMatrix(String),

    #[error("No lookup table named '{0}' was added.")]
    UnknownLookupTable(String),

    #[error(
        "Lookup tables '{forward}' and '{reverse}' are backed by different distance matrices \
         and cannot be combined in one lookup."
    )]
    MatrixMismatch { forward: String, reverse: String },

    #[error("Clonotype index {index} is out of range for a table of {n_clonotypes} clonotypes.")]
    ClonotypeOutOfRange { index: usize, n_clonotypes: usize },
}
