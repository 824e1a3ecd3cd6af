//! Distances between clonotypes, computed from precomputed sequence distances
//! of their receptor chains.

pub mod cell;
pub mod chain_distance;
pub mod clonotype_neighbors;
pub mod clonotype_table;
pub mod distance_bundle;
pub mod errors;
pub mod label;
pub mod neighbor_finder;
pub mod params;

#[cfg(test)]
mod testing;

pub use crate::clonotype_neighbors::{ClonotypeDistances, ClonotypeNeighbors};
pub use crate::params::NeighborParams;
