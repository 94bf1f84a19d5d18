#![warn(clippy::all, clippy::cargo, clippy::nursery, clippy::pedantic)]
#![warn(missing_docs)]

//! `molpack` packs the hot cores of a macromolecular sampling stack: a
//! voxelized repulsion grid for O(atoms) clash screening, a linear-memory
//! rotamer interaction graph for simulated-annealing side-chain
//! optimization, and a column-exact PDB record reader and writer.

pub mod bin_grid;
pub mod clash_checker;
mod convert;
pub mod error;
pub mod file_data;
pub mod interaction_graph;
pub mod pose;
pub mod recent_history;
pub mod record;
pub mod residue_type;
pub mod scorer;
pub mod superimpose;
