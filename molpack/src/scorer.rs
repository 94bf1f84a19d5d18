//! Rotamer bookkeeping and the energy-evaluation seam.
//!
//! The interaction graph never computes chemistry itself: one-body and
//! rotamer-pair energies come from an externally owned scorer reached
//! through [`PairEnergyScorer`]. The graph captures the scorer by reference
//! at construction time and holds it for its whole lifetime.

use serde::{Deserialize, Serialize};

/// Per-node rotamer state counts and amino-acid type tags.
///
/// States are 1-based and contiguous per node; state 0 everywhere means
/// "unassigned". Each state carries a sparse amino-acid type tag in
/// `1..=num_aa_types`, which feeds the edges' A x A interaction masks.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RotamerSets {
    num_states: Vec<usize>,
    aa_of_state: Vec<Vec<u32>>,
    num_aa_types: usize,
}

impl RotamerSets {
    /// Constructs rotamer sets from per-node amino-acid tags, one entry per
    /// state in state order.
    ///
    /// # Panics
    ///
    /// Panics if any node has no states, or any tag is outside
    /// `1..=num_aa_types`.
    #[must_use]
    pub fn new(aa_of_state: Vec<Vec<u32>>, num_aa_types: usize) -> Self {
        assert!(num_aa_types >= 1);
        for tags in &aa_of_state {
            assert!(!tags.is_empty(), "every node needs at least one state");
            for &aa in tags {
                assert!(aa >= 1 && aa as usize <= num_aa_types);
            }
        }

        Self {
            num_states: aa_of_state.iter().map(Vec::len).collect(),
            aa_of_state,
            num_aa_types,
        }
    }

    /// Constructs rotamer sets where every state shares one amino-acid
    /// type, for callers that do not use the sparse mask.
    #[must_use]
    pub fn uniform(num_states: &[usize]) -> Self {
        Self::new(
            num_states.iter().map(|&n| vec![1; n]).collect(),
            1,
        )
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn num_nodes(&self) -> usize {
        self.num_states.len()
    }

    /// Returns the number of states at `node` (0-based node index).
    #[must_use]
    pub fn num_states(&self, node: usize) -> usize {
        self.num_states[node]
    }

    /// Returns the amino-acid tag of a 1-based `state` at `node`.
    #[must_use]
    pub fn aa_of(&self, node: usize, state: u32) -> u32 {
        self.aa_of_state[node][state as usize - 1]
    }

    /// Returns the number of distinct amino-acid types.
    #[must_use]
    pub const fn num_aa_types(&self) -> usize {
        self.num_aa_types
    }
}

/// Energy evaluation seam between the interaction graph and the scoring
/// machinery.
///
/// Node indices are 0-based, states 1-based. Implementations must be
/// symmetric in the pair arguments: swapping `(node_a, state_a)` with
/// `(node_b, state_b)` may not change the value.
pub trait PairEnergyScorer {
    /// Returns the one-body energy of putting `state` at `node`.
    fn one_body(&self, node: usize, state: u32, weights: &[f64]) -> f64;

    /// Returns the two-body interaction energy of a pair of placed states.
    fn pair(&self, node_a: usize, state_a: u32, node_b: usize, state_b: u32, weights: &[f64])
        -> f64;
}
