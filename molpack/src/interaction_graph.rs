//! Linear-memory rotamer interaction graph.
//!
//! Nodes are residue positions, edges are interacting residue pairs. Pair
//! energies are computed on the fly through the [`PairEnergyScorer`] seam
//! and cached per edge in two lazy matrices indexed by the peer's state and
//! the owning node's recent-history slot, so total memory scales with the
//! history size instead of the full rotamer-pair table.
//!
//! The graph is a deterministic, caller-serialized state machine: the
//! annealing driver issues `consider`, then exactly one of `commit` or
//! `revert`.

use crate::error::{Error, Result};
use crate::recent_history::RecentHistoryQueue;
use crate::scorer::{PairEnergyScorer, RotamerSets};
use ndarray::{s, Array2};

/// Sentinel for a pair energy that has not been computed yet.
const UNCOMPUTED: f64 = f64::INFINITY;

/// Length of the per-node accept/reject ring.
const SUBSTITUTION_HISTORY_LEN: usize = 20;

/// A node side stops caching pair energies while its ring holds at least
/// this many rejections.
const REJECTION_THRESHOLD_FOR_CACHE_OFF: usize = 10;

/// Running-total re-sum cadence, in commits.
const COMMITS_BETWEEN_RESYNCS: u64 = 1024;

/// Largest tolerated difference between the running total and a re-sum.
const DRIFT_TOLERANCE: f64 = 1e-3;

/// Default recent-history size H.
const DEFAULT_HISTORY_SIZE: usize = 10;

struct Node {
    num_states: usize,
    current_state: u32,
    current_one_body: f64,
    current_total: f64,
    alt_state: u32,
    alt_one_body: f64,
    alt_total: f64,
    /// Edge arena indices, one per incident edge.
    incident: Vec<usize>,
    /// All remaining per-edge vectors run parallel to `incident`.
    current_pair: Vec<f64>,
    alt_pair: Vec<f64>,
    peer_state: Vec<u32>,
    peer_history_slot: Vec<u32>,
    queue: RecentHistoryQueue,
    substitution_ring: [bool; SUBSTITUTION_HISTORY_LEN],
    ring_head: usize,
    ring_filled: bool,
    recent_rejections: usize,
    group: u32,
}

impl Node {
    fn new(num_states: usize, history_size: usize) -> Self {
        Self {
            num_states,
            current_state: 0,
            current_one_body: 0.0,
            current_total: 0.0,
            alt_state: 0,
            alt_one_body: 0.0,
            alt_total: 0.0,
            incident: Vec::new(),
            current_pair: Vec::new(),
            alt_pair: Vec::new(),
            peer_state: Vec::new(),
            peer_history_slot: Vec::new(),
            queue: RecentHistoryQueue::new(num_states, history_size),
            substitution_ring: [false; SUBSTITUTION_HISTORY_LEN],
            ring_head: 0,
            ring_filled: false,
            recent_rejections: 0,
            group: 0,
        }
    }

    fn record_substitution(&mut self, rejected: bool) {
        self.ring_head += 1;
        if self.ring_head == SUBSTITUTION_HISTORY_LEN {
            self.ring_head = 0;
            self.ring_filled = true;
        }
        if self.ring_filled && self.substitution_ring[self.ring_head] {
            self.recent_rejections -= 1;
        }
        if rejected {
            self.recent_rejections += 1;
        }
        self.substitution_ring[self.ring_head] = rejected;
    }

    /// Caching pays while the Metropolis walk is not rejection-dominated.
    const fn wants_pair_cache(&self) -> bool {
        self.recent_rejections < REJECTION_THRESHOLD_FOR_CACHE_OFF
    }
}

struct Edge {
    nodes: [usize; 2],
    /// Index of this edge within each endpoint's `incident` list.
    pos_in_node: [usize; 2],
    /// Lazy pair-energy matrices, one per endpoint: `stored[side]` has one
    /// row per state of the *other* endpoint and one column per
    /// recent-history slot of `side`'s own node.
    stored: [Array2<f64>; 2],
    store_enabled: [bool; 2],
    current_energy: f64,
    /// `aa_possible[(aa0 - 1, aa1 - 1)]`, oriented (first node, second
    /// node).
    aa_possible: Array2<bool>,
    finalize_pending: bool,
}

impl Edge {
    fn side_of(&self, node: usize) -> usize {
        if self.nodes[0] == node {
            0
        } else {
            debug_assert_eq!(self.nodes[1], node);
            1
        }
    }

    fn aa_pair_possible(&self, side: usize, own_aa: u32, peer_aa: u32) -> bool {
        let (row, col) = if side == 0 {
            (own_aa, peer_aa)
        } else {
            (peer_aa, own_aa)
        };
        self.aa_possible[(row as usize - 1, col as usize - 1)]
    }

    /// Invalidates every cached energy keyed to `slot` on `side`, because
    /// that slot now refers to a different state.
    fn wipe_slot(&mut self, side: usize, slot: u32) {
        if slot != 0 && self.store_enabled[side] {
            self.stored[side]
                .slice_mut(s![.., slot as usize - 1])
                .fill(UNCOMPUTED);
        }
    }

    fn wipe_side(&mut self, side: usize) {
        self.stored[side].fill(UNCOMPUTED);
    }
}

/// Pair-interaction graph with bounded per-node energy caches.
///
/// Construction order: [`Self::new`], then [`Self::add_edge`] and mask
/// setup, optionally [`Self::set_recent_history_size`], then
/// [`Self::prepare_for_sampling`] before any state operation.
pub struct LinearMemoryGraph<'a> {
    rotamers: RotamerSets,
    scorer: &'a dyn PairEnergyScorer,
    weights: Vec<f64>,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    history_size: usize,
    prepared: bool,
    total_energy: f64,
    alt_total_energy: f64,
    pending_node: Option<usize>,
    commits_since_resync: u64,
}

impl<'a> LinearMemoryGraph<'a> {
    /// Constructs a graph over the given rotamer sets. `weights` is passed
    /// through to every scorer invocation.
    #[must_use]
    pub fn new(rotamers: RotamerSets, scorer: &'a dyn PairEnergyScorer, weights: Vec<f64>) -> Self {
        let nodes = (0..rotamers.num_nodes())
            .map(|node| Node::new(rotamers.num_states(node), DEFAULT_HISTORY_SIZE))
            .collect();

        Self {
            rotamers,
            scorer,
            weights,
            nodes,
            edges: Vec::new(),
            history_size: DEFAULT_HISTORY_SIZE,
            prepared: false,
            total_energy: 0.0,
            alt_total_energy: 0.0,
            pending_node: None,
            commits_since_resync: 0,
        }
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Returns the number of edges.
    #[must_use]
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// Returns the current state of `node` (0 = unassigned).
    #[must_use]
    pub fn node_state(&self, node: usize) -> u32 {
        self.nodes[node].current_state
    }

    /// Returns the weights vector shared with the scorer.
    #[must_use]
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Adds an edge between two distinct nodes and returns its index. The
    /// amino-acid mask starts all-true.
    ///
    /// # Panics
    ///
    /// Panics if the endpoints coincide, if the edge already exists, or if
    /// the graph is already prepared for sampling.
    pub fn add_edge(&mut self, a: usize, b: usize) -> usize {
        assert!(!self.prepared, "edges must be added before sampling prep");
        assert_ne!(a, b);
        let (first, second) = if a < b { (a, b) } else { (b, a) };
        assert!(
            !self
                .edges
                .iter()
                .any(|edge| edge.nodes == [first, second]),
            "edge ({first}, {second}) already exists"
        );

        let num_aa = self.rotamers.num_aa_types();
        let index = self.edges.len();

        let pos_in_node = [
            self.nodes[first].incident.len(),
            self.nodes[second].incident.len(),
        ];
        for node in [first, second] {
            let entry = &mut self.nodes[node];
            entry.incident.push(index);
            entry.current_pair.push(0.0);
            entry.alt_pair.push(0.0);
            entry.peer_state.push(0);
            entry.peer_history_slot.push(0);
        }

        self.edges.push(Edge {
            nodes: [first, second],
            pos_in_node,
            stored: [Array2::from_elem((0, 0), UNCOMPUTED), Array2::from_elem((0, 0), UNCOMPUTED)],
            store_enabled: [true, true],
            current_energy: 0.0,
            aa_possible: Array2::from_elem((num_aa, num_aa), true),
            finalize_pending: false,
        });

        index
    }

    /// Declares whether states with amino-acid tags `aa_a` (at the edge's
    /// first node) and `aa_b` (at its second) can interact at all. Masked
    /// pairs short-circuit to zero without invoking the scorer.
    ///
    /// # Panics
    ///
    /// Panics if the tags are out of range.
    pub fn set_aa_pair_possible(&mut self, edge: usize, aa_a: u32, aa_b: u32, possible: bool) {
        self.edges[edge].aa_possible[(aa_a as usize - 1, aa_b as usize - 1)] = possible;
    }

    /// Sets the recent-history size H used by every node.
    ///
    /// # Panics
    ///
    /// Panics if called after [`Self::prepare_for_sampling`] or with a zero
    /// size.
    pub fn set_recent_history_size(&mut self, history_size: usize) {
        assert!(
            !self.prepared,
            "the recent-history size must be set before sampling prep"
        );
        assert!(history_size > 0);
        self.history_size = history_size;
    }

    /// Returns the recent-history size H.
    #[must_use]
    pub const fn recent_history_size(&self) -> usize {
        self.history_size
    }

    /// Tags `node` as a member of `group` for [`Self::energy_for_group`].
    pub fn set_node_group(&mut self, node: usize, group: u32) {
        self.nodes[node].group = group;
    }

    /// Dimensions every per-edge cache and resets all sampling state. Must
    /// be called before the first state operation; calling it again resets
    /// the graph to a fresh, fully unassigned configuration.
    pub fn prepare_for_sampling(&mut self) {
        for node in &mut self.nodes {
            node.queue = RecentHistoryQueue::new(node.num_states, self.history_size);
            node.substitution_ring = [false; SUBSTITUTION_HISTORY_LEN];
            node.ring_head = 0;
            node.ring_filled = false;
            node.recent_rejections = 0;
        }

        for edge in &mut self.edges {
            for side in 0..2 {
                let other_states = self.nodes[edge.nodes[1 - side]].num_states;
                edge.stored[side] =
                    Array2::from_elem((other_states, self.history_size), UNCOMPUTED);
                edge.store_enabled[side] = true;
            }
            edge.current_energy = 0.0;
            edge.finalize_pending = false;
        }

        self.prepared = true;
        self.pending_node = None;
        self.commits_since_resync = 0;
        self.blanket_unassign();
    }

    /// Puts every node into the unassigned state. Total energy becomes 0.
    ///
    /// # Panics
    ///
    /// Panics if the graph is not prepared for sampling.
    pub fn blanket_unassign(&mut self) {
        self.assert_prepared();
        self.pending_node = None;
        for node in 0..self.nodes.len() {
            self.assign_zero_state(node);
        }
        self.total_energy = 0.0;
    }

    /// Assigns `state` to `node` (0 unassigns) and returns the new total
    /// energy.
    ///
    /// # Panics
    ///
    /// Panics if the graph is not prepared or `state` is out of range.
    pub fn set_state(&mut self, node: usize, state: u32) -> f64 {
        self.assert_prepared();
        self.pending_node = None;

        if state == 0 {
            self.assign_zero_state(node);
        } else {
            self.assign_state(node, state);
        }

        let (total, drift) = self.resync_totals();
        self.log_drift(drift);
        total
    }

    /// Assigns a state to every node at once, in two phases so that no
    /// edge computes a pair energy against a half-updated cache, and
    /// returns the new total energy.
    ///
    /// # Panics
    ///
    /// Panics if the graph is not prepared or the slice length differs from
    /// the node count.
    pub fn set_all(&mut self, states: &[u32]) -> f64 {
        self.assert_prepared();
        assert_eq!(states.len(), self.nodes.len());
        self.pending_node = None;

        for (node, &state) in states.iter().enumerate() {
            self.partial_assign(node, state);
        }
        for node in 0..self.nodes.len() {
            self.finalize_assignment(node);
        }

        let (total, drift) = self.resync_totals();
        self.log_drift(drift);
        total
    }

    /// Projects the energy change of substituting `alt_state` at `node`
    /// without mutating any current state. Returns `(delta, previous total
    /// energy at the node)`.
    ///
    /// A substitution left pending from an earlier `consider` is counted as
    /// rejected.
    ///
    /// # Panics
    ///
    /// Panics if the graph is not prepared or the state is out of range.
    pub fn consider(&mut self, node: usize, alt_state: u32) -> (f64, f64) {
        self.assert_prepared();
        assert!(
            alt_state >= 1 && (alt_state as usize) <= self.nodes[node].num_states,
            "state {alt_state} out of range at node {node}"
        );

        if let Some(pending) = self.pending_node.take() {
            self.nodes[pending].record_substitution(true);
        }
        self.pending_node = Some(node);

        let alt_one_body = self.scorer.one_body(node, alt_state, &self.weights);
        let alt_slot = self.nodes[node].queue.position_of(alt_state);
        let store_own_side = self.nodes[node].wants_pair_cache();
        let alt_aa = self.rotamers.aa_of(node, alt_state);

        self.nodes[node].alt_state = alt_state;
        self.nodes[node].alt_one_body = alt_one_body;
        let mut alt_total = alt_one_body;

        for ii in 0..self.nodes[node].incident.len() {
            let edge_index = self.nodes[node].incident[ii];
            let peer_state = self.nodes[node].peer_state[ii];
            let peer_slot = self.nodes[node].peer_history_slot[ii];

            let energy = if peer_state == 0 {
                0.0
            } else {
                let side = self.edges[edge_index].side_of(node);
                let peer = self.edges[edge_index].nodes[1 - side];
                let peer_aa = self.rotamers.aa_of(peer, peer_state);

                if self.edges[edge_index].aa_pair_possible(side, alt_aa, peer_aa) {
                    self.edge_energy_for_alt(
                        edge_index,
                        side,
                        store_own_side,
                        node,
                        alt_state,
                        alt_slot,
                        peer,
                        peer_state,
                        peer_slot,
                    )
                } else {
                    0.0
                }
            };

            self.nodes[node].alt_pair[ii] = energy;
            alt_total += energy;
        }

        self.nodes[node].alt_total = alt_total;

        let previous = self.nodes[node].current_total;
        let delta = alt_total - previous;
        self.alt_total_energy = self.total_energy + delta;
        (delta, previous)
    }

    /// Commits the pending substitution and returns the new total energy.
    ///
    /// # Panics
    ///
    /// Panics if no substitution is pending (contract violation).
    pub fn commit(&mut self) -> f64 {
        let node = self
            .pending_node
            .take()
            .expect("commit without a pending consider");

        let new_state = self.nodes[node].alt_state;
        {
            let entry = &mut self.nodes[node];
            entry.current_state = new_state;
            entry.current_one_body = entry.alt_one_body;
            entry.current_total = entry.alt_total;
            for ii in 0..entry.current_pair.len() {
                entry.current_pair[ii] = entry.alt_pair[ii];
            }
        }

        let bumped = self.nodes[node].queue.push(new_state);
        let head_slot = self.nodes[node].queue.head_slot();

        for ii in 0..self.nodes[node].incident.len() {
            let edge_index = self.nodes[node].incident[ii];
            let energy = self.nodes[node].current_pair[ii];
            let side = self.edges[edge_index].side_of(node);

            self.edges[edge_index].wipe_slot(side, bumped);
            self.edges[edge_index].current_energy = energy;
            self.store_current_energy(edge_index);
            self.update_peer_mirror(edge_index, side, new_state, head_slot, energy);
        }

        self.nodes[node].record_substitution(false);

        self.total_energy = self.alt_total_energy;
        self.commits_since_resync += 1;
        if self.commits_since_resync >= COMMITS_BETWEEN_RESYNCS {
            let (total, drift) = self.resync_totals();
            self.log_drift(drift);
            self.total_energy = total;
        }

        self.total_energy
    }

    /// Rejects the pending substitution. No state changes.
    ///
    /// # Panics
    ///
    /// Panics if no substitution is pending (contract violation).
    pub fn revert(&mut self) {
        let node = self
            .pending_node
            .take()
            .expect("revert without a pending consider");
        self.nodes[node].record_substitution(true);
    }

    /// Returns the running total energy of the current state assignment.
    #[must_use]
    pub const fn current_energy(&self) -> f64 {
        self.total_energy
    }

    /// Re-sums the total from the per-node and per-edge caches, re-syncs
    /// the running total, and reports drift beyond the tolerance.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CacheDrift`] if the running total had drifted by
    /// more than the tolerance. The graph is re-synced either way.
    pub fn verify_energy(&mut self) -> Result<f64> {
        let (total, drift) = self.resync_totals();
        if drift > DRIFT_TOLERANCE {
            Err(Error::CacheDrift { drift })
        } else {
            Ok(total)
        }
    }

    /// Sums one-body energies of the nodes tagged with `group` plus the
    /// pair energies of edges with both endpoints in the group.
    #[must_use]
    pub fn energy_for_group(&self, group: u32) -> f64 {
        let mut sum = 0.0;
        for node in &self.nodes {
            if node.group == group {
                sum += node.current_one_body;
            }
        }
        for edge in &self.edges {
            if self.nodes[edge.nodes[0]].group == group
                && self.nodes[edge.nodes[1]].group == group
            {
                sum += edge.current_energy;
            }
        }
        sum
    }

    fn assert_prepared(&self) {
        assert!(
            self.prepared,
            "the graph must be prepared for sampling before state operations"
        );
    }

    fn assign_zero_state(&mut self, node: usize) {
        {
            let entry = &mut self.nodes[node];
            entry.current_state = 0;
            entry.current_one_body = 0.0;
            entry.current_total = 0.0;
            entry.current_pair.iter_mut().for_each(|e| *e = 0.0);
        }

        for ii in 0..self.nodes[node].incident.len() {
            let edge_index = self.nodes[node].incident[ii];
            let side = self.edges[edge_index].side_of(node);
            self.edges[edge_index].current_energy = 0.0;
            self.update_peer_mirror(edge_index, side, 0, 0, 0.0);
        }
    }

    fn assign_state(&mut self, node: usize, state: u32) {
        assert!(
            (state as usize) <= self.nodes[node].num_states,
            "state {state} out of range at node {node}"
        );

        let one_body = self.scorer.one_body(node, state, &self.weights);
        {
            let entry = &mut self.nodes[node];
            entry.current_state = state;
            entry.current_one_body = one_body;
            entry.current_total = one_body;
        }

        let bumped = self.nodes[node].queue.push(state);
        let head_slot = self.nodes[node].queue.head_slot();
        let own_aa = self.rotamers.aa_of(node, state);

        for ii in 0..self.nodes[node].incident.len() {
            let edge_index = self.nodes[node].incident[ii];
            let side = self.edges[edge_index].side_of(node);
            let peer = self.edges[edge_index].nodes[1 - side];
            let peer_state = self.nodes[node].peer_state[ii];

            self.edges[edge_index].wipe_slot(side, bumped);

            let energy = if peer_state == 0 {
                0.0
            } else {
                let peer_aa = self.rotamers.aa_of(peer, peer_state);
                if self.edges[edge_index].aa_pair_possible(side, own_aa, peer_aa) {
                    self.scorer.pair(node, state, peer, peer_state, &self.weights)
                } else {
                    0.0
                }
            };

            self.nodes[node].current_pair[ii] = energy;
            self.nodes[node].current_total += energy;
            self.edges[edge_index].current_energy = energy;
            self.store_current_energy(edge_index);
            self.update_peer_mirror(edge_index, side, state, head_slot, energy);
        }
    }

    fn partial_assign(&mut self, node: usize, state: u32) {
        if state == 0 {
            self.assign_zero_state(node);
            return;
        }
        assert!(
            (state as usize) <= self.nodes[node].num_states,
            "state {state} out of range at node {node}"
        );

        self.nodes[node].current_state = state;
        let bumped = self.nodes[node].queue.push(state);
        let head_slot = self.nodes[node].queue.head_slot();

        for ii in 0..self.nodes[node].incident.len() {
            let edge_index = self.nodes[node].incident[ii];
            let side = self.edges[edge_index].side_of(node);
            self.edges[edge_index].wipe_slot(side, bumped);
            self.edges[edge_index].current_energy = 0.0;
            self.edges[edge_index].finalize_pending = true;

            let peer = self.edges[edge_index].nodes[1 - side];
            let pos = self.edges[edge_index].pos_in_node[1 - side];
            self.nodes[peer].peer_state[pos] = state;
            self.nodes[peer].peer_history_slot[pos] = head_slot;
            self.nodes[peer].current_pair[pos] = 0.0;
        }
    }

    fn finalize_assignment(&mut self, node: usize) {
        if self.nodes[node].current_state == 0 {
            return;
        }

        let state = self.nodes[node].current_state;
        let one_body = self.scorer.one_body(node, state, &self.weights);
        self.nodes[node].current_one_body = one_body;
        self.nodes[node].current_total = one_body;

        for ii in 0..self.nodes[node].incident.len() {
            let edge_index = self.nodes[node].incident[ii];
            let side = self.edges[edge_index].side_of(node);
            let peer = self.edges[edge_index].nodes[1 - side];
            let peer_state = self.nodes[node].peer_state[ii];

            if self.edges[edge_index].finalize_pending && peer_state != 0 {
                let own_aa = self.rotamers.aa_of(node, state);
                let peer_aa = self.rotamers.aa_of(peer, peer_state);
                let energy = if self.edges[edge_index].aa_pair_possible(side, own_aa, peer_aa) {
                    self.scorer.pair(node, state, peer, peer_state, &self.weights)
                } else {
                    0.0
                };
                self.edges[edge_index].current_energy = energy;
                self.edges[edge_index].finalize_pending = false;
                self.store_current_energy(edge_index);
            }

            let energy = self.edges[edge_index].current_energy;
            self.nodes[node].current_pair[ii] = energy;
            self.nodes[node].current_total += energy;
            let pos = self.edges[edge_index].pos_in_node[1 - side];
            self.nodes[peer].current_pair[pos] = energy;
        }
    }

    /// Cache-aware pair-energy lookup for an alternate state: first the
    /// changing side's matrix (keyed by the alt state's history slot), then
    /// the peer side's matrix (keyed by the peer's slot), then the scorer.
    #[allow(clippy::too_many_arguments)]
    fn edge_energy_for_alt(
        &mut self,
        edge_index: usize,
        side: usize,
        store_own_side: bool,
        node: usize,
        alt_state: u32,
        alt_slot: u32,
        peer: usize,
        peer_state: u32,
        peer_slot: u32,
    ) -> f64 {
        debug_assert!(peer_state != 0);
        debug_assert!(peer_slot != 0);

        {
            let edge = &mut self.edges[edge_index];
            // a side returning to caching mode starts from a clean matrix
            if store_own_side && !edge.store_enabled[side] {
                edge.wipe_side(side);
            }
            edge.store_enabled[side] = store_own_side;
        }

        let edge = &self.edges[edge_index];
        if edge.store_enabled[side] && alt_slot != 0 {
            let cached = edge.stored[side][(peer_state as usize - 1, alt_slot as usize - 1)];
            if cached != UNCOMPUTED {
                return cached;
            }
        }
        if edge.store_enabled[1 - side] {
            let cached = edge.stored[1 - side][(alt_state as usize - 1, peer_slot as usize - 1)];
            if cached != UNCOMPUTED {
                return cached;
            }
        }

        let energy = self
            .scorer
            .pair(node, alt_state, peer, peer_state, &self.weights);

        let edge = &mut self.edges[edge_index];
        if edge.store_enabled[side] && alt_slot != 0 {
            edge.stored[side][(peer_state as usize - 1, alt_slot as usize - 1)] = energy;
        }
        if edge.store_enabled[1 - side] {
            edge.stored[1 - side][(alt_state as usize - 1, peer_slot as usize - 1)] = energy;
        }
        energy
    }

    /// Records the edge's current pair energy into both caching sides,
    /// keyed by each side's head history slot.
    fn store_current_energy(&mut self, edge_index: usize) {
        let [a, b] = self.edges[edge_index].nodes;
        let states = [self.nodes[a].current_state, self.nodes[b].current_state];
        if states[0] == 0 || states[1] == 0 {
            return;
        }
        let slots = [
            self.nodes[a].queue.head_slot(),
            self.nodes[b].queue.head_slot(),
        ];

        let energy = self.edges[edge_index].current_energy;
        let edge = &mut self.edges[edge_index];
        for side in 0..2 {
            if edge.store_enabled[side] {
                edge.stored[side]
                    [(states[1 - side] as usize - 1, slots[side] as usize - 1)] = energy;
            }
        }
    }

    /// Refreshes the peer's view of `side`'s node after a state change.
    fn update_peer_mirror(
        &mut self,
        edge_index: usize,
        side: usize,
        new_state: u32,
        new_slot: u32,
        energy: f64,
    ) {
        let peer = self.edges[edge_index].nodes[1 - side];
        let pos = self.edges[edge_index].pos_in_node[1 - side];

        let entry = &mut self.nodes[peer];
        let old = entry.current_pair[pos];
        entry.current_total += energy - old;
        entry.current_pair[pos] = energy;
        entry.peer_state[pos] = new_state;
        entry.peer_history_slot[pos] = new_slot;
    }

    fn resync_totals(&mut self) -> (f64, f64) {
        let mut total = 0.0;
        for node in &self.nodes {
            total += node.current_one_body;
        }
        for edge in &self.edges {
            total += edge.current_energy;
        }

        let drift = (total - self.total_energy).abs();
        self.total_energy = total;
        self.commits_since_resync = 0;
        (total, drift)
    }

    fn log_drift(&self, drift: f64) {
        if drift > DRIFT_TOLERANCE {
            log::warn!("interaction graph cache drift of {drift}; running total re-synced");
        }
    }
}
