//! Bounded most-recently-used queue over rotamer state ids.

use serde::{Deserialize, Serialize};

/// Fixed-capacity LRU over state ids in `1..=num_states`.
///
/// Each state either occupies exactly one of the `capacity` slots or is
/// absent (`position_of` returns 0). Pushing an absent state into a full
/// queue evicts the least recently used state and reports the freed slot,
/// which is how the interaction-graph edges learn which cached matrix row
/// has gone stale.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RecentHistoryQueue {
    /// Slot occupied by each state, 1-based; 0 means absent. Entry 0 is a
    /// dummy so that state ids index directly.
    slot_of_state: Vec<u32>,
    /// State held by each slot, 1-based; 0 means the slot is still free.
    /// Entry 0 is a dummy.
    state_in_slot: Vec<u32>,
    /// Slots ordered most-recent first.
    order: Vec<u32>,
}

impl RecentHistoryQueue {
    /// Constructs a queue of `capacity` slots over `num_states` states.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    #[must_use]
    pub fn new(num_states: usize, capacity: usize) -> Self {
        assert!(capacity > 0);
        Self {
            slot_of_state: vec![0; num_states + 1],
            state_in_slot: vec![0; capacity + 1],
            order: Vec::with_capacity(capacity),
        }
    }

    /// Returns the number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.state_in_slot.len() - 1
    }

    /// Returns how many slots are currently occupied.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns `true` if no state has been pushed yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Returns the slot holding `state`, or 0 if it is not in the queue.
    #[must_use]
    pub fn position_of(&self, state: u32) -> u32 {
        self.slot_of_state[state as usize]
    }

    /// Returns the slot of the most recently pushed state, or 0 if the
    /// queue is empty.
    #[must_use]
    pub fn head_slot(&self) -> u32 {
        self.order.first().copied().unwrap_or(0)
    }

    /// Moves `state` to the head of the queue, inserting it if absent.
    ///
    /// Returns the slot that was evicted to make room, or 0 if nothing was
    /// evicted (the state was already present, or a slot was still free).
    ///
    /// # Panics
    ///
    /// Panics if `state` is 0 or beyond the number of states.
    pub fn push(&mut self, state: u32) -> u32 {
        assert!(state >= 1 && (state as usize) < self.slot_of_state.len());

        let existing = self.slot_of_state[state as usize];
        if existing != 0 {
            let rank = self.order.iter().position(|&s| s == existing).unwrap();
            self.order.remove(rank);
            self.order.insert(0, existing);
            return 0;
        }

        if self.order.len() < self.capacity() {
            let slot = u32::try_from(self.order.len() + 1).unwrap();
            self.slot_of_state[state as usize] = slot;
            self.state_in_slot[slot as usize] = state;
            self.order.insert(0, slot);
            return 0;
        }

        let slot = self.order.pop().unwrap();
        let evicted_state = self.state_in_slot[slot as usize];
        self.slot_of_state[evicted_state as usize] = 0;
        self.slot_of_state[state as usize] = slot;
        self.state_in_slot[slot as usize] = state;
        self.order.insert(0, slot);
        slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_free_slots_without_evicting() {
        let mut queue = RecentHistoryQueue::new(20, 2);

        assert_eq!(queue.push(7), 0);
        assert_eq!(queue.push(9), 0);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.position_of(7), 1);
        assert_eq!(queue.position_of(9), 2);
        assert_eq!(queue.head_slot(), 2);
    }

    #[test]
    fn evicts_the_least_recently_used_state() {
        let mut queue = RecentHistoryQueue::new(20, 2);
        queue.push(7);
        queue.push(9);

        let freed = queue.push(12);

        assert_eq!(freed, 1);
        assert_eq!(queue.position_of(7), 0);
        assert_eq!(queue.position_of(12), 1);
        assert_eq!(queue.position_of(9), 2);
    }

    #[test]
    fn re_pushing_a_present_state_only_reorders() {
        let mut queue = RecentHistoryQueue::new(20, 2);
        queue.push(7);
        queue.push(9);

        assert_eq!(queue.push(7), 0);
        assert_eq!(queue.head_slot(), queue.position_of(7));

        // 9 is now least recent, so the next insertion reuses its slot
        let freed = queue.push(3);
        assert_eq!(freed, 2);
        assert_eq!(queue.position_of(9), 0);
    }

    #[test]
    fn positions_stay_consistent_over_a_long_walk() {
        let mut queue = RecentHistoryQueue::new(10, 3);
        let walk = [1, 2, 3, 4, 2, 5, 5, 1, 9, 2, 10, 3, 3, 7];

        for state in walk {
            let freed = queue.push(state);
            if freed != 0 {
                // a freed slot belongs to nobody until the new head claims it
                assert_eq!(queue.position_of(state), freed);
            }
            // every present state occupies a unique slot
            let mut seen = [false; 4];
            for candidate in 1..=10_u32 {
                let slot = queue.position_of(candidate);
                if slot != 0 {
                    assert!(!seen[slot as usize]);
                    seen[slot as usize] = true;
                }
            }
            assert_eq!(queue.head_slot(), queue.position_of(state));
        }
    }
}
