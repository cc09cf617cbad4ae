//! Batch planning: dedupe tolerance-equivalent states and keep the output
//! position-preserving.

use std::collections::HashMap;

use crate::errors::DispatchError;
use crate::key::StateKey;
use crate::model::FluidState;

/// One distinct state key within a batch, with a representative input state
/// (the first occurrence) to hand to the solver on a miss.
#[derive(Debug, Clone)]
pub(crate) struct BatchGroup {
    pub key: StateKey,
    pub state: FluidState,
}

/// Outcome slot for one input position.
#[derive(Debug, Clone)]
pub(crate) enum Slot {
    /// Valid input, resolved through the group at this index.
    Group(usize),
    /// Rejected at the boundary; never reaches the store or solver.
    Invalid(DispatchError),
}

/// Deduplicated, deterministically ordered execution plan for a batch.
#[derive(Debug, Clone)]
pub(crate) struct BatchPlan {
    /// Distinct keys, ordered by digest so repeated batches walk the store
    /// in the same order.
    pub groups: Vec<BatchGroup>,
    /// One slot per input, in input order.
    pub slots: Vec<Slot>,
}

impl BatchPlan {
    pub fn build(states: &[FluidState], digits: u8) -> Self {
        let mut groups: Vec<BatchGroup> = Vec::new();
        let mut index_of: HashMap<StateKey, usize> = HashMap::new();
        let mut slots = Vec::with_capacity(states.len());

        for state in states {
            match StateKey::encode(state, digits) {
                Ok(key) => {
                    let idx = *index_of.entry(key.clone()).or_insert_with(|| {
                        groups.push(BatchGroup { key, state: *state });
                        groups.len() - 1
                    });
                    slots.push(Slot::Group(idx));
                }
                Err(e) => slots.push(Slot::Invalid(e)),
            }
        }

        // reorder groups by digest and remap the slots
        let mut order: Vec<usize> = (0..groups.len()).collect();
        order.sort_by_key(|&i| groups[i].key.digest());
        let mut rank_of = vec![0usize; groups.len()];
        for (new_idx, &old_idx) in order.iter().enumerate() {
            rank_of[old_idx] = new_idx;
        }
        let mut ordered = Vec::with_capacity(groups.len());
        for &old_idx in &order {
            ordered.push(groups[old_idx].clone());
        }
        for slot in &mut slots {
            if let Slot::Group(idx) = slot {
                *idx = rank_of[*idx];
            }
        }

        Self {
            groups: ordered,
            slots,
        }
    }
}
