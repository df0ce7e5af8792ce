//! Consecutive-observation counting for liquidation candidates.

use std::collections::HashMap;
use tracing::debug;

use crate::position::PositionKey;

/// Result of recording one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// Same or older block than the last observation; nothing changed
    Duplicate,
    /// Counted, threshold not reached yet
    Collecting(u32),
    /// Threshold reached
    Ready(u32),
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    last_seen_block: u64,
    confirmations: u32,
}

/// Per-position confirmation counts.
///
/// A count only grows on a strictly later block, and restarts at one when
/// more than `reset_gap` blocks passed since the previous observation.
#[derive(Debug)]
pub struct ConfirmationTracker {
    required: u32,
    reset_gap: u64,
    candidates: HashMap<PositionKey, Candidate>,
}

impl ConfirmationTracker {
    pub fn new(required: u32, reset_gap: u64) -> Self {
        Self {
            required: required.max(1),
            reset_gap,
            candidates: HashMap::new(),
        }
    }

    pub fn required(&self) -> u32 {
        self.required
    }

    pub fn observe(&mut self, key: PositionKey, block: u64) -> Observation {
        let reset_gap = self.reset_gap;
        let confirmations = match self.candidates.get_mut(&key) {
            Some(c) if block <= c.last_seen_block => return Observation::Duplicate,
            Some(c) if block - c.last_seen_block > reset_gap => {
                debug!(
                    position = %key,
                    last_seen = c.last_seen_block,
                    block,
                    "Candidate gap too large, restarting count"
                );
                *c = Candidate {
                    last_seen_block: block,
                    confirmations: 1,
                };
                1
            }
            Some(c) => {
                c.last_seen_block = block;
                c.confirmations = c.confirmations.saturating_add(1);
                c.confirmations
            }
            None => {
                self.candidates.insert(
                    key,
                    Candidate {
                        last_seen_block: block,
                        confirmations: 1,
                    },
                );
                1
            }
        };

        if confirmations >= self.required {
            Observation::Ready(confirmations)
        } else {
            Observation::Collecting(confirmations)
        }
    }

    pub fn confirmations(&self, key: &PositionKey) -> Option<u32> {
        self.candidates.get(key).map(|c| c.confirmations)
    }

    pub fn remove(&mut self, key: &PositionKey) {
        self.candidates.remove(key);
    }

    /// Drop candidates not observed within the reset gap. Returns how many.
    pub fn evict_stale(&mut self, current_block: u64) -> usize {
        let gap = self.reset_gap;
        let before = self.candidates.len();
        self.candidates
            .retain(|_, c| current_block.saturating_sub(c.last_seen_block) <= gap);
        before - self.candidates.len()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}
