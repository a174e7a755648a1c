//! Priority list of (dose, group) pairs with permanent removal.

use immunity_core::{GroupKey, SimError};
use std::collections::HashSet;

/// Live priority list. The top is the highest-priority pair that still has
/// people waiting; covered pairs are removed and never come back.
#[derive(Clone, Debug, Default)]
pub struct PriorityQueue {
    // lowest priority first, so the top is the last element
    order: Vec<GroupKey>,
    live: HashSet<GroupKey>,
}

impl PriorityQueue {
    /// Build from pairs ordered highest priority first.
    pub fn new(highest_first: &[GroupKey]) -> Result<Self, SimError> {
        let mut live = HashSet::with_capacity(highest_first.len());
        for key in highest_first {
            if !live.insert(key.clone()) {
                return Err(SimError::InvalidConfig(format!(
                    "duplicate priority entry {key}"
                )));
            }
        }
        Ok(Self {
            order: highest_first.iter().rev().cloned().collect(),
            live,
        })
    }

    pub fn top(&self) -> Option<&GroupKey> {
        self.order.last()
    }

    pub fn contains(&self, key: &GroupKey) -> bool {
        self.live.contains(key)
    }

    /// Remove `key`; returns whether it was still listed.
    pub fn remove(&mut self, key: &GroupKey) -> bool {
        if !self.live.remove(key) {
            return false;
        }
        if self.order.last() == Some(key) {
            self.order.pop();
        } else {
            self.order.retain(|k| k != key);
        }
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Remaining pairs, highest priority first.
    pub fn iter(&self) -> impl Iterator<Item = &GroupKey> {
        self.order.iter().rev()
    }
}
