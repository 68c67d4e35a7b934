//! Array-backed set of known ledgers

use super::ChainId;

use std::collections::HashMap;

/// Duplicate-free set of chain ids with O(1) membership and O(n) iteration.
/// Iteration order is insertion order but callers must not rely on it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KnownLedgers {
    ids: Vec<ChainId>,
    index: HashMap<ChainId, usize>,
}

impl KnownLedgers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a chain id; returns false if it was already present
    pub fn insert(&mut self, chain_id: ChainId) -> bool {
        if self.index.contains_key(&chain_id) {
            return false;
        }
        self.index.insert(chain_id, self.ids.len());
        self.ids.push(chain_id);
        true
    }

    pub fn contains(&self, chain_id: ChainId) -> bool {
        self.index.contains_key(&chain_id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ChainId> + '_ {
        self.ids.iter().copied()
    }

    pub fn to_vec(&self) -> Vec<ChainId> {
        self.ids.clone()
    }
}

impl FromIterator<ChainId> for KnownLedgers {
    fn from_iter<I: IntoIterator<Item = ChainId>>(iter: I) -> Self {
        let mut set = KnownLedgers::new();
        for id in iter {
            set.insert(id);
        }
        set
    }
}
