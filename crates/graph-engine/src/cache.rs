//! Bounded LRU cache standing in for the source runtime's soft references
//! (SPEC_FULL.md §4.3.2 / §9's re-architecture note): `ref_type: strong`
//! never evicts, `ref_type: soft` evicts past a capacity threshold. A node
//! dirtied by an in-flight transaction is pinned (kept out of the eviction
//! order) until the transaction's `store()` call succeeds.

use std::collections::{HashMap, VecDeque};

use graph_storage::{Address, Blob};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefType {
    Strong,
    Soft,
}

impl Default for RefType {
    fn default() -> Self {
        RefType::Soft
    }
}

pub struct NodeCache {
    ref_type: RefType,
    capacity: usize,
    entries: HashMap<Address, Blob>,
    /// Most-recently-used at the back; eviction pops from the front,
    /// skipping pinned addresses.
    lru: VecDeque<Address>,
    pinned: HashMap<Address, usize>,
}

impl NodeCache {
    pub fn new(ref_type: RefType, capacity: usize) -> Self {
        Self {
            ref_type,
            capacity: capacity.max(1),
            entries: HashMap::new(),
            lru: VecDeque::new(),
            pinned: HashMap::new(),
        }
    }

    pub fn get(&mut self, address: Address) -> Option<&Blob> {
        if self.entries.contains_key(&address) {
            self.touch(address);
        }
        self.entries.get(&address)
    }

    pub fn insert(&mut self, address: Address, blob: Blob) {
        self.entries.insert(address, blob);
        self.touch(address);
        self.evict_if_needed();
    }

    pub fn remove(&mut self, address: Address) {
        self.entries.remove(&address);
        self.lru.retain(|a| *a != address);
        self.pinned.remove(&address);
    }

    /// Pins `address` until a matching `unpin` call; a pinned node
    /// survives eviction even under `RefType::Soft`.
    pub fn pin(&mut self, address: Address) {
        *self.pinned.entry(address).or_insert(0) += 1;
    }

    pub fn unpin(&mut self, address: Address) {
        if let Some(count) = self.pinned.get_mut(&address) {
            *count -= 1;
            if *count == 0 {
                self.pinned.remove(&address);
            }
        }
        self.evict_if_needed();
    }

    fn touch(&mut self, address: Address) {
        self.lru.retain(|a| *a != address);
        self.lru.push_back(address);
    }

    fn evict_if_needed(&mut self) {
        if self.ref_type == RefType::Strong {
            return;
        }
        while self.entries.len() > self.capacity {
            let Some(victim) = self
                .lru
                .iter()
                .position(|addr| !self.pinned.contains_key(addr))
            else {
                break;
            };
            let address = self.lru.remove(victim).expect("index just located");
            self.entries.remove(&address);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soft_cache_evicts_past_capacity() {
        let mut cache = NodeCache::new(RefType::Soft, 2);
        cache.insert(1, "a".into());
        cache.insert(2, "b".into());
        cache.insert(3, "c".into());
        assert_eq!(cache.len(), 2);
        assert!(cache.get(1).is_none());
    }

    #[test]
    fn strong_cache_never_evicts() {
        let mut cache = NodeCache::new(RefType::Strong, 1);
        cache.insert(1, "a".into());
        cache.insert(2, "b".into());
        cache.insert(3, "c".into());
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn pinned_entries_survive_eviction_pressure() {
        let mut cache = NodeCache::new(RefType::Soft, 1);
        cache.insert(1, "a".into());
        cache.pin(1);
        cache.insert(2, "b".into());
        assert!(cache.get(1).is_some());
        cache.unpin(1);
        cache.insert(3, "c".into());
        assert!(cache.get(1).is_none());
    }
}
