//! Topic registry
//!
//! A set of announced entries keyed by identity, each with a priority.
//! `Registry` is single-owner and lives inside a coordinator or a ledger;
//! `SharedRegistry` puts it behind a read/write lock for concurrent readers.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use pubswap_core::{Delta, Entry, EntryKey, Priority};

use crate::config::PriorityPolicy;

/// Priority-ordered set of announced entries
#[derive(Clone, Debug)]
pub struct Registry<K: EntryKey> {
    entries: HashMap<K, Priority>,
    policy: PriorityPolicy,
}

impl<K: EntryKey> Default for Registry<K> {
    fn default() -> Self {
        Self::new(PriorityPolicy::default())
    }
}

impl<K: EntryKey> Registry<K> {
    pub fn new(policy: PriorityPolicy) -> Self {
        Registry {
            entries: HashMap::new(),
            policy,
        }
    }

    /// Insert `key`. Returns true if the identity was not present before.
    ///
    /// For an identity already present the priority is resolved by the
    /// registry's [`PriorityPolicy`].
    pub fn add(&mut self, key: K, priority: Priority) -> bool {
        match self.entries.get_mut(&key) {
            Some(existing) => {
                match self.policy {
                    PriorityPolicy::FirstWriteWins => {}
                    PriorityPolicy::LastWriteWins => *existing = priority,
                    PriorityPolicy::MaxPriority => *existing = (*existing).max(priority),
                }
                false
            }
            None => {
                self.entries.insert(key, priority);
                true
            }
        }
    }

    /// Remove `key`. Returns true if it was present.
    pub fn remove(&mut self, key: &K) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Apply one delta: cancels remove, announcements add
    pub fn apply(&mut self, delta: &Delta<K>) -> bool {
        if delta.is_cancel() {
            self.remove(delta.identity())
        } else {
            self.add(delta.identity().clone(), delta.priority())
        }
    }

    pub fn contains(&self, key: &K) -> Option<Entry<K>> {
        self.entries
            .get(key)
            .map(|&priority| Entry::new(key.clone(), priority))
    }

    /// Unordered snapshot
    pub fn entries(&self) -> Vec<Entry<K>> {
        self.entries
            .iter()
            .map(|(key, &priority)| Entry::new(key.clone(), priority))
            .collect()
    }

    /// Snapshot ordered by priority descending, ties by identity ascending
    pub fn sorted_entries(&self) -> Vec<Entry<K>> {
        let mut entries = self.entries();
        entries.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.key.cmp(&b.key)));
        entries
    }

    /// Every live entry as an announcement delta
    pub fn snapshot(&self) -> Vec<Delta<K>> {
        self.sorted_entries().into_iter().map(Delta::from).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn policy(&self) -> PriorityPolicy {
        self.policy
    }
}

/// Registry behind a read/write lock; clones share the same registry
#[derive(Clone, Debug)]
pub struct SharedRegistry<K: EntryKey> {
    inner: Arc<RwLock<Registry<K>>>,
}

impl<K: EntryKey> Default for SharedRegistry<K> {
    fn default() -> Self {
        Self::new(PriorityPolicy::default())
    }
}

impl<K: EntryKey> SharedRegistry<K> {
    pub fn new(policy: PriorityPolicy) -> Self {
        SharedRegistry {
            inner: Arc::new(RwLock::new(Registry::new(policy))),
        }
    }

    pub fn add(&self, key: K, priority: Priority) -> bool {
        self.inner.write().add(key, priority)
    }

    pub fn remove(&self, key: &K) -> bool {
        self.inner.write().remove(key)
    }

    pub fn apply(&self, delta: &Delta<K>) -> bool {
        self.inner.write().apply(delta)
    }

    pub fn contains(&self, key: &K) -> Option<Entry<K>> {
        self.inner.read().contains(key)
    }

    pub fn entries(&self) -> Vec<Entry<K>> {
        self.inner.read().entries()
    }

    pub fn sorted_entries(&self) -> Vec<Entry<K>> {
        self.inner.read().sorted_entries()
    }

    pub fn snapshot(&self) -> Vec<Delta<K>> {
        self.inner.read().snapshot()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use pubswap_core::{ContentKey, Publication, Topic};
    use std::collections::HashSet;

    fn topic(s: &str) -> Topic {
        Topic::from(s)
    }

    #[test]
    fn test_first_write_wins_by_default() {
        let mut reg = Registry::default();
        assert!(reg.add(topic("a"), 5));
        assert!(!reg.add(topic("a"), 9));
        assert_eq!(reg.contains(&topic("a")).unwrap().priority, 5);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_other_policies() {
        let mut last = Registry::new(PriorityPolicy::LastWriteWins);
        last.add(topic("a"), 5);
        last.add(topic("a"), 1);
        assert_eq!(last.contains(&topic("a")).unwrap().priority, 1);

        let mut max = Registry::new(PriorityPolicy::MaxPriority);
        max.add(topic("a"), 5);
        max.add(topic("a"), 1);
        max.add(topic("a"), 7);
        assert_eq!(max.contains(&topic("a")).unwrap().priority, 7);
    }

    #[test]
    fn test_remove_missing_is_noop() {
        let mut reg: Registry<Topic> = Registry::default();
        assert!(!reg.remove(&topic("nope")));
        assert!(reg.is_empty());
    }

    #[test]
    fn test_sorted_ties_broken_by_identity() {
        let mut reg = Registry::default();
        reg.add(topic("c"), 1);
        reg.add(topic("a"), 1);
        reg.add(topic("b"), 3);

        let keys: Vec<_> = reg.sorted_entries().into_iter().map(|e| e.key).collect();
        assert_eq!(keys, vec![topic("b"), topic("a"), topic("c")]);
    }

    #[test]
    fn test_publication_identity_includes_value() {
        let mut reg = Registry::default();
        let k1 = ContentKey::for_data(b"one");
        let k2 = ContentKey::for_data(b"two");
        assert!(reg.add(Publication::new("t", k1), 1));
        assert!(reg.add(Publication::new("t", k2), 1));
        assert!(!reg.add(Publication::new("t", k1), 2));
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn test_apply_delta() {
        let mut reg = Registry::default();
        reg.apply(&Delta::announce(topic("a"), 3));
        assert!(reg.contains(&topic("a")).is_some());
        reg.apply(&Delta::cancel(topic("a")));
        assert!(reg.contains(&topic("a")).is_none());
    }

    #[test]
    fn test_shared_registry_concurrent_writers() {
        let shared = SharedRegistry::new(PriorityPolicy::FirstWriteWins);
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let reg = shared.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        reg.add(Topic::from(format!("topic-{}", i % 50)), t * 100 + i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let sorted = shared.sorted_entries();
        assert_eq!(sorted.len(), 50);
        let unique: HashSet<_> = sorted.iter().map(|e| e.key.clone()).collect();
        assert_eq!(unique.len(), 50);
    }

    #[derive(Clone, Debug)]
    enum Op {
        Add(u8, i32),
        Remove(u8),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..16, any::<i32>()).prop_map(|(k, p)| Op::Add(k, p)),
            (0u8..16).prop_map(Op::Remove),
        ]
    }

    proptest! {
        #[test]
        fn prop_contains_tracks_net_effect(ops in proptest::collection::vec(op(), 0..200)) {
            let mut reg = Registry::default();
            let mut model: HashMap<Topic, i32> = HashMap::new();

            for op in &ops {
                match op {
                    Op::Add(k, p) => {
                        let key = Topic::from(format!("t{}", k));
                        reg.add(key.clone(), *p);
                        model.entry(key).or_insert(*p);
                    }
                    Op::Remove(k) => {
                        let key = Topic::from(format!("t{}", k));
                        reg.remove(&key);
                        model.remove(&key);
                    }
                }
            }

            for k in 0u8..16 {
                let key = Topic::from(format!("t{}", k));
                prop_assert_eq!(reg.contains(&key).map(|e| e.priority), model.get(&key).copied());
            }

            let sorted = reg.sorted_entries();
            prop_assert_eq!(sorted.len(), model.len());
            for pair in sorted.windows(2) {
                prop_assert!(pair[0].priority >= pair[1].priority);
            }
        }
    }
}
