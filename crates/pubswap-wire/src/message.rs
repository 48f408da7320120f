//! Exchange message structure
//!
//! A message is built incrementally by one owner (a peer queue or the block
//! sender) and handed to the transport, after which nobody mutates it.

use std::collections::HashMap;
use std::fmt;

use pubswap_core::{Block, ContentKey, Delta, Entry, EntryKey, Priority, Publication, Topic};

/// Entry kinds that have a section in [`WireMessage`]
pub trait WireEntry: EntryKey {
    fn section(msg: &WireMessage) -> &HashMap<Self, Delta<Self>>;
    fn section_mut(msg: &mut WireMessage) -> &mut HashMap<Self, Delta<Self>>;
}

impl WireEntry for Topic {
    fn section(msg: &WireMessage) -> &HashMap<Self, Delta<Self>> {
        &msg.subscribes
    }

    fn section_mut(msg: &mut WireMessage) -> &mut HashMap<Self, Delta<Self>> {
        &mut msg.subscribes
    }
}

impl WireEntry for Publication {
    fn section(msg: &WireMessage) -> &HashMap<Self, Delta<Self>> {
        &msg.publishes
    }

    fn section_mut(msg: &mut WireMessage) -> &mut HashMap<Self, Delta<Self>> {
        &mut msg.publishes
    }
}

/// Exchange message
///
/// Equality is semantic: same entry sets, same cancel flags, same blocks,
/// same `full` flag.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WireMessage {
    /// Authoritative snapshot rather than a patch
    full: bool,
    subscribes: HashMap<Topic, Delta<Topic>>,
    publishes: HashMap<Publication, Delta<Publication>>,
    blocks: HashMap<ContentKey, Block>,
}

impl WireMessage {
    pub fn new(full: bool) -> Self {
        WireMessage {
            full,
            ..Default::default()
        }
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.full
    }

    /// True when no entry and no block is carried
    pub fn is_empty(&self) -> bool {
        self.subscribes.is_empty() && self.publishes.is_empty() && self.blocks.is_empty()
    }

    // ---- generic section access ----

    /// Announce `key`; an existing entry for the same identity is updated in
    /// place and loses any cancel mark.
    pub fn add_entry<K: WireEntry>(&mut self, key: K, priority: Priority) {
        self.put_entry(key, priority, false);
    }

    /// Drop whatever is recorded for `key` and leave a cancel tombstone
    pub fn cancel_entry<K: WireEntry>(&mut self, key: K) {
        let section = K::section_mut(self);
        section.remove(&key);
        section.insert(key.clone(), Delta::cancel(key));
    }

    /// Merge deltas in order: cancels become tombstones, the rest are added
    pub fn merge<K: WireEntry>(&mut self, deltas: &[Delta<K>]) {
        for delta in deltas {
            if delta.is_cancel() {
                self.cancel_entry(delta.identity().clone());
            } else {
                self.add_entry(delta.identity().clone(), delta.priority());
            }
        }
    }

    /// Snapshot of one section's entries, in no particular order
    pub fn entries<K: WireEntry>(&self) -> Vec<Delta<K>> {
        K::section(self).values().cloned().collect()
    }

    pub fn get_entry<K: WireEntry>(&self, key: &K) -> Option<&Delta<K>> {
        K::section(self).get(key)
    }

    fn put_entry<K: WireEntry>(&mut self, key: K, priority: Priority, cancel: bool) {
        let section = K::section_mut(self);
        match section.get_mut(&key) {
            Some(existing) => {
                existing.entry.priority = priority;
                existing.cancel = cancel;
            }
            None => {
                section.insert(
                    key.clone(),
                    Delta {
                        entry: Entry::new(key, priority),
                        cancel,
                    },
                );
            }
        }
    }

    pub(crate) fn insert_decoded<K: WireEntry>(&mut self, delta: Delta<K>) {
        let key = delta.identity().clone();
        self.put_entry(key, delta.priority(), delta.is_cancel());
    }

    // ---- subscriptions ----

    pub fn add_subscribe(&mut self, topic: Topic, priority: Priority) {
        self.add_entry(topic, priority);
    }

    pub fn cancel_subscribe(&mut self, topic: Topic) {
        self.cancel_entry(topic);
    }

    pub fn subscribes(&self) -> Vec<Delta<Topic>> {
        self.entries()
    }

    // ---- publications ----

    pub fn add_publish(&mut self, topic: Topic, value: ContentKey, priority: Priority) {
        self.add_entry(Publication { topic, value }, priority);
    }

    pub fn cancel_publish(&mut self, topic: Topic, value: ContentKey) {
        self.cancel_entry(Publication { topic, value });
    }

    pub fn publishes(&self) -> Vec<Delta<Publication>> {
        self.entries()
    }

    // ---- blocks ----

    /// Add a block; a later block with the same key replaces the earlier one
    pub fn add_block(&mut self, block: Block) {
        self.blocks.insert(block.key(), block);
    }

    pub fn blocks(&self) -> Vec<Block> {
        self.blocks.values().cloned().collect()
    }

    pub(crate) fn subscribe_section(&self) -> &HashMap<Topic, Delta<Topic>> {
        &self.subscribes
    }

    pub(crate) fn publish_section(&self) -> &HashMap<Publication, Delta<Publication>> {
        &self.publishes
    }

    pub(crate) fn block_section(&self) -> &HashMap<ContentKey, Block> {
        &self.blocks
    }

    /// Counts for log fields
    pub fn summary(&self) -> MessageSummary {
        MessageSummary {
            full: self.full,
            subscribes: self.subscribes.len(),
            publishes: self.publishes.len(),
            cancels: self.subscribes.values().filter(|d| d.is_cancel()).count()
                + self.publishes.values().filter(|d| d.is_cancel()).count(),
            blocks: self.blocks.len(),
        }
    }
}

/// Compact description of a message
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageSummary {
    pub full: bool,
    pub subscribes: usize,
    pub publishes: usize,
    pub cancels: usize,
    pub blocks: usize,
}

impl fmt::Display for MessageSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "full={} subs={} pubs={} cancels={} blocks={}",
            self.full, self.subscribes, self.publishes, self.cancels, self.blocks
        )
    }
}
