//! Announcement entries
//!
//! Subscriptions and publications share one shape: an identity (`Topic` or
//! `Publication`) plus a priority. The identity is all that matters for
//! membership; priority is metadata. Everything downstream (registries,
//! queues, managers) is generic over [`EntryKey`].

use std::fmt;
use std::hash::Hash;

use crate::{Publication, Topic};

/// Announcement priority, higher is served first
pub type Priority = i32;

/// Priority given to the first element of a local announcement
pub const MAX_PRIORITY: Priority = i32::MAX;

/// Identity of an announced entry
pub trait EntryKey:
    Clone + Eq + Ord + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static
{
    /// Short label used in log fields
    const KIND: &'static str;

    /// Topic this entry is announced under
    fn topic(&self) -> &Topic;
}

impl EntryKey for Topic {
    const KIND: &'static str = "sub";

    fn topic(&self) -> &Topic {
        self
    }
}

impl EntryKey for Publication {
    const KIND: &'static str = "pub";

    fn topic(&self) -> &Topic {
        &self.topic
    }
}

/// A live registry entry
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry<K> {
    pub key: K,
    pub priority: Priority,
}

impl<K: EntryKey> Entry<K> {
    pub fn new(key: K, priority: Priority) -> Self {
        Entry { key, priority }
    }
}

/// Subscription entry
pub type SubEntry = Entry<Topic>;

/// Publication entry
pub type PubEntry = Entry<Publication>;

/// An entry travelling towards peers: either an announcement or a cancel
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delta<K> {
    pub entry: Entry<K>,
    pub cancel: bool,
}

impl<K: EntryKey> Delta<K> {
    pub fn announce(key: K, priority: Priority) -> Self {
        Delta {
            entry: Entry::new(key, priority),
            cancel: false,
        }
    }

    /// Cancel tombstone, carries priority 0
    pub fn cancel(key: K) -> Self {
        Delta {
            entry: Entry::new(key, 0),
            cancel: true,
        }
    }

    #[inline]
    pub fn identity(&self) -> &K {
        &self.entry.key
    }

    #[inline]
    pub fn priority(&self) -> Priority {
        self.entry.priority
    }

    #[inline]
    pub fn is_cancel(&self) -> bool {
        self.cancel
    }
}

impl<K: EntryKey> From<Entry<K>> for Delta<K> {
    fn from(entry: Entry<K>) -> Self {
        Delta {
            entry,
            cancel: false,
        }
    }
}

/// Turn an ordered list of keys into deltas, first key gets the highest
/// priority.
pub fn ranked<K: EntryKey>(keys: impl IntoIterator<Item = K>, cancel: bool) -> Vec<Delta<K>> {
    keys.into_iter()
        .enumerate()
        .map(|(i, key)| Delta {
            entry: Entry::new(key, rank_priority(i)),
            cancel,
        })
        .collect()
}

#[inline]
fn rank_priority(index: usize) -> Priority {
    let offset = Priority::try_from(index).unwrap_or(Priority::MAX);
    MAX_PRIORITY.saturating_sub(offset)
}
