//! Discovery streams
//!
//! A `TopicStream` yields content keys that remote peers publish under any
//! of its topics. The hub fans offered keys out to every live stream
//! watching the topic; a full stream misses keys rather than blocking the
//! inbound path.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use pubswap_core::{ContentKey, Topic};

type Watchers = HashMap<Topic, Vec<mpsc::Sender<ContentKey>>>;

/// Routes discovered keys to watching streams
#[derive(Clone, Debug)]
pub struct DiscoveryHub {
    watchers: Arc<Mutex<Watchers>>,
    buffer: usize,
    cancel: CancellationToken,
}

impl DiscoveryHub {
    pub fn new(buffer: usize, cancel: CancellationToken) -> Self {
        DiscoveryHub {
            watchers: Arc::new(Mutex::new(HashMap::new())),
            buffer: buffer.max(1),
            cancel,
        }
    }

    /// Open a stream over `topics`
    pub fn watch(&self, topics: &[Topic]) -> TopicStream {
        let (tx, rx) = mpsc::channel(self.buffer);
        let mut watchers = self.watchers.lock();
        for topic in topics {
            watchers.entry(topic.clone()).or_default().push(tx.clone());
        }

        TopicStream {
            rx,
            seen: HashSet::new(),
            topics: topics.to_vec(),
            cancel: self.cancel.clone(),
        }
    }

    /// Hand a discovered key to every stream watching `topic`.
    /// Returns how many streams accepted it.
    pub fn offer(&self, topic: &Topic, key: ContentKey) -> usize {
        let mut watchers = self.watchers.lock();
        let Some(senders) = watchers.get_mut(topic) else {
            return 0;
        };

        let mut delivered = 0;
        senders.retain(|tx| match tx.try_send(key) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!(%topic, "discovery stream full, dropping key");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        if senders.is_empty() {
            watchers.remove(topic);
        }
        delivered
    }

    /// Number of topics with at least one live stream
    pub fn watched_topics(&self) -> usize {
        let mut watchers = self.watchers.lock();
        watchers.retain(|_, senders| {
            senders.retain(|tx| !tx.is_closed());
            !senders.is_empty()
        });
        watchers.len()
    }
}

/// Lazy sequence of content keys discovered for a set of topics
///
/// Remembers every key it has yielded so that none repeats, so memory grows
/// with the distinct keys published under its topics. Drop the stream and
/// watch again to start over.
#[derive(Debug)]
pub struct TopicStream {
    rx: mpsc::Receiver<ContentKey>,
    seen: HashSet<ContentKey>,
    topics: Vec<Topic>,
    cancel: CancellationToken,
}

impl TopicStream {
    /// Next key not yet yielded by this stream; `None` once the exchange
    /// shuts down
    pub async fn next(&mut self) -> Option<ContentKey> {
        loop {
            let key = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                key = self.rx.recv() => key?,
            };
            if self.seen.insert(key) {
                return Some(key);
            }
        }
    }

    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_stream_yields_each_key_once() {
        let hub = DiscoveryHub::new(8, CancellationToken::new());
        let mut stream = hub.watch(&[Topic::from("a"), Topic::from("b")]);

        let k1 = ContentKey::for_data(b"1");
        let k2 = ContentKey::for_data(b"2");
        assert_eq!(hub.offer(&Topic::from("a"), k1), 1);
        assert_eq!(hub.offer(&Topic::from("b"), k1), 1);
        assert_eq!(hub.offer(&Topic::from("b"), k2), 1);
        assert_eq!(hub.offer(&Topic::from("c"), k2), 0);

        assert_eq!(stream.next().await, Some(k1));
        assert_eq!(stream.next().await, Some(k2));
        let more = tokio::time::timeout(Duration::from_millis(50), stream.next()).await;
        assert!(more.is_err());
    }

    #[tokio::test]
    async fn test_dropped_stream_is_pruned() {
        let hub = DiscoveryHub::new(8, CancellationToken::new());
        let stream = hub.watch(&[Topic::from("a")]);
        assert_eq!(hub.watched_topics(), 1);

        drop(stream);
        assert_eq!(hub.offer(&Topic::from("a"), ContentKey::for_data(b"x")), 0);
        assert_eq!(hub.watched_topics(), 0);
    }

    #[tokio::test]
    async fn test_cancel_ends_stream() {
        let cancel = CancellationToken::new();
        let hub = DiscoveryHub::new(8, cancel.clone());
        let mut stream = hub.watch(&[Topic::from("a")]);

        cancel.cancel();
        assert_eq!(stream.next().await, None);
    }
}
