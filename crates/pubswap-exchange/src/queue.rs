//! Per-peer outbound queue and its worker
//!
//! The coordinator merges deltas into the queue's pending message under the
//! queue lock and fires a capacity-1 trigger. The worker wakes on the
//! trigger, makes sure the peer is connected, takes the pending message and
//! sends it. The lock is never held across a connect or a send.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use pubswap_core::{Delta, PeerId, PubswapError, PubswapResult};
use pubswap_transport::Transport;
use pubswap_wire::{MessageSummary, WireEntry, WireMessage};

/// Observable state of a peer queue
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueState {
    /// Nothing buffered
    Idle,
    /// Entries buffered, worker not flushing
    Pending,
    /// Worker is connecting or sending
    Flushing,
}

/// Coalescing outbound buffer for one peer
#[derive(Debug)]
pub struct PeerQueue {
    peer: PeerId,
    pending: Mutex<Option<WireMessage>>,
    trigger: Notify,
    flushing: AtomicBool,
}

impl PeerQueue {
    pub fn new(peer: PeerId) -> Self {
        PeerQueue {
            peer,
            pending: Mutex::new(None),
            trigger: Notify::new(),
            flushing: AtomicBool::new(false),
        }
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    /// Merge deltas into the pending message and wake the worker
    pub fn enqueue<K: WireEntry>(&self, deltas: &[Delta<K>]) {
        {
            let mut pending = self.pending.lock();
            pending
                .get_or_insert_with(|| WireMessage::new(false))
                .merge(deltas);
        }
        self.signal();
    }

    /// Discard whatever is pending and install a full snapshot
    pub fn replace_with_full_snapshot<K: WireEntry>(&self, entries: &[Delta<K>]) {
        let mut msg = WireMessage::new(true);
        msg.merge(entries);
        *self.pending.lock() = Some(msg);
        self.signal();
    }

    /// Merge a registry snapshot into the pending message, keeping its flag
    pub fn merge_snapshot<K: WireEntry>(&self, entries: &[Delta<K>]) {
        self.enqueue(entries);
    }

    /// Take the pending message, leaving the queue idle. Empty messages are
    /// dropped here rather than sent.
    pub fn take(&self) -> Option<WireMessage> {
        self.pending.lock().take().filter(|msg| !msg.is_empty())
    }

    /// Wake the worker. A wake-up already outstanding absorbs this one.
    pub fn signal(&self) {
        self.trigger.notify_one();
    }

    pub fn state(&self) -> QueueState {
        if self.flushing.load(Ordering::Acquire) {
            return QueueState::Flushing;
        }
        match &*self.pending.lock() {
            Some(msg) if !msg.is_empty() => QueueState::Pending,
            _ => QueueState::Idle,
        }
    }

    /// Copy of the pending message, if any
    pub fn pending(&self) -> Option<WireMessage> {
        self.pending.lock().clone()
    }
}

/// Result of one flush cycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was pending once connected
    Empty,
    Sent(MessageSummary),
}

/// Task draining one [`PeerQueue`] into the transport
pub struct Worker {
    queue: Arc<PeerQueue>,
    transport: Arc<dyn Transport>,
    connect_timeout: Duration,
    send_timeout: Duration,
    done: CancellationToken,
}

impl Worker {
    pub fn new(
        queue: Arc<PeerQueue>,
        transport: Arc<dyn Transport>,
        connect_timeout: Duration,
        send_timeout: Duration,
        done: CancellationToken,
    ) -> Self {
        Worker {
            queue,
            transport,
            connect_timeout,
            send_timeout,
            done,
        }
    }

    /// Run until the done token fires
    pub async fn run(self) {
        let peer = self.queue.peer();
        tracing::debug!(peer = %peer, "peer worker started");

        loop {
            tokio::select! {
                _ = self.done.cancelled() => break,
                _ = self.queue.trigger.notified() => {}
            }

            self.queue.flushing.store(true, Ordering::Release);
            let outcome = tokio::select! {
                _ = self.done.cancelled() => None,
                result = self.flush_once() => Some(result),
            };
            self.queue.flushing.store(false, Ordering::Release);

            match outcome {
                None => break,
                Some(Ok(FlushOutcome::Sent(summary))) => {
                    tracing::debug!(peer = %peer, %summary, "flushed pending message");
                }
                Some(Ok(FlushOutcome::Empty)) => {
                    tracing::trace!(peer = %peer, "nothing to flush");
                }
                Some(Err(e)) => {
                    tracing::warn!(peer = %peer, "flush failed: {}", e);
                }
            }
        }

        tracing::debug!(peer = %peer, "peer worker stopped");
    }

    /// Connect, take the pending message and send it. A failed send drops
    /// the message; the next resync repairs the peer's view.
    pub async fn flush_once(&self) -> PubswapResult<FlushOutcome> {
        let peer = self.queue.peer();

        match timeout(self.connect_timeout, self.transport.connect(peer)).await {
            Err(_) => return Err(PubswapError::ConnectTimeout(peer)),
            Ok(result) => result?,
        }

        let Some(msg) = self.queue.take() else {
            return Ok(FlushOutcome::Empty);
        };

        match timeout(self.send_timeout, self.transport.send(peer, &msg)).await {
            Err(_) => Err(PubswapError::SendTimeout(peer)),
            Ok(result) => result.map(|_| FlushOutcome::Sent(msg.summary())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pubswap_core::{ranked, ContentKey, Publication, Topic};
    use pubswap_transport::{MemoryNetwork, TransportEvent};

    fn topics(names: &[&str]) -> Vec<Topic> {
        names.iter().map(|n| Topic::from(*n)).collect()
    }

    #[test]
    fn test_enqueue_coalesces_into_one_message() {
        let queue = PeerQueue::new(PeerId::new(7));
        assert_eq!(queue.state(), QueueState::Idle);

        queue.enqueue(&ranked(topics(&["a", "b"]), false));
        queue.enqueue(&ranked(topics(&["b"]), true));
        queue.enqueue(&[Delta::announce(
            Publication::new("a", ContentKey::for_data(b"x")),
            1,
        )]);
        assert_eq!(queue.state(), QueueState::Pending);

        let msg = queue.take().unwrap();
        assert!(!msg.is_full());
        assert_eq!(msg.subscribes().len(), 2);
        assert!(msg.get_entry(&Topic::from("b")).unwrap().is_cancel());
        assert_eq!(msg.publishes().len(), 1);

        assert!(queue.take().is_none());
        assert_eq!(queue.state(), QueueState::Idle);
    }

    #[test]
    fn test_full_snapshot_supersedes_pending() {
        let queue = PeerQueue::new(PeerId::new(7));
        queue.enqueue(&ranked(topics(&["stale"]), true));
        queue.replace_with_full_snapshot(&ranked(topics(&["x", "y"]), false));

        let msg = queue.take().unwrap();
        assert!(msg.is_full());
        assert!(msg.get_entry(&Topic::from("stale")).is_none());
        assert_eq!(msg.subscribes().len(), 2);
    }

    #[test]
    fn test_empty_snapshot_is_not_sent() {
        let queue = PeerQueue::new(PeerId::new(7));
        queue.replace_with_full_snapshot::<Topic>(&[]);
        assert!(queue.take().is_none());
    }

    #[tokio::test]
    async fn test_redundant_signals_collapse() {
        let queue = PeerQueue::new(PeerId::new(1));
        queue.signal();
        queue.signal();
        queue.signal();

        queue.trigger.notified().await;
        let second = tokio::time::timeout(Duration::from_millis(50), queue.trigger.notified()).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn test_worker_flushes_on_trigger() {
        let net = MemoryNetwork::new();
        let (a, _a_rx) = net.endpoint(PeerId::new(1), 16);
        let (_b, mut b_rx) = net.endpoint(PeerId::new(2), 16);

        let queue = Arc::new(PeerQueue::new(PeerId::new(2)));
        let done = CancellationToken::new();
        let worker = Worker::new(
            Arc::clone(&queue),
            a,
            Duration::from_secs(5),
            Duration::from_secs(5),
            done.clone(),
        );
        let task = tokio::spawn(worker.run());

        queue.enqueue(&ranked(topics(&["news"]), false));

        let wait = Duration::from_secs(5);
        assert_eq!(
            tokio::time::timeout(wait, b_rx.recv()).await.unwrap(),
            Some(TransportEvent::Connected(PeerId::new(1)))
        );
        match tokio::time::timeout(wait, b_rx.recv()).await.unwrap() {
            Some(TransportEvent::Frame { bytes, .. }) => {
                let msg = WireMessage::decode(&bytes).unwrap();
                assert!(msg.get_entry(&Topic::from("news")).is_some());
            }
            other => panic!("expected frame, got {:?}", other),
        }

        done.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_failure_keeps_pending() {
        let net = MemoryNetwork::new();
        let (a, _a_rx) = net.endpoint(PeerId::new(1), 16);

        let queue = Arc::new(PeerQueue::new(PeerId::new(2)));
        queue.enqueue(&ranked(topics(&["t"]), false));
        let worker = Worker::new(
            Arc::clone(&queue),
            a,
            Duration::from_secs(1),
            Duration::from_secs(1),
            CancellationToken::new(),
        );

        let err = worker.flush_once().await.unwrap_err();
        assert!(matches!(err, PubswapError::ConnectFailed { .. }));
        assert_eq!(queue.state(), QueueState::Pending);
    }

    #[tokio::test]
    async fn test_stalled_peer_times_out() {
        let net = MemoryNetwork::new();
        let (a, _a_rx) = net.endpoint(PeerId::new(1), 16);
        let (_b, _b_rx) = net.endpoint(PeerId::new(2), 16);

        let queue = Arc::new(PeerQueue::new(PeerId::new(2)));
        let worker = Worker::new(
            Arc::clone(&queue),
            a,
            Duration::from_millis(50),
            Duration::from_millis(50),
            CancellationToken::new(),
        );

        net.set_stalled(PeerId::new(2), true);
        queue.enqueue(&ranked(topics(&["t"]), false));
        let err = worker.flush_once().await.unwrap_err();
        assert_eq!(err, PubswapError::ConnectTimeout(PeerId::new(2)));
        assert_eq!(queue.state(), QueueState::Pending);

        net.set_stalled(PeerId::new(2), false);
        worker.flush_once().await.unwrap();
        assert_eq!(queue.state(), QueueState::Idle);

    }

    #[tokio::test]
    async fn test_send_timeout_drops_message() {
        let net = MemoryNetwork::new();
        let (a, _a_rx) = net.endpoint(PeerId::new(1), 16);
        let (_b, mut b_rx) = net.endpoint(PeerId::new(2), 16);
        a.connect(PeerId::new(2)).await.unwrap();

        let queue = Arc::new(PeerQueue::new(PeerId::new(2)));
        let worker = Worker::new(
            Arc::clone(&queue),
            a,
            Duration::from_millis(50),
            Duration::from_millis(50),
            CancellationToken::new(),
        );

        net.set_stalled(PeerId::new(2), true);
        queue.enqueue(&ranked(topics(&["u"]), false));
        let err = worker.flush_once().await.unwrap_err();
        assert_eq!(err, PubswapError::SendTimeout(PeerId::new(2)));
        assert_eq!(queue.state(), QueueState::Idle);
        assert!(queue.take().is_none());

        // not requeued: the next flush has nothing to send
        net.set_stalled(PeerId::new(2), false);
        assert!(matches!(worker.flush_once().await, Ok(FlushOutcome::Empty)));
        assert_eq!(b_rx.recv().await, Some(TransportEvent::Connected(PeerId::new(1))));
        assert!(b_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_failure_drops_message() {
        let net = MemoryNetwork::new();
        let (a, _a_rx) = net.endpoint(PeerId::new(1), 16);
        let (_b, _b_rx) = net.endpoint(PeerId::new(2), 16);
        a.connect(PeerId::new(2)).await.unwrap();

        let queue = Arc::new(PeerQueue::new(PeerId::new(2)));
        let worker = Worker::new(
            Arc::clone(&queue),
            a,
            Duration::from_secs(1),
            Duration::from_secs(1),
            CancellationToken::new(),
        );

        net.set_reachable(PeerId::new(2), false);
        queue.enqueue(&ranked(topics(&["v"]), false));
        let err = worker.flush_once().await.unwrap_err();
        assert!(matches!(err, PubswapError::SendFailed { .. }));
        assert_eq!(queue.state(), QueueState::Idle);
        assert!(queue.take().is_none());
    }

    #[tokio::test]
    async fn test_worker_exits_on_done() {
        let net = MemoryNetwork::new();
        let (a, _a_rx) = net.endpoint(PeerId::new(1), 16);
        let queue = Arc::new(PeerQueue::new(PeerId::new(2)));
        let done = CancellationToken::new();
        let task = tokio::spawn(
            Worker::new(
                queue,
                a,
                Duration::from_secs(1),
                Duration::from_secs(1),
                done.clone(),
            )
            .run(),
        );

        done.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
