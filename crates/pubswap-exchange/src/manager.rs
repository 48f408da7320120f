//! Announcement coordinator
//!
//! One `Manager` task per entry kind owns the local registry and the map of
//! peer queues. Every mutation arrives on a single bounded channel, so the
//! order events are dequeued is the order they are applied. Fan-out to
//! peers only touches each queue's own lock; sending happens in the
//! per-peer workers.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use pubswap_core::{ranked, Delta, Entry, PeerId, PubswapError, PubswapResult};
use pubswap_transport::Transport;
use pubswap_wire::WireEntry;

use crate::config::{ExchangeConfig, ResyncMode};
use crate::queue::{PeerQueue, QueueState, Worker};
use crate::registry::SharedRegistry;

/// Events consumed by a [`Manager`]
#[derive(Debug)]
pub enum ManagerEvent<K> {
    /// Local announce or cancel deltas
    Announce(Vec<Delta<K>>),
    Connect(PeerId),
    Disconnect(PeerId),
    /// Diagnostics snapshot of tracked peers
    Peers(oneshot::Sender<Vec<PeerStatus>>),
}

/// A tracked peer as seen by the coordinator
#[derive(Clone, Debug)]
pub struct PeerStatus {
    pub peer: PeerId,
    /// Connect signals not yet matched by a disconnect
    pub refcount: usize,
    pub state: QueueState,
    /// Fires when the peer's worker is told to stop
    pub done: CancellationToken,
}

struct PeerHandle {
    queue: Arc<PeerQueue>,
    refcount: usize,
    done: CancellationToken,
    worker: JoinHandle<()>,
}

/// Coordinator for one entry kind
pub struct Manager<K: WireEntry> {
    events: mpsc::Receiver<ManagerEvent<K>>,
    peers: HashMap<PeerId, PeerHandle>,
    registry: SharedRegistry<K>,
    transport: Arc<dyn Transport>,
    config: ExchangeConfig,
    cancel: CancellationToken,
}

impl<K: WireEntry> Manager<K> {
    /// Create a coordinator and the handle used to feed it
    pub fn new(
        config: ExchangeConfig,
        transport: Arc<dyn Transport>,
        cancel: CancellationToken,
    ) -> PubswapResult<(Self, ManagerHandle<K>)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.event_capacity);
        let registry = SharedRegistry::new(config.priority_policy);

        let handle = ManagerHandle {
            events: tx,
            registry: registry.clone(),
            cancel: cancel.clone(),
        };
        let manager = Manager {
            events: rx,
            peers: HashMap::new(),
            registry,
            transport,
            config,
            cancel,
        };
        Ok((manager, handle))
    }

    /// Spawn the coordinator onto the runtime
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Event loop; returns once cancelled or once every handle is gone
    pub async fn run(mut self) {
        let mut resync = self.resync_timer();
        tracing::debug!(kind = K::KIND, mode = %self.config.resync_mode, "manager started");

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                event = self.events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
                _ = next_tick(&mut resync) => self.resync(),
            }
        }

        self.shutdown().await;
        tracing::debug!(kind = K::KIND, "manager stopped");
    }

    fn resync_timer(&self) -> Option<Interval> {
        if self.config.resync_mode == ResyncMode::Disabled {
            return None;
        }
        let period = self.config.resync_interval;
        let mut timer = interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Some(timer)
    }

    fn handle_event(&mut self, event: ManagerEvent<K>) {
        match event {
            ManagerEvent::Announce(deltas) => self.announce(deltas),
            ManagerEvent::Connect(peer) => self.peer_connected(peer),
            ManagerEvent::Disconnect(peer) => self.peer_disconnected(peer),
            ManagerEvent::Peers(reply) => {
                let _ = reply.send(self.peer_statuses());
            }
        }
    }

    fn announce(&mut self, deltas: Vec<Delta<K>>) {
        for delta in &deltas {
            self.registry.apply(delta);
        }

        tracing::trace!(
            kind = K::KIND,
            entries = deltas.len(),
            peers = self.peers.len(),
            "fanning out announcement"
        );
        for handle in self.peers.values() {
            handle.queue.enqueue(&deltas);
        }
    }

    fn peer_connected(&mut self, peer: PeerId) {
        if let Some(handle) = self.peers.get_mut(&peer) {
            handle.refcount += 1;
            tracing::trace!(kind = K::KIND, peer = %peer, refcount = handle.refcount, "peer already tracked");
            return;
        }

        let queue = Arc::new(PeerQueue::new(peer));
        queue.replace_with_full_snapshot(&self.registry.snapshot());

        let done = self.cancel.child_token();
        let worker = Worker::new(
            Arc::clone(&queue),
            Arc::clone(&self.transport),
            self.config.connect_timeout,
            self.config.send_timeout,
            done.clone(),
        );
        let worker = tokio::spawn(worker.run());

        tracing::debug!(kind = K::KIND, peer = %peer, "tracking peer");
        self.peers.insert(
            peer,
            PeerHandle {
                queue,
                refcount: 1,
                done,
                worker,
            },
        );
    }

    fn peer_disconnected(&mut self, peer: PeerId) {
        let Some(handle) = self.peers.get_mut(&peer) else {
            tracing::debug!(kind = K::KIND, peer = %peer, "disconnect for untracked peer");
            return;
        };

        handle.refcount -= 1;
        if handle.refcount > 0 {
            return;
        }

        if let Some(handle) = self.peers.remove(&peer) {
            handle.done.cancel();
            tracing::debug!(kind = K::KIND, peer = %peer, "stopped tracking peer");
        }
    }

    fn resync(&mut self) {
        if self.peers.is_empty() {
            return;
        }

        let snapshot = self.registry.snapshot();
        tracing::trace!(
            kind = K::KIND,
            entries = snapshot.len(),
            peers = self.peers.len(),
            "periodic resync"
        );
        for handle in self.peers.values() {
            match self.config.resync_mode {
                ResyncMode::Full => handle.queue.replace_with_full_snapshot(&snapshot),
                ResyncMode::Incremental => handle.queue.merge_snapshot(&snapshot),
                ResyncMode::Disabled => {}
            }
        }
    }

    fn peer_statuses(&self) -> Vec<PeerStatus> {
        let mut statuses: Vec<_> = self
            .peers
            .iter()
            .map(|(peer, handle)| PeerStatus {
                peer: *peer,
                refcount: handle.refcount,
                state: handle.queue.state(),
                done: handle.done.clone(),
            })
            .collect();
        statuses.sort_by_key(|s| s.peer);
        statuses
    }

    async fn shutdown(&mut self) {
        for (_, handle) in self.peers.drain() {
            handle.done.cancel();
            let _ = handle.worker.await;
        }
    }
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Cloneable handle feeding a [`Manager`]
pub struct ManagerHandle<K: WireEntry> {
    events: mpsc::Sender<ManagerEvent<K>>,
    registry: SharedRegistry<K>,
    cancel: CancellationToken,
}

impl<K: WireEntry> Clone for ManagerHandle<K> {
    fn clone(&self) -> Self {
        ManagerHandle {
            events: self.events.clone(),
            registry: self.registry.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<K: WireEntry> ManagerHandle<K> {
    /// Announce keys, the first one with the highest priority
    pub async fn announce(&self, keys: Vec<K>) -> PubswapResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        validate_topics(&keys)?;
        self.submit(ManagerEvent::Announce(ranked(keys, false))).await
    }

    /// Withdraw keys. Forwarded to peers even if never announced.
    pub async fn cancel(&self, keys: Vec<K>) -> PubswapResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        validate_topics(&keys)?;
        self.submit(ManagerEvent::Announce(ranked(keys, true))).await
    }

    pub async fn connected(&self, peer: PeerId) -> PubswapResult<()> {
        self.submit(ManagerEvent::Connect(peer)).await
    }

    pub async fn disconnected(&self, peer: PeerId) -> PubswapResult<()> {
        self.submit(ManagerEvent::Disconnect(peer)).await
    }

    /// Snapshot of tracked peers, ordered by peer id
    pub async fn peers(&self) -> PubswapResult<Vec<PeerStatus>> {
        let (tx, rx) = oneshot::channel();
        self.submit(ManagerEvent::Peers(tx)).await?;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(PubswapError::Shutdown),
            reply = rx => reply.map_err(|_| PubswapError::Shutdown),
        }
    }

    pub fn sorted_entries(&self) -> Vec<Entry<K>> {
        self.registry.sorted_entries()
    }

    pub fn contains(&self, key: &K) -> Option<Entry<K>> {
        self.registry.contains(key)
    }

    async fn submit(&self, event: ManagerEvent<K>) -> PubswapResult<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(PubswapError::Shutdown),
            sent = self.events.send(event) => sent.map_err(|_| PubswapError::Shutdown),
        }
    }
}

/// Reject the whole batch if any topic cannot be put on the wire
fn validate_topics<K: WireEntry>(keys: &[K]) -> PubswapResult<()> {
    keys.iter().try_for_each(|key| K::topic(key).validate())
}
