//! In-process network
//!
//! Every endpoint owns an event channel. `connect` links two endpoints and
//! reports `Connected` to both; `send` encodes the message and delivers the
//! frame bytes to the target, so the full codec path is exercised. Peers
//! can be made unreachable or stalled to simulate bad links.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use pubswap_core::{PeerId, PubswapError, PubswapResult};
use pubswap_wire::WireMessage;

use crate::{event_channel, EventReceiver, EventSender, Transport, TransportEvent};

struct Endpoint {
    events: EventSender,
    reachable: bool,
    stalled: bool,
    links: HashSet<PeerId>,
    frames_sent: u64,
}

#[derive(Default)]
struct NetworkState {
    endpoints: HashMap<PeerId, Endpoint>,
}

/// Shared in-memory network
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an endpoint and return its transport plus event receiver
    pub fn endpoint(&self, peer: PeerId, capacity: usize) -> (Arc<MemoryTransport>, EventReceiver) {
        let (tx, rx) = event_channel(capacity);
        self.state.lock().endpoints.insert(
            peer,
            Endpoint {
                events: tx,
                reachable: true,
                stalled: false,
                links: HashSet::new(),
                frames_sent: 0,
            },
        );

        let transport = MemoryTransport {
            local: peer,
            network: self.clone(),
        };
        (Arc::new(transport), rx)
    }

    /// Unreachable peers refuse new connections and drop sends
    pub fn set_reachable(&self, peer: PeerId, reachable: bool) {
        if let Some(ep) = self.state.lock().endpoints.get_mut(&peer) {
            ep.reachable = reachable;
        }
    }

    /// Stalled peers never answer new connects or sends. An existing link
    /// still connects immediately.
    pub fn set_stalled(&self, peer: PeerId, stalled: bool) {
        if let Some(ep) = self.state.lock().endpoints.get_mut(&peer) {
            ep.stalled = stalled;
        }
    }

    /// Tear down the link between two endpoints, reporting it to both sides
    pub async fn disconnect(&self, a: PeerId, b: PeerId) {
        let notify = {
            let mut state = self.state.lock();
            let was_linked = state
                .endpoints
                .get_mut(&a)
                .map(|ep| ep.links.remove(&b))
                .unwrap_or(false);
            if let Some(ep) = state.endpoints.get_mut(&b) {
                ep.links.remove(&a);
            }
            if !was_linked {
                return;
            }
            [
                state.endpoints.get(&a).map(|ep| (ep.events.clone(), b)),
                state.endpoints.get(&b).map(|ep| (ep.events.clone(), a)),
            ]
        };

        for (events, other) in notify.into_iter().flatten() {
            let _ = events.send(TransportEvent::Disconnected(other)).await;
        }
    }

    pub fn is_linked(&self, a: PeerId, b: PeerId) -> bool {
        self.state
            .lock()
            .endpoints
            .get(&a)
            .map(|ep| ep.links.contains(&b))
            .unwrap_or(false)
    }

    /// Frames successfully handed to `peer`'s targets so far
    pub fn frames_sent(&self, peer: PeerId) -> u64 {
        self.state
            .lock()
            .endpoints
            .get(&peer)
            .map(|ep| ep.frames_sent)
            .unwrap_or(0)
    }

    fn is_stalled(&self, a: PeerId, b: PeerId) -> bool {
        let state = self.state.lock();
        [a, b]
            .iter()
            .any(|p| state.endpoints.get(p).map(|ep| ep.stalled).unwrap_or(false))
    }
}

/// One endpoint of a [`MemoryNetwork`]
pub struct MemoryTransport {
    local: PeerId,
    network: MemoryNetwork,
}

impl MemoryTransport {
    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_peer(&self) -> PeerId {
        self.local
    }

    async fn connect(&self, peer: PeerId) -> PubswapResult<()> {
        if self.network.is_linked(self.local, peer) {
            return Ok(());
        }
        if self.network.is_stalled(self.local, peer) {
            std::future::pending::<()>().await;
        }

        let notify = {
            let mut state = self.network.state.lock();
            match state.endpoints.get(&peer) {
                None => {
                    return Err(PubswapError::ConnectFailed {
                        peer,
                        reason: "unknown peer".into(),
                    })
                }
                Some(ep) if !ep.reachable => {
                    return Err(PubswapError::ConnectFailed {
                        peer,
                        reason: "peer unreachable".into(),
                    })
                }
                Some(_) => {}
            }

            let local = self.local;
            let newly_linked = state
                .endpoints
                .get_mut(&local)
                .map(|ep| ep.links.insert(peer))
                .unwrap_or(false);
            if let Some(ep) = state.endpoints.get_mut(&peer) {
                ep.links.insert(local);
            }

            if newly_linked {
                Some((
                    state.endpoints.get(&local).map(|ep| ep.events.clone()),
                    state.endpoints.get(&peer).map(|ep| ep.events.clone()),
                ))
            } else {
                None
            }
        };

        if let Some((local_events, remote_events)) = notify {
            tracing::debug!(local = %self.local, remote = %peer, "memory link established");
            if let Some(tx) = local_events {
                let _ = tx.send(TransportEvent::Connected(peer)).await;
            }
            if let Some(tx) = remote_events {
                let _ = tx.send(TransportEvent::Connected(self.local)).await;
            }
        }
        Ok(())
    }

    async fn send(&self, peer: PeerId, msg: &WireMessage) -> PubswapResult<()> {
        if self.network.is_stalled(self.local, peer) {
            std::future::pending::<()>().await;
        }

        let bytes = msg.encode()?;
        let target = {
            let state = self.network.state.lock();
            let linked = state
                .endpoints
                .get(&self.local)
                .map(|ep| ep.links.contains(&peer))
                .unwrap_or(false);
            match state.endpoints.get(&peer) {
                Some(ep) if linked && ep.reachable => ep.events.clone(),
                _ => {
                    return Err(PubswapError::SendFailed {
                        peer,
                        reason: "not connected".into(),
                    })
                }
            }
        };

        target
            .send(TransportEvent::Frame {
                from: self.local,
                bytes,
            })
            .await
            .map_err(|_| PubswapError::SendFailed {
                peer,
                reason: "endpoint closed".into(),
            })?;

        if let Some(ep) = self.network.state.lock().endpoints.get_mut(&self.local) {
            ep.frames_sent += 1;
        }
        Ok(())
    }
}
