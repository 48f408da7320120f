//! Pubswap Transport Layer
//!
//! This crate provides:
//! - The `Transport` capability the exchange sends through
//! - Connection lifecycle events delivered to the node
//! - An in-process network for tests and simulations
//! - A TCP transport with length-delimited frames

pub mod memory;
pub mod tcp;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use pubswap_core::{PeerId, PubswapResult};
use pubswap_wire::WireMessage;

pub use memory::{MemoryNetwork, MemoryTransport};
pub use tcp::{TcpOptions, TcpTransport};

/// Outbound capability consumed by the exchange.
///
/// Implementations do not apply timeouts; callers bound every call.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Identity of the local endpoint
    fn local_peer(&self) -> PeerId;

    /// Ensure a connection to `peer` exists. Cheap when already connected.
    async fn connect(&self, peer: PeerId) -> PubswapResult<()>;

    /// Serialize and send one message to `peer`
    async fn send(&self, peer: PeerId, msg: &WireMessage) -> PubswapResult<()>;
}

/// Inbound events produced by a transport
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// A session with the peer was opened
    Connected(PeerId),
    /// A session with the peer was closed
    Disconnected(PeerId),
    /// One complete encoded frame from the peer
    Frame { from: PeerId, bytes: Bytes },
}

/// Transport event receiver channel
pub type EventReceiver = mpsc::Receiver<TransportEvent>;

/// Transport event sender channel
pub type EventSender = mpsc::Sender<TransportEvent>;

/// Create an event channel for a transport
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    mpsc::channel(capacity)
}
