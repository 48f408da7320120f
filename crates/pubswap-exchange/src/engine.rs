//! Decision engine interface
//!
//! The engine that picks which blocks go to which peer lives outside this
//! crate. The exchange only reports what it sent and received.

use pubswap_core::{Block, PeerId};
use pubswap_wire::WireMessage;

/// Callbacks the exchange drives on the block-exchange decision engine
pub trait DecisionEngine: Send + Sync + 'static {
    /// A block was handed to the transport for `peer`
    fn block_sent(&self, peer: PeerId, block: &Block);

    fn bytes_sent(&self, peer: PeerId, n: usize);

    fn bytes_received(&self, peer: PeerId, n: usize);

    /// A decoded message arrived from `peer`
    fn message_received(&self, _peer: PeerId, _msg: &WireMessage) {}

    fn block_received(&self, _peer: PeerId, _block: &Block) {}
}
