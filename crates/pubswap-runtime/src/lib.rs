//! Pubswap Runtime - node lifecycle around the exchange
//!
//! Going online:
//! 1. Load configuration (TOML, then environment overrides)
//! 2. Install the tracing subscriber
//! 3. Start the subscription and publication coordinators
//! 4. Dispatch transport events: peer lifecycle to the coordinators,
//!    decoded frames to the ledgers and discovery streams

pub mod config;
pub mod logging;
pub mod node;

pub use config::{NodeConfig, PeerAddr};
pub use logging::init_tracing;
pub use node::*;
