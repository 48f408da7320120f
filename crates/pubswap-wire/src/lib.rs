//! Pubswap Wire Protocol - Multiplexed exchange messages
//!
//! A single message carries three payloads:
//! - Subscribe entries (topic, priority, cancel) plus the `full` flag
//! - Publish entries (topic, content key, priority, cancel)
//! - Raw content blocks
//!
//! Messages travel as one length-delimited frame (see [`codec`]).

pub mod codec;
pub mod message;

pub use codec::*;
pub use message::*;
