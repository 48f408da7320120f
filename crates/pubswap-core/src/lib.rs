//! Pubswap Core - Fundamental types and primitives
//!
//! This crate defines the types shared by every pubswap crate:
//! - Identifiers (PeerId, Topic, ContentKey, Publication)
//! - Announcement entries and deltas, generic over the entry kind
//! - Content blocks
//! - The error type

pub mod block;
pub mod entry;
pub mod error;
pub mod id;

pub use block::*;
pub use entry::*;
pub use error::*;
pub use id::*;
