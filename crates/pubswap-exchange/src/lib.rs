//! Pubswap Exchange
//!
//! Topic announcement pipeline on top of a block exchange:
//! - Priority-ordered registries of subscriptions and publications
//! - Coalescing per-peer outbound queues drained by workers
//! - One coordinator per entry kind serializing all state changes
//! - Ledgers of what remote peers announced
//! - Discovery streams of published content keys

pub mod config;
pub mod discovery;
pub mod engine;
pub mod exchange;
pub mod ledger;
pub mod manager;
pub mod queue;
pub mod registry;

pub use config::{ExchangeConfig, PriorityPolicy, ResyncMode};
pub use discovery::{DiscoveryHub, TopicStream};
pub use engine::DecisionEngine;
pub use exchange::{Exchange, ExchangeTasks};
pub use ledger::{DebtRatio, Ledger, LedgerBook};
pub use manager::{Manager, ManagerEvent, ManagerHandle, PeerStatus};
pub use queue::{FlushOutcome, PeerQueue, QueueState, Worker};
pub use registry::{Registry, SharedRegistry};
