//! Exchange configuration

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use pubswap_core::{PubswapError, PubswapResult};

/// What the periodic resync tick sends to every tracked peer
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResyncMode {
    /// Replace the pending message with a full registry snapshot
    #[default]
    Full,
    /// Merge the registry into whatever is pending, keeping the pending
    /// message's `full` flag
    Incremental,
    /// No periodic resync
    Disabled,
}

impl FromStr for ResyncMode {
    type Err = PubswapError;

    fn from_str(s: &str) -> PubswapResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(ResyncMode::Full),
            "incremental" => Ok(ResyncMode::Incremental),
            "disabled" | "off" | "none" => Ok(ResyncMode::Disabled),
            other => Err(PubswapError::InvalidConfig(format!(
                "unknown resync mode '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for ResyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResyncMode::Full => "full",
            ResyncMode::Incremental => "incremental",
            ResyncMode::Disabled => "disabled",
        };
        f.write_str(s)
    }
}

/// How the registry treats an add for an identity it already holds
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PriorityPolicy {
    /// Keep the stored priority
    #[default]
    FirstWriteWins,
    /// Overwrite with the new priority
    LastWriteWins,
    /// Keep the larger of the two
    MaxPriority,
}

impl FromStr for PriorityPolicy {
    type Err = PubswapError;

    fn from_str(s: &str) -> PubswapResult<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "first-write-wins" | "first" => Ok(PriorityPolicy::FirstWriteWins),
            "last-write-wins" | "last" => Ok(PriorityPolicy::LastWriteWins),
            "max-priority" | "max" => Ok(PriorityPolicy::MaxPriority),
            other => Err(PubswapError::InvalidConfig(format!(
                "unknown priority policy '{}'",
                other
            ))),
        }
    }
}

/// Exchange configuration
#[derive(Clone, Debug)]
pub struct ExchangeConfig {
    /// Capacity of each coordinator's event channel
    pub event_capacity: usize,
    /// Period of the resync tick
    pub resync_interval: Duration,
    pub resync_mode: ResyncMode,
    /// Bound on a worker's connect attempt
    pub connect_timeout: Duration,
    /// Bound on a single send, also used for direct block sends
    pub send_timeout: Duration,
    pub priority_policy: PriorityPolicy,
    /// Per-stream buffer of discovered keys
    pub discovery_buffer: usize,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        ExchangeConfig {
            event_capacity: 10,
            resync_interval: Duration::from_secs(10),
            resync_mode: ResyncMode::Full,
            connect_timeout: Duration::from_secs(10 * 60),
            send_timeout: Duration::from_secs(5 * 60),
            priority_policy: PriorityPolicy::FirstWriteWins,
            discovery_buffer: 64,
        }
    }
}

impl ExchangeConfig {
    /// Reject values the coordinator cannot run with
    pub fn validate(&self) -> PubswapResult<()> {
        if self.event_capacity == 0 {
            return Err(PubswapError::InvalidConfig(
                "event_capacity must be at least 1".into(),
            ));
        }
        if self.discovery_buffer == 0 {
            return Err(PubswapError::InvalidConfig(
                "discovery_buffer must be at least 1".into(),
            ));
        }
        if self.resync_mode != ResyncMode::Disabled && self.resync_interval.is_zero() {
            return Err(PubswapError::InvalidConfig(
                "resync_interval must be non-zero unless resync is disabled".into(),
            ));
        }
        Ok(())
    }
}
