//! Node configuration
//!
//! Loaded from TOML. Durations are written in human form (`"10s"`,
//! `"5m"`). A few settings can be overridden from the environment.

use std::fmt::Display;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use pubswap_core::{PeerId, PubswapError, PubswapResult, Topic};
use pubswap_exchange::{ExchangeConfig, PriorityPolicy, ResyncMode};

/// Environment variable names
pub const ENV_RESYNC_INTERVAL: &str = "PUBSWAP_RESYNC_INTERVAL";
pub const ENV_CONNECT_TIMEOUT: &str = "PUBSWAP_CONNECT_TIMEOUT";
pub const ENV_SEND_TIMEOUT: &str = "PUBSWAP_SEND_TIMEOUT";
pub const ENV_RESYNC_MODE: &str = "PUBSWAP_RESYNC_MODE";
pub const ENV_LOG: &str = "PUBSWAP_LOG";

/// A peer the node knows how to dial
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PeerAddr {
    pub id: u64,
    pub addr: SocketAddr,
}

/// Node configuration
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfig {
    pub peer_id: u64,
    pub listen_addr: SocketAddr,
    /// Without pub/sub the node only exchanges blocks
    pub pubsub_enabled: bool,
    pub log_filter: String,
    pub log_json: bool,
    pub event_capacity: usize,
    #[serde(deserialize_with = "de_duration")]
    pub resync_interval: Duration,
    #[serde(deserialize_with = "de_from_str")]
    pub resync_mode: ResyncMode,
    #[serde(deserialize_with = "de_duration")]
    pub connect_timeout: Duration,
    #[serde(deserialize_with = "de_duration")]
    pub send_timeout: Duration,
    #[serde(deserialize_with = "de_from_str")]
    pub priority_policy: PriorityPolicy,
    pub discovery_buffer: usize,
    /// Static address book
    pub peers: Vec<PeerAddr>,
    /// Topics subscribed at startup
    pub subscribe: Vec<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let exchange = ExchangeConfig::default();
        NodeConfig {
            peer_id: 1,
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 4701)),
            pubsub_enabled: true,
            log_filter: "pubswap=info".to_string(),
            log_json: false,
            event_capacity: exchange.event_capacity,
            resync_interval: exchange.resync_interval,
            resync_mode: exchange.resync_mode,
            connect_timeout: exchange.connect_timeout,
            send_timeout: exchange.send_timeout,
            priority_policy: exchange.priority_policy,
            discovery_buffer: exchange.discovery_buffer,
            peers: Vec::new(),
            subscribe: Vec::new(),
        }
    }
}

impl NodeConfig {
    pub fn from_toml_str(s: &str) -> PubswapResult<Self> {
        let config: NodeConfig =
            toml::from_str(s).map_err(|e| PubswapError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> PubswapResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            PubswapError::InvalidConfig(format!("reading {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value
    pub fn apply_overrides<F>(&mut self, lookup: F) -> PubswapResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_RESYNC_INTERVAL) {
            self.resync_interval = parse_duration(ENV_RESYNC_INTERVAL, &v)?;
        }
        if let Some(v) = lookup(ENV_CONNECT_TIMEOUT) {
            self.connect_timeout = parse_duration(ENV_CONNECT_TIMEOUT, &v)?;
        }
        if let Some(v) = lookup(ENV_SEND_TIMEOUT) {
            self.send_timeout = parse_duration(ENV_SEND_TIMEOUT, &v)?;
        }
        if let Some(v) = lookup(ENV_RESYNC_MODE) {
            self.resync_mode = v.parse()?;
        }
        if let Some(v) = lookup(ENV_LOG) {
            self.log_filter = v;
        }
        self.validate()
    }

    /// Check the exchange settings and the startup topics
    pub fn validate(&self) -> PubswapResult<()> {
        self.exchange_config().validate()?;
        self.startup_topics()
            .iter()
            .try_for_each(Topic::validate)
            .map_err(|e| PubswapError::InvalidConfig(format!("subscribe: {}", e)))
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) -> PubswapResult<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    pub fn peer(&self) -> PeerId {
        PeerId::new(self.peer_id)
    }

    pub fn startup_topics(&self) -> Vec<Topic> {
        self.subscribe.iter().map(|t| Topic::from(t.as_str())).collect()
    }

    pub fn exchange_config(&self) -> ExchangeConfig {
        ExchangeConfig {
            event_capacity: self.event_capacity,
            resync_interval: self.resync_interval,
            resync_mode: self.resync_mode,
            connect_timeout: self.connect_timeout,
            send_timeout: self.send_timeout,
            priority_policy: self.priority_policy,
            discovery_buffer: self.discovery_buffer,
        }
    }
}

fn parse_duration(name: &str, value: &str) -> PubswapResult<Duration> {
    humantime::parse_duration(value.trim())
        .map_err(|e| PubswapError::InvalidConfig(format!("{}: {}", name, e)))
}

fn de_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    humantime::parse_duration(&s).map_err(serde::de::Error::custom)
}

fn de_from_str<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}
