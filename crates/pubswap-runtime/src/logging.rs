//! Logging setup

use tracing_subscriber::EnvFilter;

use pubswap_core::{PubswapError, PubswapResult};

/// Install the global `tracing` subscriber.
///
/// `filter` uses `EnvFilter` directive syntax. Fails if a subscriber is
/// already installed.
pub fn init_tracing(filter: &str, json: bool) -> PubswapResult<()> {
    let filter = EnvFilter::try_new(filter)
        .map_err(|e| PubswapError::InvalidConfig(format!("log filter: {}", e)))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if json {
        builder
            .json()
            .try_init()
            .map_err(|e| PubswapError::InvalidConfig(e.to_string()))
    } else {
        builder
            .try_init()
            .map_err(|e| PubswapError::InvalidConfig(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_bad_filter() {
        assert!(matches!(
            init_tracing("pubswap=notalevel", false),
            Err(PubswapError::InvalidConfig(_))
        ));
    }
}
