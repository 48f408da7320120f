//! Pubswap daemon
//!
//! Usage: `pubswapd [config.toml]`. Listens on TCP, dials the configured
//! peers, subscribes to the startup topics and prints discovered keys.

use std::sync::Arc;

use pubswap_core::PeerId;
use pubswap_runtime::{init_tracing, Node, NodeConfig};
use pubswap_transport::{event_channel, TcpTransport, Transport};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match std::env::args().nth(1) {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    };
    config.apply_env()?;
    init_tracing(&config.log_filter, config.log_json)?;

    let (tx, rx) = event_channel(256);
    let transport = TcpTransport::bind(config.peer(), config.listen_addr, tx).await?;
    for peer in &config.peers {
        transport.add_address(PeerId::new(peer.id), peer.addr);
    }

    let mut node = Node::new(config.clone(), Arc::new(transport.clone()));
    node.start(rx)?;

    for peer in &config.peers {
        let id = PeerId::new(peer.id);
        if let Err(e) = transport.connect(id).await {
            tracing::warn!(peer = %id, "initial dial failed: {}", e);
        }
    }

    let topics = config.startup_topics();
    if !topics.is_empty() {
        let mut stream = node.exchange()?.subscribe_stream(topics).await?;
        tokio::spawn(async move {
            while let Some(key) = stream.next().await {
                println!("{}", key);
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    node.shutdown().await;
    transport.shutdown();
    Ok(())
}
