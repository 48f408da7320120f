//! Local pub/sub API
//!
//! `Exchange` ties the subscription and publication coordinators together
//! with the transport, the decision engine and the discovery hub.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use pubswap_core::{
    Block, ContentKey, Entry, PeerId, Publication, PubswapError, PubswapResult, Topic,
};
use pubswap_transport::Transport;
use pubswap_wire::WireMessage;

use crate::config::ExchangeConfig;
use crate::discovery::{DiscoveryHub, TopicStream};
use crate::engine::DecisionEngine;
use crate::manager::{Manager, ManagerHandle, PeerStatus};

/// Background tasks of a running exchange
pub struct ExchangeTasks {
    pub subscriptions: JoinHandle<()>,
    pub publications: JoinHandle<()>,
}

impl ExchangeTasks {
    /// Wait for both coordinators to stop
    pub async fn join(self) {
        let _ = self.subscriptions.await;
        let _ = self.publications.await;
    }
}

/// Topic exchange front end
#[derive(Clone)]
pub struct Exchange {
    subs: ManagerHandle<Topic>,
    pubs: ManagerHandle<Publication>,
    transport: Arc<dyn Transport>,
    engine: Arc<dyn DecisionEngine>,
    discovery: DiscoveryHub,
    config: ExchangeConfig,
}

impl Exchange {
    /// Start both coordinators. They stop when `cancel` fires.
    pub fn spawn(
        config: ExchangeConfig,
        transport: Arc<dyn Transport>,
        engine: Arc<dyn DecisionEngine>,
        cancel: CancellationToken,
    ) -> PubswapResult<(Self, ExchangeTasks)> {
        let (sub_manager, subs) =
            Manager::<Topic>::new(config.clone(), Arc::clone(&transport), cancel.clone())?;
        let (pub_manager, pubs) =
            Manager::<Publication>::new(config.clone(), Arc::clone(&transport), cancel.clone())?;

        let tasks = ExchangeTasks {
            subscriptions: sub_manager.spawn(),
            publications: pub_manager.spawn(),
        };

        tracing::info!(
            peer = %transport.local_peer(),
            resync = ?config.resync_interval,
            mode = %config.resync_mode,
            "exchange started"
        );

        let exchange = Exchange {
            subs,
            pubs,
            transport,
            engine,
            discovery: DiscoveryHub::new(config.discovery_buffer, cancel),
            config,
        };
        Ok((exchange, tasks))
    }

    pub fn local_peer(&self) -> PeerId {
        self.transport.local_peer()
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    // ---- subscriptions ----

    /// Subscribe to topics, the first with the highest priority
    pub async fn subscribe(&self, topics: Vec<Topic>) -> PubswapResult<()> {
        self.subs.announce(topics).await
    }

    pub async fn cancel_subscribe(&self, topics: Vec<Topic>) -> PubswapResult<()> {
        self.subs.cancel(topics).await
    }

    /// Subscribe and stream every content key remote peers publish under
    /// `topics`. Each key is yielded once per stream.
    pub async fn subscribe_stream(&self, topics: Vec<Topic>) -> PubswapResult<TopicStream> {
        topics.iter().try_for_each(Topic::validate)?;
        let stream = self.discovery.watch(&topics);
        self.subscribe(topics).await?;
        Ok(stream)
    }

    pub fn subscriptions(&self) -> Vec<Entry<Topic>> {
        self.subs.sorted_entries()
    }

    // ---- publications ----

    /// Publish content keys under topics, the first with the highest priority
    pub async fn publish(&self, entries: Vec<(Topic, ContentKey)>) -> PubswapResult<()> {
        self.pubs.announce(to_publications(entries)).await
    }

    pub async fn cancel_publish(&self, entries: Vec<(Topic, ContentKey)>) -> PubswapResult<()> {
        self.pubs.cancel(to_publications(entries)).await
    }

    /// Publish hex-encoded keys under one topic. Every argument is checked
    /// before anything is announced.
    pub async fn publish_encoded(&self, topic: &str, keys: &[&str]) -> PubswapResult<()> {
        let topic = parse_topic(topic)?;
        let keys = keys
            .iter()
            .map(|k| ContentKey::from_hex(k))
            .collect::<PubswapResult<Vec<_>>>()?;

        self.publish(keys.into_iter().map(|k| (topic.clone(), k)).collect())
            .await
    }

    pub fn publications(&self) -> Vec<Entry<Publication>> {
        self.pubs.sorted_entries()
    }

    // ---- peer lifecycle ----

    pub async fn peer_connected(&self, peer: PeerId) -> PubswapResult<()> {
        self.subs.connected(peer).await?;
        self.pubs.connected(peer).await
    }

    pub async fn peer_disconnected(&self, peer: PeerId) -> PubswapResult<()> {
        self.subs.disconnected(peer).await?;
        self.pubs.disconnected(peer).await
    }

    /// Tracked peers of the subscription and publication pipelines
    pub async fn peers(&self) -> PubswapResult<(Vec<PeerStatus>, Vec<PeerStatus>)> {
        Ok((self.subs.peers().await?, self.pubs.peers().await?))
    }

    // ---- blocks ----

    /// Send one block to `peer` right away, bypassing the queues
    pub async fn send_block(&self, peer: PeerId, block: Block) -> PubswapResult<()> {
        let size = block.len();
        let mut msg = WireMessage::new(false);
        msg.add_block(block.clone());

        let result = match timeout(self.config.send_timeout, self.transport.send(peer, &msg)).await
        {
            Err(_) => Err(PubswapError::SendTimeout(peer)),
            Ok(result) => result,
        };

        self.engine.block_sent(peer, &block);
        match &result {
            Ok(()) => self.engine.bytes_sent(peer, size),
            Err(e) => tracing::warn!(peer = %peer, key = ?block.key(), "block send failed: {}", e),
        }
        result
    }

    // ---- inbound ----

    /// Hand a decoded message from `peer` to the engine and the discovery
    /// streams
    pub fn message_received(&self, peer: PeerId, msg: &WireMessage) {
        self.engine.message_received(peer, msg);

        for delta in msg.publishes() {
            if !delta.is_cancel() {
                let publication = delta.identity();
                self.discovery.offer(&publication.topic, publication.value);
            }
        }
        for block in msg.blocks() {
            self.engine.block_received(peer, &block);
        }
    }

    pub fn discovery(&self) -> &DiscoveryHub {
        &self.discovery
    }
}

fn to_publications(entries: Vec<(Topic, ContentKey)>) -> Vec<Publication> {
    entries
        .into_iter()
        .map(|(topic, value)| Publication::new(topic, value))
        .collect()
}

fn parse_topic(topic: &str) -> PubswapResult<Topic> {
    let topic = Topic::from(topic);
    topic.validate()?;
    Ok(topic)
}
