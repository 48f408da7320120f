//! Pubswap Node - lifecycle and inbound dispatch

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use pubswap_core::{PeerId, PubswapError, PubswapResult};
use pubswap_exchange::{DecisionEngine, Exchange, ExchangeTasks, LedgerBook};
use pubswap_transport::{EventReceiver, Transport, TransportEvent};
use pubswap_wire::WireMessage;

use crate::config::NodeConfig;

enum NodeState {
    Offline,
    Online {
        /// `None` when pub/sub is disabled
        exchange: Option<Exchange>,
        cancel: CancellationToken,
        exchange_tasks: Option<ExchangeTasks>,
        dispatch: JoinHandle<()>,
    },
}

/// Pubswap node - owns the exchange for its online lifetime
pub struct Node {
    config: NodeConfig,
    transport: Arc<dyn Transport>,
    ledgers: Arc<LedgerBook>,
    state: NodeState,
}

impl Node {
    pub fn new(config: NodeConfig, transport: Arc<dyn Transport>) -> Self {
        Node {
            config,
            transport,
            ledgers: Arc::new(LedgerBook::new()),
            state: NodeState::Offline,
        }
    }

    pub fn peer(&self) -> PeerId {
        self.transport.local_peer()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn ledgers(&self) -> &Arc<LedgerBook> {
        &self.ledgers
    }

    pub fn is_online(&self) -> bool {
        matches!(self.state, NodeState::Online { .. })
    }

    /// Go online: start the exchange (if enabled) and consume `events`
    pub fn start(&mut self, events: EventReceiver) -> PubswapResult<()> {
        if self.is_online() {
            return Err(PubswapError::InvalidConfig("node already started".into()));
        }

        let cancel = CancellationToken::new();
        let engine: Arc<dyn DecisionEngine> = self.ledgers.clone();

        let (exchange, exchange_tasks) = if self.config.pubsub_enabled {
            let (exchange, tasks) = Exchange::spawn(
                self.config.exchange_config(),
                Arc::clone(&self.transport),
                Arc::clone(&engine),
                cancel.clone(),
            )?;
            (Some(exchange), Some(tasks))
        } else {
            (None, None)
        };

        let dispatcher = Dispatcher {
            exchange: exchange.clone(),
            engine,
            cancel: cancel.clone(),
        };
        let dispatch = tokio::spawn(dispatcher.run(events));

        tracing::info!(
            peer = %self.peer(),
            pubsub = self.config.pubsub_enabled,
            "node online"
        );
        self.state = NodeState::Online {
            exchange,
            cancel,
            exchange_tasks,
            dispatch,
        };
        Ok(())
    }

    /// The running exchange
    pub fn exchange(&self) -> PubswapResult<&Exchange> {
        match &self.state {
            NodeState::Offline => Err(PubswapError::NotOnline),
            NodeState::Online { exchange: None, .. } => Err(PubswapError::UnsupportedExchange),
            NodeState::Online {
                exchange: Some(exchange),
                ..
            } => Ok(exchange),
        }
    }

    /// Cancel every task and wait for them to stop
    pub async fn shutdown(&mut self) {
        let state = std::mem::replace(&mut self.state, NodeState::Offline);
        let NodeState::Online {
            cancel,
            exchange_tasks,
            dispatch,
            ..
        } = state
        else {
            return;
        };

        cancel.cancel();
        if let Some(tasks) = exchange_tasks {
            tasks.join().await;
        }
        let _ = dispatch.await;
        tracing::info!(peer = %self.peer(), "node offline");
    }
}

/// Routes transport events into the exchange and the decision engine
struct Dispatcher {
    exchange: Option<Exchange>,
    engine: Arc<dyn DecisionEngine>,
    cancel: CancellationToken,
}

impl Dispatcher {
    async fn run(self, mut events: EventReceiver) {
        loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            if let Err(e) = self.dispatch(event).await {
                tracing::debug!("dispatch stopped: {}", e);
                break;
            }
        }
    }

    async fn dispatch(&self, event: TransportEvent) -> PubswapResult<()> {
        match event {
            TransportEvent::Connected(peer) => {
                tracing::debug!(peer = %peer, "peer connected");
                if let Some(exchange) = &self.exchange {
                    exchange.peer_connected(peer).await?;
                }
            }
            TransportEvent::Disconnected(peer) => {
                tracing::debug!(peer = %peer, "peer disconnected");
                if let Some(exchange) = &self.exchange {
                    exchange.peer_disconnected(peer).await?;
                }
            }
            TransportEvent::Frame { from, bytes } => {
                self.engine.bytes_received(from, bytes.len());
                match WireMessage::decode(&bytes) {
                    Ok(msg) => {
                        tracing::trace!(peer = %from, summary = %msg.summary(), "message received");
                        self.deliver(from, &msg);
                    }
                    Err(e) => {
                        tracing::warn!(peer = %from, "dropping frame: {}", e);
                    }
                }
            }
        }
        Ok(())
    }

    fn deliver(&self, from: PeerId, msg: &WireMessage) {
        match &self.exchange {
            Some(exchange) => exchange.message_received(from, msg),
            None => {
                self.engine.message_received(from, msg);
                for block in msg.blocks() {
                    self.engine.block_received(from, &block);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pubswap_core::{Block, ContentKey, Topic};
    use pubswap_exchange::ResyncMode;
    use pubswap_transport::{event_channel, MemoryNetwork};
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    fn config(peer_id: u64) -> NodeConfig {
        NodeConfig {
            peer_id,
            resync_mode: ResyncMode::Disabled,
            ..Default::default()
        }
    }

    async fn eventually<F: Fn() -> bool>(check: F) {
        tokio::time::timeout(WAIT, async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_online_gate() {
        let net = MemoryNetwork::new();
        let (transport, rx) = net.endpoint(PeerId::new(1), 16);
        let mut node = Node::new(config(1), transport);
        assert!(matches!(node.exchange(), Err(PubswapError::NotOnline)));

        node.start(rx).unwrap();
        assert!(node.exchange().is_ok());

        node.shutdown().await;
        assert!(matches!(node.exchange(), Err(PubswapError::NotOnline)));
    }

    #[tokio::test]
    async fn test_pubsub_disabled() {
        let net = MemoryNetwork::new();
        let (transport, rx) = net.endpoint(PeerId::new(1), 16);
        let mut node = Node::new(
            NodeConfig {
                pubsub_enabled: false,
                ..config(1)
            },
            transport,
        );
        node.start(rx).unwrap();
        assert!(matches!(
            node.exchange(),
            Err(PubswapError::UnsupportedExchange)
        ));
        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_malformed_frame_is_dropped() {
        let net = MemoryNetwork::new();
        let (transport, _unused) = net.endpoint(PeerId::new(1), 16);
        let (tx, rx) = event_channel(16);
        let mut node = Node::new(config(1), transport);
        node.start(rx).unwrap();

        let peer = PeerId::new(9);
        tx.send(TransportEvent::Frame {
            from: peer,
            bytes: bytes::Bytes::from_static(&[3, 0, 0, 0, 1, 2, 3]),
        })
        .await
        .unwrap();

        let mut msg = WireMessage::new(false);
        msg.add_subscribe(Topic::from("ok"), 1);
        msg.add_block(Block::new(&b"payload"[..]));
        let frame = msg.encode().unwrap();
        let frame_len = frame.len();
        tx.send(TransportEvent::Frame {
            from: peer,
            bytes: frame,
        })
        .await
        .unwrap();

        let ledgers = Arc::clone(node.ledgers());
        eventually(|| {
            ledgers
                .ledger(peer)
                .map(|l| l.sublist_contains(&Topic::from("ok")).is_some())
                .unwrap_or(false)
        })
        .await;
        let ledger = ledgers.ledger(peer).unwrap();
        assert_eq!(ledger.accounting.bytes_recv, (7 + frame_len) as u64);

        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_two_nodes_exchange_announcements() {
        let net = MemoryNetwork::new();
        let (ta, rxa) = net.endpoint(PeerId::new(1), 64);
        let (tb, rxb) = net.endpoint(PeerId::new(2), 64);

        let mut a = Node::new(config(1), ta.clone());
        let mut b = Node::new(config(2), tb);
        a.start(rxa).unwrap();
        b.start(rxb).unwrap();

        let mut stream = a
            .exchange()
            .unwrap()
            .subscribe_stream(vec![Topic::from("news")])
            .await
            .unwrap();

        ta.connect(PeerId::new(2)).await.unwrap();

        // b learns a's subscription from the initial full snapshot
        let b_ledgers = Arc::clone(b.ledgers());
        eventually(|| !b_ledgers.subscribers(&Topic::from("news")).is_empty()).await;

        let key = ContentKey::for_data(b"headline");
        b.exchange()
            .unwrap()
            .publish(vec![(Topic::from("news"), key)])
            .await
            .unwrap();

        let got = tokio::time::timeout(WAIT, stream.next()).await.unwrap();
        assert_eq!(got, Some(key));

        // cancel reaches the remote ledger
        a.exchange()
            .unwrap()
            .cancel_subscribe(vec![Topic::from("news")])
            .await
            .unwrap();
        eventually(|| b_ledgers.subscribers(&Topic::from("news")).is_empty()).await;

        a.shutdown().await;
        b.shutdown().await;
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn test_reconnect_resends_full_state() {
        let net = MemoryNetwork::new();
        let (ta, rxa) = net.endpoint(PeerId::new(1), 64);
        let (tb, rxb) = net.endpoint(PeerId::new(2), 64);
        let mut a = Node::new(config(1), ta.clone());
        let mut b = Node::new(config(2), tb);
        a.start(rxa).unwrap();
        b.start(rxb).unwrap();

        a.exchange()
            .unwrap()
            .subscribe(vec![Topic::from("x"), Topic::from("y")])
            .await
            .unwrap();
        ta.connect(PeerId::new(2)).await.unwrap();

        let b_ledgers = Arc::clone(b.ledgers());
        let peer_a = PeerId::new(1);
        let count = |ledgers: &LedgerBook| {
            ledgers
                .ledger(peer_a)
                .map(|l| l.subscriptions().len())
                .unwrap_or(0)
        };
        eventually(|| count(&b_ledgers) == 2).await;

        net.disconnect(PeerId::new(1), PeerId::new(2)).await;
        tokio::time::timeout(WAIT, async {
            while tracked_peers(&a).await > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let exchanges = b_ledgers.ledger(peer_a).unwrap().exchange_count;
        ta.connect(PeerId::new(2)).await.unwrap();
        eventually(|| {
            b_ledgers
                .ledger(peer_a)
                .map(|l| l.exchange_count > exchanges)
                .unwrap_or(false)
        })
        .await;
        assert_eq!(count(&b_ledgers), 2);

        a.shutdown().await;
        b.shutdown().await;
    }

    async fn tracked_peers(node: &Node) -> usize {
        let (subs, _) = node.exchange().unwrap().peers().await.unwrap();
        subs.len()
    }
}
