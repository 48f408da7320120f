//! TCP transport implementation
//!
//! Each connection starts with both sides writing their 8-byte peer id.
//! After that the stream carries length-prefixed wire frames in both
//! directions. Outbound connections use a static address book.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use pubswap_core::{PeerId, PubswapError, PubswapResult};
use pubswap_wire::{peek_frame_len, WireMessage, LEN_PREFIX_SIZE};

use crate::{EventSender, Transport, TransportEvent};

const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(10);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

type Writer = Arc<tokio::sync::Mutex<OwnedWriteHalf>>;

/// TCP transport settings
#[derive(Clone, Debug)]
pub struct TcpOptions {
    /// Time allowed for the peer id exchange on a new connection
    pub handshake_timeout: Duration,
}

impl Default for TcpOptions {
    fn default() -> Self {
        TcpOptions {
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

struct Inner {
    local: PeerId,
    local_addr: SocketAddr,
    address_book: RwLock<HashMap<PeerId, SocketAddr>>,
    writers: Mutex<HashMap<PeerId, Writer>>,
    events: EventSender,
    options: TcpOptions,
    shutdown: CancellationToken,
}

/// TCP transport for pubswap
#[derive(Clone)]
pub struct TcpTransport {
    inner: Arc<Inner>,
}

impl TcpTransport {
    /// Bind to a local address and start accepting peers
    pub async fn bind(local: PeerId, addr: SocketAddr, events: EventSender) -> PubswapResult<Self> {
        Self::bind_with_options(local, addr, events, TcpOptions::default()).await
    }

    pub async fn bind_with_options(
        local: PeerId,
        addr: SocketAddr,
        events: EventSender,
        options: TcpOptions,
    ) -> PubswapResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| PubswapError::InvalidConfig(format!("bind {}: {}", addr, e)))?;

        let local_addr = listener
            .local_addr()
            .map_err(|e| PubswapError::InvalidConfig(e.to_string()))?;

        let transport = TcpTransport {
            inner: Arc::new(Inner {
                local,
                local_addr,
                address_book: RwLock::new(HashMap::new()),
                writers: Mutex::new(HashMap::new()),
                events,
                options,
                shutdown: CancellationToken::new(),
            }),
        };

        let accept = transport.clone();
        tokio::spawn(async move { accept.accept_loop(listener).await });

        tracing::info!(peer = %local, addr = %local_addr, "tcp transport listening");
        Ok(transport)
    }

    /// Get local address
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// Record where a peer can be dialed
    pub fn add_address(&self, peer: PeerId, addr: SocketAddr) {
        self.inner.address_book.write().insert(peer, addr);
    }

    pub fn is_connected(&self, peer: PeerId) -> bool {
        self.inner.writers.lock().contains_key(&peer)
    }

    /// Stop accepting and close every connection
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    async fn accept_loop(self, listener: TcpListener) {
        let mut backoff = ACCEPT_BACKOFF_MIN;
        loop {
            let accepted = tokio::select! {
                biased;
                _ = self.inner.shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, addr)) => {
                    backoff = ACCEPT_BACKOFF_MIN;
                    let this = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = this.establish(stream).await {
                            tracing::debug!(%addr, "inbound handshake failed: {}", e);
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!(retry_in = ?backoff, "TCP accept error: {}", e);
                    tokio::select! {
                        biased;
                        _ = self.inner.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(ACCEPT_BACKOFF_MAX);
                }
            }
        }
        tracing::debug!(peer = %self.inner.local, "tcp accept loop stopped");
    }

    /// Exchange peer ids, register the writer and start the read loop
    async fn establish(&self, stream: TcpStream) -> PubswapResult<PeerId> {
        let _ = stream.set_nodelay(true);
        let (mut reader, mut writer) = stream.into_split();

        let handshake = async {
            writer.write_all(&self.inner.local.to_bytes()).await?;
            let mut id = [0u8; 8];
            reader.read_exact(&mut id).await?;
            Ok::<_, std::io::Error>(id)
        };
        let id = match timeout(self.inner.options.handshake_timeout, handshake).await {
            Err(_) => return Err(PubswapError::ConnectTimeout(PeerId::ZERO)),
            Ok(result) => result.map_err(|e| PubswapError::ConnectFailed {
                peer: PeerId::ZERO,
                reason: e.to_string(),
            })?,
        };
        let remote = PeerId::from_bytes(id);

        let writer: Writer = Arc::new(tokio::sync::Mutex::new(writer));
        self.inner.writers.lock().insert(remote, Arc::clone(&writer));

        let this = self.clone();
        tokio::spawn(async move { this.read_loop(remote, reader, writer).await });
        Ok(remote)
    }

    async fn read_loop(self, remote: PeerId, mut reader: OwnedReadHalf, writer: Writer) {
        let events = self.inner.events.clone();
        if events.send(TransportEvent::Connected(remote)).await.is_err() {
            return;
        }

        loop {
            let read = tokio::select! {
                biased;
                _ = self.inner.shutdown.cancelled() => break,
                read = read_frame(&mut reader) => read,
            };
            match read {
                Ok(Some(bytes)) => {
                    let frame = TransportEvent::Frame {
                        from: remote,
                        bytes,
                    };
                    if events.send(frame).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(peer = %remote, "closing connection: {}", e);
                    break;
                }
            }
        }

        {
            let mut writers = self.inner.writers.lock();
            if writers
                .get(&remote)
                .map(|w| Arc::ptr_eq(w, &writer))
                .unwrap_or(false)
            {
                writers.remove(&remote);
            }
        }
        let _ = events.send(TransportEvent::Disconnected(remote)).await;
    }

    fn writer(&self, peer: PeerId) -> Option<Writer> {
        self.inner.writers.lock().get(&peer).cloned()
    }
}

/// Read one length-prefixed frame. `None` on clean EOF.
async fn read_frame(reader: &mut OwnedReadHalf) -> PubswapResult<Option<Bytes>> {
    let mut prefix = [0u8; LEN_PREFIX_SIZE];
    match reader.read_exact(&mut prefix).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(PubswapError::malformed(e.to_string())),
    }

    let len = peek_frame_len(&prefix)?.unwrap_or(0);
    let mut frame = BytesMut::with_capacity(LEN_PREFIX_SIZE + len);
    frame.put_slice(&prefix);
    frame.resize(LEN_PREFIX_SIZE + len, 0);
    reader
        .read_exact(&mut frame[LEN_PREFIX_SIZE..])
        .await
        .map_err(|e| PubswapError::malformed(format!("truncated frame: {}", e)))?;

    Ok(Some(frame.freeze()))
}

#[async_trait]
impl Transport for TcpTransport {
    fn local_peer(&self) -> PeerId {
        self.inner.local
    }

    async fn connect(&self, peer: PeerId) -> PubswapResult<()> {
        if self.is_connected(peer) {
            return Ok(());
        }

        let addr = self
            .inner
            .address_book
            .read()
            .get(&peer)
            .copied()
            .ok_or_else(|| PubswapError::ConnectFailed {
                peer,
                reason: "no known address".into(),
            })?;

        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| PubswapError::ConnectFailed {
                peer,
                reason: e.to_string(),
            })?;

        let remote = self.establish(stream).await?;
        if remote != peer {
            return Err(PubswapError::ConnectFailed {
                peer,
                reason: format!("address {} answered as {}", addr, remote),
            });
        }
        Ok(())
    }

    async fn send(&self, peer: PeerId, msg: &WireMessage) -> PubswapResult<()> {
        let bytes = msg.encode()?;
        let writer = self.writer(peer).ok_or_else(|| PubswapError::SendFailed {
            peer,
            reason: "not connected".into(),
        })?;

        let mut writer = writer.lock().await;
        writer
            .write_all(&bytes)
            .await
            .map_err(|e| PubswapError::SendFailed {
                peer,
                reason: e.to_string(),
            })?;
        Ok(())
    }
}
