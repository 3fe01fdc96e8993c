//! Broker-less TCP pub/sub transport.
//!
//! The publisher side binds one TCP listener on a fixed local port. Each
//! subscriber connection sends one `SUB <topic>` line per subscription and
//! then receives only frames whose topic exactly matches one of its
//! subscriptions. Exact matching keeps topics isolated: a subscription to
//! `sensor/em/2` can never see `sensor/em/21`.
//!
//! Frame layout on the wire, little-endian:
//!
//! ```text
//! ┌───────────────┬───────┬─────────────────┬─────────┐
//! │ u16 topic_len │ topic │ u32 payload_len │ payload │
//! └───────────────┴───────┴─────────────────┴─────────┘
//! ```
//!
//! Delivery is best-effort. Publishing never blocks on a subscriber: the
//! fan-out runs through a broadcast channel and a connection that cannot
//! keep up loses messages (logged, counted, never retried).

use emtrack_core::topic::check_topic_len;
use emtrack_core::WireError;
use log::{debug, trace, warn};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};

/// Default pub/sub port (configuration constant, not a protocol concern)
pub const DEFAULT_PORT: u16 = 5555;

/// Fan-out channel depth; a subscriber lagging further than this loses frames
const FANOUT_CAPACITY: usize = 256;

/// Upper bound on a single payload; anything larger is a framing bug
const MAX_PAYLOAD_LEN: u32 = 64 * 1024;

/// Errors from the pub/sub transport.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Could not bind the publisher socket; fatal at startup
    #[error("Failed to bind publisher socket on {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },

    /// Could not reach the publisher; fatal for the affected subscriber
    #[error("Failed to connect to publisher at {addr}: {source}")]
    Connect { addr: SocketAddr, source: io::Error },

    /// Connection-level I/O failure
    #[error("Transport I/O error: {0}")]
    Io(#[from] io::Error),

    /// Received bytes that do not form a valid frame
    #[error("Malformed frame: {0}")]
    Frame(#[from] WireError),
}

/// One published message: routing topic plus opaque payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Cloneable publishing handle, valid for the lifetime of the [`PubServer`].
#[derive(Clone)]
pub struct Publisher {
    tx: broadcast::Sender<Frame>,
    dropped: Arc<AtomicU64>,
}

impl Publisher {
    /// Best-effort, non-blocking send.
    ///
    /// A frame that cannot be delivered (no subscribers yet, transport
    /// shutting down) is dropped, never retried: retrying would violate
    /// real-time pacing.
    pub fn publish(&self, topic: &str, payload: Vec<u8>) {
        let frame = Frame {
            topic: topic.to_string(),
            payload,
        };
        match self.tx.send(frame) {
            Ok(n) => trace!("Published frame on '{}' to {} connections", topic, n),
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                trace!("No subscribers for '{}', frame dropped", topic);
            }
        }
    }

    /// Number of currently connected subscriber connections
    pub fn connection_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Frames dropped because nobody was listening
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Publisher-side listener. Bind, grab a [`Publisher`] handle, then drive
/// the accept loop with [`PubServer::run`].
pub struct PubServer {
    listener: TcpListener,
    tx: broadcast::Sender<Frame>,
    dropped: Arc<AtomicU64>,
}

impl PubServer {
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;
        let (tx, _) = broadcast::channel(FANOUT_CAPACITY);
        Ok(PubServer {
            listener,
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        })
    }

    /// The address actually bound (relevant when binding port 0)
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn publisher(&self) -> Publisher {
        Publisher {
            tx: self.tx.clone(),
            dropped: self.dropped.clone(),
        }
    }

    /// Accept loop. Exits when `shutdown` flips to true; dropping the
    /// server closes all subscriber connections.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), TransportError> {
        debug!("Pub/sub listener running on {}", self.listener.local_addr()?);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!("Pub/sub listener shutting down");
                        break;
                    }
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!("Subscriber connected from {}", peer);
                            let rx = self.tx.subscribe();
                            let conn_shutdown = shutdown.clone();
                            tokio::spawn(handle_subscriber(stream, peer, rx, conn_shutdown));
                        }
                        Err(e) => {
                            warn!("Accept failed: {}", e);
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Exact-match routing: a frame goes to a connection only if the full
/// topic was subscribed.
fn topic_matches(subscriptions: &[String], topic: &str) -> bool {
    subscriptions.iter().any(|sub| sub == topic)
}

/// Per-connection task: collect `SUB` lines, forward matching frames.
///
/// A slow connection only ever loses its own frames (broadcast lag); it
/// never delays delivery on another connection.
async fn handle_subscriber(
    stream: TcpStream,
    peer: SocketAddr,
    mut rx: broadcast::Receiver<Frame>,
    mut shutdown: watch::Receiver<bool>,
) {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    let mut subscriptions: Vec<String> = Vec::new();

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if let Some(topic) = line.strip_prefix("SUB ") {
                            trace!("{} subscribed to '{}'", peer, topic);
                            subscriptions.push(topic.trim().to_string());
                        } else if !line.trim().is_empty() {
                            debug!("{} sent unknown command: '{}'", peer, line);
                        }
                    }
                    Ok(None) | Err(_) => {
                        debug!("Subscriber {} disconnected", peer);
                        break;
                    }
                }
            }
            frame = rx.recv() => {
                match frame {
                    Ok(frame) if topic_matches(&subscriptions, &frame.topic) => {
                        let bytes = encode_frame(&frame.topic, &frame.payload);
                        if let Err(e) = write_frame(&mut write_half, &bytes).await {
                            debug!("Write to {} failed, dropping connection: {}", peer, e);
                            break;
                        }
                    }
                    Ok(_) => {} // not subscribed to this topic
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Subscriber {} lagged, {} frames dropped", peer, n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
        }
    }
}

/// Encode one frame into a single buffer so it goes out in one write.
fn encode_frame(topic: &str, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(2 + topic.len() + 4 + payload.len());
    buf.extend_from_slice(&(topic.len() as u16).to_le_bytes());
    buf.extend_from_slice(topic.as_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}

async fn write_frame(write_half: &mut OwnedWriteHalf, bytes: &[u8]) -> io::Result<()> {
    write_half.write_all(bytes).await
}

/// Subscriber-side socket: connect, subscribe, then receive frames until
/// the publisher closes the connection.
pub struct SubSocket {
    stream: TcpStream,
}

impl SubSocket {
    pub async fn connect(addr: SocketAddr) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| TransportError::Connect { addr, source })?;
        Ok(SubSocket { stream })
    }

    /// Register interest in a topic (exact match on the publisher side).
    pub async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        check_topic_len(topic)?;
        self.stream
            .write_all(format!("SUB {}\n", topic).as_bytes())
            .await?;
        Ok(())
    }

    /// Receive the next frame. `Ok(None)` means the publisher closed the
    /// connection cleanly (end of session).
    pub async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        let mut len2 = [0u8; 2];
        match self.stream.read_exact(&mut len2).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let topic_len = u16::from_le_bytes(len2) as usize;

        let mut topic_bytes = vec![0u8; topic_len];
        self.stream.read_exact(&mut topic_bytes).await?;
        let topic = String::from_utf8(topic_bytes).map_err(|_| WireError::InvalidTopic)?;

        let mut len4 = [0u8; 4];
        self.stream.read_exact(&mut len4).await?;
        let payload_len = u32::from_le_bytes(len4);
        if payload_len > MAX_PAYLOAD_LEN {
            return Err(WireError::LengthMismatch {
                expected: MAX_PAYLOAD_LEN as usize,
                actual: payload_len as usize,
            }
            .into());
        }

        let mut payload = vec![0u8; payload_len as usize];
        self.stream.read_exact(&mut payload).await?;

        Ok(Some(Frame { topic, payload }))
    }
}
