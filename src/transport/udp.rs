//! Datagram transport.
//!
//! One socket serves every peer.  A background task reads datagrams and
//! routes them into per-peer sessions, so the connection handler sees a
//! UDP peer exactly like a TCP stream.  Datagram boundaries delimit
//! messages, so payloads travel without the length prefix.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, warn};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::{Connection, Transport};
use crate::error::{ServerResult, WireError};

/// Datagrams buffered per peer before new ones are dropped.
const SESSION_QUEUE: usize = 32;

/// Sessions accepted but not yet picked up by the accept loop.
const ACCEPT_QUEUE: usize = 64;

/// Largest UDP payload over IPv4 (65535 less the IP and UDP headers).
pub const MAX_DATAGRAM_PAYLOAD: usize = 65_507;

pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    incoming: mpsc::Receiver<UdpConnection>,
    demux: JoinHandle<()>,
}

impl UdpTransport {
    pub async fn bind(
        addr: SocketAddr,
        max_frame_size: usize,
        session_idle: Duration,
    ) -> io::Result<Self> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        let (session_tx, incoming) = mpsc::channel(ACCEPT_QUEUE);
        let demux = tokio::spawn(demultiplex(
            socket.clone(),
            session_tx,
            max_frame_size,
            session_idle,
        ));

        Ok(Self {
            socket,
            incoming,
            demux,
        })
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.demux.abort();
    }
}

async fn demultiplex(
    socket: Arc<UdpSocket>,
    session_tx: mpsc::Sender<UdpConnection>,
    max_frame_size: usize,
    session_idle: Duration,
) {
    let mut sessions: HashMap<SocketAddr, mpsc::Sender<Bytes>> = HashMap::new();
    // One spare byte so an oversized datagram is detectable rather than
    // silently truncated.
    let mut buf = vec![0u8; max_frame_size + 1];

    loop {
        let (len, peer) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                warn!("Failed to receive UDP datagram: {}", e);
                continue;
            }
        };

        if len == 0 {
            debug!("Ignoring empty datagram from {}", peer);
            continue;
        }
        if len > max_frame_size {
            warn!(
                "Dropping datagram from {}: {}",
                peer,
                WireError::FrameTooLarge {
                    size: len,
                    max: max_frame_size
                }
            );
            continue;
        }

        let payload = Bytes::copy_from_slice(&buf[..len]);

        let payload = match sessions.get(&peer) {
            Some(tx) => match tx.try_send(payload) {
                Ok(()) => continue,
                Err(TrySendError::Full(_)) => {
                    warn!("Session queue for {} is full, dropping datagram", peer);
                    continue;
                }
                // The session went idle; open a fresh one.
                Err(TrySendError::Closed(payload)) => payload,
            },
            None => payload,
        };

        sessions.retain(|_, tx| !tx.is_closed());

        let (tx, rx) = mpsc::channel(SESSION_QUEUE);
        if tx.try_send(payload).is_err() {
            continue;
        }
        let conn = UdpConnection {
            socket: socket.clone(),
            peer,
            rx,
            idle: session_idle,
        };
        if session_tx.send(conn).await.is_err() {
            debug!("UDP accept side closed, stopping demultiplexer");
            return;
        }
        debug!("Opened UDP session for {}", peer);
        sessions.insert(peer, tx);
    }
}

#[async_trait]
impl Transport for UdpTransport {
    type Conn = UdpConnection;

    async fn accept(&mut self) -> io::Result<UdpConnection> {
        self.incoming
            .recv()
            .await
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "UDP demultiplexer stopped"))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn name(&self) -> &'static str {
        "udp"
    }
}

/// A peer session.  It ends once the peer stays quiet for the idle period.
pub struct UdpConnection {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    rx: mpsc::Receiver<Bytes>,
    idle: Duration,
}

#[async_trait]
impl Connection for UdpConnection {
    fn peer(&self) -> IpAddr {
        self.peer.ip()
    }

    async fn read_frame(&mut self) -> ServerResult<Option<Bytes>> {
        match timeout(self.idle, self.rx.recv()).await {
            Ok(payload) => Ok(payload),
            Err(_) => {
                debug!("UDP session for {} idle, closing", self.peer);
                // Closing first makes the demultiplexer open a fresh session
                // for anything that arrives from here on; whatever slipped in
                // before the close is still handed out.
                self.rx.close();
                Ok(self.rx.recv().await)
            }
        }
    }

    fn max_payload(&self) -> usize {
        MAX_DATAGRAM_PAYLOAD
    }

    async fn write_frame(&mut self, payload: &[u8]) -> ServerResult<()> {
        self.socket.send_to(payload, self.peer).await?;
        Ok(())
    }
}
