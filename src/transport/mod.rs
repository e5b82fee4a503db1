use std::io;
use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::ServerResult;

pub mod tcp;
pub mod udp;
pub use tcp::TcpTransport;
pub use udp::UdpTransport;

/// One peer's ordered stream of message payloads.
#[async_trait]
pub trait Connection: Send {
    /// Remote address; it identifies record owners.
    fn peer(&self) -> IpAddr;

    /// Next complete payload, or `None` once the peer is gone.
    async fn read_frame(&mut self) -> ServerResult<Option<Bytes>>;

    /// Largest payload `write_frame` accepts.
    fn max_payload(&self) -> usize;

    /// Sends one payload.  Framing is the transport's business.
    async fn write_frame(&mut self, payload: &[u8]) -> ServerResult<()>;
}

#[async_trait]
pub trait Transport: Send {
    type Conn: Connection + 'static;

    /// Waits for the next peer.
    async fn accept(&mut self) -> io::Result<Self::Conn>;

    fn local_addr(&self) -> io::Result<SocketAddr>;

    fn name(&self) -> &'static str;
}
