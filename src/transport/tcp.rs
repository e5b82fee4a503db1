use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use log::warn;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;

use super::{Connection, Transport};
use crate::error::ServerResult;
use crate::wire::{encode_frame, FrameDecoder, FRAME_HEADER_SIZE, MAX_ENCODABLE_PAYLOAD};

/// Back-off after a failed accept, e.g. when out of file descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Stream transport: every payload carries a 2-byte length prefix.
pub struct TcpTransport {
    listener: TcpListener,
    max_frame_size: usize,
}

impl TcpTransport {
    pub async fn bind(addr: SocketAddr, max_frame_size: usize) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            max_frame_size,
        })
    }
}

#[async_trait]
impl Transport for TcpTransport {
    type Conn = TcpConnection;

    async fn accept(&mut self) -> io::Result<TcpConnection> {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        warn!("Failed to set TCP_NODELAY for {}: {}", peer, e);
                    }
                    return Ok(TcpConnection::new(stream, peer, self.max_frame_size));
                }
                Err(e) => {
                    warn!("Failed to accept TCP connection: {}", e);
                    sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    fn name(&self) -> &'static str {
        "tcp"
    }
}

pub struct TcpConnection {
    stream: TcpStream,
    peer: SocketAddr,
    decoder: FrameDecoder,
    read_buf: BytesMut,
}

impl TcpConnection {
    pub fn new(stream: TcpStream, peer: SocketAddr, max_frame_size: usize) -> Self {
        Self {
            stream,
            peer,
            decoder: FrameDecoder::new(max_frame_size),
            read_buf: BytesMut::with_capacity(FRAME_HEADER_SIZE + max_frame_size),
        }
    }
}

#[async_trait]
impl Connection for TcpConnection {
    fn peer(&self) -> IpAddr {
        self.peer.ip()
    }

    async fn read_frame(&mut self) -> ServerResult<Option<Bytes>> {
        loop {
            if let Some(payload) = self.decoder.decode(&mut self.read_buf)? {
                return Ok(Some(payload));
            }

            if self.stream.read_buf(&mut self.read_buf).await? == 0 {
                if self.read_buf.is_empty() && self.decoder.is_idle() {
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "peer closed the connection mid-frame",
                )
                .into());
            }
        }
    }

    fn max_payload(&self) -> usize {
        MAX_ENCODABLE_PAYLOAD
    }

    async fn write_frame(&mut self, payload: &[u8]) -> ServerResult<()> {
        let frame = encode_frame(payload)?;
        self.stream.write_all(&frame).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ServerError, WireError};

    async fn pair(max: usize) -> (TcpConnection, TcpStream) {
        let mut transport = TcpTransport::bind("127.0.0.1:0".parse().unwrap(), max)
            .await
            .unwrap();
        let addr = transport.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let server = transport.accept().await.unwrap();
        (server, client)
    }

    #[tokio::test]
    async fn reads_frames_split_across_writes() {
        let (mut server, mut client) = pair(64).await;
        assert!(server.peer().is_loopback());

        let frame = encode_frame(b"ping").unwrap();
        client.write_all(&frame[..3]).await.unwrap();
        client.flush().await.unwrap();
        let reader = tokio::spawn(async move {
            let payload = server.read_frame().await.unwrap();
            (server, payload)
        });
        client.write_all(&frame[3..]).await.unwrap();

        let (mut server, payload) = reader.await.unwrap();
        assert_eq!(payload.as_deref(), Some(&b"ping"[..]));

        server.write_frame(b"pong").await.unwrap();
        let mut reply = [0u8; 6];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"\x04\x00pong");

        drop(client);
        assert!(server.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_frame_tears_down() {
        let (mut server, mut client) = pair(8).await;
        client.write_all(&encode_frame(&[1u8; 9]).unwrap()).await.unwrap();
        assert!(matches!(
            server.read_frame().await,
            Err(ServerError::Wire(WireError::FrameTooLarge { size: 9, max: 8 }))
        ));
    }

    #[tokio::test]
    async fn eof_mid_frame_is_an_error() {
        let (mut server, mut client) = pair(64).await;
        client.write_all(&[10, 0, 1, 2]).await.unwrap();
        drop(client);
        assert!(matches!(server.read_frame().await, Err(ServerError::Io(_))));
    }
}
