//! Accept loop.

use std::net::IpAddr;
use std::sync::Arc;

use futures_util::stream::{FuturesUnordered, StreamExt};
use log::{debug, error, info, warn};
use tokio::task::JoinHandle;

use crate::error::ServerResult;
use crate::handler::Handler;
use crate::transport::{Connection, Transport};

/// Accepts peers forever, serving each on its own task.
///
/// Returns only when the transport can no longer accept.
pub async fn serve<T: Transport>(mut transport: T, handler: Arc<Handler>) -> anyhow::Result<()> {
    let name = transport.name();
    info!("Server list listening on {} ({})", transport.local_addr()?, name);

    let mut connections: FuturesUnordered<JoinHandle<(IpAddr, ServerResult<()>)>> =
        FuturesUnordered::new();

    loop {
        tokio::select! {
            accepted = transport.accept() => {
                let conn = accepted?;
                let peer = conn.peer();
                debug!("Accepted {} peer {}", name, peer);

                let handler = Arc::clone(&handler);
                connections.push(tokio::spawn(async move {
                    (peer, handler.run(conn).await)
                }));
            }
            Some(finished) = connections.next(), if !connections.is_empty() => {
                match finished {
                    Ok((peer, Ok(()))) => debug!("Peer {} disconnected", peer),
                    Ok((peer, Err(e))) => warn!("Dropped peer {}: {}", peer, e),
                    Err(e) => error!("Connection task failed: {}", e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    use crate::contract::{stable_hash64, Contract, ContractDefinition, ContractType};
    use crate::store::MemoryStore;
    use crate::transport::TcpTransport;
    use crate::types::{FieldValue, HashedField};
    use crate::wire::{encode_frame, Message};

    async fn read_message(stream: &mut TcpStream) -> Message {
        let mut header = [0u8; 2];
        stream.read_exact(&mut header).await.unwrap();
        let mut payload = vec![0u8; u16::from_le_bytes(header) as usize];
        stream.read_exact(&mut payload).await.unwrap();
        Message::decode(&payload).unwrap()
    }

    async fn send_message(stream: &mut TcpStream, message: Message) {
        let frame = encode_frame(&message.encode()).unwrap();
        stream.write_all(&frame).await.unwrap();
    }

    #[tokio::test]
    async fn serves_concurrent_tcp_peers() {
        let timeout = Duration::from_secs(20);
        let contract = Arc::new(
            Contract::new(vec![ContractDefinition::new(
                "Players",
                ContractType::Int32,
                true,
            )])
            .unwrap(),
        );
        let store = Arc::new(MemoryStore::new(contract.clone(), timeout));
        let handler = Arc::new(Handler::new(contract, store, timeout, false));

        let transport = TcpTransport::bind("127.0.0.1:0".parse().unwrap(), 1024)
            .await
            .unwrap();
        let addr = transport.local_addr().unwrap();
        let server = tokio::spawn(serve(transport, handler));

        let mut registrant = TcpStream::connect(addr).await.unwrap();
        let mut querier = TcpStream::connect(addr).await.unwrap();

        send_message(
            &mut registrant,
            Message::RegisterServer {
                fields: vec![HashedField {
                    name_hash: stable_hash64("Players"),
                    value: FieldValue::Int32(4),
                }],
            },
        )
        .await;
        let id = match read_message(&mut registrant).await {
            Message::RegisterAck { id, success: true } => id,
            other => panic!("unexpected reply {other:?}"),
        };

        send_message(
            &mut querier,
            Message::Query {
                correlation_id: "1".into(),
                filter: r#"{"Players": {"$lt": 5}}"#.into(),
            },
        )
        .await;
        match read_message(&mut querier).await {
            Message::QueryResponse { records, .. } => {
                assert_eq!(records.len(), 1);
                assert_eq!(records[0].id, id);
            }
            other => panic!("unexpected reply {other:?}"),
        }

        // A protocol error drops only the offending peer.
        registrant.write_all(&[1, 0, 200]).await.unwrap();
        let mut rest = Vec::new();
        registrant.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());

        send_message(
            &mut querier,
            Message::Query {
                correlation_id: "2".into(),
                filter: "{}".into(),
            },
        )
        .await;
        assert!(matches!(
            read_message(&mut querier).await,
            Message::QueryResponse { .. }
        ));

        server.abort();
    }
}
