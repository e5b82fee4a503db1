//! Per-connection message dispatch.
//!
//! A connection is served strictly in order: one payload is decoded,
//! dispatched and answered before the next is read.  Any wire or store
//! error ends the connection without a reply.  A query response that
//! would not fit the transport carries only the leading records that do.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use log::{debug, info, warn};
use uuid::Uuid;

use crate::contract::{Contract, WeakContractDefinition};
use crate::error::{ServerError, ServerResult};
use crate::query::Filter;
use crate::store::RecordStore;
use crate::transport::Connection;
use crate::types::{liveness_cutoff, owner_address, HashedField, Record, RecordId};
use crate::wire::{encode_query_response, Message};

pub struct Handler {
    contract: Arc<Contract>,
    store: Arc<dyn RecordStore>,
    timeout: Duration,
    verbose: bool,
}

impl Handler {
    pub fn new(
        contract: Arc<Contract>,
        store: Arc<dyn RecordStore>,
        timeout: Duration,
        verbose: bool,
    ) -> Self {
        Self {
            contract,
            store,
            timeout,
            verbose,
        }
    }

    /// Serves `conn` until the peer goes away or misbehaves.
    pub async fn run<C: Connection>(&self, mut conn: C) -> ServerResult<()> {
        let peer = conn.peer();

        while let Some(payload) = conn.read_frame().await? {
            let message = Message::decode(&payload)?;
            debug!("{:?} from {}", message.message_type(), peer);

            if let Some(reply) = self.handle(peer, message).await? {
                let payload = match reply {
                    Message::QueryResponse {
                        correlation_id,
                        records,
                    } => {
                        let (payload, sent) =
                            encode_query_response(&correlation_id, &records, conn.max_payload());
                        if sent < records.len() {
                            warn!(
                                "Query {} response truncated to {} of {} record(s)",
                                correlation_id,
                                sent,
                                records.len()
                            );
                        }
                        payload
                    }
                    other => other.encode(),
                };
                conn.write_frame(&payload).await?;
            }
        }

        Ok(())
    }

    /// Dispatches one decoded message, returning the reply if the message
    /// type has one.
    pub async fn handle(&self, peer: IpAddr, message: Message) -> ServerResult<Option<Message>> {
        match message {
            Message::RegisterServer { fields } => self.register(peer, fields).await.map(Some),
            Message::ServerAlive { id } => {
                self.alive(peer, id).await?;
                Ok(None)
            }
            Message::RemoveServer { id } => {
                self.remove(peer, id).await?;
                Ok(None)
            }
            Message::UpdateServer { id, fields } => {
                self.update(peer, id, fields).await?;
                Ok(None)
            }
            Message::Query {
                correlation_id,
                filter,
            } => self.query(correlation_id, &filter).await.map(Some),
            Message::ContractCheck {
                correlation_id,
                fields,
            } => Ok(Some(self.contract_check(peer, correlation_id, &fields))),
            Message::RegisterAck { .. } => Err(ServerError::UnexpectedMessage("RegisterAck")),
            Message::QueryResponse { .. } => Err(ServerError::UnexpectedMessage("QueryResponse")),
            Message::ContractResponse { .. } => {
                Err(ServerError::UnexpectedMessage("ContractResponse"))
            }
        }
    }

    async fn register(&self, peer: IpAddr, fields: Vec<HashedField>) -> ServerResult<Message> {
        let fields = match self.contract.bind(fields) {
            Ok(fields) => fields,
            Err(e) => {
                warn!("Rejected registration from {}: {}", peer, e);
                return Ok(Message::RegisterAck {
                    id: Uuid::nil(),
                    success: false,
                });
            }
        };

        let record = Record::new(peer, fields);
        if self.verbose {
            info!("Registering {}", describe(&record));
        }
        let id = self.store.insert(record).await?;
        info!("Registered server {} for {}", id, peer);

        Ok(Message::RegisterAck { id, success: true })
    }

    async fn alive(&self, peer: IpAddr, id: RecordId) -> ServerResult<()> {
        if self.store.touch(id, owner_address(peer)).await? {
            debug!("Server {} is alive", id);
        } else {
            warn!("Keepalive from {} for unknown server {}", peer, id);
        }
        Ok(())
    }

    async fn remove(&self, peer: IpAddr, id: RecordId) -> ServerResult<()> {
        match self.store.delete(id, owner_address(peer)).await? {
            Some(record) if self.verbose => info!("Removed {}", describe(&record)),
            Some(_) => info!("Removed server {}", id),
            None => warn!("Removal from {} for unknown server {}", peer, id),
        }
        Ok(())
    }

    async fn update(&self, peer: IpAddr, id: RecordId, fields: Vec<HashedField>) -> ServerResult<()> {
        let fields = match self.contract.bind(fields) {
            Ok(fields) => fields,
            Err(e) => {
                warn!("Ignoring update of {} from {}: {}", id, peer, e);
                return Ok(());
            }
        };

        if self.store.update(id, owner_address(peer), fields).await? {
            info!("Updated server {}", id);
        } else {
            warn!("Update from {} for unknown server {}", peer, id);
        }
        Ok(())
    }

    async fn query(&self, correlation_id: String, filter: &str) -> ServerResult<Message> {
        let filter = match Filter::parse(filter) {
            Ok(filter) => filter,
            Err(e) => {
                warn!("Query {} has an invalid filter: {}", correlation_id, e);
                return Ok(Message::QueryResponse {
                    correlation_id,
                    records: Vec::new(),
                });
            }
        };

        let started = Instant::now();
        let cutoff = liveness_cutoff(SystemTime::now(), self.timeout);
        if self.verbose {
            debug!(
                "Query {} as document filter: {}",
                correlation_id,
                filter.to_native_with_cutoff(cutoff)
            );
        }
        let records = self.store.find_all(&filter, cutoff).await?;
        info!(
            "Query {} matched {} record(s) in {:?}",
            correlation_id,
            records.len(),
            started.elapsed()
        );

        Ok(Message::QueryResponse {
            correlation_id,
            records,
        })
    }

    fn contract_check(
        &self,
        peer: IpAddr,
        correlation_id: String,
        fields: &[WeakContractDefinition],
    ) -> Message {
        let compatible = self.contract.is_compatible_with(fields);
        if !compatible {
            warn!("Contract offered by {} is incompatible", peer);
        }
        Message::ContractResponse {
            correlation_id,
            compatible,
        }
    }
}

fn describe(record: &Record) -> String {
    serde_json::to_string(record).unwrap_or_else(|e| format!("server {} ({})", record.id, e))
}
