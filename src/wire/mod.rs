//! Binary wire protocol.
//!
//! Every payload starts with a one-byte [`MessageType`].  Client to server
//! messages key record fields by name hash; server to client messages
//! spell field names out so responses are self-describing.

use std::net::Ipv6Addr;

use bytes::BytesMut;
use uuid::Uuid;

use crate::contract::WeakContractDefinition;
use crate::error::{WireError, WireResult};
use crate::types::{from_unix_millis, unix_millis, FieldMap, HashedField, Record};

pub mod codec;
pub mod frame;

pub use codec::{PayloadReader, PayloadWriter};
pub use frame::{encode_frame, FrameDecoder, FRAME_HEADER_SIZE, MAX_ENCODABLE_PAYLOAD};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    RegisterServer = 0,
    RemoveServer = 1,
    UpdateServer = 2,
    ServerAlive = 3,
    RegisterAck = 4,
    Query = 5,
    QueryResponse = 6,
    ContractCheck = 7,
    ContractResponse = 8,
}

impl TryFrom<u8> for MessageType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::RegisterServer),
            1 => Ok(Self::RemoveServer),
            2 => Ok(Self::UpdateServer),
            3 => Ok(Self::ServerAlive),
            4 => Ok(Self::RegisterAck),
            5 => Ok(Self::Query),
            6 => Ok(Self::QueryResponse),
            7 => Ok(Self::ContractCheck),
            8 => Ok(Self::ContractResponse),
            other => Err(WireError::UnknownMessageType(other)),
        }
    }
}

/// A decoded protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    RegisterServer {
        fields: Vec<HashedField>,
    },
    RegisterAck {
        id: Uuid,
        success: bool,
    },
    ServerAlive {
        id: Uuid,
    },
    RemoveServer {
        id: Uuid,
    },
    UpdateServer {
        id: Uuid,
        fields: Vec<HashedField>,
    },
    Query {
        correlation_id: String,
        filter: String,
    },
    QueryResponse {
        correlation_id: String,
        records: Vec<Record>,
    },
    ContractCheck {
        correlation_id: String,
        fields: Vec<WeakContractDefinition>,
    },
    ContractResponse {
        correlation_id: String,
        compatible: bool,
    },
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::RegisterServer { .. } => MessageType::RegisterServer,
            Message::RegisterAck { .. } => MessageType::RegisterAck,
            Message::ServerAlive { .. } => MessageType::ServerAlive,
            Message::RemoveServer { .. } => MessageType::RemoveServer,
            Message::UpdateServer { .. } => MessageType::UpdateServer,
            Message::Query { .. } => MessageType::Query,
            Message::QueryResponse { .. } => MessageType::QueryResponse,
            Message::ContractCheck { .. } => MessageType::ContractCheck,
            Message::ContractResponse { .. } => MessageType::ContractResponse,
        }
    }

    /// Decodes one complete payload.  Leftover bytes are an error.
    pub fn decode(payload: &[u8]) -> WireResult<Self> {
        let mut r = PayloadReader::new(payload);
        if r.remaining() == 0 {
            return Err(WireError::EmptyFrame);
        }

        let message = match MessageType::try_from(r.read_u8()?)? {
            MessageType::RegisterServer => Message::RegisterServer {
                fields: read_hashed_fields(&mut r)?,
            },
            MessageType::RegisterAck => Message::RegisterAck {
                id: r.read_guid()?,
                success: r.read_bool()?,
            },
            MessageType::ServerAlive => Message::ServerAlive { id: r.read_guid()? },
            MessageType::RemoveServer => Message::RemoveServer { id: r.read_guid()? },
            MessageType::UpdateServer => Message::UpdateServer {
                id: r.read_guid()?,
                fields: read_hashed_fields(&mut r)?,
            },
            MessageType::Query => Message::Query {
                correlation_id: r.read_string()?,
                filter: r.read_string()?,
            },
            MessageType::QueryResponse => {
                let correlation_id = r.read_string()?;
                let count = r.read_count()?;
                let mut records = Vec::with_capacity(count.min(r.remaining()));
                for _ in 0..count {
                    records.push(read_record(&mut r)?);
                }
                Message::QueryResponse {
                    correlation_id,
                    records,
                }
            }
            MessageType::ContractCheck => {
                let correlation_id = r.read_string()?;
                let count = r.read_count()?;
                let mut fields = Vec::with_capacity(count.min(r.remaining()));
                for _ in 0..count {
                    let name = r.read_string()?;
                    let field_type = r.read_contract_type()?;
                    fields.push(WeakContractDefinition::new(name, field_type));
                }
                Message::ContractCheck {
                    correlation_id,
                    fields,
                }
            }
            MessageType::ContractResponse => Message::ContractResponse {
                correlation_id: r.read_string()?,
                compatible: r.read_bool()?,
            },
        };

        r.finish()?;
        Ok(message)
    }

    /// Encodes the payload (without frame header).
    pub fn encode(&self) -> BytesMut {
        let mut w = PayloadWriter::new();
        w.write_u8(self.message_type() as u8);

        match self {
            Message::RegisterServer { fields } => write_hashed_fields(&mut w, fields),
            Message::RegisterAck { id, success } => {
                w.write_guid(id);
                w.write_bool(*success);
            }
            Message::ServerAlive { id } | Message::RemoveServer { id } => w.write_guid(id),
            Message::UpdateServer { id, fields } => {
                w.write_guid(id);
                write_hashed_fields(&mut w, fields);
            }
            Message::Query {
                correlation_id,
                filter,
            } => {
                w.write_string(correlation_id);
                w.write_string(filter);
            }
            Message::QueryResponse {
                correlation_id,
                records,
            } => {
                w.write_string(correlation_id);
                w.write_count(records.len());
                for record in records {
                    write_record(&mut w, record);
                }
            }
            Message::ContractCheck {
                correlation_id,
                fields,
            } => {
                w.write_string(correlation_id);
                w.write_count(fields.len());
                for field in fields {
                    w.write_string(&field.name);
                    w.write_u8(field.field_type as u8);
                }
            }
            Message::ContractResponse {
                correlation_id,
                compatible,
            } => {
                w.write_string(correlation_id);
                w.write_bool(*compatible);
            }
        }

        w.into_inner()
    }
}

/// Encodes a `QueryResponse` payload no longer than `limit` bytes.
///
/// Records are written in order until the next one would not fit; the
/// match count covers only the records written.  Returns the payload and
/// that count.
pub fn encode_query_response(
    correlation_id: &str,
    records: &[Record],
    limit: usize,
) -> (BytesMut, usize) {
    let mut w = PayloadWriter::new();
    w.write_u8(MessageType::QueryResponse as u8);
    w.write_string(correlation_id);
    let header = w.into_inner();

    let mut budget = limit.saturating_sub(header.len() + 4);
    let mut body = BytesMut::new();
    let mut sent = 0;
    for record in records {
        let mut w = PayloadWriter::new();
        write_record(&mut w, record);
        let encoded = w.into_inner();
        if encoded.len() > budget {
            break;
        }
        budget -= encoded.len();
        body.extend_from_slice(&encoded);
        sent += 1;
    }

    let mut w = PayloadWriter::new();
    w.write_raw(&header);
    w.write_count(sent);
    w.write_raw(&body);
    (w.into_inner(), sent)
}

fn read_hashed_fields(r: &mut PayloadReader<'_>) -> WireResult<Vec<HashedField>> {
    let count = r.read_count()?;
    let mut fields = Vec::with_capacity(count.min(r.remaining()));
    for _ in 0..count {
        let name_hash = r.read_u64()?;
        let ty = r.read_contract_type()?;
        let value = r.read_value(ty)?;
        fields.push(HashedField { name_hash, value });
    }
    Ok(fields)
}

fn write_hashed_fields(w: &mut PayloadWriter, fields: &[HashedField]) {
    w.write_count(fields.len());
    for field in fields {
        w.write_u64(field.name_hash);
        w.write_u8(field.value.contract_type() as u8);
        w.write_value(&field.value);
    }
}

fn read_record(r: &mut PayloadReader<'_>) -> WireResult<Record> {
    let id = r.read_guid()?;
    let mut octets = [0u8; 16];
    octets.copy_from_slice(&r.read_bytes(16)?);
    let last_seen = from_unix_millis(r.read_i64()?);

    let count = r.read_count()?;
    let mut fields = FieldMap::new();
    for _ in 0..count {
        let name = r.read_string()?;
        let ty = r.read_contract_type()?;
        fields.insert(name, r.read_value(ty)?);
    }

    Ok(Record {
        id,
        owner: Ipv6Addr::from(octets),
        last_seen,
        fields,
    })
}

fn write_record(w: &mut PayloadWriter, record: &Record) {
    w.write_guid(&record.id);
    w.write_raw(&record.owner.octets());
    w.write_i64(unix_millis(record.last_seen));
    w.write_count(record.fields.len());
    for (name, value) in &record.fields {
        w.write_string(name);
        w.write_u8(value.contract_type() as u8);
        w.write_value(value);
    }
}
