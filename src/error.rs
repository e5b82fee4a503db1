//! Error types for the server list daemon.
//!
//! Each subsystem gets its own enum so callers can tell a broken frame
//! from a broken filter.  The connection handler folds them into
//! [`ServerError`], which always ends the connection.

use thiserror::Error;

use crate::contract::ContractType;

/// Result type for wire protocol operations.
pub type WireResult<T> = Result<T, WireError>;

/// Errors raised while framing or decoding protocol messages.
#[derive(Debug, Error)]
pub enum WireError {
    /// The payload ended before the value being read.
    #[error("truncated payload: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    /// First payload byte is not a known message type.
    #[error("unknown message type: {0}")]
    UnknownMessageType(u8),

    /// A field carried a type tag outside the contract type range.
    #[error("unknown contract type: {0}")]
    UnknownContractType(u8),

    /// Declared frame length exceeds the receive buffer.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// A frame with no message type byte.
    #[error("empty frame")]
    EmptyFrame,

    /// A count or length prefix was negative.
    #[error("negative length prefix: {0}")]
    NegativeLength(i32),

    /// A 7-bit encoded length ran past five bytes.
    #[error("malformed string length prefix")]
    BadStringLength,

    /// String bytes were not valid UTF-8.
    #[error("invalid utf-8 in string")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// A GUID string that does not parse.
    #[error("invalid guid {0:?}")]
    InvalidGuid(String),

    /// Bytes left over after a complete message.
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors in a configured contract.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContractError {
    #[error("duplicate contract field {0:?}")]
    DuplicateField(String),

    #[error("contract fields {first:?} and {second:?} share a name hash")]
    HashCollision { first: String, second: String },
}

/// A registration that leaves out a required field.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("missing required field {name:?} of type {field_type}")]
pub struct MissingField {
    pub name: String,
    pub field_type: ContractType,
}

/// Errors raised while parsing a filter document.
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("filter is not valid json: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("filter node must be an object")]
    NotAnObject,

    #[error("invalid operand for {op}: {reason}")]
    InvalidOperand { op: String, reason: String },

    #[error("unknown operator {0}")]
    UnknownOperator(String),

    #[error("invalid regex: {0}")]
    InvalidRegex(#[from] regex::Error),
}

/// Errors surfaced by a record store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend failure: {0}")]
    Backend(String),
}

/// Result type for connection handling.
pub type ServerResult<T> = Result<T, ServerError>;

/// Anything that tears down a connection.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("wire protocol error: {0}")]
    Wire(#[from] WireError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The server received a message only a server sends.
    #[error("unexpected {0} message from client")]
    UnexpectedMessage(&'static str),
}
