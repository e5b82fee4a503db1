//! Data structures shared by the codec, the query engine and the store.
//!
//! Records are serialised with [`serde`](https://serde.rs/) only for
//! logging; on the wire they use the binary layouts in [`crate::wire`].

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv6Addr};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Serialize, Serializer};
use uuid::Uuid;

use crate::contract::ContractType;

/// Identifier assigned to a registration.
pub type RecordId = Uuid;

/// Record fields keyed by contract field name.
pub type FieldMap = BTreeMap<String, FieldValue>;

/// A single typed field value.  The variant always matches the
/// [`ContractType`] of the definition it is stored under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    String(String),
    Buffer(#[serde(serialize_with = "serialize_hex")] Vec<u8>),
    Guid(Uuid),
}

impl FieldValue {
    pub fn contract_type(&self) -> ContractType {
        match self {
            FieldValue::Int8(_) => ContractType::Int8,
            FieldValue::Int16(_) => ContractType::Int16,
            FieldValue::Int32(_) => ContractType::Int32,
            FieldValue::Int64(_) => ContractType::Int64,
            FieldValue::UInt8(_) => ContractType::UInt8,
            FieldValue::UInt16(_) => ContractType::UInt16,
            FieldValue::UInt32(_) => ContractType::UInt32,
            FieldValue::UInt64(_) => ContractType::UInt64,
            FieldValue::String(_) => ContractType::String,
            FieldValue::Buffer(_) => ContractType::Buffer,
            FieldValue::Guid(_) => ContractType::Guid,
        }
    }

    /// Widens any integer variant; `None` for non-numeric values.
    pub fn as_integer(&self) -> Option<i128> {
        match *self {
            FieldValue::Int8(v) => Some(v.into()),
            FieldValue::Int16(v) => Some(v.into()),
            FieldValue::Int32(v) => Some(v.into()),
            FieldValue::Int64(v) => Some(v.into()),
            FieldValue::UInt8(v) => Some(v.into()),
            FieldValue::UInt16(v) => Some(v.into()),
            FieldValue::UInt32(v) => Some(v.into()),
            FieldValue::UInt64(v) => Some(v.into()),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }
}

fn serialize_hex<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(bytes))
}

/// A field as it arrives from a registrant: keyed by name hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashedField {
    pub name_hash: u64,
    pub value: FieldValue,
}

/// One registered server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record {
    pub id: RecordId,
    /// Address that registered the record, normalised to IPv6.
    pub owner: Ipv6Addr,
    #[serde(serialize_with = "serialize_millis")]
    pub last_seen: SystemTime,
    pub fields: FieldMap,
}

impl Record {
    /// A fresh record owned by `owner`, last seen now.
    pub fn new(owner: IpAddr, fields: FieldMap) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner: owner_address(owner),
            last_seen: SystemTime::now(),
            fields,
        }
    }

    pub fn is_alive(&self, cutoff: SystemTime) -> bool {
        self.last_seen >= cutoff
    }
}

fn serialize_millis<S: Serializer>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_i64(unix_millis(*time))
}

/// Normalises a peer address so IPv4 and IPv4-mapped IPv6 peers compare
/// equal.
pub fn owner_address(ip: IpAddr) -> Ipv6Addr {
    match ip {
        IpAddr::V4(v4) => v4.to_ipv6_mapped(),
        IpAddr::V6(v6) => v6,
    }
}

/// Milliseconds since the Unix epoch, negative before it.
pub fn unix_millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_millis()).unwrap_or(i64::MAX),
        Err(before) => -i64::try_from(before.duration().as_millis()).unwrap_or(i64::MAX),
    }
}

pub fn from_unix_millis(millis: i64) -> SystemTime {
    let offset = Duration::from_millis(millis.unsigned_abs());
    if millis >= 0 {
        UNIX_EPOCH + offset
    } else {
        UNIX_EPOCH - offset
    }
}

/// Oldest `last_seen` still considered alive at `now`.
pub fn liveness_cutoff(now: SystemTime, timeout: Duration) -> SystemTime {
    now.checked_sub(timeout).unwrap_or(UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn ipv4_owner_is_mapped() {
        let v4 = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7));
        let mapped = IpAddr::V6(Ipv4Addr::new(10, 0, 0, 7).to_ipv6_mapped());
        assert_eq!(owner_address(v4), owner_address(mapped));
    }

    #[test]
    fn millis_roundtrip() {
        let at = UNIX_EPOCH + Duration::from_millis(1_700_000_123_456);
        assert_eq!(unix_millis(at), 1_700_000_123_456);
        assert_eq!(from_unix_millis(1_700_000_123_456), at);
        assert_eq!(from_unix_millis(-5), UNIX_EPOCH - Duration::from_millis(5));
    }

    #[test]
    fn record_logs_as_json() {
        let mut fields = FieldMap::new();
        fields.insert("Players".into(), FieldValue::Int32(3));
        fields.insert("Blob".into(), FieldValue::Buffer(vec![0xde, 0xad]));
        let mut record = Record::new(IpAddr::V4(Ipv4Addr::LOCALHOST), fields);
        record.last_seen = from_unix_millis(1000);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["fields"]["Players"], 3);
        assert_eq!(json["fields"]["Blob"], "dead");
        assert_eq!(json["last_seen"], 1000);
    }

    #[test]
    fn integer_widening() {
        assert_eq!(FieldValue::UInt64(u64::MAX).as_integer(), Some(u64::MAX as i128));
        assert_eq!(FieldValue::Int8(-3).as_integer(), Some(-3));
        assert_eq!(FieldValue::String("3".into()).as_integer(), None);
    }
}
