//! Registration contracts.
//!
//! A contract is the ordered list of typed fields a server list instance
//! accepts from registrants.  Registrants send field values keyed by the
//! 64-bit hash of the field name; names only travel during the
//! `ContractCheck` handshake and in query responses.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{ContractError, MissingField};
use crate::types::{FieldMap, HashedField};

/// Wire-representable value kinds.  The discriminant is the wire tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ContractType {
    Int8 = 0,
    Int16 = 1,
    Int32 = 2,
    Int64 = 3,
    UInt8 = 4,
    UInt16 = 5,
    UInt32 = 6,
    UInt64 = 7,
    String = 8,
    Buffer = 9,
    Guid = 10,
}

impl ContractType {
    pub const ALL: [ContractType; 11] = [
        ContractType::Int8,
        ContractType::Int16,
        ContractType::Int32,
        ContractType::Int64,
        ContractType::UInt8,
        ContractType::UInt16,
        ContractType::UInt32,
        ContractType::UInt64,
        ContractType::String,
        ContractType::Buffer,
        ContractType::Guid,
    ];
}

impl TryFrom<u8> for ContractType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::ALL.get(value as usize).copied().ok_or(value)
    }
}

impl fmt::Display for ContractType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One field of a server-side contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: ContractType,
    #[serde(default)]
    pub required: bool,
}

impl ContractDefinition {
    pub fn new(name: impl Into<String>, field_type: ContractType, required: bool) -> Self {
        Self {
            name: name.into(),
            field_type,
            required,
        }
    }
}

/// A field advertised by a remote peer during the compatibility handshake.
/// Peers do not say whether they consider a field required.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeakContractDefinition {
    pub name: String,
    pub field_type: ContractType,
}

impl WeakContractDefinition {
    pub fn new(name: impl Into<String>, field_type: ContractType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }
}

/// Common view over strong and weak field definitions.
pub trait FieldSchema {
    fn name(&self) -> &str;
    fn field_type(&self) -> ContractType;
    fn required(&self) -> bool {
        false
    }
}

impl FieldSchema for ContractDefinition {
    fn name(&self) -> &str {
        &self.name
    }

    fn field_type(&self) -> ContractType {
        self.field_type
    }

    fn required(&self) -> bool {
        self.required
    }
}

impl FieldSchema for WeakContractDefinition {
    fn name(&self) -> &str {
        &self.name
    }

    fn field_type(&self) -> ContractType {
        self.field_type
    }
}

/// Deterministic 64-bit hash of a field name: the first eight bytes of its
/// SHA-256 digest read as a little-endian integer.  Clients must embed the
/// same function.
pub fn stable_hash64(name: &str) -> u64 {
    let digest = Sha256::digest(name.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(head)
}

/// Bidirectional compatibility between two schemas.
///
/// Shared names must agree on type, and a field required by either side
/// must exist with the same type on the other.  Swapping the arguments
/// never changes the answer.
pub fn is_compatible<A, B>(local: &[A], remote: &[B]) -> bool
where
    A: FieldSchema,
    B: FieldSchema,
{
    covers(local, remote) && covers(remote, local)
}

fn covers<A: FieldSchema, B: FieldSchema>(from: &[A], other: &[B]) -> bool {
    from.iter().all(|field| {
        match other.iter().find(|candidate| candidate.name() == field.name()) {
            Some(candidate) => candidate.field_type() == field.field_type(),
            None => !field.required(),
        }
    })
}

/// A validated contract with its name-hash index.
#[derive(Debug, Clone)]
pub struct Contract {
    definitions: Vec<ContractDefinition>,
    by_hash: HashMap<u64, usize>,
}

impl Contract {
    pub fn new(definitions: Vec<ContractDefinition>) -> Result<Self, ContractError> {
        let mut by_hash = HashMap::with_capacity(definitions.len());

        for (index, definition) in definitions.iter().enumerate() {
            if definitions[..index]
                .iter()
                .any(|earlier| earlier.name == definition.name)
            {
                return Err(ContractError::DuplicateField(definition.name.clone()));
            }
            if let Some(previous) = by_hash.insert(stable_hash64(&definition.name), index) {
                return Err(ContractError::HashCollision {
                    first: definitions[previous].name.clone(),
                    second: definition.name.clone(),
                });
            }
        }

        Ok(Self {
            definitions,
            by_hash,
        })
    }

    pub fn definitions(&self) -> &[ContractDefinition] {
        &self.definitions
    }

    #[cfg(test)]
    pub fn get(&self, name: &str) -> Option<&ContractDefinition> {
        self.definitions.iter().find(|d| d.name == name)
    }

    pub fn resolve(&self, name_hash: u64) -> Option<&ContractDefinition> {
        self.by_hash.get(&name_hash).map(|&i| &self.definitions[i])
    }

    /// Names of String-typed fields, the corpus for `$text` searches.
    pub fn text_fields(&self) -> impl Iterator<Item = &str> {
        self.definitions
            .iter()
            .filter(|d| d.field_type == ContractType::String)
            .map(|d| d.name.as_str())
    }

    pub fn is_compatible_with<B: FieldSchema>(&self, remote: &[B]) -> bool {
        is_compatible(&self.definitions, remote)
    }

    /// Turns hash-keyed wire fields into a name-keyed field map.
    ///
    /// Fields whose hash is unknown or whose type disagrees with the
    /// contract are dropped.  Fails only when a required field is absent
    /// after that filtering.
    pub fn bind(&self, fields: Vec<HashedField>) -> Result<FieldMap, MissingField> {
        let mut bound = FieldMap::new();

        for field in fields {
            match self.resolve(field.name_hash) {
                Some(definition) if definition.field_type == field.value.contract_type() => {
                    bound.insert(definition.name.clone(), field.value);
                }
                _ => {}
            }
        }

        if let Some(missing) = self
            .definitions
            .iter()
            .find(|d| d.required && !bound.contains_key(&d.name))
        {
            return Err(MissingField {
                name: missing.name.clone(),
                field_type: missing.field_type,
            });
        }

        Ok(bound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldValue;

    fn players_contract() -> Contract {
        Contract::new(vec![
            ContractDefinition::new("Players", ContractType::Int32, true),
            ContractDefinition::new("Name", ContractType::String, false),
        ])
        .unwrap()
    }

    fn hashed(name: &str, value: FieldValue) -> HashedField {
        HashedField {
            name_hash: stable_hash64(name),
            value,
        }
    }

    #[test]
    fn stable_hash_is_fixed() {
        assert_eq!(stable_hash64("Players"), 0x758d_dd55_c62a_e184);
        assert_eq!(stable_hash64("Name"), 0xa9b3_733f_22d5_d1dc);
        assert_eq!(stable_hash64(""), 0x141c_fc98_42c4_b0e3);
        assert_ne!(stable_hash64("name"), stable_hash64("Name"));
    }

    #[test]
    fn contract_type_tags_roundtrip() {
        for ty in ContractType::ALL {
            assert_eq!(ContractType::try_from(ty as u8), Ok(ty));
        }
        assert_eq!(ContractType::try_from(11), Err(11));
    }

    #[test]
    fn compatibility_is_symmetric() {
        let schemas: Vec<Vec<ContractDefinition>> = vec![
            vec![],
            vec![ContractDefinition::new("Players", ContractType::Int32, true)],
            vec![ContractDefinition::new("Players", ContractType::Int32, false)],
            vec![ContractDefinition::new("Players", ContractType::Int64, false)],
            vec![
                ContractDefinition::new("Players", ContractType::Int32, false),
                ContractDefinition::new("Name", ContractType::String, true),
            ],
            vec![ContractDefinition::new("Map", ContractType::String, false)],
        ];

        for a in &schemas {
            for b in &schemas {
                assert_eq!(is_compatible(a, b), is_compatible(b, a), "{a:?} vs {b:?}");
            }
        }
    }

    #[test]
    fn type_mismatch_on_shared_field_is_incompatible() {
        let local = vec![ContractDefinition::new("Players", ContractType::Int32, false)];
        let remote = vec![WeakContractDefinition::new("Players", ContractType::String)];
        assert!(!is_compatible(&local, &remote));
    }

    #[test]
    fn optional_fields_may_be_missing() {
        let contract = players_contract();
        let remote = vec![WeakContractDefinition::new("Players", ContractType::Int32)];
        assert!(contract.is_compatible_with(&remote));

        let with_extra = vec![
            WeakContractDefinition::new("Players", ContractType::Int32),
            WeakContractDefinition::new("Region", ContractType::String),
        ];
        assert!(contract.is_compatible_with(&with_extra));
    }

    #[test]
    fn remote_missing_required_field_is_incompatible() {
        let contract = players_contract();
        let remote = vec![WeakContractDefinition::new("Name", ContractType::String)];
        assert!(!contract.is_compatible_with(&remote));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = Contract::new(vec![
            ContractDefinition::new("Players", ContractType::Int32, true),
            ContractDefinition::new("Players", ContractType::Int64, false),
        ])
        .unwrap_err();
        assert_eq!(err, ContractError::DuplicateField("Players".into()));
    }

    #[test]
    fn bind_keeps_only_contract_fields() {
        let contract = players_contract();
        let bound = contract
            .bind(vec![
                hashed("Players", FieldValue::Int32(42)),
                hashed("Unknown", FieldValue::UInt8(1)),
            ])
            .unwrap();

        assert_eq!(bound.len(), 1);
        assert_eq!(bound.get("Players"), Some(&FieldValue::Int32(42)));
        assert!(!bound.contains_key("Name"));
    }

    #[test]
    fn bind_drops_mistyped_fields() {
        let contract = players_contract();
        let bound = contract
            .bind(vec![
                hashed("Players", FieldValue::Int32(1)),
                hashed("Name", FieldValue::Int32(7)),
            ])
            .unwrap();
        assert!(!bound.contains_key("Name"));
    }

    #[test]
    fn bind_requires_required_fields() {
        let contract = players_contract();
        let err = contract
            .bind(vec![hashed("Name", FieldValue::String("x".into()))])
            .unwrap_err();
        assert_eq!(err.name, "Players");
        assert_eq!(err.field_type, ContractType::Int32);

        // A wrongly typed required field counts as missing.
        assert!(contract
            .bind(vec![hashed("Players", FieldValue::Int64(42))])
            .is_err());
    }

    #[test]
    fn text_fields_lists_string_fields() {
        let contract = players_contract();
        assert_eq!(contract.text_fields().collect::<Vec<_>>(), vec!["Name"]);
    }
}
