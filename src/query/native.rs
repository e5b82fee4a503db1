//! Translation of a [`Filter`] into a MongoDB-syntax filter document.
//!
//! A document-database backend stores each record with its fields under
//! `fields` and its liveness timestamp (Unix milliseconds) under
//! `lastSeen`.  The translation keeps the in-memory semantics where the
//! query language allows it; the remaining gaps are:
//!
//! * `$fieldSpecific` on `$text` is not expressible and is ignored.
//! * `$nin` matches a present field of a different type.
//! * `$eq` on a float operand compares exactly, with no epsilon.
//! * `$gt`, `$gte`, `$lt` and `$lte` also order strings and buffers.
//! * `$in` and `$nin` test every operand, not only those typed like the
//!   first one.

use std::time::SystemTime;

use log::warn;
use serde_json::{json, Map, Number, Value};

use super::{Filter, Literal, Predicate, TextSearch};
use crate::types::unix_millis;

/// Document path of record fields.
pub const FIELDS_PATH: &str = "fields";

/// Document path of the liveness timestamp.
pub const LAST_SEEN_PATH: &str = "lastSeen";

/// A filter no document satisfies.
fn match_nothing() -> Value {
    json!({ "_id": { "$exists": false } })
}

impl Filter {
    /// Native filter for this tree.
    pub fn to_native(&self) -> Value {
        match self {
            Filter::And(children) if children.is_empty() => Value::Object(Map::new()),
            Filter::And(children) => {
                json!({ "$and": children.iter().map(Filter::to_native).collect::<Vec<_>>() })
            }
            Filter::Or(children) if children.is_empty() => match_nothing(),
            Filter::Or(children) => {
                json!({ "$or": children.iter().map(Filter::to_native).collect::<Vec<_>>() })
            }
            Filter::Not(child) => json!({ "$nor": [child.to_native()] }),
            Filter::Field { name, predicate } => {
                let mut doc = Map::new();
                doc.insert(format!("{FIELDS_PATH}.{name}"), predicate.to_native());
                Value::Object(doc)
            }
            Filter::Text(search) => search.to_native(),
        }
    }

    /// Native filter restricted to records seen at or after `cutoff`.
    pub fn to_native_with_cutoff(&self, cutoff: SystemTime) -> Value {
        json!({
            "$and": [
                { (LAST_SEEN_PATH): { "$gte": unix_millis(cutoff) } },
                self.to_native(),
            ]
        })
    }
}

impl Predicate {
    fn to_native(&self) -> Value {
        match self {
            Predicate::Eq(l) => json!({ "$eq": l.to_native() }),
            // Absent fields never satisfy `$ne`.
            Predicate::Ne(l) => json!({ "$exists": true, "$ne": l.to_native() }),
            Predicate::Gt(l) => json!({ "$gt": l.to_native() }),
            Predicate::Gte(l) => json!({ "$gte": l.to_native() }),
            Predicate::Lt(l) => json!({ "$lt": l.to_native() }),
            Predicate::Lte(l) => json!({ "$lte": l.to_native() }),
            Predicate::In(items) => {
                json!({ "$in": items.iter().map(Literal::to_native).collect::<Vec<_>>() })
            }
            Predicate::Nin(items) => {
                json!({ "$nin": items.iter().map(Literal::to_native).collect::<Vec<_>>() })
            }
            Predicate::Exists(present) => json!({ "$exists": present }),
            Predicate::Regex(pattern) => json!({ "$regex": pattern.as_str() }),
        }
    }
}

impl TextSearch {
    fn to_native(&self) -> Value {
        if self.field_specific {
            warn!("$fieldSpecific is not supported by the document backend, ignoring");
        }
        match &self.search {
            Some(search) => json!({
                "$text": {
                    "$search": search,
                    "$caseSensitive": self.case_sensitive,
                }
            }),
            None => match_nothing(),
        }
    }
}

impl Literal {
    fn to_native(&self) -> Value {
        match self {
            Literal::Null => Value::Null,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Integer(i) => {
                if let Ok(v) = i64::try_from(*i) {
                    Value::from(v)
                } else if let Ok(v) = u64::try_from(*i) {
                    Value::from(v)
                } else {
                    Number::from_f64(*i as f64).map_or(Value::Null, Value::Number)
                }
            }
            Literal::Float(f) => Number::from_f64(*f).map_or(Value::Null, Value::Number),
            Literal::String(s) => Value::String(s.clone()),
            Literal::Bytes(bytes) => Value::from(bytes.clone()),
        }
    }
}
