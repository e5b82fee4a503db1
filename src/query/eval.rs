//! In-memory evaluation of a [`Filter`] against a record's fields.
//!
//! Absence is never a match: every field operator evaluates to `false`
//! on a missing field except `$nin` and `$exists: false`.  Operators that
//! cannot be applied to the stored type (ordering a string, matching a
//! regex against an integer) also evaluate to `false` rather than failing
//! the query.

use std::cmp::Ordering;

use log::debug;
use uuid::Uuid;

use super::{Filter, Literal, Predicate, TextSearch};
use crate::contract::Contract;
use crate::types::{FieldMap, FieldValue};

/// Tolerance for comparing integers against floating point operands.
pub const FLOAT_EPSILON: f64 = 1e-4;

impl Filter {
    /// True if `fields` satisfies the filter.  `contract` supplies the
    /// String fields searched by `$text`.
    pub fn matches(&self, fields: &FieldMap, contract: &Contract) -> bool {
        match self {
            Filter::And(children) => children.iter().all(|c| c.matches(fields, contract)),
            Filter::Or(children) => children.iter().any(|c| c.matches(fields, contract)),
            Filter::Not(child) => !child.matches(fields, contract),
            Filter::Field { name, predicate } => predicate.test(name, fields.get(name)),
            Filter::Text(search) => search.test(fields, contract),
        }
    }
}

impl Predicate {
    fn test(&self, name: &str, value: Option<&FieldValue>) -> bool {
        let Some(value) = value else {
            return match self {
                Predicate::Nin(_) => true,
                Predicate::Exists(present) => !present,
                _ => false,
            };
        };

        match self {
            Predicate::Eq(literal) => equals(value, literal),
            Predicate::Ne(literal) => !equals(value, literal),
            Predicate::Gt(literal) => ordered(name, value, literal, Ordering::is_gt),
            Predicate::Gte(literal) => ordered(name, value, literal, Ordering::is_ge),
            Predicate::Lt(literal) => ordered(name, value, literal, Ordering::is_lt),
            Predicate::Lte(literal) => ordered(name, value, literal, Ordering::is_le),
            Predicate::In(items) => match items.first() {
                Some(first) if comparable(value, first) => {
                    items.iter().any(|item| equals(value, item))
                }
                _ => false,
            },
            Predicate::Nin(items) => match items.first() {
                None => true,
                Some(first) if comparable(value, first) => {
                    !items.iter().any(|item| equals(value, item))
                }
                Some(_) => false,
            },
            Predicate::Exists(present) => *present,
            Predicate::Regex(pattern) => value.as_str().is_some_and(|s| pattern.regex.is_match(s)),
        }
    }
}

impl TextSearch {
    fn test(&self, fields: &FieldMap, contract: &Contract) -> bool {
        let Some(search) = self.search.as_deref() else {
            return false;
        };

        let only = match (&self.field, self.field_specific) {
            (Some(field), true) => Some(field.as_str()),
            _ => None,
        };

        let words: Vec<&str> = contract
            .text_fields()
            .filter(|name| only.map_or(true, |field| field == *name))
            .filter_map(|name| fields.get(name).and_then(FieldValue::as_str))
            .flat_map(str::split_whitespace)
            .collect();

        search.split_whitespace().any(|term| {
            words.iter().any(|word| {
                if self.case_sensitive {
                    term == *word
                } else {
                    term.to_lowercase() == word.to_lowercase()
                }
            })
        })
    }
}

/// Whether `literal` is the same kind of value as `value`.
fn comparable(value: &FieldValue, literal: &Literal) -> bool {
    match (value, literal) {
        (FieldValue::String(_), Literal::String(_)) => true,
        (FieldValue::Guid(_), Literal::String(_)) => true,
        (FieldValue::Buffer(_), Literal::Bytes(_)) => true,
        (v, Literal::Integer(_) | Literal::Float(_)) => v.as_integer().is_some(),
        _ => false,
    }
}

fn equals(value: &FieldValue, literal: &Literal) -> bool {
    match (value, literal) {
        (FieldValue::String(s), Literal::String(t)) => s == t,
        (FieldValue::Guid(g), Literal::String(t)) => Uuid::parse_str(t).is_ok_and(|u| u == *g),
        (FieldValue::Buffer(b), Literal::Bytes(c)) => b == c,
        (v, Literal::Integer(i)) => v.as_integer() == Some(*i),
        (v, Literal::Float(f)) => v
            .as_integer()
            .is_some_and(|i| (i as f64 - f).abs() < FLOAT_EPSILON),
        _ => false,
    }
}

fn ordered(name: &str, value: &FieldValue, literal: &Literal, accept: fn(Ordering) -> bool) -> bool {
    let ordering = match (value.as_integer(), literal) {
        (Some(i), Literal::Integer(j)) => Some(i.cmp(j)),
        (Some(i), Literal::Float(f)) => (i as f64).partial_cmp(f),
        _ => None,
    };

    match ordering {
        Some(ordering) => accept(ordering),
        None => {
            debug!(
                "cannot order field {} of type {} against {:?}",
                name,
                value.contract_type(),
                literal
            );
            false
        }
    }
}
