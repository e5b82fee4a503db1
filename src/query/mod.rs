//! Filter documents.
//!
//! Queries arrive as MongoDB-style JSON documents.  They are parsed once
//! into a [`Filter`] tree which is then either evaluated against records
//! held in memory ([`eval`]) or translated into a document-database
//! filter ([`native`]).
//!
//! Grammar, informally:
//!
//! * `{"field": literal}` is shorthand for `{"field": {"$eq": literal}}`.
//! * `{"field": {"$op": operand, ...}}` applies every operator to the field.
//! * `{"$and": [...]}`, `{"$or": [...]}` and `{"$not": {...}}` combine nodes.
//! * A field whose value is an object without operators is a plain hop:
//!   its keys are read as field names in turn.
//! * Several keys in one object form an implicit conjunction.

use log::warn;
use regex::Regex;
use serde_json::{Map, Value};

use crate::error::FilterError;

pub mod eval;
pub mod native;

/// A literal operand taken from the filter document.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Integer(i128),
    Float(f64),
    String(String),
    /// A JSON array of byte values, compared against Buffer fields.
    Bytes(Vec<u8>),
}

impl Literal {
    fn parse(op: &str, value: &Value) -> Result<Self, FilterError> {
        Ok(match value {
            Value::Null => Literal::Null,
            Value::Bool(b) => Literal::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Literal::Integer(i.into())
                } else if let Some(u) = n.as_u64() {
                    Literal::Integer(u.into())
                } else {
                    Literal::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(s) => Literal::String(s.clone()),
            Value::Array(items) => Literal::Bytes(
                items
                    .iter()
                    .map(|item| {
                        item.as_u64()
                            .and_then(|b| u8::try_from(b).ok())
                            .ok_or_else(|| invalid(op, "arrays must hold byte values"))
                    })
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(_) => return Err(invalid(op, "objects are not comparable")),
        })
    }
}

/// A compiled `$regex` operand.
#[derive(Debug, Clone)]
pub struct Pattern {
    pub regex: Regex,
}

impl Pattern {
    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }
}

/// A `$text` search.
#[derive(Debug, Clone, PartialEq)]
pub struct TextSearch {
    /// Field the operator was nested under, if any.
    pub field: Option<String>,
    /// Search terms.  `None` when `$search` was missing, which matches
    /// nothing.
    pub search: Option<String>,
    pub case_sensitive: bool,
    /// Restrict the search to `field` instead of every String field.
    pub field_specific: bool,
}

/// Operator applied to a single field.
#[derive(Debug, Clone)]
pub enum Predicate {
    Eq(Literal),
    Ne(Literal),
    Gt(Literal),
    Gte(Literal),
    Lt(Literal),
    Lte(Literal),
    In(Vec<Literal>),
    Nin(Vec<Literal>),
    Exists(bool),
    Regex(Pattern),
}

/// Parsed filter tree.
#[derive(Debug, Clone)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Field { name: String, predicate: Predicate },
    Text(TextSearch),
}

impl Filter {
    /// Parses filter text as sent in a `Query` message.
    pub fn parse(text: &str) -> Result<Self, FilterError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self, FilterError> {
        match value {
            Value::Object(map) => parse_node(map),
            _ => Err(FilterError::NotAnObject),
        }
    }

    /// A filter that matches every record.
    #[cfg(test)]
    pub fn all() -> Self {
        Filter::And(Vec::new())
    }
}

fn invalid(op: &str, reason: &str) -> FilterError {
    FilterError::InvalidOperand {
        op: op.to_string(),
        reason: reason.to_string(),
    }
}

fn conjunction(mut children: Vec<Filter>) -> Filter {
    if children.len() == 1 {
        children.remove(0)
    } else {
        Filter::And(children)
    }
}

fn parse_node(map: &Map<String, Value>) -> Result<Filter, FilterError> {
    let mut children = Vec::with_capacity(map.len());

    for (key, value) in map {
        let child = match key.as_str() {
            "$and" | "$or" => {
                let items = value
                    .as_array()
                    .ok_or_else(|| invalid(key, "expected an array of filters"))?;
                let nodes = items
                    .iter()
                    .map(|item| match item {
                        Value::Object(inner) => parse_node(inner),
                        _ => Err(invalid(key, "expected an array of filters")),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                if key == "$and" {
                    Filter::And(nodes)
                } else {
                    Filter::Or(nodes)
                }
            }
            "$not" => match value {
                Value::Object(inner) => Filter::Not(Box::new(parse_node(inner)?)),
                _ => return Err(invalid(key, "expected a filter")),
            },
            "$text" => Filter::Text(parse_text(None, value)?),
            op if op.starts_with('$') => return Err(FilterError::UnknownOperator(op.into())),
            field => parse_field(field, value)?,
        };
        children.push(child);
    }

    Ok(conjunction(children))
}

fn parse_field(name: &str, value: &Value) -> Result<Filter, FilterError> {
    let operators = match value {
        Value::Object(map) => map,
        literal => {
            return Ok(Filter::Field {
                name: name.to_string(),
                predicate: Predicate::Eq(Literal::parse("$eq", literal)?),
            })
        }
    };

    let mut children = Vec::with_capacity(operators.len());
    for (key, operand) in operators {
        if !key.starts_with('$') {
            // Plain hop: the nested key names the field.
            children.push(parse_field(key, operand)?);
            continue;
        }
        if let Some(filter) = parse_operator(name, key, operand, operators)? {
            children.push(filter);
        }
    }

    Ok(conjunction(children))
}

fn parse_operator(
    name: &str,
    op: &str,
    operand: &Value,
    siblings: &Map<String, Value>,
) -> Result<Option<Filter>, FilterError> {
    let field = |predicate| Filter::Field {
        name: name.to_string(),
        predicate,
    };

    let filter = match op {
        "$eq" => field(Predicate::Eq(Literal::parse(op, operand)?)),
        "$ne" => field(Predicate::Ne(Literal::parse(op, operand)?)),
        "$gt" => field(Predicate::Gt(Literal::parse(op, operand)?)),
        "$gte" => field(Predicate::Gte(Literal::parse(op, operand)?)),
        "$lt" => field(Predicate::Lt(Literal::parse(op, operand)?)),
        "$lte" => field(Predicate::Lte(Literal::parse(op, operand)?)),
        "$in" | "$nin" => {
            let items = operand
                .as_array()
                .ok_or_else(|| invalid(op, "expected an array"))?
                .iter()
                .map(|item| Literal::parse(op, item))
                .collect::<Result<Vec<_>, _>>()?;
            if op == "$in" {
                field(Predicate::In(items))
            } else {
                field(Predicate::Nin(items))
            }
        }
        "$exists" => {
            let present = match operand {
                Value::Bool(b) => *b,
                Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
                _ => return Err(invalid(op, "expected a boolean")),
            };
            field(Predicate::Exists(present))
        }
        "$regex" => {
            let source = operand
                .as_str()
                .ok_or_else(|| invalid(op, "expected a pattern string"))?;
            if siblings.contains_key("$options") {
                warn!("$options is not yet supported on $regex, ignoring");
            }
            field(Predicate::Regex(Pattern {
                regex: Regex::new(source)?,
            }))
        }
        "$options" if siblings.contains_key("$regex") => return Ok(None),
        "$text" => Filter::Text(parse_text(Some(name), operand)?),
        "$not" => match operand {
            Value::Object(_) => Filter::Not(Box::new(parse_field(name, operand)?)),
            _ => return Err(invalid(op, "expected an operator object")),
        },
        other => return Err(FilterError::UnknownOperator(other.into())),
    };

    Ok(Some(filter))
}

fn parse_text(field: Option<&str>, operand: &Value) -> Result<TextSearch, FilterError> {
    let options = operand
        .as_object()
        .ok_or_else(|| invalid("$text", "expected an options object"))?;

    if options.contains_key("$language") {
        warn!("$language is not yet supported on $text, ignoring");
    }
    if options.contains_key("$diacriticSensitive") {
        warn!("$diacriticSensitive is not yet supported on $text, ignoring");
    }

    let search = match options.get("$search") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => return Err(invalid("$search", "expected a string")),
        None => {
            warn!("$search property is required on $text");
            None
        }
    };

    let flag = |key: &str| -> Result<bool, FilterError> {
        match options.get(key) {
            None => Ok(false),
            Some(Value::Bool(b)) => Ok(*b),
            Some(_) => Err(invalid(key, "expected a boolean")),
        }
    };

    Ok(TextSearch {
        field: field.map(str::to_string),
        search,
        case_sensitive: flag("$caseSensitive")?,
        field_specific: flag("$fieldSpecific")?,
    })
}
