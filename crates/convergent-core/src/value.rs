//! Tagged scalar values and their canonical encoding.
//!
//! `Value` is the payload of `SetField`, `AddToSet` and `RemoveFromSet`. It
//! is a closed sum type (not an open `serde_json::Value`) so that malformed
//! payloads can be rejected with a typed error instead of silently
//! coercing.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use thiserror::Error;

/// A tagged scalar, the payload carried by set/add/remove operations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Struct(BTreeMap<String, Value>),
}

/// Decoding a `Value` from an untyped payload failed.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("malformed value: {0}")]
pub struct MalformedValue(pub String);

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    pub fn int(n: i64) -> Self {
        Value::Int(n)
    }

    pub fn float(f: f64) -> Self {
        Value::Float(f)
    }

    pub fn bool(b: bool) -> Self {
        Value::Bool(b)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    fn tag_name(&self) -> &'static str {
        match self {
            Value::String(_) => "String",
            Value::Int(_) => "Int",
            Value::Float(_) => "Float",
            Value::Bool(_) => "Bool",
            Value::Struct(_) => "Struct",
        }
    }

    /// Canonical, tag-sorted byte encoding. Used for stable hashing and as
    /// an `Ord` surrogate since floats don't implement a total order on
    /// their own.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(self.tag_name().len() as u8);
        out.extend_from_slice(self.tag_name().as_bytes());
        match self {
            Value::String(s) => {
                out.extend_from_slice(&(s.len() as u64).to_be_bytes());
                out.extend_from_slice(s.as_bytes());
            }
            Value::Int(n) => out.extend_from_slice(&n.to_be_bytes()),
            Value::Float(f) => out.extend_from_slice(&f.to_be_bytes()),
            Value::Bool(b) => out.push(*b as u8),
            Value::Struct(fields) => {
                // BTreeMap already iterates in key order.
                for (k, v) in fields {
                    out.extend_from_slice(&(k.len() as u64).to_be_bytes());
                    out.extend_from_slice(k.as_bytes());
                    out.extend_from_slice(&v.canonical_bytes());
                }
            }
        }
        out
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.tag_name(), self.canonical_bytes()).cmp(&(other.tag_name(), other.canonical_bytes()))
    }
}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.canonical_bytes().hash(state);
    }
}
