//! Typed request payloads.
//!
//! Incoming documents are converted into `Payload` before validation so rule
//! matching is an exhaustive match over known shapes instead of reflection.

use std::collections::BTreeMap;
use std::ops::Deref;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A field value of an untyped request payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    List(Vec<Payload>),
    /// Sorted by key, which fixes the validation traversal order.
    Map(BTreeMap<String, Payload>),
}

impl Payload {
    /// Build a map payload from `(key, value)` pairs.
    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Payload)>,
    {
        Payload::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Convenience constructor for string leaves.
    pub fn string(s: impl Into<String>) -> Self {
        Payload::String(s.into())
    }

    /// Convert back into a JSON document.
    pub fn to_json(&self) -> Value {
        match self {
            Payload::Null => Value::Null,
            Payload::Bool(b) => Value::Bool(*b),
            Payload::Number(n) => Value::Number(n.clone()),
            Payload::String(s) => Value::String(s.clone()),
            Payload::List(items) => Value::Array(items.iter().map(Payload::to_json).collect()),
            Payload::Map(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl From<&Value> for Payload {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Payload::Null,
            Value::Bool(b) => Payload::Bool(*b),
            Value::Number(n) => Payload::Number(n.clone()),
            Value::String(s) => Payload::String(s.clone()),
            Value::Array(items) => Payload::List(items.iter().map(Payload::from).collect()),
            Value::Object(fields) => Payload::Map(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), Payload::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::from(&value)
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::String(s.to_string())
    }
}

/// A payload that passed validation unchanged.
///
/// Only the validator can construct one.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanPayload(Payload);

impl CleanPayload {
    pub(crate) fn new(payload: Payload) -> Self {
        Self(payload)
    }

    pub fn into_inner(self) -> Payload {
        self.0
    }
}

impl Deref for CleanPayload {
    type Target = Payload;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
