// Measurement records and the name filter applied to them.

use serde::{Deserialize, Serialize};

/// The scalar value domain shared by measurements, profile stores and
/// display snapshots. Serialized untagged so the wire shape is the bare
/// JSON scalar. "Absent" is modeled as a missing key or `None`, never as a
/// null placeholder.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

/// One measurement from the upstream metrics feed.
///
/// A zero timestamp and an empty name mean the field was absent upstream;
/// such fields are omitted from the sandbox projection entirely.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// Predicate over measurement names, owned by a profile definition.
///
/// An empty name set accepts every message. A profile posted without a
/// filter therefore sees all traffic instead of being silently dead, which
/// mirrors how the server itself subscribes upstream with no filter.
/// Replaced wholesale on profile update, never mutated in place.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterDefinition {
    #[serde(default)]
    pub names: Vec<String>,
}

impl FilterDefinition {
    pub fn accepts(&self, name: &str) -> bool {
        self.names.is_empty() || self.names.iter().any(|n| n == name)
    }
}
