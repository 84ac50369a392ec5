//! Hashable decision values for consensus voting.
//!
//! Task payloads stay opaque end to end; the consensus engine is the one
//! place the core compares values for equality and order. [`Decision`]
//! restricts those values to a small hashable variant with a total order,
//! which is what makes tally maps and lexicographic tie-breaks well-defined.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A hashable, totally ordered value an agent can vote for.
///
/// The derived order (integers < text < maps, each compared within the
/// variant) is the "lexicographic" order the tie-break rules refer to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Decision {
    /// Integer decision.
    Int(i64),
    /// Text decision; ties compare lexicographically.
    Text(String),
    /// Structured decision; compared field-wise in key order.
    Map(BTreeMap<String, Decision>),
}

impl Decision {
    /// Coerce an opaque JSON payload into a decision for discrete voting.
    ///
    /// Integers and strings map directly; floats, booleans, arrays, and
    /// null are folded into text so that equal payloads still collide in
    /// the tally; objects become structured decisions.
    pub fn from_value(value: &serde_json::Value) -> Decision {
        match value {
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Decision::Int(i)
                } else {
                    Decision::Text(n.to_string())
                }
            }
            serde_json::Value::String(s) => Decision::Text(s.clone()),
            serde_json::Value::Bool(b) => Decision::Text(b.to_string()),
            serde_json::Value::Null => Decision::Text(String::new()),
            serde_json::Value::Array(items) => Decision::Text(
                serde_json::to_string(items).unwrap_or_default(),
            ),
            serde_json::Value::Object(fields) => Decision::Map(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), Decision::from_value(v)))
                    .collect(),
            ),
        }
    }

    /// Render back into an opaque JSON payload.
    pub fn to_value(&self) -> serde_json::Value {
        match self {
            Decision::Int(i) => serde_json::Value::from(*i),
            Decision::Text(s) => serde_json::Value::from(s.clone()),
            Decision::Map(fields) => serde_json::Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_value()))
                    .collect(),
            ),
        }
    }
}

impl From<i64> for Decision {
    fn from(i: i64) -> Self {
        Decision::Int(i)
    }
}

impl From<&str> for Decision {
    fn from(s: &str) -> Self {
        Decision::Text(s.to_string())
    }
}

impl From<String> for Decision {
    fn from(s: String) -> Self {
        Decision::Text(s)
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Int(i) => write!(f, "{i}"),
            Decision::Text(s) => f.write_str(s),
            Decision::Map(_) => write!(f, "{}", self.to_value()),
        }
    }
}
