//! Identifier types and the crate-wide error taxonomy.

#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Separator between the type name and the local key of a [`NodeId`].
pub const NODE_ID_SEPARATOR: char = ':';

/// Typed global node identifier rendered as `Type:key`.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId(String);

impl NodeId {
    /// Builds an id from a type name and a type-local key.
    pub fn new(type_name: &str, key: &str) -> Result<Self> {
        if type_name.is_empty() || type_name.contains(NODE_ID_SEPARATOR) {
            return Err(StrataError::Contract(format!(
                "invalid node type name '{type_name}'"
            )));
        }
        if key.is_empty() {
            return Err(StrataError::Contract("node key cannot be empty".into()));
        }
        Ok(Self(format!("{type_name}{NODE_ID_SEPARATOR}{key}")))
    }

    /// Parses a rendered `Type:key` id.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.split_once(NODE_ID_SEPARATOR) {
            Some((ty, key)) if !ty.is_empty() && !key.is_empty() => Ok(Self(raw.to_owned())),
            _ => Err(StrataError::Contract(format!("malformed node id '{raw}'"))),
        }
    }

    /// Type name encoded in the id.
    pub fn type_name(&self) -> &str {
        self.0
            .split_once(NODE_ID_SEPARATOR)
            .map(|(ty, _)| ty)
            .unwrap_or(&self.0)
    }

    /// Type-local part of the id.
    pub fn key(&self) -> &str {
        self.0
            .split_once(NODE_ID_SEPARATOR)
            .map(|(_, key)| key)
            .unwrap_or("")
    }

    /// Returns the rendered id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for NodeId {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for NodeId {
    type Error = StrataError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<NodeId> for String {
    fn from(value: NodeId) -> Self {
        value.0
    }
}

/// Edge identity: one edge per type between an ordered pair of endpoints.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct EdgeId {
    /// Edge type name.
    pub edge_type: String,
    /// Node on the `in` end.
    pub in_id: NodeId,
    /// Node on the `out` end.
    pub out_id: NodeId,
}

impl EdgeId {
    /// Builds an edge id.
    pub fn new(edge_type: impl Into<String>, in_id: NodeId, out_id: NodeId) -> Self {
        Self {
            edge_type: edge_type.into(),
            in_id,
            out_id,
        }
    }

    /// Returns `true` when both endpoints are the same node.
    pub fn is_self_loop(&self) -> bool {
        self.in_id == self.out_id
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}->{})", self.edge_type, self.in_id, self.out_id)
    }
}

/// Monotonic version stamped on every node write.
pub type NodeVersion = u64;

/// Errors surfaced by query execution, mutation and storage.
#[derive(Debug, Error)]
pub enum StrataError {
    /// Caller broke an API contract: bad cursor, ambiguous single match, duplicate key.
    #[error("contract violation: {0}")]
    Contract(String),
    /// Optimistic concurrency check failed; the caller may re-read and retry.
    #[error("concurrency violation on {node_id}: {reason}")]
    Concurrency {
        /// Node whose version or edge set moved.
        node_id: String,
        /// Human-readable reason.
        reason: String,
    },
    /// A required identity lookup resolved to nothing.
    #[error("{0} not found")]
    NotFound(String),
    /// Operation is not supported by the addressed query node kind.
    #[error("{operation} is not supported on {kind}")]
    Unsupported {
        /// Rejected operation.
        operation: &'static str,
        /// Kind of node the operation was applied to.
        kind: &'static str,
    },
    /// Storage adapter failure.
    #[error("storage error: {0}")]
    Storage(String),
    /// Entity or cursor payload could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, StrataError>;

impl StrataError {
    /// Builds a [`StrataError::Concurrency`] for a node.
    pub fn concurrency(node_id: impl fmt::Display, reason: impl Into<String>) -> Self {
        StrataError::Concurrency {
            node_id: node_id.to_string(),
            reason: reason.into(),
        }
    }

    /// Builds a [`StrataError::NotFound`] describing the missing entity.
    pub fn not_found(what: impl fmt::Display) -> Self {
        StrataError::NotFound(what.to_string())
    }

    /// Only concurrency failures are worth a caller-driven retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StrataError::Concurrency { .. })
    }

    /// Returns a machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            StrataError::Contract(_) => "ContractViolation",
            StrataError::Concurrency { .. } => "ConcurrencyViolation",
            StrataError::NotFound(_) => "NotFound",
            StrataError::Unsupported { .. } => "UnsupportedCapability",
            StrataError::Storage(_) => "Storage",
            StrataError::Serialization(_) => "Serialization",
            StrataError::Config(_) => "Config",
            StrataError::Io(_) => "Io",
            StrataError::Cancelled => "Cancelled",
        }
    }
}

impl From<toml::de::Error> for StrataError {
    fn from(err: toml::de::Error) -> Self {
        StrataError::Config(err.to_string())
    }
}
