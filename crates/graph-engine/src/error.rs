use std::fmt;

use graph_storage::StorageError;
use graph_wire::WireError;

/// Internal engine error taxonomy. `graph-server`'s dispatcher maps each
/// variant onto the wire `error-type` vocabulary from SPEC_FULL.md §7.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphError {
    Malformed(String),
    UnknownOp(String),
    GraphNotFound(String),
    UniqueConflict { attribute: String, value: String },
    UnknownAttribute(String),
    InvalidTxData(String),
    QueryError(String),
    Storage(String),
    NotFound(String),
    Internal(String),
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphError::Malformed(msg) => write!(f, "malformed: {msg}"),
            GraphError::UnknownOp(op) => write!(f, "unknown-op: {op}"),
            GraphError::GraphNotFound(id) => write!(f, "graph-not-found: {id}"),
            GraphError::UniqueConflict { attribute, value } => write!(
                f,
                "unique constraint violated for {attribute} = {value}"
            ),
            GraphError::UnknownAttribute(attr) => write!(f, "unknown attribute: {attr}"),
            GraphError::InvalidTxData(msg) => write!(f, "invalid tx-data: {msg}"),
            GraphError::QueryError(msg) => write!(f, "query error: {msg}"),
            GraphError::Storage(msg) => write!(f, "storage-error: {msg}"),
            GraphError::NotFound(what) => write!(f, "not found: {what}"),
            GraphError::Internal(msg) => write!(f, "internal-error: {msg}"),
        }
    }
}

impl std::error::Error for GraphError {}

impl From<StorageError> for GraphError {
    fn from(value: StorageError) -> Self {
        GraphError::Storage(value.to_string())
    }
}

impl From<WireError> for GraphError {
    fn from(value: WireError) -> Self {
        GraphError::Malformed(value.to_string())
    }
}
