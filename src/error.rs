//! Error types for the streaming engine.

use std::io;
use thiserror::Error;

/// Errors from the storage layer (append-only record log).
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[cfg(feature = "csv")]
    #[error("csv error: {0}")]
    Csv(String),

    #[error("in-memory storage does not support a seal marker")]
    NoSealMarker,

    #[error("schema mismatch: record keys do not match the first appended record")]
    SchemaMismatch,
}

/// Errors from stream resolution, creation, and I/O.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("unknown protocol: {0}")]
    UnknownProtocol(String),

    #[error("memory streams cannot be resolved to a path; they are not recoverable")]
    MemoryNotRecoverable,

    #[error("stream already opened on this side: {0}")]
    AlreadyOpened(String),

    #[error("invalid uri: {0}")]
    InvalidUri(String),
}

/// Errors surfaced by a user-supplied operator.
#[derive(Debug, Error)]
pub enum OperatorError {
    #[error("{message}")]
    Failed { message: String },
}

impl OperatorError {
    pub fn new(message: impl Into<String>) -> Self {
        OperatorError::Failed {
            message: message.into(),
        }
    }
}

/// Errors from running a single node.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("node canceled")]
    Cancelled,

    #[error("stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("operator error: {0}")]
    Operator(#[from] OperatorError),

    #[error("node is not bound to input/output streams")]
    NotBound,
}

/// Errors from pipeline planning, execution, and resume.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("welding conflict between {upstream} and {downstream}: {reason}")]
    WeldConflict {
        upstream: String,
        downstream: String,
        reason: String,
    },

    #[error("node {node_id} failed: {source}")]
    NodeFailed {
        node_id: String,
        #[source]
        source: NodeError,
    },

    #[error("pipeline canceled")]
    Canceled,

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
