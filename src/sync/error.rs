//! Error definitions for the synchronization core

use thiserror::Error;

use super::state_store::{Field, ValueKind};

/// Reasons a payload could not be turned into a typed value.
///
/// Decode errors never leave the router: the message is logged and dropped
/// and every field keeps its previous value.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Payload body was empty or whitespace only
    #[error("empty payload")]
    Empty,

    /// Payload bytes are not valid UTF-8
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// Payload is neither JSON nor one of the accepted bare literals
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// JSON object did not contain the key this topic expects
    #[error("missing key `{0}`")]
    MissingKey(String),

    /// Key was present but held a value of the wrong type
    #[error("key `{key}` is not a {expected}")]
    UnexpectedType { key: String, expected: &'static str },

    /// Top-level JSON value has a shape this topic does not accept
    #[error("unexpected payload shape: expected {0}")]
    UnexpectedShape(&'static str),

    /// Camera image was not valid base64
    #[error("invalid base64 image: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
}

/// Error types for store, router and engine operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// A value of the wrong kind was written to a field
    #[error("field {field} holds {expected} values, got {actual}")]
    FieldType {
        field: Field,
        expected: ValueKind,
        actual: ValueKind,
    },

    /// Decoded value does not fit the handler it was routed to
    #[error("handler for {topic} cannot use this value: {reason}")]
    HandlerMismatch { topic: String, reason: String },

    /// Topic table contained the same topic twice
    #[error("topic registered twice: {0}")]
    DuplicateTopic(String),

    /// Engine task failed or panicked
    #[error("engine task error: {0}")]
    ThreadError(String),

    /// Engine could not be configured from the given topic table
    #[error("initialization error: {0}")]
    InitializationError(String),
}
