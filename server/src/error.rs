//! Error types for the replicated store and connection handling

use shared::{ClientId, FrameError};
use thiserror::Error;

/// Rejections from [`crate::store::VariableStore`]. A failed operation has
/// no side effects.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("variable {0} already exists")]
    DuplicateKey(String),

    #[error("variable {0} does not exist")]
    UnknownKey(String),

    #[error("invalid field {field} on {key}: {reason}")]
    InvalidField {
        key: String,
        field: String,
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("connection to client {0} lost")]
    ConnectionLost(ClientId),

    #[error("malformed message from client {client_id}: {reason}")]
    MalformedMessage { client_id: ClientId, reason: String },

    #[error("server is full ({0} clients)")]
    ServerFull(usize),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ServerError>;
