//! Error types for the transfer engine

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransferError>;

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("missing chunk {0}")]
    MissingChunk(u64),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TransferError {
    /// Stable machine-readable code for API error bodies
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::Validation(_) => "validation",
            TransferError::SessionNotFound(_) => "session_not_found",
            TransferError::FileNotFound(_) => "file_not_found",
            TransferError::MissingChunk(_) => "missing_chunk",
            TransferError::Conflict(_) => "conflict",
            TransferError::InvalidPath(_) => "invalid_path",
            TransferError::Io(_) => "io_error",
            TransferError::Serialization(_) => "serialization",
        }
    }
}
