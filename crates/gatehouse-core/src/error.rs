//! Error types for gatehouse-core

use thiserror::Error;

/// Result type alias using gatehouse-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in gatehouse-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Blob store error
    #[error("Store error: {0}")]
    Store(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
