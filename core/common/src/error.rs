//! Common error types for backsync.

use thiserror::Error;

/// Top-level error type for backsync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Backend configuration is malformed or incomplete.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A storage name could not be resolved through the registry.
    #[error("Storage not found: {0}")]
    Lookup(String),

    /// A different storage instance is already registered under this name.
    #[error("Duplicate storage name: {0}")]
    DuplicateName(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Copying bytes between backends failed.
    #[error("Transfer error: {0}")]
    Transfer(String),

    /// Object store request failed for a reason other than "not found".
    #[error("Object store error: {0}")]
    ObjectStore(String),

    /// The run cannot continue.
    #[error("Fatal run error: {0}")]
    Fatal(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error is an explicit "not found" signal.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Io(err) => err.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
