//! Error types for the sidechain node
//!
//! All fallible node, store and operator operations return `Result<T, Error>`.
//! Contract-level failures never surface here: they are recorded in the
//! transaction logs and the block still commits.

use thiserror::Error;

/// Node error types
#[derive(Debug, Error)]
pub enum Error {
    /// Syntax violation in contract source
    #[error("Parse error at {line}:{column}: {message}")]
    Parse {
        line: usize,
        column: usize,
        message: String,
    },

    /// Contract source parsed but failed static verification
    #[error("Verification error: {0}")]
    Verification(String),

    /// Ledger store rejected or could not perform an operation
    #[error("Store error: {0}")]
    Store(String),

    /// Block linkage or ordering violation
    #[error("Chain error: {0}")]
    Chain(String),

    /// Failure outside of a sandboxed transaction (e.g. a worker task died)
    #[error("Execution error: {0}")]
    Execution(String),

    /// Invalid or missing configuration
    #[error("Config error: {0}")]
    Config(String),

    /// Message transport failure
    #[error("IPC error: {0}")]
    Ipc(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn store(msg: impl Into<String>) -> Self {
        Error::Store(msg.into())
    }

    pub fn chain(msg: impl Into<String>) -> Self {
        Error::Chain(msg.into())
    }
}

/// Result type alias for node operations
pub type Result<T> = std::result::Result<T, Error>;
