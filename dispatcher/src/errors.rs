//! Error types
//!
//! Fatal errors (configuration, authentication) abort the process at
//! startup; everything that happens while a run is in flight is reported
//! through status frames and the log instead, so the per-run error kinds
//! here never cross a task boundary.

use thiserror::Error;

/// Process-level error type.
///
/// `Config` and `Auth` are fatal at startup and surface to the CLI with a
/// descriptive message. `Transport` terminates the serve loop. Nothing in
/// this enum is ever retried.
#[derive(Debug, Error)]
pub enum DispatcherError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Per-request argument validation failure.
///
/// Raised by the param schema when a run request carries a bad argument
/// set. Never fatal: the router answers with an error status frame and the
/// child process is not spawned.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArgError {
    #[error("mandatory argument {0} not passed")]
    Missing(String),

    #[error("unexpected argument {0} passed")]
    Unexpected(String),

    #[error("argument {0} has an invalid value")]
    BadType(String),
}
