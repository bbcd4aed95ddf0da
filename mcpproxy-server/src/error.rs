//! Server error types

use std::path::PathBuf;
use thiserror::Error;

/// Result type for server operations
pub type ServerResult<T> = Result<T, ServerError>;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    /// Configuration rejected at boot; exits with code 2
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Filesystem permissions cannot be satisfied; exits with code 5
    #[error("Permission error on {path}: {message}")]
    Permission { path: PathBuf, message: String },

    /// The listen address is taken. Recoverable by probing nearby ports.
    #[error("Address in use: {addr}")]
    AddrInUse { addr: String },

    /// Listener or socket I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything else that should stop startup
    #[error("{0}")]
    Internal(String),
}

impl ServerError {
    /// The process exit code this error maps to
    pub fn exit_code(&self) -> i32 {
        match self {
            ServerError::Config { .. } => crate::EXIT_BAD_CONFIG,
            ServerError::Permission { .. } => crate::EXIT_PERMISSION,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let config = ServerError::Config {
            message: "bad".to_string(),
        };
        assert_eq!(config.exit_code(), 2);

        let permission = ServerError::Permission {
            path: PathBuf::from("/tmp/x"),
            message: "not ours".to_string(),
        };
        assert_eq!(permission.exit_code(), 5);

        let other = ServerError::Internal("boom".to_string());
        assert_eq!(other.exit_code(), 1);
    }
}
