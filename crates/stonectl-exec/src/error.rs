//! Error types for stonectl-exec

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur running a command on a host
#[derive(Error, Debug, Clone)]
pub enum ExecError {
    /// The host could not be reached
    #[error("host {host} unreachable: {reason}")]
    Unreachable { host: String, reason: String },

    /// Credentials were rejected or could not be loaded
    #[error("authentication to {host} failed: {reason}")]
    Auth { host: String, reason: String },

    /// Command ran but exited non-zero where success was required
    #[error("command exited with {status}: {stderr}")]
    NonZeroExit {
        /// Exit status code
        status: i32,
        /// Stderr output
        stderr: String,
    },

    /// Command timed out
    #[error("command timed out after {timeout:?}")]
    Timeout {
        /// Timeout duration that was exceeded
        timeout: Duration,
    },

    /// Spawning the process or talking over the channel failed
    #[error("I/O error: {0}")]
    Io(String),

    /// No executor is registered for the host
    #[error("no executor registered for host {0}")]
    UnknownHost(String),

    #[error("empty command")]
    EmptyCommand,

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    ConfigError(String),
}

impl ExecError {
    /// Transient failures: the host is treated as unreachable for this tick
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExecError::Unreachable { .. } | ExecError::Timeout { .. } | ExecError::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        let unreachable = ExecError::Unreachable {
            host: "node1".to_string(),
            reason: "connection refused".to_string(),
        };
        assert!(unreachable.is_retryable());
        assert_eq!(
            unreachable.to_string(),
            "host node1 unreachable: connection refused"
        );
        assert!(!ExecError::UnknownHost("node1".to_string()).is_retryable());
        assert!(
            !ExecError::NonZeroExit {
                status: 1,
                stderr: String::new()
            }
            .is_retryable()
        );
    }
}
