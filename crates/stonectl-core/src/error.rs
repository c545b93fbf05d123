//! Core error types for stonectl-core

use stonectl_api::SpecError;
use stonectl_exec::ExecError;
use thiserror::Error;

/// Errors from the durable key/value store
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// Reading or writing the backing file failed
    #[error("store I/O error: {0}")]
    Io(String),

    /// A stored document could not be decoded
    #[error("corrupt document at {key}: {reason}")]
    Corrupt {
        /// Key of the offending document
        key: String,
        /// Decoder message
        reason: String,
    },

    /// A document could not be encoded
    #[error("failed to encode {key}: {reason}")]
    Encode {
        /// Key being written
        key: String,
        /// Encoder message
        reason: String,
    },
}

/// Errors from resolving a placement
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlacementError {
    /// An explicit placement names a host the inventory does not know
    #[error("cannot place on unknown host {0}")]
    UnknownHost(String),

    /// The spec's placement rule is malformed
    #[error("invalid placement: {0}")]
    Invalid(#[from] SpecError),
}

/// Errors that can occur in core orchestration operations
#[derive(Error, Debug, Clone)]
pub enum CoreError {
    /// Host not found in the inventory
    #[error("host not found: {0}")]
    HostNotFound(String),

    /// Service spec not found
    #[error("service not found: {0}")]
    ServiceNotFound(String),

    /// Daemon not found in the host cache
    #[error("daemon not found: {0}")]
    DaemonNotFound(String),

    /// Service spec failed validation
    #[error("invalid service spec: {0}")]
    InvalidSpec(#[from] SpecError),

    /// Operation refused by a safety guard
    #[error("{0}")]
    Refused(String),

    /// No handler is registered for the service type
    #[error("unsupported service type: {0}")]
    UnsupportedService(String),

    #[error(transparent)]
    Placement(#[from] PlacementError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Remote execution failed
    #[error("execution failed: {0}")]
    Exec(#[from] ExecError),

    /// A cluster control-plane command failed
    #[error("cluster command {prefix} failed ({rc}): {err}")]
    Cluster {
        /// Command prefix
        prefix: String,
        /// Return code
        rc: i32,
        /// Error text
        err: String,
    },

    /// Host agent output could not be parsed
    #[error("unexpected output from {command} on {host}: {reason}")]
    Probe {
        host: String,
        command: String,
        reason: String,
    },

    /// A migration failed; reconciliation is halted until it succeeds
    #[error("migration {from}->{to} failed: {reason}")]
    Migration { from: u32, to: u32, reason: String },
}

impl CoreError {
    /// Remote failure that may clear up by the next tick
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, CoreError::Exec(e) if e.is_retryable())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_transient_errors() {
        let timeout = CoreError::Exec(ExecError::Timeout {
            timeout: Duration::from_secs(5),
        });
        assert!(timeout.is_transient());
        assert!(!CoreError::Exec(ExecError::EmptyCommand).is_transient());
        assert!(!CoreError::Refused("no".into()).is_transient());
    }
}
