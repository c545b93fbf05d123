//! Result and option types for command execution

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ExecError;

/// Result of a command execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    /// Exit status code (0 for success)
    pub status: i32,
    /// stdout output
    pub stdout: String,
    /// stderr output
    pub stderr: String,
    /// Time taken to execute
    pub duration: Duration,
}

impl CommandResult {
    /// Result of a detached dispatch: nothing is known beyond acceptance
    #[must_use]
    pub fn dispatched(duration: Duration) -> Self {
        Self {
            status: 0,
            stdout: String::new(),
            stderr: String::new(),
            duration,
        }
    }

    /// Check if command succeeded (exit code 0)
    #[must_use]
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Turn a non-zero exit into `ExecError::NonZeroExit`
    ///
    /// # Errors
    /// Returns `NonZeroExit` carrying stderr when the status is non-zero.
    pub fn into_success(self) -> Result<Self, ExecError> {
        if self.success() {
            Ok(self)
        } else {
            Err(ExecError::NonZeroExit {
                status: self.status,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Whether the caller waits for the command to finish
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Wait for exit and collect output
    #[default]
    Wait,
    /// Return once the command has been dispatched (fire-and-poll)
    Detach,
}

/// Per-call execution options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub mode: RunMode,
    pub timeout: Option<Duration>,
}

impl RunOptions {
    #[must_use]
    pub fn wait() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn detach() -> Self {
        Self {
            mode: RunMode::Detach,
            timeout: None,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Connection information for SSH
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    /// Host address
    pub host: String,
    /// Port (default 22)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Username
    pub user: String,
    /// Optional SSH key path
    pub ssh_key: Option<String>,
}

fn default_port() -> u16 {
    22
}

impl ConnectionInfo {
    /// Create new connection info
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            user: user.into(),
            ssh_key: None,
        }
    }

    /// Set SSH key path
    #[must_use]
    pub fn with_ssh_key(mut self, path: impl Into<String>) -> Self {
        self.ssh_key = Some(path.into());
        self
    }

    /// Set custom port
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}
