//! Local command execution using `tokio::process`

use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, error, instrument, warn};

use crate::error::ExecError;
use crate::result::{CommandResult, RunMode, RunOptions};
use crate::traits::RemoteExecutor;

/// Local command executor
///
/// Runs argv directly (no shell), so arguments never need quoting.
#[derive(Debug, Clone, Default)]
pub struct LocalExecutor;

impl LocalExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn command(argv: &[String]) -> Result<Command, ExecError> {
        let (program, args) = argv.split_first().ok_or(ExecError::EmptyCommand)?;
        let mut cmd = Command::new(program);
        cmd.args(args);
        Ok(cmd)
    }

    async fn execute(&self, argv: &[String]) -> Result<CommandResult, ExecError> {
        let start = Instant::now();

        let child = Self::command(argv)?
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecError::Io(e.to_string()))?;

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ExecError::Io(e.to_string()))?;

        let duration = start.elapsed();
        let status = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        debug!(status, duration = ?duration, "command completed");

        if !output.status.success() {
            error!(status, stderr = %stderr.trim(), "command failed");
        }

        Ok(CommandResult {
            status,
            stdout,
            stderr,
            duration,
        })
    }

    fn dispatch(&self, argv: &[String]) -> Result<CommandResult, ExecError> {
        let start = Instant::now();
        let mut child = Self::command(argv)?
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| ExecError::Io(e.to_string()))?;

        let program = argv[0].clone();
        // Reap the child in the background; its outcome is observed later
        // through host refreshes.
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => {
                    debug!(program = %program, "detached command finished");
                }
                Ok(status) => {
                    warn!(program = %program, status = ?status.code(), "detached command failed");
                }
                Err(e) => warn!(program = %program, error = %e, "failed to reap detached command"),
            }
        });

        Ok(CommandResult::dispatched(start.elapsed()))
    }
}

#[async_trait]
impl RemoteExecutor for LocalExecutor {
    #[instrument(skip(self, opts), level = "debug")]
    async fn run(&self, argv: &[String], opts: RunOptions) -> Result<CommandResult, ExecError> {
        if opts.mode == RunMode::Detach {
            return self.dispatch(argv);
        }

        let Some(limit) = opts.timeout else {
            return self.execute(argv).await;
        };

        match timeout(limit, self.execute(argv)).await {
            Ok(result) => result,
            Err(_) => {
                error!(timeout = ?limit, "command timed out");
                Err(ExecError::Timeout { timeout: limit })
            }
        }
    }

    fn executor_type(&self) -> &'static str {
        "local"
    }
}
