//! Executor traits

use async_trait::async_trait;

use crate::error::ExecError;
use crate::result::{CommandResult, RunOptions};

/// Runs commands on one particular host
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run `argv` (no shell interpretation on the local side)
    async fn run(&self, argv: &[String], opts: RunOptions) -> Result<CommandResult, ExecError>;

    fn executor_type(&self) -> &'static str;

    /// Release any connection held to the host
    async fn close(&self) {}
}

/// Runs commands on any managed host, addressed by hostname
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(
        &self,
        host: &str,
        argv: &[String],
        opts: RunOptions,
    ) -> Result<CommandResult, ExecError>;

    /// Tell the executor how to reach a newly added host
    async fn register_host(&self, _hostname: &str, _addr: &str) -> Result<(), ExecError> {
        Ok(())
    }

    /// Drop any connection state kept for a removed host
    async fn forget_host(&self, _hostname: &str) {}
}
