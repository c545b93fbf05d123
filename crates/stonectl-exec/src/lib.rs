//! stonectl-exec: Command execution on managed hosts
//!
//! Provides the host-addressed `CommandExecutor` used by the reconciliation
//! core, and the per-host `RemoteExecutor` implementations it routes to
//! (local processes and SSH).

pub mod error;
pub mod local;
pub mod pool;
pub mod result;
pub mod ssh;
pub mod traits;

pub use error::ExecError;
pub use local::LocalExecutor;
pub use pool::{DefaultExecutorFactory, ExecutorFactory, HostExecutorPool};
pub use result::{CommandResult, ConnectionInfo, RunMode, RunOptions};
pub use ssh::SshExecutor;
pub use traits::{CommandExecutor, RemoteExecutor};
