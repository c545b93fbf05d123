//! Host-addressed executor pool

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::ExecError;
use crate::local::LocalExecutor;
use crate::result::{CommandResult, ConnectionInfo, RunOptions};
use crate::ssh::SshExecutor;
use crate::traits::{CommandExecutor, RemoteExecutor};

/// Builds the per-host executor for an address
pub trait ExecutorFactory: Send + Sync {
    /// # Errors
    /// Returns `ExecError::ConfigError` when the host cannot be reached with
    /// the configured credentials.
    fn create(&self, addr: &str) -> Result<Arc<dyn RemoteExecutor>, ExecError>;
}

/// Local processes for loopback addresses, SSH for everything else
#[derive(Debug, Clone)]
pub struct DefaultExecutorFactory {
    pub user: String,
    pub ssh_key: Option<String>,
    pub port: u16,
}

impl DefaultExecutorFactory {
    pub fn new(user: impl Into<String>, ssh_key: Option<String>) -> Self {
        Self {
            user: user.into(),
            ssh_key,
            port: 22,
        }
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

impl ExecutorFactory for DefaultExecutorFactory {
    fn create(&self, addr: &str) -> Result<Arc<dyn RemoteExecutor>, ExecError> {
        if addr == "localhost" || addr == "127.0.0.1" {
            return Ok(Arc::new(LocalExecutor::new()));
        }

        let mut conn_info = ConnectionInfo::new(addr, &self.user).with_port(self.port);
        if let Some(key) = &self.ssh_key {
            conn_info = conn_info.with_ssh_key(key);
        }
        Ok(Arc::new(SshExecutor::new(conn_info)?))
    }
}

/// `CommandExecutor` that routes each call to the executor of its host
pub struct HostExecutorPool {
    factory: Arc<dyn ExecutorFactory>,
    executors: RwLock<HashMap<String, Arc<dyn RemoteExecutor>>>,
}

impl HostExecutorPool {
    pub fn new(factory: Arc<dyn ExecutorFactory>) -> Self {
        Self {
            factory,
            executors: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.executors.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.executors.read().await.is_empty()
    }
}

#[async_trait]
impl CommandExecutor for HostExecutorPool {
    async fn run(
        &self,
        host: &str,
        argv: &[String],
        opts: RunOptions,
    ) -> Result<CommandResult, ExecError> {
        let executor = self
            .executors
            .read()
            .await
            .get(host)
            .cloned()
            .ok_or_else(|| ExecError::UnknownHost(host.to_string()))?;

        debug!(
            host,
            executor = executor.executor_type(),
            command = ?argv,
            "dispatching command"
        );
        executor.run(argv, opts).await
    }

    async fn register_host(&self, hostname: &str, addr: &str) -> Result<(), ExecError> {
        let executor = self.factory.create(addr)?;
        info!(
            host = hostname,
            addr,
            executor = executor.executor_type(),
            "registered host executor"
        );
        self.executors
            .write()
            .await
            .insert(hostname.to_string(), executor);
        Ok(())
    }

    async fn forget_host(&self, hostname: &str) {
        let removed = self.executors.write().await.remove(hostname);
        if let Some(executor) = removed {
            executor.close().await;
            info!(host = hostname, "forgot host executor");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> HostExecutorPool {
        HostExecutorPool::new(Arc::new(DefaultExecutorFactory::new("root", None)))
    }

    #[tokio::test]
    async fn test_unknown_host() {
        let pool = pool();
        let result = pool
            .run("nowhere", &["true".to_string()], RunOptions::wait())
            .await;
        assert!(matches!(result, Err(ExecError::UnknownHost(h)) if h == "nowhere"));
    }

    #[tokio::test]
    async fn test_localhost_routes_to_local_executor() {
        let pool = pool();
        pool.register_host("host1", "localhost").await.unwrap();

        let result = pool
            .run(
                "host1",
                &["echo".to_string(), "ok".to_string()],
                RunOptions::wait(),
            )
            .await
            .unwrap();
        assert_eq!(result.stdout.trim(), "ok");

        pool.forget_host("host1").await;
        assert!(pool.is_empty().await);
    }

    #[tokio::test]
    async fn test_remote_host_without_key_is_rejected() {
        let pool = pool();
        let result = pool.register_host("host2", "10.0.0.2").await;
        assert!(matches!(result, Err(ExecError::ConfigError(_))));
        assert_eq!(pool.len().await, 0);
    }
}
