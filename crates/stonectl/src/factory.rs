//! Builds the orchestrator's collaborators from configuration

use std::sync::Arc;
use std::time::Duration;

use eyre::{Result, WrapErr};
use stonectl_core::{CliClusterClient, Collaborators, FileStore};
use stonectl_exec::{CommandExecutor, DefaultExecutorFactory, HostExecutorPool};

use crate::config::Config;

/// Executor pool that reaches loopback hosts locally and the rest over SSH
pub fn create_executor(config: &Config) -> Arc<dyn CommandExecutor> {
    let factory = DefaultExecutorFactory::new(&config.ssh.user, config.ssh.key.clone())
        .with_port(config.ssh.port);
    Arc::new(HostExecutorPool::new(Arc::new(factory)))
}

/// Store, executor and cluster client for [`stonectl_core::Orchestrator`]
///
/// # Errors
/// Returns error if the state file cannot be opened
pub fn create_collaborators(config: &Config) -> Result<Collaborators> {
    let state_path = &config.daemon.state_path;
    if let Some(parent) = state_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .wrap_err_with(|| format!("failed to create {}", parent.display()))?;
    }
    let store = FileStore::open(state_path)
        .wrap_err_with(|| format!("failed to open state file {}", state_path.display()))?;

    let executor = create_executor(config);
    let admin_host = config.admin_host();
    tracing::info!(
        admin_host = %admin_host,
        state = %state_path.display(),
        "orchestrator collaborators ready"
    );
    let cluster = CliClusterClient::new(
        executor.clone(),
        admin_host,
        &config.cluster.binary,
        Duration::from_secs(config.cluster.timeout),
    );

    Ok(Collaborators {
        store: Arc::new(store),
        executor,
        cluster: Arc::new(cluster),
    })
}
