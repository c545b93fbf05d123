//! Lifecycle handles of managed daemons

use std::collections::{BTreeMap, BTreeSet};

use stonectl_api::{DaemonAction, DaemonDescription};
use tracing::{debug, info};

use crate::agent::HostAgent;
use crate::error::CoreError;
use crate::services::DaemonDeploySpec;

/// Start/stop/restart/redeploy access to one daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonHandle {
    deploy: DaemonDeploySpec,
}

impl DaemonHandle {
    #[must_use]
    pub fn name(&self) -> String {
        self.deploy.name()
    }

    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.deploy.hostname
    }

    #[must_use]
    pub fn deploy_spec(&self) -> &DaemonDeploySpec {
        &self.deploy
    }

    pub async fn start(&self, agent: &HostAgent) -> Result<(), CoreError> {
        agent
            .unit(&self.deploy.hostname, &self.name(), "start")
            .await
    }

    pub async fn stop(&self, agent: &HostAgent) -> Result<(), CoreError> {
        agent.unit(&self.deploy.hostname, &self.name(), "stop").await
    }

    pub async fn restart(&self, agent: &HostAgent) -> Result<(), CoreError> {
        agent
            .unit(&self.deploy.hostname, &self.name(), "restart")
            .await
    }

    /// Deploy the daemon again with its last known configuration
    pub async fn redeploy(&self, agent: &HostAgent) -> Result<(), CoreError> {
        agent.deploy(&self.deploy).await
    }

    pub async fn run(&self, agent: &HostAgent, action: DaemonAction) -> Result<(), CoreError> {
        match action {
            DaemonAction::Start => self.start(agent).await,
            DaemonAction::Stop => self.stop(agent).await,
            DaemonAction::Restart => self.restart(agent).await,
            DaemonAction::Redeploy => self.redeploy(agent).await,
        }
    }
}

#[derive(Debug, Default)]
pub struct DaemonRegistry {
    daemons: BTreeMap<String, DaemonHandle>,
}

impl DaemonRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handle of a daemon this orchestrator deployed
    pub fn register_daemon(&mut self, deploy: DaemonDeploySpec) {
        let name = deploy.name();
        debug!(daemon = %name, host = %deploy.hostname, "registered daemon");
        self.daemons.insert(name, DaemonHandle { deploy });
    }

    /// Register a managed daemon seen on a host, keeping a richer handle
    /// recorded at deploy time
    pub fn register_observed(&mut self, dd: &DaemonDescription) {
        let name = dd.name();
        match self.daemons.get(&name) {
            Some(handle) if handle.deploy.hostname == dd.hostname => {}
            _ => self.register_daemon(DaemonDeploySpec::from_description(dd)),
        }
    }

    #[must_use]
    pub fn get_daemon(&self, name: &str) -> Option<&DaemonHandle> {
        self.daemons.get(name)
    }

    /// # Errors
    /// Returns `DaemonNotFound` when nothing is registered under `name`.
    pub fn require(&self, name: &str) -> Result<&DaemonHandle, CoreError> {
        self.get_daemon(name)
            .ok_or_else(|| CoreError::DaemonNotFound(name.to_string()))
    }

    #[must_use]
    pub fn is_registered(&self, name: &str) -> bool {
        self.daemons.contains_key(name)
    }

    pub fn unregister(&mut self, name: &str) -> Option<DaemonHandle> {
        let handle = self.daemons.remove(name);
        if handle.is_some() {
            info!(daemon = %name, "unregistered daemon");
        }
        handle
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.daemons.keys()
    }

    /// Expand daemon names, glob patterns and bare types into registered names
    ///
    /// `mgr` selects every `mgr.*` daemon, `osd.1*` is matched as a glob.
    /// The result is sorted and free of duplicates; unmatched items are
    /// skipped.
    #[must_use]
    pub fn resolve_role_list(&self, roles: &[String]) -> Vec<String> {
        let mut resolved = BTreeSet::new();
        for role in roles {
            if self.daemons.contains_key(role) {
                resolved.insert(role.clone());
                continue;
            }
            if !role.contains('.') {
                let prefix = format!("{role}.");
                resolved.extend(
                    self.daemons
                        .keys()
                        .filter(|name| name.starts_with(&prefix))
                        .cloned(),
                );
                continue;
            }
            match glob::Pattern::new(role) {
                Ok(pattern) => resolved.extend(
                    self.daemons
                        .keys()
                        .filter(|name| pattern.matches(name))
                        .cloned(),
                ),
                Err(e) => debug!(role = %role, error = %e, "ignoring malformed role pattern"),
            }
        }
        resolved.into_iter().collect()
    }
}
