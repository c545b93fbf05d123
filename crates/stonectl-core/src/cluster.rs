//! Access to the storage cluster's control plane

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use stonectl_exec::{CommandExecutor, RunOptions};
use tracing::{debug, instrument, warn};

use crate::error::CoreError;

/// Outcome of a control-plane command
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MonCommandResult {
    pub rc: i32,
    pub out: String,
    pub err: String,
}

impl MonCommandResult {
    #[must_use]
    pub fn ok(out: impl Into<String>) -> Self {
        Self {
            rc: 0,
            out: out.into(),
            err: String::new(),
        }
    }

    #[must_use]
    pub fn error(rc: i32, err: impl Into<String>) -> Self {
        Self {
            rc,
            out: String::new(),
            err: err.into(),
        }
    }

    #[must_use]
    pub fn success(&self) -> bool {
        self.rc == 0
    }
}

/// Read/write access to the cluster's monitors
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Send a JSON command such as `{"prefix": "osd ok-to-stop", "ids": ["1"]}`
    ///
    /// A non-zero `rc` is a normal reply, not an `Err`.
    async fn mon_command(&self, cmd: &Value) -> Result<MonCommandResult, CoreError>;
}

fn prefix_of(cmd: &Value) -> String {
    cmd.get("prefix")
        .and_then(Value::as_str)
        .unwrap_or("<none>")
        .to_string()
}

/// Send `cmd` and turn a non-zero `rc` into `CoreError::Cluster`
///
/// # Errors
/// Returns the transport error or `CoreError::Cluster`.
pub async fn check_mon_command(
    client: &dyn ClusterClient,
    cmd: &Value,
) -> Result<MonCommandResult, CoreError> {
    let result = client.mon_command(cmd).await?;
    if result.success() {
        Ok(result)
    } else {
        Err(CoreError::Cluster {
            prefix: prefix_of(cmd),
            rc: result.rc,
            err: result.err,
        })
    }
}

/// Runs the `stone` CLI on the admin host
pub struct CliClusterClient {
    executor: Arc<dyn CommandExecutor>,
    admin_host: String,
    binary: String,
    timeout: Duration,
}

impl CliClusterClient {
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        admin_host: impl Into<String>,
        binary: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            executor,
            admin_host: admin_host.into(),
            binary: binary.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ClusterClient for CliClusterClient {
    #[instrument(skip(self, cmd), fields(host = %self.admin_host, prefix = %prefix_of(cmd)))]
    async fn mon_command(&self, cmd: &Value) -> Result<MonCommandResult, CoreError> {
        let argv = vec![
            self.binary.clone(),
            "--format".to_string(),
            "json".to_string(),
            "mon-command".to_string(),
            cmd.to_string(),
        ];
        let result = self
            .executor
            .run(
                &self.admin_host,
                &argv,
                RunOptions::wait().with_timeout(self.timeout),
            )
            .await?;
        debug!(rc = result.status, "mon command finished");
        Ok(MonCommandResult {
            rc: result.status,
            out: result.stdout,
            err: result.stderr.trim().to_string(),
        })
    }
}

/// Remembers which config option names the cluster accepts
#[derive(Debug, Default)]
pub struct ConfigOptionCache {
    known: BTreeMap<String, bool>,
}

impl ConfigOptionCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `option` is a valid cluster config option
    ///
    /// Transport failures are not cached and count as valid, so a flaky
    /// control plane never strips options from a deploy.
    pub async fn is_valid(&mut self, client: &dyn ClusterClient, option: &str) -> bool {
        if let Some(valid) = self.known.get(option) {
            return *valid;
        }
        let cmd = serde_json::json!({"prefix": "config help", "key": option});
        match client.mon_command(&cmd).await {
            Ok(result) => {
                let valid = result.success();
                self.known.insert(option.to_string(), valid);
                valid
            }
            Err(e) => {
                warn!(option, error = %e, "unable to validate config option");
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct CountingClient {
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl ClusterClient for CountingClient {
        async fn mon_command(&self, cmd: &Value) -> Result<MonCommandResult, CoreError> {
            *self.calls.lock().unwrap() += 1;
            if cmd["key"] == "osd_pool_default_size" {
                Ok(MonCommandResult::ok("{}"))
            } else {
                Ok(MonCommandResult::error(-2, "unrecognized option"))
            }
        }
    }

    #[tokio::test]
    async fn test_config_option_cache() {
        let client = CountingClient {
            calls: Mutex::new(0),
        };
        let mut cache = ConfigOptionCache::new();

        assert!(cache.is_valid(&client, "osd_pool_default_size").await);
        assert!(!cache.is_valid(&client, "test").await);
        assert!(!cache.is_valid(&client, "test").await);
        assert_eq!(*client.calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_check_mon_command_maps_rc() {
        let client = CountingClient {
            calls: Mutex::new(0),
        };
        let cmd = serde_json::json!({"prefix": "config help", "key": "nope"});
        let err = check_mon_command(&client, &cmd).await.unwrap_err();
        assert!(matches!(err, CoreError::Cluster { rc: -2, ref prefix, .. } if prefix == "config help"));
    }
}
