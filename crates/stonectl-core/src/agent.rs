//! Host agent invocations
//!
//! Every host runs the `stoneadm` agent binary. This module builds its
//! command lines, runs them through the [`CommandExecutor`] and parses what
//! comes back.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use stonectl_api::{DaemonDescription, DaemonStatus, Device};
use stonectl_exec::{CommandExecutor, CommandResult, RunOptions};
use tracing::{debug, instrument};

use crate::error::CoreError;
use crate::services::DaemonDeploySpec;

/// One entry of `stoneadm ls`
#[derive(Debug, Deserialize)]
struct LsEntry {
    name: String,
    #[serde(default)]
    state: String,
    /// Only set for daemons deployed by the orchestrator
    #[serde(default)]
    service_name: Option<String>,
    #[serde(default)]
    ports: Vec<u16>,
    #[serde(default)]
    container_image_digests: Vec<String>,
    #[serde(default)]
    created: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct InventoryEntry {
    path: String,
    #[serde(default)]
    device_id: String,
    #[serde(default)]
    sys_api: SysApi,
    #[serde(default)]
    available: bool,
    #[serde(default)]
    rejected_reasons: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SysApi {
    #[serde(default)]
    size: u64,
}

/// `list-networks` output, with or without the interface level
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NetworkEntry {
    ByInterface(BTreeMap<String, Vec<String>>),
    Flat(Vec<String>),
}

/// Parse `stoneadm ls`
///
/// # Errors
/// Returns the decoder message when the output is not the expected JSON.
pub fn parse_ls(host: &str, output: &str) -> Result<Vec<DaemonDescription>, String> {
    let entries: Vec<LsEntry> = serde_json::from_str(output).map_err(|e| e.to_string())?;
    let mut daemons = Vec::with_capacity(entries.len());
    for entry in entries {
        let Some((daemon_type, daemon_id)) = DaemonDescription::parse_name(&entry.name) else {
            debug!(host, name = %entry.name, "skipping unparseable daemon name");
            continue;
        };
        let managed = entry.service_name.is_some();
        let service_name = entry
            .service_name
            .unwrap_or_else(|| daemon_type.to_string());
        let mut dd = DaemonDescription::new(daemon_type, daemon_id, host, service_name)
            .with_status(DaemonStatus::from_state(&entry.state));
        dd.ports = entry.ports;
        dd.container_image_digest = entry.container_image_digests.into_iter().next();
        dd.created = entry.created;
        dd.managed = managed;
        daemons.push(dd);
    }
    Ok(daemons)
}

/// Parse `stone-volume inventory --format=json`
///
/// # Errors
/// Returns the decoder message when the output is not the expected JSON.
pub fn parse_devices(output: &str) -> Result<Vec<Device>, String> {
    let entries: Vec<InventoryEntry> = serde_json::from_str(output).map_err(|e| e.to_string())?;
    Ok(entries
        .into_iter()
        .map(|e| Device {
            path: e.path,
            device_id: e.device_id,
            size_bytes: e.sys_api.size,
            available: e.available,
            rejected_reasons: e.rejected_reasons,
        })
        .collect())
}

/// Parse `list-networks` into CIDR to addresses
///
/// # Errors
/// Returns the decoder message when the output is not the expected JSON.
pub fn parse_networks(output: &str) -> Result<BTreeMap<String, Vec<String>>, String> {
    let entries: BTreeMap<String, NetworkEntry> =
        serde_json::from_str(output).map_err(|e| e.to_string())?;
    Ok(entries
        .into_iter()
        .map(|(cidr, entry)| {
            let mut ips = match entry {
                NetworkEntry::ByInterface(ifaces) => ifaces.into_values().flatten().collect(),
                NetworkEntry::Flat(ips) => ips,
            };
            ips.sort();
            ips.dedup();
            (cidr, ips)
        })
        .collect())
}

/// Parse `gather-facts`
///
/// # Errors
/// Returns the decoder message when the output is not a JSON object.
pub fn parse_facts(output: &str) -> Result<BTreeMap<String, Value>, String> {
    serde_json::from_str(output).map_err(|e| e.to_string())
}

/// Runs the host agent on managed hosts
#[derive(Clone)]
pub struct HostAgent {
    executor: Arc<dyn CommandExecutor>,
    binary: String,
    timeout: Duration,
}

impl std::fmt::Debug for HostAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostAgent")
            .field("binary", &self.binary)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl HostAgent {
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        binary: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            executor,
            binary: binary.into(),
            timeout,
        }
    }

    #[must_use]
    pub fn executor(&self) -> &Arc<dyn CommandExecutor> {
        &self.executor
    }

    fn argv<I, S>(&self, args: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        std::iter::once(self.binary.clone())
            .chain(args.into_iter().map(Into::into))
            .collect()
    }

    async fn call(
        &self,
        host: &str,
        argv: Vec<String>,
        opts: RunOptions,
    ) -> Result<CommandResult, CoreError> {
        let result = self.executor.run(host, &argv, opts).await?;
        Ok(result.into_success()?)
    }

    async fn probe(&self, host: &str, args: &[&str]) -> Result<String, CoreError> {
        let argv = self.argv(args.iter().copied());
        let result = self
            .call(host, argv, RunOptions::wait().with_timeout(self.timeout))
            .await?;
        Ok(result.stdout)
    }

    fn probe_error(host: &str, command: &str, reason: String) -> CoreError {
        CoreError::Probe {
            host: host.to_string(),
            command: command.to_string(),
            reason,
        }
    }

    // ------------------------------------------------------------------
    // probes
    // ------------------------------------------------------------------

    #[instrument(skip(self))]
    pub async fn list_daemons(&self, host: &str) -> Result<Vec<DaemonDescription>, CoreError> {
        let out = self.probe(host, &["ls"]).await?;
        parse_ls(host, &out).map_err(|e| Self::probe_error(host, "ls", e))
    }

    #[instrument(skip(self))]
    pub async fn list_devices(&self, host: &str) -> Result<Vec<Device>, CoreError> {
        let out = self
            .probe(host, &["stone-volume", "--", "inventory", "--format=json"])
            .await?;
        parse_devices(&out).map_err(|e| Self::probe_error(host, "stone-volume inventory", e))
    }

    #[instrument(skip(self))]
    pub async fn list_networks(
        &self,
        host: &str,
    ) -> Result<BTreeMap<String, Vec<String>>, CoreError> {
        let out = self.probe(host, &["list-networks"]).await?;
        parse_networks(&out).map_err(|e| Self::probe_error(host, "list-networks", e))
    }

    #[instrument(skip(self))]
    pub async fn gather_facts(&self, host: &str) -> Result<BTreeMap<String, Value>, CoreError> {
        let out = self.probe(host, &["gather-facts"]).await?;
        parse_facts(&out).map_err(|e| Self::probe_error(host, "gather-facts", e))
    }

    // ------------------------------------------------------------------
    // daemon lifecycle
    // ------------------------------------------------------------------

    /// Dispatch a deploy without waiting for the daemon to come up
    #[instrument(skip(self, deploy), fields(host = %deploy.hostname, daemon = %deploy.name()))]
    pub async fn deploy(&self, deploy: &DaemonDeploySpec) -> Result<(), CoreError> {
        let meta = json!({
            "service_name": deploy.service_name,
            "ports": deploy.ports,
            "extra_container_args": deploy.extra_container_args,
        });
        let config = json!({
            "config": deploy.config,
            "keyring": deploy.keyring,
        });
        let mut args = vec![
            "deploy".to_string(),
            "--name".to_string(),
            deploy.name(),
            "--meta-json".to_string(),
            meta.to_string(),
            "--config-json".to_string(),
            config.to_string(),
        ];
        if !deploy.ports.is_empty() {
            let ports: Vec<String> = deploy.ports.iter().map(u16::to_string).collect();
            args.push("--tcp-ports".to_string());
            args.push(ports.join(" "));
        }
        if let Some(device) = &deploy.device {
            args.push("--device".to_string());
            args.push(device.clone());
        }
        let argv = self.argv(args);
        self.call(&deploy.hostname, argv, RunOptions::detach()).await?;
        debug!("deploy dispatched");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn remove_daemon(&self, host: &str, name: &str) -> Result<(), CoreError> {
        let argv = self.argv(["rm-daemon", "--name", name, "--force"]);
        self.call(host, argv, RunOptions::wait().with_timeout(self.timeout))
            .await?;
        Ok(())
    }

    /// `start`, `stop` or `restart` a daemon's unit
    #[instrument(skip(self))]
    pub async fn unit(&self, host: &str, name: &str, action: &str) -> Result<(), CoreError> {
        let argv = self.argv(["unit", "--name", name, action]);
        self.call(host, argv, RunOptions::wait().with_timeout(self.timeout))
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn zap_osd(&self, host: &str, osd_id: u32) -> Result<(), CoreError> {
        let id = osd_id.to_string();
        let argv = self.argv([
            "stone-volume",
            "--",
            "lvm",
            "zap",
            "--osd-id",
            id.as_str(),
            "--destroy",
        ]);
        self.call(host, argv, RunOptions::wait().with_timeout(self.timeout))
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // files and host state
    // ------------------------------------------------------------------

    #[instrument(skip(self, content))]
    pub async fn write_file(
        &self,
        host: &str,
        path: &str,
        content: &str,
        mode: u32,
        uid: u32,
        gid: u32,
    ) -> Result<(), CoreError> {
        let argv = self.argv([
            "write-file".to_string(),
            "--path".to_string(),
            path.to_string(),
            "--mode".to_string(),
            format!("{mode:o}"),
            "--uid".to_string(),
            uid.to_string(),
            "--gid".to_string(),
            gid.to_string(),
            "--content".to_string(),
            content.to_string(),
        ]);
        self.call(host, argv, RunOptions::wait().with_timeout(self.timeout))
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn remove_file(&self, host: &str, path: &str) -> Result<(), CoreError> {
        let argv = self.argv(["rm-file", "--path", path]);
        self.call(host, argv, RunOptions::wait().with_timeout(self.timeout))
            .await?;
        Ok(())
    }

    /// Stop (`enter`) or restart (`exit`) every daemon on the host
    #[instrument(skip(self))]
    pub async fn host_maintenance(&self, host: &str, enter: bool) -> Result<(), CoreError> {
        let mode = if enter { "enter" } else { "exit" };
        let argv = self.argv(["host-maintenance", mode]);
        self.call(host, argv, RunOptions::wait().with_timeout(self.timeout))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stonectl_api::ServiceType;

    #[test]
    fn test_parse_ls() {
        let out = r#"[
            {"name": "mgr.host1.abc", "state": "running", "service_name": "mgr", "ports": [8443]},
            {"name": "osd.3", "state": "error"},
            {"name": "garbage"}
        ]"#;
        let daemons = parse_ls("host1", out).unwrap();
        assert_eq!(daemons.len(), 2);

        assert_eq!(daemons[0].name(), "mgr.host1.abc");
        assert_eq!(daemons[0].status, DaemonStatus::Running);
        assert!(daemons[0].managed);
        assert_eq!(daemons[0].ports, vec![8443]);

        assert_eq!(daemons[1].daemon_type, ServiceType::Osd);
        assert_eq!(daemons[1].status, DaemonStatus::Error);
        assert_eq!(daemons[1].service_name, "osd");
        assert!(!daemons[1].managed);
    }

    #[test]
    fn test_parse_ls_rejects_non_json() {
        assert!(parse_ls("host1", "Traceback (most recent call last)").is_err());
    }

    #[test]
    fn test_parse_devices() {
        let out = r#"[{"path": "/dev/sdb", "device_id": "WD-1", "sys_api": {"size": 1024},
                       "available": true, "rejected_reasons": []}]"#;
        let devices = parse_devices(out).unwrap();
        assert_eq!(devices[0].path, "/dev/sdb");
        assert_eq!(devices[0].size_bytes, 1024);
        assert!(devices[0].available);
    }

    #[test]
    fn test_parse_networks_both_shapes() {
        let out = r#"{
            "10.0.0.0/24": {"eth0": ["10.0.0.2"], "eth1": ["10.0.0.3", "10.0.0.2"]},
            "192.168.1.0/24": ["192.168.1.5"]
        }"#;
        let networks = parse_networks(out).unwrap();
        assert_eq!(networks["10.0.0.0/24"], vec!["10.0.0.2", "10.0.0.3"]);
        assert_eq!(networks["192.168.1.0/24"], vec!["192.168.1.5"]);
    }

    #[test]
    fn test_parse_facts() {
        let facts = parse_facts(r#"{"hostname": "host1", "memory_total_kb": 1024}"#).unwrap();
        assert_eq!(facts["hostname"], "host1");
    }
}
