//! Configuration loading and types

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use stonectl_core::{HostConfig, OrchestratorConfig};

/// Top-level configuration for the stonectl daemon
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Daemon server settings
    #[serde(default)]
    pub daemon: DaemonConfig,
    /// Credentials used to reach managed hosts
    #[serde(default)]
    pub ssh: SshConfig,
    /// How control-plane commands are issued
    #[serde(default)]
    pub cluster: ClusterConfig,
    /// Reconciliation loop tuning
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    /// Hosts added to the inventory at startup if missing
    #[serde(default)]
    pub host: Vec<HostConfig>,
}

/// Daemon server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Address and port to bind to
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
    /// JSON document holding the durable orchestrator state
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            state_path: default_state_path(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    #[serde(default = "default_user")]
    pub user: String,
    /// Private key path; the SSH agent is used when unset
    pub key: Option<String>,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: default_user(),
            key: None,
            port: default_ssh_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Host the `stone` CLI runs on; defaults to the first `_admin` host
    pub admin_host: Option<String>,
    #[serde(default = "default_cluster_binary")]
    pub binary: String,
    /// Seconds to wait for one control-plane command
    #[serde(default = "default_cluster_timeout")]
    pub timeout: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            admin_host: None,
            binary: default_cluster_binary(),
            timeout: default_cluster_timeout(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_state_path() -> PathBuf {
    dirs::data_dir()
        .map(|p| p.join("stonectl/state.json"))
        .unwrap_or_else(|| PathBuf::from("stonectl-state.json"))
}

fn default_user() -> String {
    "root".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_cluster_binary() -> String {
    "stone".to_string()
}

fn default_cluster_timeout() -> u64 {
    30
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load from `explicit`, `STONECTL_CONFIG` or the default paths, or
    /// fall back to defaults
    ///
    /// # Errors
    /// Returns error if a config file exists but cannot be loaded
    pub fn load_default(explicit: Option<&Path>) -> eyre::Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        if let Ok(path) = std::env::var("STONECTL_CONFIG") {
            return Self::load(Path::new(&path));
        }

        let paths = [
            Some(PathBuf::from("stonectl.toml")),
            Some(PathBuf::from("/etc/stonectl/stonectl.toml")),
            dirs::config_dir().map(|p| p.join("stonectl/stonectl.toml")),
        ];

        for path in paths.into_iter().flatten() {
            if path.exists() {
                return Self::load(&path);
            }
        }

        tracing::warn!("no config file found, using defaults");
        Ok(Config::default())
    }

    /// Host the control-plane CLI runs on
    pub fn admin_host(&self) -> String {
        self.cluster
            .admin_host
            .clone()
            .or_else(|| {
                self.host
                    .iter()
                    .find(|h| h.labels.contains("_admin"))
                    .map(|h| h.name.clone())
            })
            .unwrap_or_else(|| "localhost".to_string())
    }
}
