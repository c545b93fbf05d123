//! Per-service-type behaviour
//!
//! Everything that differs between daemon types (ids, keyrings, ports,
//! stop checks, follow-up cluster configuration) lives behind
//! [`ServiceHandler`]. The serve loop looks handlers up in a
//! [`ServiceRegistry`] built once at startup and never branches on type
//! names itself.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use stonectl_api::{DaemonDescription, DaemonStatus, PlacementSpec, ServiceSpec, ServiceType};
use tracing::{debug, info};

use crate::cluster::{ClusterClient, check_mon_command};
use crate::error::CoreError;

/// Everything needed to deploy one daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonDeploySpec {
    pub daemon_type: ServiceType,
    pub daemon_id: String,
    pub hostname: String,
    pub service_name: String,
    pub ports: Vec<u16>,
    /// Backing device for OSDs
    pub device: Option<String>,
    pub config: BTreeMap<String, String>,
    pub keyring: Option<String>,
    pub extra_container_args: Vec<String>,
}

impl DaemonDeploySpec {
    pub fn new(
        daemon_type: ServiceType,
        daemon_id: impl Into<String>,
        hostname: impl Into<String>,
        service_name: impl Into<String>,
    ) -> Self {
        Self {
            daemon_type,
            daemon_id: daemon_id.into(),
            hostname: hostname.into(),
            service_name: service_name.into(),
            ports: Vec::new(),
            device: None,
            config: BTreeMap::new(),
            keyring: None,
            extra_container_args: Vec::new(),
        }
    }

    /// Rebuild a deploy spec for a daemon found on a host
    #[must_use]
    pub fn from_description(dd: &DaemonDescription) -> Self {
        let mut spec = Self::new(
            dd.daemon_type.clone(),
            &dd.daemon_id,
            &dd.hostname,
            &dd.service_name,
        );
        spec.ports.clone_from(&dd.ports);
        spec
    }

    #[must_use]
    pub fn name(&self) -> String {
        format!("{}.{}", self.daemon_type, self.daemon_id)
    }

    /// Cache entry for a freshly dispatched deploy
    #[must_use]
    pub fn to_description(&self, now: DateTime<Utc>) -> DaemonDescription {
        let mut dd = DaemonDescription::new(
            self.daemon_type.clone(),
            &self.daemon_id,
            &self.hostname,
            &self.service_name,
        )
        .with_status(DaemonStatus::Starting);
        dd.ports.clone_from(&self.ports);
        dd.created = Some(now);
        dd.managed = true;
        dd
    }
}

/// Behaviour of one service type
#[async_trait]
pub trait ServiceHandler: Send + Sync {
    fn service_type(&self) -> ServiceType;

    /// Placement used when a spec does not give one
    fn default_placement(&self) -> PlacementSpec {
        PlacementSpec::count(1)
    }

    /// Ports the daemon listens on
    fn ports(&self) -> Vec<u16> {
        Vec::new()
    }

    /// Cluster auth entity of a daemon, if it has its own key
    fn auth_entity(&self, daemon_id: &str) -> Option<String> {
        Some(format!("{}.{daemon_id}", self.service_type()))
    }

    /// Whether `config_dashboard` has to run after deploying this type
    fn requires_post_actions(&self) -> bool {
        false
    }

    /// Fill in ids and keys before the deploy is dispatched
    async fn prepare_create(
        &self,
        cluster: &dyn ClusterClient,
        deploy: &mut DaemonDeploySpec,
    ) -> Result<(), CoreError> {
        deploy.ports = self.ports();
        if let Some(entity) = self.auth_entity(&deploy.daemon_id) {
            let cmd = json!({
                "prefix": "auth get-or-create",
                "entity": entity,
                "caps": self.caps(),
            });
            let result = check_mon_command(cluster, &cmd).await?;
            deploy.keyring = Some(result.out);
        }
        Ok(())
    }

    /// Cluster caps requested for the daemon's key
    fn caps(&self) -> Vec<String> {
        vec![
            "mon".to_string(),
            "allow r".to_string(),
            "osd".to_string(),
            "allow rwx".to_string(),
        ]
    }

    /// Per-daemon configuration derived from the spec
    fn generate_config(
        &self,
        spec: &ServiceSpec,
        _deploy: &DaemonDeploySpec,
    ) -> BTreeMap<String, String> {
        spec.config.clone()
    }

    /// Whether `daemons` may be stopped without losing availability
    async fn ok_to_stop(
        &self,
        _cluster: &dyn ClusterClient,
        _daemons: &[DaemonDescription],
        _all_of_type: &[DaemonDescription],
    ) -> Result<bool, CoreError> {
        Ok(true)
    }

    /// Cleanup after a daemon was removed from its host
    async fn post_remove(
        &self,
        cluster: &dyn ClusterClient,
        daemon: &DaemonDescription,
    ) -> Result<(), CoreError> {
        if let Some(entity) = self.auth_entity(&daemon.daemon_id) {
            check_mon_command(cluster, &json!({"prefix": "auth rm", "entity": entity})).await?;
            debug!(entity = %entity, "revoked daemon key");
        }
        Ok(())
    }

    /// Point the cluster at freshly deployed daemons of this type
    async fn config_dashboard(
        &self,
        _cluster: &dyn ClusterClient,
        _daemons: &[DaemonDescription],
    ) -> Result<(), CoreError> {
        Ok(())
    }
}

fn ids_of(daemons: &[DaemonDescription]) -> Vec<String> {
    daemons.iter().map(|d| d.daemon_id.clone()).collect()
}

async fn cluster_ok_to_stop(
    cluster: &dyn ClusterClient,
    prefix: &str,
    ids: Vec<Value>,
) -> Result<bool, CoreError> {
    let result = cluster
        .mon_command(&json!({"prefix": prefix, "ids": ids}))
        .await?;
    if !result.success() {
        info!(prefix, err = %result.err, "cluster refused ok-to-stop");
    }
    Ok(result.success())
}

// ============================================================================
// mon
// ============================================================================

pub struct MonService;

#[async_trait]
impl ServiceHandler for MonService {
    fn service_type(&self) -> ServiceType {
        ServiceType::Mon
    }

    fn default_placement(&self) -> PlacementSpec {
        PlacementSpec::count(5)
    }

    /// Monitors share the `mon.` key
    fn auth_entity(&self, _daemon_id: &str) -> Option<String> {
        None
    }

    async fn ok_to_stop(
        &self,
        cluster: &dyn ClusterClient,
        daemons: &[DaemonDescription],
        _all_of_type: &[DaemonDescription],
    ) -> Result<bool, CoreError> {
        let ids = ids_of(daemons).into_iter().map(Value::from).collect();
        cluster_ok_to_stop(cluster, "mon ok-to-stop", ids).await
    }

    async fn post_remove(
        &self,
        cluster: &dyn ClusterClient,
        daemon: &DaemonDescription,
    ) -> Result<(), CoreError> {
        check_mon_command(
            cluster,
            &json!({"prefix": "mon rm", "name": daemon.daemon_id}),
        )
        .await?;
        Ok(())
    }
}

// ============================================================================
// mgr
// ============================================================================

pub struct MgrService;

#[async_trait]
impl ServiceHandler for MgrService {
    fn service_type(&self) -> ServiceType {
        ServiceType::Mgr
    }

    fn default_placement(&self) -> PlacementSpec {
        PlacementSpec::count(2)
    }

    fn caps(&self) -> Vec<String> {
        vec![
            "mon".to_string(),
            "profile mgr".to_string(),
            "osd".to_string(),
            "allow *".to_string(),
            "mds".to_string(),
            "allow *".to_string(),
        ]
    }

    /// Stopping is fine while another mgr stays up
    async fn ok_to_stop(
        &self,
        _cluster: &dyn ClusterClient,
        daemons: &[DaemonDescription],
        all_of_type: &[DaemonDescription],
    ) -> Result<bool, CoreError> {
        let stopping: Vec<String> = daemons.iter().map(DaemonDescription::name).collect();
        Ok(all_of_type
            .iter()
            .any(|d| d.status == DaemonStatus::Running && !stopping.contains(&d.name())))
    }
}

// ============================================================================
// mds
// ============================================================================

pub struct MdsService;

#[async_trait]
impl ServiceHandler for MdsService {
    fn service_type(&self) -> ServiceType {
        ServiceType::Mds
    }

    fn caps(&self) -> Vec<String> {
        vec![
            "mon".to_string(),
            "profile mds".to_string(),
            "osd".to_string(),
            "allow rw tag stonefs *=*".to_string(),
            "mds".to_string(),
            "allow".to_string(),
        ]
    }

    async fn ok_to_stop(
        &self,
        cluster: &dyn ClusterClient,
        daemons: &[DaemonDescription],
        _all_of_type: &[DaemonDescription],
    ) -> Result<bool, CoreError> {
        let ids = ids_of(daemons).into_iter().map(Value::from).collect();
        cluster_ok_to_stop(cluster, "mds ok-to-stop", ids).await
    }
}

// ============================================================================
// osd
// ============================================================================

pub struct OsdService;

#[async_trait]
impl ServiceHandler for OsdService {
    fn service_type(&self) -> ServiceType {
        ServiceType::Osd
    }

    /// Allocate the OSD id from the cluster, then fetch its key
    async fn prepare_create(
        &self,
        cluster: &dyn ClusterClient,
        deploy: &mut DaemonDeploySpec,
    ) -> Result<(), CoreError> {
        let result = check_mon_command(cluster, &json!({"prefix": "osd create"})).await?;
        deploy.daemon_id = parse_osd_id(&result.out).ok_or_else(|| CoreError::Cluster {
            prefix: "osd create".to_string(),
            rc: result.rc,
            err: format!("unexpected reply {:?}", result.out),
        })?;

        let entity = format!("osd.{}", deploy.daemon_id);
        let cmd = json!({
            "prefix": "auth get-or-create",
            "entity": entity,
            "caps": ["mon", "allow profile osd", "osd", "allow *"],
        });
        deploy.keyring = Some(check_mon_command(cluster, &cmd).await?.out);
        Ok(())
    }

    async fn ok_to_stop(
        &self,
        cluster: &dyn ClusterClient,
        daemons: &[DaemonDescription],
        _all_of_type: &[DaemonDescription],
    ) -> Result<bool, CoreError> {
        let ids = daemons
            .iter()
            .filter_map(|d| d.daemon_id.parse::<u32>().ok())
            .map(Value::from)
            .collect();
        cluster_ok_to_stop(cluster, "osd ok-to-stop", ids).await
    }

    /// The removal queue revokes OSD keys itself
    async fn post_remove(
        &self,
        _cluster: &dyn ClusterClient,
        _daemon: &DaemonDescription,
    ) -> Result<(), CoreError> {
        Ok(())
    }
}

/// `osd create` answers with either `{"osdid": N}` or a bare number
fn parse_osd_id(out: &str) -> Option<String> {
    let value: Value = serde_json::from_str(out.trim()).ok()?;
    let id = value
        .get("osdid")
        .and_then(Value::as_u64)
        .or_else(|| value.as_u64())?;
    Some(id.to_string())
}

// ============================================================================
// monitoring stack
// ============================================================================

/// Prometheus, Grafana and Alertmanager
pub struct MonitoringService {
    service_type: ServiceType,
    port: u16,
    /// Dashboard setting pointing at this service
    dashboard_prefix: &'static str,
    scheme: &'static str,
}

impl MonitoringService {
    #[must_use]
    pub fn prometheus() -> Self {
        Self {
            service_type: ServiceType::Prometheus,
            port: 9095,
            dashboard_prefix: "dashboard set-prometheus-api-host",
            scheme: "http",
        }
    }

    #[must_use]
    pub fn grafana() -> Self {
        Self {
            service_type: ServiceType::Grafana,
            port: 3000,
            dashboard_prefix: "dashboard set-grafana-api-url",
            scheme: "https",
        }
    }

    #[must_use]
    pub fn alertmanager() -> Self {
        Self {
            service_type: ServiceType::Alertmanager,
            port: 9093,
            dashboard_prefix: "dashboard set-alertmanager-api-host",
            scheme: "http",
        }
    }
}

#[async_trait]
impl ServiceHandler for MonitoringService {
    fn service_type(&self) -> ServiceType {
        self.service_type.clone()
    }

    fn ports(&self) -> Vec<u16> {
        vec![self.port]
    }

    fn auth_entity(&self, _daemon_id: &str) -> Option<String> {
        None
    }

    fn requires_post_actions(&self) -> bool {
        true
    }

    async fn config_dashboard(
        &self,
        cluster: &dyn ClusterClient,
        daemons: &[DaemonDescription],
    ) -> Result<(), CoreError> {
        let Some(target) = daemons
            .iter()
            .filter(|d| d.status == DaemonStatus::Running)
            .min_by(|a, b| a.hostname.cmp(&b.hostname))
        else {
            return Ok(());
        };
        let url = format!("{}://{}:{}", self.scheme, target.hostname, self.port);
        check_mon_command(
            cluster,
            &json!({"prefix": self.dashboard_prefix, "value": url}),
        )
        .await?;
        info!(service = %self.service_type, url = %url, "configured dashboard");
        Ok(())
    }
}

// ============================================================================
// everything else
// ============================================================================

/// Stateless daemons whose only differences are their key and ports
pub struct GenericService {
    service_type: ServiceType,
    ports: Vec<u16>,
}

impl GenericService {
    #[must_use]
    pub fn new(service_type: ServiceType, ports: Vec<u16>) -> Self {
        Self {
            service_type,
            ports,
        }
    }
}

#[async_trait]
impl ServiceHandler for GenericService {
    fn service_type(&self) -> ServiceType {
        self.service_type.clone()
    }

    fn ports(&self) -> Vec<u16> {
        self.ports.clone()
    }

    fn auth_entity(&self, daemon_id: &str) -> Option<String> {
        match self.service_type {
            ServiceType::NodeExporter | ServiceType::Container => None,
            _ => Some(format!("client.{}.{daemon_id}", self.service_type)),
        }
    }

    fn generate_config(
        &self,
        spec: &ServiceSpec,
        deploy: &DaemonDeploySpec,
    ) -> BTreeMap<String, String> {
        let mut config = spec.config.clone();
        if self.service_type == ServiceType::Rgw {
            let port = deploy.ports.first().copied().unwrap_or(80);
            config
                .entry("rgw_frontends".to_string())
                .or_insert_with(|| format!("beast port={port}"));
        }
        config
    }
}

/// Handlers for every known service type
pub struct ServiceRegistry {
    handlers: HashMap<ServiceType, Box<dyn ServiceHandler>>,
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        let handlers: Vec<Box<dyn ServiceHandler>> = vec![
            Box::new(MonService),
            Box::new(MgrService),
            Box::new(MdsService),
            Box::new(OsdService),
            Box::new(MonitoringService::prometheus()),
            Box::new(MonitoringService::grafana()),
            Box::new(MonitoringService::alertmanager()),
            Box::new(GenericService::new(ServiceType::Crash, Vec::new())),
            Box::new(GenericService::new(ServiceType::Rgw, vec![80])),
            Box::new(GenericService::new(ServiceType::Nfs, vec![2049])),
            Box::new(GenericService::new(ServiceType::Iscsi, vec![5000])),
            Box::new(GenericService::new(ServiceType::RbdMirror, Vec::new())),
            Box::new(GenericService::new(ServiceType::NodeExporter, vec![9100])),
            Box::new(GenericService::new(ServiceType::Container, Vec::new())),
        ];
        Self {
            handlers: handlers
                .into_iter()
                .map(|h| (h.service_type(), h))
                .collect(),
        }
    }
}

impl ServiceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    /// Returns `UnsupportedService` for types without a handler.
    pub fn get(&self, service_type: &ServiceType) -> Result<&dyn ServiceHandler, CoreError> {
        self.handlers
            .get(service_type)
            .map(AsRef::as_ref)
            .ok_or_else(|| CoreError::UnsupportedService(service_type.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::cluster::MonCommandResult;

    #[derive(Default)]
    struct RecordingCluster {
        commands: Mutex<Vec<Value>>,
        refuse: bool,
    }

    #[async_trait]
    impl ClusterClient for RecordingCluster {
        async fn mon_command(&self, cmd: &Value) -> Result<MonCommandResult, CoreError> {
            self.commands.lock().unwrap().push(cmd.clone());
            if cmd["prefix"] == "osd create" {
                return Ok(MonCommandResult::ok(r#"{"osdid": 7}"#));
            }
            if self.refuse && cmd["prefix"].as_str().is_some_and(|p| p.ends_with("ok-to-stop")) {
                return Ok(MonCommandResult::error(-16, "EBUSY"));
            }
            Ok(MonCommandResult::ok("[client]\n\tkey = abc"))
        }
    }

    fn mgr(id: &str, status: DaemonStatus) -> DaemonDescription {
        DaemonDescription::new(ServiceType::Mgr, id, id, "mgr").with_status(status)
    }

    #[test]
    fn test_registry_covers_known_types() {
        let registry = ServiceRegistry::new();
        for service_type in &ServiceType::KNOWN {
            assert_eq!(&registry.get(service_type).unwrap().service_type(), service_type);
        }
        assert!(matches!(
            registry.get(&ServiceType::from("keepalived")),
            Err(CoreError::UnsupportedService(_))
        ));
    }

    #[test]
    fn test_default_placements() {
        let registry = ServiceRegistry::new();
        assert_eq!(
            registry.get(&ServiceType::Mon).unwrap().default_placement(),
            PlacementSpec::count(5)
        );
        assert_eq!(
            registry.get(&ServiceType::Mgr).unwrap().default_placement(),
            PlacementSpec::count(2)
        );
        assert_eq!(
            registry.get(&ServiceType::Crash).unwrap().default_placement(),
            PlacementSpec::count(1)
        );
    }

    #[tokio::test]
    async fn test_osd_prepare_create_allocates_id() {
        let cluster = RecordingCluster::default();
        let mut deploy = DaemonDeploySpec::new(ServiceType::Osd, "", "host1", "osd.default");
        OsdService.prepare_create(&cluster, &mut deploy).await.unwrap();
        assert_eq!(deploy.name(), "osd.7");
        let commands = cluster.commands.lock().unwrap();
        assert_eq!(commands[1]["entity"], "osd.7");
    }

    #[tokio::test]
    async fn test_mds_ok_to_stop_asks_cluster() {
        let cluster = RecordingCluster {
            refuse: true,
            ..RecordingCluster::default()
        };
        let daemon = DaemonDescription::new(ServiceType::Mds, "fs.host1", "host1", "mds.fs");
        assert!(!MdsService.ok_to_stop(&cluster, &[daemon], &[]).await.unwrap());
        let commands = cluster.commands.lock().unwrap();
        assert_eq!(commands[0]["prefix"], "mds ok-to-stop");
        assert_eq!(commands[0]["ids"], json!(["fs.host1"]));
    }

    #[tokio::test]
    async fn test_mgr_ok_to_stop_needs_another_running_mgr() {
        let cluster = RecordingCluster::default();
        let a = mgr("a", DaemonStatus::Running);
        let b = mgr("b", DaemonStatus::Stopped);
        let all = vec![a.clone(), b.clone()];
        assert!(!MgrService.ok_to_stop(&cluster, &[a.clone()], &all).await.unwrap());
        assert!(MgrService.ok_to_stop(&cluster, &[b], &all).await.unwrap());
    }

    #[tokio::test]
    async fn test_prometheus_dashboard_url() {
        let cluster = RecordingCluster::default();
        let daemon = DaemonDescription::new(ServiceType::Prometheus, "host2", "host2", "prometheus")
            .with_status(DaemonStatus::Running);
        MonitoringService::prometheus()
            .config_dashboard(&cluster, &[daemon])
            .await
            .unwrap();
        let commands = cluster.commands.lock().unwrap();
        assert_eq!(commands[0]["prefix"], "dashboard set-prometheus-api-host");
        assert_eq!(commands[0]["value"], "http://host2:9095");
    }

    #[test]
    fn test_parse_osd_id() {
        assert_eq!(parse_osd_id("{\"osdid\": 3}").as_deref(), Some("3"));
        assert_eq!(parse_osd_id("12\n").as_deref(), Some("12"));
        assert_eq!(parse_osd_id("nope"), None);
    }
}
