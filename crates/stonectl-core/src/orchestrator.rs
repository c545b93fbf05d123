//! The orchestrator context and its operator operations
//!
//! [`Orchestrator`] owns every store, the host cache and the collaborator
//! handles. Nothing in it is global: the actor holds the single instance and
//! its mailbox serializes operator calls with reconciliation ticks.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use stonectl_api::host::ADMIN_LABEL;
use stonectl_api::responses::{ServiceDescription, ServiceStatus};
use stonectl_api::{
    DaemonAction, DaemonDescription, DaemonStatus, EventLevel, HealthCheck, HostSpec, HostStatus,
    OrchestratorEvent, OsdRemoval, PlacementSpec, ServiceSpec, ServiceType,
};
use stonectl_exec::CommandExecutor;
use tracing::{error, info, warn};

use crate::agent::HostAgent;
use crate::cache::HostCache;
use crate::cluster::{ClusterClient, ConfigOptionCache};
use crate::config::OrchestratorConfig;
use crate::error::CoreError;
use crate::events::EventLog;
use crate::inventory::Inventory;
use crate::keyrings::ClientKeyringStore;
use crate::migrations::{MigrationContext, Migrations};
use crate::osd::OsdRemovalQueue;
use crate::placement::{HostAssignment, resolve};
use crate::registry::DaemonRegistry;
use crate::services::{DaemonDeploySpec, ServiceHandler, ServiceRegistry};
use crate::spec_store::SpecStore;
use crate::store::KvStore;

/// External collaborators the orchestrator acts through
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn KvStore>,
    pub executor: Arc<dyn CommandExecutor>,
    pub cluster: Arc<dyn ClusterClient>,
}

/// All orchestrator state, passed explicitly to every operation
pub struct Orchestrator {
    pub(crate) config: OrchestratorConfig,
    pub(crate) executor: Arc<dyn CommandExecutor>,
    pub(crate) cluster: Arc<dyn ClusterClient>,
    pub(crate) agent: HostAgent,
    pub(crate) services: Arc<ServiceRegistry>,
    pub(crate) inventory: Inventory,
    pub(crate) specs: SpecStore,
    pub(crate) keyrings: ClientKeyringStore,
    pub(crate) cache: HostCache,
    pub(crate) registry: DaemonRegistry,
    pub(crate) osd_queue: OsdRemovalQueue,
    pub(crate) migrations: Migrations,
    pub(crate) events: EventLog,
    pub(crate) config_options: ConfigOptionCache,
    /// Health checks published by the last tick
    pub(crate) health: Vec<HealthCheck>,
    /// Daemon types whose post actions have not run since their last deploy
    pub(crate) pending_post_actions: BTreeSet<ServiceType>,
    /// Consecutive ok-to-stop refusals per daemon name
    pub(crate) stop_refusals: BTreeMap<String, u32>,
    pub(crate) migration_error: Option<String>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("inventory", &self.inventory)
            .field("specs", &self.specs)
            .field("migrations", &self.migrations)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Load every store, register known hosts and run startup migrations
    ///
    /// A failing startup migration is kept for the health report instead of
    /// aborting; the next tick retries it.
    ///
    /// # Errors
    /// Returns store failures (including corrupt documents outside the
    /// spec store).
    pub async fn open(
        config: OrchestratorConfig,
        collaborators: Collaborators,
    ) -> Result<Self, CoreError> {
        let Collaborators {
            store,
            executor,
            cluster,
        } = collaborators;

        let inventory = Inventory::load(store.clone())?;
        let specs = SpecStore::load(store.clone())?;
        let keyrings = ClientKeyringStore::load(store.clone())?;
        let osd_queue = OsdRemovalQueue::load(store.clone())?;
        let migrations = Migrations::load(store, &specs)?;

        for host in inventory.hosts() {
            if let Err(e) = executor.register_host(&host.hostname, &host.addr).await {
                warn!(host = %host.hostname, error = %e, "failed to register host with executor");
            }
        }

        let mut cache = HostCache::new();
        cache.prime(inventory.hosts().map(|h| h.hostname.as_str()));

        let mut this = Self {
            agent: HostAgent::new(
                executor.clone(),
                config.agent_binary.clone(),
                config.probe_timeout(),
            ),
            events: EventLog::new(config.event_history),
            config,
            executor,
            cluster,
            services: Arc::new(ServiceRegistry::new()),
            inventory,
            specs,
            keyrings,
            cache,
            registry: DaemonRegistry::new(),
            osd_queue,
            migrations,
            config_options: ConfigOptionCache::new(),
            health: Vec::new(),
            pending_post_actions: BTreeSet::new(),
            stop_refusals: BTreeMap::new(),
            migration_error: None,
        };

        if let Err(e) = this.run_migrations(true) {
            error!(error = %e, "startup migration failed");
        }
        info!(
            hosts = this.inventory.len(),
            specs = this.specs.all_specs().len(),
            migration = this.migrations.current(),
            "orchestrator ready"
        );
        Ok(this)
    }

    /// Apply pending migrations; `Ok(true)` once all of them are done
    pub(crate) fn run_migrations(&mut self, startup: bool) -> Result<bool, CoreError> {
        let mut ctx = MigrationContext {
            inventory: &self.inventory,
            specs: &mut self.specs,
            keyrings: &mut self.keyrings,
            cache: &self.cache,
        };
        match self.migrations.migrate(startup, &mut ctx) {
            Ok(done) => {
                self.migration_error = None;
                Ok(done)
            }
            Err(e) => {
                self.migration_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    #[must_use]
    pub fn migration_current(&self) -> u32 {
        self.migrations.current()
    }

    /// Why the pending migration is still waiting, if it is
    #[must_use]
    pub fn migration_waiting(&self) -> Option<&str> {
        self.migrations.waiting()
    }

    /// Why the last migration attempt failed, if it did
    #[must_use]
    pub fn migration_error(&self) -> Option<&str> {
        self.migration_error.as_deref()
    }

    #[must_use]
    pub fn cache(&self) -> &HostCache {
        &self.cache
    }

    #[must_use]
    pub fn registry(&self) -> &DaemonRegistry {
        &self.registry
    }

    #[must_use]
    pub fn spec_store(&self) -> &SpecStore {
        &self.specs
    }

    // ------------------------------------------------------------------
    // host reachability
    // ------------------------------------------------------------------

    /// Hosts that cannot take part in reconciliation right now
    ///
    /// Offline and maintenance hosts, hosts that failed a probe this tick,
    /// and hosts without a recent enough daemon refresh.
    #[must_use]
    pub fn unreachable_hosts(&self, now: DateTime<Utc>) -> BTreeSet<String> {
        let stale_after = self.config.host_stale_after();
        self.inventory
            .hosts()
            .filter(|h| {
                h.status != HostStatus::Normal
                    || self.cache.is_failed(&h.hostname)
                    || self.cache.is_stale(&h.hostname, now, stale_after)
            })
            .map(|h| h.hostname.clone())
            .collect()
    }

    /// Normal, fresh hosts that did not fail a probe this tick
    #[must_use]
    pub fn schedulable_hosts(&self, now: DateTime<Utc>) -> Vec<HostSpec> {
        let unreachable = self.unreachable_hosts(now);
        self.inventory
            .hosts()
            .filter(|h| !unreachable.contains(&h.hostname))
            .cloned()
            .collect()
    }

    /// Daemons of a service the orchestrator is responsible for
    ///
    /// Unmanaged daemons that merely share the service name are left out,
    /// so reconciliation never removes them.
    pub(crate) fn owned_daemons(&self, service_name: &str) -> Vec<DaemonDescription> {
        self.cache
            .get_daemons_by_service(service_name)
            .into_iter()
            .filter(|d| d.managed || self.registry.is_registered(&d.name()))
            .collect()
    }

    /// The spec's placement, or the handler default when the spec has none
    pub(crate) fn effective_placement(
        spec: &ServiceSpec,
        handler: &dyn ServiceHandler,
    ) -> PlacementSpec {
        if spec.placement.is_empty() {
            handler.default_placement()
        } else {
            spec.placement.clone()
        }
    }

    // ------------------------------------------------------------------
    // daemon primitives shared by operator calls and the serve loop
    // ------------------------------------------------------------------

    /// Prepare, dispatch and record one daemon deploy
    ///
    /// The daemon enters the cache as `Starting` and in flight; the next
    /// refresh of its host confirms it.
    pub(crate) async fn create_daemon(
        &mut self,
        handler: &dyn ServiceHandler,
        spec: &ServiceSpec,
        mut deploy: DaemonDeploySpec,
    ) -> Result<DaemonDescription, CoreError> {
        handler
            .prepare_create(self.cluster.as_ref(), &mut deploy)
            .await?;
        deploy.config = handler.generate_config(spec, &deploy);
        deploy
            .extra_container_args
            .clone_from(&spec.extra_container_args);

        self.agent.deploy(&deploy).await?;

        let now = Utc::now();
        let dd = deploy.to_description(now);
        let name = deploy.name();
        self.cache.record_deploy(dd.clone(), now);
        if let Some(device) = &deploy.device {
            self.cache.mark_device_used(&deploy.hostname, device, &name);
        }
        self.events.record(OrchestratorEvent::daemon(
            &name,
            EventLevel::Info,
            format!("Deployed {name} on host '{}'", deploy.hostname),
        ));
        if handler.requires_post_actions() {
            self.pending_post_actions.insert(deploy.daemon_type.clone());
        }
        self.registry.register_daemon(deploy);
        Ok(dd)
    }

    /// Remove one daemon from its host
    ///
    /// `revoke` runs the handler's cluster-side cleanup (auth removal, mon
    /// removal); duplicates are removed without it since a survivor still
    /// uses the same identity.
    pub(crate) async fn remove_daemon(
        &mut self,
        handler: &dyn ServiceHandler,
        daemon: &DaemonDescription,
        revoke: bool,
    ) -> Result<(), CoreError> {
        let name = daemon.name();
        self.agent.remove_daemon(&daemon.hostname, &name).await?;
        self.cache.rm_daemon(&daemon.hostname, &name);
        self.stop_refusals.remove(&name);

        if revoke {
            self.registry.unregister(&name);
            if let Err(e) = handler.post_remove(self.cluster.as_ref(), daemon).await {
                warn!(daemon = %name, error = %e, "post-remove cleanup failed");
            }
        }
        self.events.record(OrchestratorEvent::daemon(
            &name,
            EventLevel::Info,
            format!("Removed {name} from host '{}'", daemon.hostname),
        ));
        Ok(())
    }

    // ------------------------------------------------------------------
    // services
    // ------------------------------------------------------------------

    /// Store specs for the serve loop to converge on
    ///
    /// Every spec is validated before any is saved.
    ///
    /// # Errors
    /// Returns `InvalidSpec` or `UnsupportedService` without saving
    /// anything, or a store failure.
    pub fn apply(&mut self, specs: Vec<ServiceSpec>) -> Result<Vec<String>, CoreError> {
        for spec in &specs {
            spec.validate()?;
            self.services.get(&spec.service_type)?;
        }
        let mut results = Vec::with_capacity(specs.len());
        for spec in specs {
            let name = spec.service_name();
            let existed = self.specs.contains(&name);
            self.specs.save(spec)?;
            let verb = if existed { "updated" } else { "created" };
            self.events.record(OrchestratorEvent::service(
                &name,
                EventLevel::Info,
                format!("service was {verb}"),
            ));
            results.push(format!("Scheduled {name} update..."));
        }
        Ok(results)
    }

    /// Delete a service spec; its daemons are drained by the serve loop
    ///
    /// # Errors
    /// Returns `Refused` for mon and mgr, `ServiceNotFound` on miss, or a
    /// store failure.
    pub fn remove_service(&mut self, service_name: &str) -> Result<String, CoreError> {
        let service_type = ServiceType::from(service_name.split('.').next().unwrap_or_default());
        if matches!(service_type, ServiceType::Mon | ServiceType::Mgr) {
            return Err(CoreError::Refused(format!(
                "Unable to remove {service_name} service.\n\
                 Note, you might want to mark the {service_name} service as \"unmanaged\""
            )));
        }
        let has_daemons = !self.cache.get_daemons_by_service(service_name).is_empty();
        let purged = self.specs.rm(service_name, has_daemons)?;
        if purged {
            self.events.forget(service_name);
        } else {
            self.events.record(OrchestratorEvent::service(
                service_name,
                EventLevel::Info,
                "service was marked for removal",
            ));
        }
        Ok(format!("Removed service {service_name}"))
    }

    /// Specs with their observed status
    #[must_use]
    pub fn describe_service(
        &self,
        service_type: Option<&str>,
        service_name: Option<&str>,
    ) -> Vec<ServiceDescription> {
        let hosts: Vec<HostSpec> = self.inventory.hosts().cloned().collect();
        self.specs
            .all_specs()
            .values()
            .filter(|e| service_type.is_none_or(|t| e.spec.service_type.as_str() == t))
            .filter(|e| service_name.is_none_or(|n| e.spec.service_name() == n))
            .map(|entry| {
                let spec = &entry.spec;
                let daemons = self.cache.get_daemons_by_service(&spec.service_name());
                let placement = match self.services.get(&spec.service_type) {
                    Ok(handler) => Self::effective_placement(spec, handler),
                    Err(_) => spec.placement.clone(),
                };
                let size = match placement.count {
                    Some(count) => count as usize,
                    None => resolve(&placement, &hosts, &daemons).map_or(0, |slots| slots.len()),
                };
                ServiceDescription {
                    spec: spec.clone(),
                    status: ServiceStatus {
                        running: daemons
                            .iter()
                            .filter(|d| d.status == DaemonStatus::Running)
                            .count(),
                        size,
                        created: Some(entry.created),
                        deleted: entry.deleted,
                        last_refresh: daemons.iter().filter_map(|d| d.last_refresh).max(),
                    },
                }
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // daemons
    // ------------------------------------------------------------------

    /// Deploy the daemons of `spec` right away, outside reconciliation
    ///
    /// # Errors
    /// Returns validation, placement or deploy failures; daemons deployed
    /// before a failure stay deployed.
    pub async fn add_daemon(&mut self, spec: ServiceSpec) -> Result<Vec<String>, CoreError> {
        spec.validate()?;
        let services = Arc::clone(&self.services);
        let handler = services.get(&spec.service_type)?;
        let hosts: Vec<HostSpec> = self.inventory.hosts().cloned().collect();
        let unreachable = self.unreachable_hosts(Utc::now());
        let placement = Self::effective_placement(&spec, handler);
        let placed = HostAssignment::new(&placement, &hosts, &unreachable, &[]).place()?;

        let mut taken: BTreeSet<String> = self
            .cache
            .get_daemons_by_type(&spec.service_type)
            .iter()
            .map(DaemonDescription::name)
            .collect();
        taken.extend(self.registry.names().cloned());

        let mut results = Vec::new();
        for slot in placed.slots {
            let daemon_id = slot.daemon_id(&spec.service_type, spec.service_id.as_deref(), &taken);
            let deploy = DaemonDeploySpec::new(
                spec.service_type.clone(),
                daemon_id,
                &slot.hostname,
                spec.service_name(),
            );
            let dd = self.create_daemon(handler, &spec, deploy).await?;
            taken.insert(dd.name());
            results.push(format!("Deployed {} on host '{}'", dd.name(), dd.hostname));
        }
        Ok(results)
    }

    /// Remove daemons by name
    ///
    /// Without `force` each removal must pass the handler's ok-to-stop
    /// check first.
    ///
    /// # Errors
    /// Returns `DaemonNotFound` before removing anything if a name is
    /// unknown; `Refused` when ok-to-stop says no.
    pub async fn remove_daemons(
        &mut self,
        names: &[String],
        force: bool,
    ) -> Result<Vec<String>, CoreError> {
        let daemons = names
            .iter()
            .map(|name| {
                self.cache
                    .get_daemon(name)
                    .cloned()
                    .ok_or_else(|| CoreError::DaemonNotFound(name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let services = Arc::clone(&self.services);
        let mut results = Vec::with_capacity(daemons.len());
        for daemon in daemons {
            let handler = services.get(&daemon.daemon_type)?;
            if !force {
                let all = self.cache.get_daemons_by_type(&daemon.daemon_type);
                let ok = handler
                    .ok_to_stop(self.cluster.as_ref(), std::slice::from_ref(&daemon), &all)
                    .await?;
                if !ok {
                    return Err(CoreError::Refused(format!(
                        "Unable to remove {}: it is not safe to stop it now",
                        daemon.name()
                    )));
                }
            }
            self.remove_daemon(handler, &daemon, true).await?;
            results.push(format!(
                "Removed {} from host '{}'",
                daemon.name(),
                daemon.hostname
            ));
        }
        Ok(results)
    }

    /// Queue a lifecycle action; the serve loop runs it on the next tick
    ///
    /// A later call for the same daemon replaces the pending action.
    ///
    /// # Errors
    /// Returns `DaemonNotFound` for unknown daemons.
    pub fn schedule_daemon_action(
        &mut self,
        name: &str,
        action: DaemonAction,
    ) -> Result<String, CoreError> {
        let host = self
            .cache
            .get_daemon(name)
            .map(|d| d.hostname.clone())
            .ok_or_else(|| CoreError::DaemonNotFound(name.to_string()))?;
        if let Some(previous) = self.cache.schedule_daemon_action(&host, name, action) {
            info!(daemon = %name, %previous, %action, "replaced pending daemon action");
        }
        self.events.record(OrchestratorEvent::daemon(
            name,
            EventLevel::Info,
            format!("Scheduled to {action} {name} on host '{host}'"),
        ));
        Ok(format!("Scheduled to {action} {name} on host '{host}'"))
    }

    /// Drop a pending action; returns what was pending, if anything
    ///
    /// # Errors
    /// Returns `DaemonNotFound` for unknown daemons.
    pub fn cancel_daemon_action(&mut self, name: &str) -> Result<Option<DaemonAction>, CoreError> {
        let host = self
            .cache
            .get_daemon(name)
            .map(|d| d.hostname.clone())
            .ok_or_else(|| CoreError::DaemonNotFound(name.to_string()))?;
        Ok(self.cache.cancel_daemon_action(&host, name))
    }

    /// Cached daemons, optionally filtered, with their event history
    #[must_use]
    pub fn list_daemons(
        &self,
        host: Option<&str>,
        service_type: Option<&str>,
    ) -> Vec<DaemonDescription> {
        let daemons = match host {
            Some(host) => self.cache.get_daemons_by_host(host),
            None => self.cache.get_daemons(),
        };
        let mut daemons: Vec<_> = daemons
            .into_iter()
            .filter(|d| service_type.is_none_or(|t| d.daemon_type.as_str() == t))
            .map(|mut d| {
                d.events = self.events.for_subject(&d.name());
                d
            })
            .collect();
        daemons.sort_by(|a, b| (a.name(), &a.hostname).cmp(&(b.name(), &b.hostname)));
        daemons
    }

    // ------------------------------------------------------------------
    // hosts
    // ------------------------------------------------------------------

    /// # Errors
    /// Returns executor registration or store failures.
    pub async fn add_host(&mut self, spec: HostSpec) -> Result<String, CoreError> {
        self.executor
            .register_host(&spec.hostname, &spec.addr)
            .await?;
        let hostname = spec.hostname.clone();
        self.inventory.add_host(spec)?;
        self.cache.invalidate_host_daemons(&hostname);
        Ok(format!("Added host '{hostname}'"))
    }

    /// # Errors
    /// Without `force`, returns `Refused` for the last `_admin` host or a
    /// host still running daemons.
    pub async fn remove_host(&mut self, hostname: &str, force: bool) -> Result<String, CoreError> {
        self.inventory.require(hostname)?;
        if !force {
            if self.inventory.is_last_admin(hostname) {
                return Err(CoreError::Refused(format!(
                    "Host {hostname} is the last host with the '{ADMIN_LABEL}' label"
                )));
            }
            let daemons = self.cache.get_daemons_by_host(hostname);
            if !daemons.is_empty() {
                let names: Vec<String> = daemons.iter().map(DaemonDescription::name).collect();
                return Err(CoreError::Refused(format!(
                    "Not allowed to remove {hostname} from cluster. \
                     The following daemons are running in the host: {}",
                    names.join(", ")
                )));
            }
        }
        self.inventory.remove_host(hostname)?;
        self.cache.rm_host(hostname);
        self.executor.forget_host(hostname).await;
        Ok(format!("Removed host '{hostname}'"))
    }

    #[must_use]
    pub fn list_hosts(&self) -> Vec<HostSpec> {
        self.inventory.hosts().cloned().collect()
    }

    /// # Errors
    /// Returns `HostNotFound` or a store failure.
    pub fn add_host_label(&mut self, hostname: &str, label: &str) -> Result<String, CoreError> {
        self.inventory.add_label(hostname, label)?;
        Ok(format!("Added label {label} to host {hostname}"))
    }

    /// # Errors
    /// Returns `HostNotFound`, `Refused` when removing `_admin` from the
    /// last admin host, or a store failure.
    pub fn remove_host_label(&mut self, hostname: &str, label: &str) -> Result<String, CoreError> {
        if label == ADMIN_LABEL && self.inventory.is_last_admin(hostname) {
            return Err(CoreError::Refused(format!(
                "Host {hostname} is the last host with the '{ADMIN_LABEL}' label"
            )));
        }
        self.inventory.remove_label(hostname, label)?;
        Ok(format!("Removed label {label} from host {hostname}"))
    }

    /// Stop every daemon on a host and exclude it from reconciliation
    ///
    /// # Errors
    /// Without `force`, returns `Refused` when the host is the last admin
    /// host or a daemon on it fails its ok-to-stop check.
    pub async fn enter_host_maintenance(
        &mut self,
        hostname: &str,
        force: bool,
    ) -> Result<String, CoreError> {
        let status = self.inventory.require(hostname)?.status;
        if status == HostStatus::Maintenance {
            return Ok(format!("Host {hostname} is already in maintenance mode"));
        }
        if !force {
            if self.inventory.is_last_admin(hostname) {
                return Err(CoreError::Refused(format!(
                    "Unable to put {hostname} into maintenance: it is the last '{ADMIN_LABEL}' host"
                )));
            }
            let mut by_type: BTreeMap<ServiceType, Vec<DaemonDescription>> = BTreeMap::new();
            for daemon in self.cache.get_daemons_by_host(hostname) {
                by_type
                    .entry(daemon.daemon_type.clone())
                    .or_default()
                    .push(daemon);
            }
            for (daemon_type, daemons) in by_type {
                let Ok(handler) = self.services.get(&daemon_type) else {
                    continue;
                };
                let all = self.cache.get_daemons_by_type(&daemon_type);
                if !handler
                    .ok_to_stop(self.cluster.as_ref(), &daemons, &all)
                    .await?
                {
                    return Err(CoreError::Refused(format!(
                        "Unable to put {hostname} into maintenance: \
                         stopping its {daemon_type} daemon(s) is not safe"
                    )));
                }
            }
        }
        self.agent.host_maintenance(hostname, true).await?;
        self.inventory
            .set_status(hostname, HostStatus::Maintenance)?;
        Ok(format!(
            "Daemons for host '{hostname}' stopped, host is in maintenance mode"
        ))
    }

    /// # Errors
    /// Returns `HostNotFound`, agent or store failures.
    pub async fn exit_host_maintenance(&mut self, hostname: &str) -> Result<String, CoreError> {
        let status = self.inventory.require(hostname)?.status;
        if status != HostStatus::Maintenance {
            return Ok(format!("Host {hostname} is not in maintenance mode"));
        }
        self.agent.host_maintenance(hostname, false).await?;
        self.inventory.set_status(hostname, HostStatus::Normal)?;
        self.cache.invalidate_host_daemons(hostname);
        Ok(format!("Host {hostname} exited maintenance mode"))
    }

    /// Last gathered facts of a host
    ///
    /// # Errors
    /// Returns `HostNotFound` for unknown hosts.
    pub fn get_facts(
        &self,
        hostname: &str,
    ) -> Result<BTreeMap<String, serde_json::Value>, CoreError> {
        self.inventory.require(hostname)?;
        Ok(self.cache.get_facts(hostname).cloned().unwrap_or_default())
    }

    // ------------------------------------------------------------------
    // OSD removal
    // ------------------------------------------------------------------

    /// Queue OSDs for drain and removal
    ///
    /// # Errors
    /// Returns `DaemonNotFound` before queueing anything if an OSD is
    /// unknown, or a store failure.
    pub fn remove_osds(
        &mut self,
        ids: &[u32],
        replace: bool,
        force: bool,
        zap: bool,
    ) -> Result<Vec<String>, CoreError> {
        let hosts = ids
            .iter()
            .map(|id| {
                let name = format!("osd.{id}");
                self.cache
                    .get_daemon(&name)
                    .map(|d| (*id, d.hostname.clone()))
                    .ok_or(CoreError::DaemonNotFound(name))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut results = Vec::with_capacity(hosts.len());
        for (id, hostname) in hosts {
            let mut osd = OsdRemoval::new(id, hostname);
            osd.replace = replace;
            osd.force = force;
            osd.zap = zap;
            self.osd_queue.enqueue(osd)?;
            results.push(format!("Scheduled osd.{id} for removal"));
        }
        Ok(results)
    }

    /// # Errors
    /// Returns cluster or store failures.
    pub async fn stop_remove_osds(&mut self, ids: &[u32]) -> Result<Vec<String>, CoreError> {
        let stopped = self
            .osd_queue
            .stop(self.cluster.as_ref(), ids)
            .await?;
        Ok(stopped
            .into_iter()
            .map(|id| format!("Stopped removal of osd.{id}"))
            .collect())
    }

    #[must_use]
    pub fn remove_osds_status(&self) -> Vec<OsdRemoval> {
        self.osd_queue.all()
    }

    // ------------------------------------------------------------------
    // status
    // ------------------------------------------------------------------

    #[must_use]
    pub fn health_checks(&self) -> &[HealthCheck] {
        &self.health
    }

    #[must_use]
    pub fn events(&self, subject: Option<&str>) -> Vec<OrchestratorEvent> {
        match subject {
            Some(subject) => self.events.for_subject(subject),
            None => self.events.all(),
        }
    }
}
