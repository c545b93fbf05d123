//! Stages 3 to 5: converge every service on its spec

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::json;
use stonectl_api::health::codes;
use stonectl_api::{
    DaemonDescription, EventLevel, HostSpec, OrchestratorEvent, OsdRemoval, ServiceSpec,
    ServiceType,
};
use tracing::{debug, info, instrument, warn};

use super::Pass;
use crate::cluster::check_mon_command;
use crate::error::CoreError;
use crate::keyrings::keyring_path;
use crate::orchestrator::Orchestrator;
use crate::placement::HostAssignment;
use crate::services::{DaemonDeploySpec, ServiceHandler};
use crate::spec_store::SpecEntry;

impl Orchestrator {
    /// Walk every spec in service-name order and converge it
    ///
    /// A failing service is reported and skipped; the pass continues with
    /// the next one.
    ///
    /// # Errors
    /// Only store failures abort the stage.
    #[instrument(skip_all)]
    pub(crate) async fn apply_all_services(&mut self, pass: &mut Pass) -> Result<(), CoreError> {
        let entries: Vec<SpecEntry> = self.specs.all_specs().values().cloned().collect();
        for entry in entries {
            let name = entry.spec.service_name();
            if entry.spec.unmanaged {
                debug!(service = %name, "skipping unmanaged service");
                continue;
            }
            let result = if entry.is_deleted() {
                self.drain_deleted_service(&entry.spec, pass).await
            } else {
                self.apply_service(&entry.spec, pass).await
            };
            match result {
                Ok(()) => {}
                Err(e @ CoreError::Store(_)) => return Err(e),
                Err(e) => {
                    warn!(service = %name, error = %e, "failed to apply service");
                    pass.health
                        .add(codes::APPLY_SPEC_FAIL, format!("Failed to apply {name}: {e}"));
                    self.events.record(OrchestratorEvent::service(
                        &name,
                        EventLevel::Error,
                        format!("Failed to apply: {e}"),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Place, diff, deploy and remove the daemons of one service
    async fn apply_service(&mut self, spec: &ServiceSpec, pass: &mut Pass) -> Result<(), CoreError> {
        let services = Arc::clone(&self.services);
        let handler = services.get(&spec.service_type)?;
        if spec.service_type == ServiceType::Osd {
            return self.apply_osd_service(spec, handler, pass).await;
        }

        let name = spec.service_name();
        let placement = Self::effective_placement(spec, handler);
        let existing = self.owned_daemons(&name);
        let hosts: Vec<HostSpec> = self.inventory.hosts().cloned().collect();
        let counts = self.cache.managed_daemon_counts();
        let placed = HostAssignment::new(&placement, &hosts, &pass.unreachable, &existing)
            .with_daemon_counts(&counts)
            .place()?;

        if placed.shortfall > 0 {
            pass.health.add(
                codes::APPLY_SPEC_FAIL,
                format!(
                    "{name}: placement asks for {} more daemon(s) than there are suitable hosts",
                    placed.shortfall
                ),
            );
        }

        let effective = self.validated_spec(spec, pass).await;

        let mut taken: BTreeSet<String> = self
            .cache
            .get_daemons_by_type(&spec.service_type)
            .iter()
            .map(DaemonDescription::name)
            .collect();
        taken.extend(self.registry.names().cloned());

        for slot in placed.to_add {
            let daemon_id = slot.daemon_id(&spec.service_type, spec.service_id.as_deref(), &taken);
            let deploy = DaemonDeploySpec::new(
                spec.service_type.clone(),
                daemon_id,
                &slot.hostname,
                &name,
            );
            let daemon_name = deploy.name();
            match self.create_daemon(handler, &effective, deploy).await {
                Ok(dd) => {
                    taken.insert(dd.name());
                    pass.deployed += 1;
                }
                Err(e) => {
                    warn!(daemon = %daemon_name, host = %slot.hostname, error = %e, "deploy failed");
                    pass.health.add(
                        codes::DAEMON_PLACE_FAIL,
                        format!("Failed while placing {daemon_name} on {}: {e}", slot.hostname),
                    );
                    self.events.record(OrchestratorEvent::service(
                        &name,
                        EventLevel::Error,
                        format!("Failed while placing {daemon_name} on {}: {e}", slot.hostname),
                    ));
                }
            }
        }

        for daemon in placed.to_remove {
            self.remove_guarded(handler, &daemon, pass).await;
        }
        Ok(())
    }

    /// One OSD per available device on every placed host
    ///
    /// OSDs are never removed through the placement diff; that is the
    /// removal queue's job.
    async fn apply_osd_service(
        &mut self,
        spec: &ServiceSpec,
        handler: &dyn ServiceHandler,
        pass: &mut Pass,
    ) -> Result<(), CoreError> {
        let name = spec.service_name();
        let placement = Self::effective_placement(spec, handler);
        let hosts: Vec<HostSpec> = self.inventory.hosts().cloned().collect();
        let placed = HostAssignment::new(&placement, &hosts, &pass.unreachable, &[]).place()?;

        for slot in placed.slots {
            let devices: Vec<String> = self
                .cache
                .devices(&slot.hostname)
                .iter()
                .filter(|d| d.available && !self.cache.is_device_claimed(&slot.hostname, &d.path))
                .map(|d| d.path.clone())
                .collect();
            for device in devices {
                let mut deploy =
                    DaemonDeploySpec::new(ServiceType::Osd, "", &slot.hostname, &name);
                deploy.device = Some(device.clone());
                match self.create_daemon(handler, spec, deploy).await {
                    Ok(dd) => {
                        info!(daemon = %dd.name(), device = %device, "created OSD");
                        pass.deployed += 1;
                    }
                    Err(e) => {
                        warn!(host = %slot.hostname, device = %device, error = %e, "OSD deploy failed");
                        pass.health.add(
                            codes::DAEMON_PLACE_FAIL,
                            format!(
                                "Failed while placing osd on {} ({device}): {e}",
                                slot.hostname
                            ),
                        );
                    }
                }
            }
        }
        Ok(())
    }

    /// Remove the daemons of a spec marked deleted
    async fn drain_deleted_service(
        &mut self,
        spec: &ServiceSpec,
        pass: &mut Pass,
    ) -> Result<(), CoreError> {
        let name = spec.service_name();
        let daemons: Vec<DaemonDescription> = self
            .cache
            .get_daemons_by_service(&name)
            .into_iter()
            .filter(|d| !pass.unreachable.contains(&d.hostname))
            .collect();
        if daemons.is_empty() {
            return Ok(());
        }
        info!(service = %name, daemons = daemons.len(), "draining deleted service");

        if spec.service_type == ServiceType::Osd {
            for daemon in daemons {
                let Ok(osd_id) = daemon.daemon_id.parse::<u32>() else {
                    continue;
                };
                if !self.osd_queue.contains(osd_id) {
                    self.osd_queue
                        .enqueue(OsdRemoval::new(osd_id, &daemon.hostname))?;
                }
            }
            return Ok(());
        }

        let services = Arc::clone(&self.services);
        let handler = services.get(&spec.service_type)?;
        for daemon in daemons {
            self.remove_guarded(handler, &daemon, pass).await;
        }
        Ok(())
    }

    /// Remove one daemon once ok-to-stop agrees
    ///
    /// A refusal leaves the daemon for the next tick and counts towards the
    /// stop-blocked warning.
    async fn remove_guarded(
        &mut self,
        handler: &dyn ServiceHandler,
        daemon: &DaemonDescription,
        pass: &mut Pass,
    ) {
        let name = daemon.name();
        let all_of_type = self.cache.get_daemons_by_type(&daemon.daemon_type);
        let ok = match handler
            .ok_to_stop(self.cluster.as_ref(), std::slice::from_ref(daemon), &all_of_type)
            .await
        {
            Ok(ok) => ok,
            Err(e) => {
                warn!(daemon = %name, error = %e, "ok-to-stop check failed");
                false
            }
        };

        if !ok {
            let refusals = self.stop_refusals.entry(name.clone()).or_default();
            *refusals += 1;
            info!(daemon = %name, refusals = *refusals, "removal deferred by ok-to-stop");
            if *refusals >= self.config.ok_to_stop_warn_after {
                pass.health.add(
                    codes::DAEMON_STOP_BLOCKED,
                    format!(
                        "{name} on host '{}' could not be stopped after {} attempt(s)",
                        daemon.hostname, *refusals
                    ),
                );
            }
            return;
        }

        match self.remove_daemon(handler, daemon, true).await {
            Ok(()) => pass.removed += 1,
            Err(e) => {
                warn!(daemon = %name, error = %e, "failed to remove daemon");
                self.events.record(OrchestratorEvent::daemon(
                    &name,
                    EventLevel::Error,
                    format!("Failed to remove {name} from host '{}': {e}", daemon.hostname),
                ));
            }
        }
    }

    /// The spec with config options the cluster does not know dropped
    async fn validated_spec(&mut self, spec: &ServiceSpec, pass: &mut Pass) -> ServiceSpec {
        let mut effective = spec.clone();
        for key in spec.config.keys() {
            if !self
                .config_options
                .is_valid(self.cluster.as_ref(), key)
                .await
            {
                effective.config.remove(key);
                pass.health.add(
                    codes::INVALID_CONFIG_OPTION,
                    format!(
                        "Ignoring invalid {} config option {key}",
                        spec.service_type
                    ),
                );
            }
        }
        effective
    }

    /// Write client keyrings to the hosts their placement selects and
    /// remove them from hosts it no longer selects
    #[instrument(skip_all)]
    pub(crate) async fn distribute_client_keyrings(&mut self, pass: &mut Pass) {
        let keyrings: Vec<_> = self.keyrings.all().cloned().collect();
        let hosts: Vec<HostSpec> = self.inventory.hosts().cloned().collect();

        for keyring in keyrings {
            let path = keyring_path(&keyring.entity);
            let targets: BTreeSet<String> =
                match HostAssignment::new(&keyring.placement, &hosts, &pass.unreachable, &[])
                    .place()
                {
                    Ok(placed) => placed.slots.into_iter().map(|s| s.hostname).collect(),
                    Err(e) => {
                        warn!(entity = %keyring.entity, error = %e, "cannot place keyring");
                        continue;
                    }
                };

            let cmd = json!({"prefix": "auth get", "entity": keyring.entity});
            let content = match check_mon_command(self.cluster.as_ref(), &cmd).await {
                Ok(result) => result.out,
                Err(e) => {
                    warn!(entity = %keyring.entity, error = %e, "cannot fetch keyring");
                    continue;
                }
            };

            for host in &targets {
                if self.cache.client_files(host).get(&path) == Some(&content) {
                    continue;
                }
                match self
                    .agent
                    .write_file(host, &path, &content, keyring.mode, keyring.uid, keyring.gid)
                    .await
                {
                    Ok(()) => {
                        info!(host = %host, entity = %keyring.entity, "distributed keyring");
                        self.cache.set_client_file(host, &path, &content);
                    }
                    Err(e) => warn!(host = %host, error = %e, "failed to write keyring"),
                }
            }

            let stale: Vec<String> = hosts
                .iter()
                .map(|h| h.hostname.clone())
                .filter(|h| !targets.contains(h) && !pass.unreachable.contains(h))
                .filter(|h| self.cache.client_files(h).contains_key(&path))
                .collect();
            for host in stale {
                match self.agent.remove_file(&host, &path).await {
                    Ok(()) => self.cache.rm_client_file(&host, &path),
                    Err(e) => warn!(host = %host, error = %e, "failed to remove keyring"),
                }
            }
        }
    }

    /// Drop deleted specs whose daemons are all gone
    ///
    /// # Errors
    /// Propagates store failures.
    pub(crate) fn purge_deleted_services(&mut self) -> Result<(), CoreError> {
        let drained: Vec<String> = self
            .specs
            .deleted_specs()
            .map(|e| e.spec.service_name())
            .filter(|name| self.cache.get_daemons_by_service(name).is_empty())
            .collect();
        for name in drained {
            self.specs.finally_rm(&name)?;
            self.events.forget(&name);
            info!(service = %name, "purged deleted service");
        }
        Ok(())
    }
}
