use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use stonectl_api::health::codes;
use stonectl_api::{HostSpec, HostStatus, PlacementSpec, ServiceSpec};
use stonectl_core::store::{MIGRATION_CURRENT_KEY, SPEC_STORE_PREFIX, document_op};
use stonectl_core::*;
use stonectl_exec::{CommandExecutor, CommandResult, ExecError, RunOptions};

// ============================================================================
// Fakes
// ============================================================================

#[derive(Debug, Clone)]
struct FakeDaemon {
    state: String,
    service_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Call {
    host: String,
    verb: String,
    name: Option<String>,
}

/// Hosts running the agent, simulated in memory
#[derive(Default)]
struct FakeFleet {
    daemons: Mutex<BTreeMap<String, BTreeMap<String, FakeDaemon>>>,
    /// Block devices per host, path to availability
    devices: Mutex<BTreeMap<String, BTreeMap<String, bool>>>,
    down: Mutex<BTreeSet<String>>,
    /// Deploys are accepted but do not show up in `ls` yet
    slow_deploys: AtomicBool,
    calls: Mutex<Vec<Call>>,
}

impl FakeFleet {
    fn seed(&self, host: &str, name: &str, state: &str, service_name: Option<&str>) {
        self.daemons.lock().unwrap().entry(host.to_string()).or_default().insert(
            name.to_string(),
            FakeDaemon {
                state: state.to_string(),
                service_name: service_name.map(ToString::to_string),
            },
        );
    }

    fn add_device(&self, host: &str, path: &str) {
        self.devices
            .lock()
            .unwrap()
            .entry(host.to_string())
            .or_default()
            .insert(path.to_string(), true);
    }

    fn inventory(&self, host: &str) -> String {
        let devices = self.devices.lock().unwrap();
        let entries: Vec<Value> = devices
            .get(host)
            .into_iter()
            .flatten()
            .map(|(path, available)| json!({"path": path, "available": available}))
            .collect();
        Value::Array(entries).to_string()
    }

    fn kill(&self, host: &str, name: &str) {
        if let Some(daemons) = self.daemons.lock().unwrap().get_mut(host) {
            daemons.remove(name);
        }
    }

    fn set_down(&self, host: &str, down: bool) {
        let mut hosts = self.down.lock().unwrap();
        if down {
            hosts.insert(host.to_string());
        } else {
            hosts.remove(host);
        }
    }

    fn running(&self, host: &str) -> Vec<String> {
        self.daemons
            .lock()
            .unwrap()
            .get(host)
            .map(|d| d.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn calls(&self, verb: &str) -> Vec<Call> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.verb == verb)
            .cloned()
            .collect()
    }

    fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

fn arg_after(argv: &[String], flag: &str) -> Option<String> {
    argv.iter()
        .position(|a| a == flag)
        .and_then(|i| argv.get(i + 1))
        .cloned()
}

#[async_trait]
impl CommandExecutor for FakeFleet {
    async fn run(
        &self,
        host: &str,
        argv: &[String],
        _opts: RunOptions,
    ) -> Result<CommandResult, ExecError> {
        if self.down.lock().unwrap().contains(host) {
            return Err(ExecError::Unreachable {
                host: host.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        let verb = argv.get(1).cloned().unwrap_or_default();
        let name = arg_after(argv, "--name");
        self.calls.lock().unwrap().push(Call {
            host: host.to_string(),
            verb: verb.clone(),
            name: name.clone(),
        });

        let stdout = match verb.as_str() {
            "ls" => {
                let daemons = self.daemons.lock().unwrap();
                let entries: Vec<Value> = daemons
                    .get(host)
                    .into_iter()
                    .flatten()
                    .map(|(name, d)| {
                        json!({"name": name, "state": d.state, "service_name": d.service_name})
                    })
                    .collect();
                Value::Array(entries).to_string()
            }
            "stone-volume" if argv.iter().any(|a| a == "inventory") => self.inventory(host),
            "list-networks" => "{}".to_string(),
            "gather-facts" => json!({"hostname": host}).to_string(),
            "deploy" => {
                let meta: Value = arg_after(argv, "--meta-json")
                    .and_then(|m| serde_json::from_str(&m).ok())
                    .unwrap_or_default();
                if !self.slow_deploys.load(Ordering::SeqCst) {
                    let service_name = meta["service_name"].as_str();
                    self.seed(host, &name.unwrap_or_default(), "running", service_name);
                    if let Some(device) = arg_after(argv, "--device") {
                        if let Some(available) = self
                            .devices
                            .lock()
                            .unwrap()
                            .get_mut(host)
                            .and_then(|d| d.get_mut(&device))
                        {
                            *available = false;
                        }
                    }
                }
                String::new()
            }
            "rm-daemon" => {
                self.kill(host, &name.unwrap_or_default());
                String::new()
            }
            "unit" => {
                let state = match argv.last().map(String::as_str) {
                    Some("stop") => "stopped",
                    _ => "running",
                };
                let name = name.unwrap_or_default();
                if let Some(d) = self
                    .daemons
                    .lock()
                    .unwrap()
                    .get_mut(host)
                    .and_then(|d| d.get_mut(&name))
                {
                    d.state = state.to_string();
                }
                String::new()
            }
            _ => String::new(),
        };

        Ok(CommandResult {
            status: 0,
            stdout,
            stderr: String::new(),
            duration: Duration::ZERO,
        })
    }
}

/// Cluster monitors with scripted answers
#[derive(Default)]
struct FakeCluster {
    commands: Mutex<Vec<Value>>,
    refuse_ok_to_stop: AtomicBool,
    pg_count: AtomicUsize,
    next_osd: AtomicU32,
}

impl FakeCluster {
    fn prefixes(&self) -> Vec<String> {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| c["prefix"].as_str().map(ToString::to_string))
            .collect()
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn mon_command(&self, cmd: &Value) -> Result<MonCommandResult, CoreError> {
        self.commands.lock().unwrap().push(cmd.clone());
        let prefix = cmd["prefix"].as_str().unwrap_or_default();
        let result = match prefix {
            p if p.ends_with("ok-to-stop") => {
                if self.refuse_ok_to_stop.load(Ordering::SeqCst) {
                    MonCommandResult::error(-16, "EBUSY")
                } else {
                    MonCommandResult::ok("")
                }
            }
            "pg ls-by-osd" => {
                let pgs = self.pg_count.load(Ordering::SeqCst);
                let list: Vec<Value> = (0..pgs).map(|i| json!({"pgid": format!("1.{i}")})).collect();
                MonCommandResult::ok(Value::Array(list).to_string())
            }
            "osd create" => {
                let id = self.next_osd.fetch_add(1, Ordering::SeqCst);
                MonCommandResult::ok(json!({"osdid": id}).to_string())
            }
            "config help" => {
                if cmd["key"] == "not_an_option" {
                    MonCommandResult::error(-2, "unrecognized option")
                } else {
                    MonCommandResult::ok("")
                }
            }
            _ => MonCommandResult::ok("[client]\n\tkey = AQBtest=="),
        };
        Ok(result)
    }
}

struct Harness {
    orch: Orchestrator,
    fleet: Arc<FakeFleet>,
    cluster: Arc<FakeCluster>,
}

fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        daemon_refresh_interval: 0,
        ok_to_stop_warn_after: 2,
        ..OrchestratorConfig::default()
    }
}

async fn harness_with_store(store: Arc<dyn KvStore>, hosts: &[&str]) -> Harness {
    let fleet = Arc::new(FakeFleet::default());
    let cluster = Arc::new(FakeCluster::default());
    let collaborators = Collaborators {
        store,
        executor: fleet.clone(),
        cluster: cluster.clone(),
    };
    let mut orch = Orchestrator::open(test_config(), collaborators)
        .await
        .unwrap();
    for host in hosts {
        orch.add_host(HostSpec::new(*host)).await.unwrap();
    }
    Harness {
        orch,
        fleet,
        cluster,
    }
}

async fn harness(hosts: &[&str]) -> Harness {
    harness_with_store(Arc::new(MemoryStore::new()), hosts).await
}

fn host_spec(orch: &Orchestrator, hostname: &str) -> HostSpec {
    orch.list_hosts()
        .into_iter()
        .find(|host| host.hostname == hostname)
        .unwrap()
}

fn has_check(orch: &Orchestrator, code: &str) -> bool {
    orch.health_checks().iter().any(|c| c.code == code)
}

// ============================================================================
// Convergence and idempotence
// ============================================================================

#[tokio::test]
async fn test_mgr_count_converges_in_one_tick() {
    let mut h = harness(&["host1", "host2"]).await;
    let results = h
        .orch
        .apply(vec![ServiceSpec::new("mgr").with_placement(PlacementSpec::count(2))])
        .unwrap();
    assert_eq!(results, vec!["Scheduled mgr update..."]);

    let report = h.orch.run_tick().await.unwrap();
    assert_eq!(report.deployed, 2);

    let described = h.orch.describe_service(Some("mgr"), None);
    assert_eq!(described.len(), 1);
    assert_eq!(described[0].status.running, 2);
    assert_eq!(described[0].status.size, 2);

    let hosts: BTreeSet<_> = h
        .orch
        .list_daemons(None, Some("mgr"))
        .into_iter()
        .map(|d| d.hostname)
        .collect();
    assert_eq!(hosts, BTreeSet::from(["host1".to_string(), "host2".to_string()]));
}

#[tokio::test]
async fn test_second_tick_is_idempotent() {
    let mut h = harness(&["host1", "host2", "host3"]).await;
    h.orch
        .apply(vec![
            ServiceSpec::new("mgr").with_placement(PlacementSpec::count(2)),
            ServiceSpec::new("crash").with_placement(PlacementSpec::host_pattern("*")),
        ])
        .unwrap();
    h.orch.run_tick().await.unwrap();
    h.fleet.clear_calls();

    let report = h.orch.run_tick().await.unwrap();
    assert_eq!(report.deployed, 0);
    assert_eq!(report.removed, 0);
    assert_eq!(report.passes, 1);
    assert!(h.fleet.calls("deploy").is_empty());
    assert!(h.fleet.calls("rm-daemon").is_empty());
}

#[tokio::test]
async fn test_count_only_spreads_over_least_loaded_hosts() {
    let mut h = harness(&["host1", "host2", "host3"]).await;
    h.orch
        .apply(vec![ServiceSpec::new("mgr").with_placement(PlacementSpec::count(1))])
        .unwrap();
    h.orch.run_tick().await.unwrap();
    h.orch
        .apply(vec![ServiceSpec::new("mds").with_id("fs").with_placement(PlacementSpec::count(2))])
        .unwrap();
    h.orch.run_tick().await.unwrap();

    let mds_hosts: BTreeSet<_> = h
        .orch
        .list_daemons(None, Some("mds"))
        .into_iter()
        .map(|d| d.hostname)
        .collect();
    assert_eq!(mds_hosts, BTreeSet::from(["host2".to_string(), "host3".to_string()]));
}

// ============================================================================
// Guarded removal
// ============================================================================

#[tokio::test]
async fn test_mds_removal_waits_for_ok_to_stop() {
    let mut h = harness(&["host1", "host2"]).await;
    let spec = ServiceSpec::new("mds").with_id("fsname");
    h.orch
        .apply(vec![spec.clone().with_placement(PlacementSpec::hosts(["host1", "host2"]))])
        .unwrap();
    h.orch.run_tick().await.unwrap();
    assert!(h.fleet.running("host1").contains(&"mds.fsname.host1".to_string()));

    h.cluster.refuse_ok_to_stop.store(true, Ordering::SeqCst);
    h.orch
        .apply(vec![spec.clone().with_placement(PlacementSpec::hosts(["host2"]))])
        .unwrap();

    h.orch.run_tick().await.unwrap();
    assert!(h.fleet.running("host1").contains(&"mds.fsname.host1".to_string()));
    assert!(h.fleet.calls("rm-daemon").is_empty());
    assert!(!has_check(&h.orch, codes::DAEMON_STOP_BLOCKED));

    h.orch.run_tick().await.unwrap();
    assert!(has_check(&h.orch, codes::DAEMON_STOP_BLOCKED));

    h.cluster.refuse_ok_to_stop.store(false, Ordering::SeqCst);
    let report = h.orch.run_tick().await.unwrap();
    assert_eq!(report.removed, 1);
    assert!(h.fleet.running("host1").is_empty());
    assert!(!has_check(&h.orch, codes::DAEMON_STOP_BLOCKED));

    let ok_to_stop = h
        .cluster
        .commands
        .lock()
        .unwrap()
        .iter()
        .rfind(|c| c["prefix"] == "mds ok-to-stop")
        .cloned()
        .unwrap();
    assert_eq!(ok_to_stop["ids"], json!(["fsname.host1"]));

    let events = h.orch.events(Some("mds.fsname.host1"));
    assert!(
        events
            .iter()
            .any(|e| e.message == "Removed mds.fsname.host1 from host 'host1'")
    );
}

// ============================================================================
// Unreachable hosts
// ============================================================================

#[tokio::test]
async fn test_offline_host_daemons_left_untouched() {
    let mut h = harness(&["host1", "host2", "host3"]).await;
    h.orch
        .apply(vec![
            ServiceSpec::new("crash").with_placement(PlacementSpec::host_pattern("*").with_count(3)),
        ])
        .unwrap();
    h.orch.run_tick().await.unwrap();
    assert_eq!(h.orch.list_daemons(None, Some("crash")).len(), 3);

    h.fleet.set_down("host2", true);
    h.fleet.clear_calls();
    h.orch
        .apply(vec![
            ServiceSpec::new("crash")
                .with_placement(PlacementSpec::host_pattern("*").with_count(3))
                .with_config("log_to_file", "true"),
        ])
        .unwrap();
    h.orch.run_tick().await.unwrap();

    let host2 = host_spec(&h.orch, "host2");
    assert_eq!(host2.status, HostStatus::Offline);
    assert!(has_check(&h.orch, codes::HOST_UNREACHABLE));
    assert!(h.fleet.calls("deploy").is_empty());
    assert!(h.fleet.calls("rm-daemon").is_empty());
    assert_eq!(h.orch.list_daemons(Some("host2"), None).len(), 1);

    h.fleet.set_down("host2", false);
    h.orch.run_tick().await.unwrap();
    let host2 = host_spec(&h.orch, "host2");
    assert_eq!(host2.status, HostStatus::Normal);
    assert!(!has_check(&h.orch, codes::HOST_UNREACHABLE));
}

#[tokio::test]
async fn test_maintenance_host_is_not_touched() {
    let mut h = harness(&["host1", "host2"]).await;
    h.orch
        .apply(vec![ServiceSpec::new("crash").with_placement(PlacementSpec::host_pattern("*"))])
        .unwrap();
    h.orch.run_tick().await.unwrap();

    let msg = h.orch.enter_host_maintenance("host2", false).await.unwrap();
    assert_eq!(
        msg,
        "Daemons for host 'host2' stopped, host is in maintenance mode"
    );
    let schedulable: Vec<String> = h
        .orch
        .schedulable_hosts(chrono::Utc::now())
        .into_iter()
        .map(|s| s.hostname)
        .collect();
    assert_eq!(schedulable, vec!["host1"]);
    h.fleet.clear_calls();

    h.orch
        .apply(vec![ServiceSpec::new("crash").with_placement(PlacementSpec::hosts(["host1"]))])
        .unwrap();
    h.orch.run_tick().await.unwrap();

    assert!(h.fleet.calls("rm-daemon").is_empty());
    assert!(h.fleet.calls("ls").iter().all(|c| c.host != "host2"));
    assert!(has_check(&h.orch, codes::HOST_IN_MAINTENANCE));

    let msg = h.orch.exit_host_maintenance("host2").await.unwrap();
    assert_eq!(msg, "Host host2 exited maintenance mode");
    h.orch.run_tick().await.unwrap();
    assert!(h.fleet.running("host2").is_empty());
}

// ============================================================================
// Drift, strays, duplicates
// ============================================================================

#[tokio::test]
async fn test_deleted_daemon_is_recreated_and_strays_reported() {
    let mut h = harness(&["host1", "host2"]).await;
    h.orch
        .apply(vec![ServiceSpec::new("crash").with_placement(PlacementSpec::host_pattern("*"))])
        .unwrap();
    h.orch.run_tick().await.unwrap();

    h.fleet.kill("host1", "crash.host1");
    h.fleet.seed("host2", "rgw.manual", "running", None);
    h.fleet.clear_calls();

    h.orch.run_tick().await.unwrap();
    let deploys = h.fleet.calls("deploy");
    assert_eq!(deploys.len(), 1);
    assert_eq!(deploys[0].host, "host1");
    assert_eq!(deploys[0].name.as_deref(), Some("crash.host1"));

    let stray = h
        .orch
        .health_checks()
        .iter()
        .find(|c| c.code == codes::STRAY_DAEMON)
        .cloned()
        .unwrap();
    assert_eq!(stray.count, 1);
    assert_eq!(
        stray.detail,
        vec!["stray daemon rgw.manual on host host2 not managed by stoneadm"]
    );
    assert!(h.fleet.running("host2").contains(&"rgw.manual".to_string()));
}

#[tokio::test]
async fn test_duplicate_daemon_removed_from_worse_host() {
    let mut h = harness(&["host1", "host2"]).await;
    h.fleet.seed("host1", "mgr.x", "running", Some("mgr"));
    h.fleet.seed("host2", "mgr.x", "stopped", Some("mgr"));

    h.orch.run_tick().await.unwrap();

    assert_eq!(h.fleet.running("host1"), vec!["mgr.x"]);
    assert!(h.fleet.running("host2").is_empty());
    let events = h.orch.events(Some("mgr.x"));
    assert!(
        events
            .iter()
            .any(|e| e.message == "Removed duplicated daemon on host 'host2'")
    );
    // the survivor keeps its key
    assert!(!h.cluster.prefixes().contains(&"auth rm".to_string()));
}

// ============================================================================
// Services lifecycle
// ============================================================================

#[tokio::test]
async fn test_removed_service_is_drained_and_purged() {
    let mut h = harness(&["host1"]).await;
    h.orch
        .apply(vec![ServiceSpec::new("rgw").with_id("zone").with_placement(PlacementSpec::count(1))])
        .unwrap();
    h.orch.run_tick().await.unwrap();
    assert_eq!(h.fleet.running("host1"), vec!["rgw.zone.host1"]);

    let msg = h.orch.remove_service("rgw.zone").unwrap();
    assert_eq!(msg, "Removed service rgw.zone");
    assert!(h.orch.spec_store().get("rgw.zone").unwrap().is_deleted());

    h.orch.run_tick().await.unwrap();
    assert!(h.fleet.running("host1").is_empty());
    assert!(h.orch.spec_store().get("rgw.zone").is_none());
    assert!(h.cluster.prefixes().contains(&"auth rm".to_string()));
}

#[tokio::test]
async fn test_mon_and_mgr_cannot_be_removed() {
    let mut h = harness(&["host1"]).await;
    let err = h.orch.remove_service("mgr").unwrap_err();
    assert!(matches!(err, CoreError::Refused(_)));
    assert!(err.to_string().starts_with("Unable to remove mgr service."));
}

#[tokio::test]
async fn test_invalid_config_option_is_dropped_and_reported() {
    let mut h = harness(&["host1"]).await;
    h.orch
        .apply(vec![
            ServiceSpec::new("crash")
                .with_placement(PlacementSpec::count(1))
                .with_config("not_an_option", "1"),
        ])
        .unwrap();
    h.orch.run_tick().await.unwrap();

    assert_eq!(h.fleet.running("host1"), vec!["crash.host1"]);
    let check = h
        .orch
        .health_checks()
        .iter()
        .find(|c| c.code == codes::INVALID_CONFIG_OPTION)
        .cloned()
        .unwrap();
    assert_eq!(
        check.detail,
        vec!["Ignoring invalid crash config option not_an_option"]
    );
}

#[tokio::test]
async fn test_unknown_placement_host_fails_service_only() {
    let mut h = harness(&["host1"]).await;
    h.orch
        .apply(vec![
            ServiceSpec::new("crash").with_placement(PlacementSpec::hosts(["nowhere"])),
            ServiceSpec::new("mgr").with_placement(PlacementSpec::count(1)),
        ])
        .unwrap();
    h.orch.run_tick().await.unwrap();

    assert!(has_check(&h.orch, codes::APPLY_SPEC_FAIL));
    assert_eq!(h.fleet.running("host1"), vec!["mgr.host1"]);
}

// ============================================================================
// Scheduled daemon actions
// ============================================================================

#[tokio::test]
async fn test_scheduled_stop_runs_on_next_tick() {
    let mut h = harness(&["host1"]).await;
    h.orch
        .apply(vec![ServiceSpec::new("crash").with_placement(PlacementSpec::count(1))])
        .unwrap();
    h.orch.run_tick().await.unwrap();

    let msg = h
        .orch
        .schedule_daemon_action("crash.host1", stonectl_api::DaemonAction::Stop)
        .unwrap();
    assert_eq!(msg, "Scheduled to stop crash.host1 on host 'host1'");
    assert!(h.fleet.calls("unit").is_empty());

    h.orch.run_tick().await.unwrap();
    assert_eq!(h.fleet.calls("unit").len(), 1);
    let daemon = h.orch.list_daemons(Some("host1"), None).pop().unwrap();
    assert_eq!(daemon.status, stonectl_api::DaemonStatus::Stopped);
}

// ============================================================================
// OSD removal
// ============================================================================

#[tokio::test]
async fn test_osd_removal_waits_for_drain() {
    let mut h = harness(&["host1"]).await;
    h.fleet.seed("host1", "osd.1", "running", Some("osd"));
    h.orch.run_tick().await.unwrap();

    let results = h.orch.remove_osds(&[1], false, false, false).unwrap();
    assert_eq!(results, vec!["Scheduled osd.1 for removal"]);

    h.cluster.pg_count.store(5, Ordering::SeqCst);
    h.orch.run_tick().await.unwrap();
    h.orch.run_tick().await.unwrap();

    let prefixes = h.cluster.prefixes();
    assert!(prefixes.contains(&"osd out".to_string()));
    assert!(!prefixes.contains(&"osd purge".to_string()));
    assert!(h.fleet.calls("rm-daemon").is_empty());
    let queued = h.orch.remove_osds_status();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].pg_count, Some(5));

    h.cluster.pg_count.store(0, Ordering::SeqCst);
    h.orch.run_tick().await.unwrap();
    assert!(h.orch.remove_osds_status().is_empty());
    assert!(h.fleet.running("host1").is_empty());

    let prefixes = h.cluster.prefixes();
    let out = prefixes.iter().position(|p| p == "osd out").unwrap();
    let purge = prefixes.iter().position(|p| p == "osd purge").unwrap();
    assert!(out < purge);
}

#[tokio::test]
async fn test_forced_osd_removal_skips_drain_wait() {
    let mut h = harness(&["host1"]).await;
    h.fleet.seed("host1", "osd.3", "running", Some("osd"));
    h.orch.run_tick().await.unwrap();

    h.orch.remove_osds(&[3], false, true, false).unwrap();
    h.cluster.pg_count.store(5, Ordering::SeqCst);
    h.orch.run_tick().await.unwrap();

    assert!(h.orch.remove_osds_status().is_empty());
    assert!(h.fleet.running("host1").is_empty());
    assert_eq!(h.fleet.calls("rm-daemon").len(), 1);

    let prefixes = h.cluster.prefixes();
    let out = prefixes.iter().position(|p| p == "osd out").unwrap();
    let pgs = prefixes.iter().position(|p| p == "pg ls-by-osd").unwrap();
    let purge = prefixes.iter().position(|p| p == "osd purge").unwrap();
    let auth = prefixes.iter().rposition(|p| p == "auth rm").unwrap();
    assert!(out < pgs && pgs < purge && purge < auth);
}

#[tokio::test]
async fn test_stop_remove_osds_marks_osd_back_in() {
    let mut h = harness(&["host1"]).await;
    h.fleet.seed("host1", "osd.2", "running", Some("osd"));
    h.orch.run_tick().await.unwrap();

    h.orch.remove_osds(&[2], false, false, false).unwrap();
    h.cluster.pg_count.store(3, Ordering::SeqCst);
    h.orch.run_tick().await.unwrap();

    let results = h.orch.stop_remove_osds(&[2]).await.unwrap();
    assert_eq!(results, vec!["Stopped removal of osd.2"]);
    assert!(h.orch.remove_osds_status().is_empty());
    assert!(h.cluster.prefixes().contains(&"osd in".to_string()));
}

// ============================================================================
// Migrations
// ============================================================================

#[tokio::test]
async fn test_legacy_spec_migrated_to_one_spec() {
    let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
    store
        .commit(vec![document_op(MIGRATION_CURRENT_KEY, &0u32).unwrap()])
        .unwrap();
    store
        .set(
            &format!("{SPEC_STORE_PREFIX}mon.legacy"),
            json!({
                "spec": {"service_type": "mon", "service_id": "legacy",
                         "placement": {"hosts": ["host1"]}},
                "created": chrono::Utc::now(),
            }),
        )
        .unwrap();

    let mut h = harness_with_store(store, &["host1"]).await;
    h.orch.run_tick().await.unwrap();

    assert_eq!(h.orch.migration_current(), migrations::LAST_MIGRATION);
    let specs = h.orch.spec_store().all_specs();
    assert_eq!(specs.len(), 1);
    assert!(specs.contains_key("mon"));
    assert!(h.orch.spec_store().legacy_ids().is_empty());
}

#[tokio::test]
async fn test_migration_ignores_hosts_in_maintenance_after_restart() {
    let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
    store
        .commit(vec![document_op(MIGRATION_CURRENT_KEY, &0u32).unwrap()])
        .unwrap();
    {
        let mut before = harness_with_store(store.clone(), &["host1", "host2"]).await;
        before
            .orch
            .enter_host_maintenance("host2", false)
            .await
            .unwrap();
        before
            .orch
            .apply(vec![ServiceSpec::new("crash").with_placement(PlacementSpec::hosts(["host1"]))])
            .unwrap();
    }

    let mut h = harness_with_store(store, &[]).await;
    assert_eq!(h.orch.migration_current(), 0);
    assert!(h.orch.migration_waiting().unwrap().contains("host1"));

    let report = h.orch.run_tick().await.unwrap();
    assert!(!report.paused);
    assert_eq!(h.orch.migration_current(), migrations::LAST_MIGRATION);
    assert!(h.orch.migration_waiting().is_none());
    assert!(!has_check(&h.orch, codes::MIGRATION_WAITING));
    assert_eq!(h.fleet.running("host1"), vec!["crash.host1"]);
    assert!(h.fleet.calls("ls").iter().all(|c| c.host != "host2"));
}

// ============================================================================
// OSD deployment
// ============================================================================

fn osd_spec() -> ServiceSpec {
    ServiceSpec::new("osd")
        .with_id("all")
        .with_placement(PlacementSpec::hosts(["host1"]))
}

#[tokio::test]
async fn test_osd_spec_deploys_one_osd_per_available_device() {
    let mut h = harness(&["host1"]).await;
    h.fleet.add_device("host1", "/dev/sdb");
    h.fleet.add_device("host1", "/dev/sdc");
    h.orch.apply(vec![osd_spec()]).unwrap();

    let report = h.orch.run_tick().await.unwrap();
    assert_eq!(report.deployed, 2);
    let mut osds = h.fleet.running("host1");
    osds.sort();
    assert_eq!(osds, vec!["osd.0", "osd.1"]);
    assert!(h.cluster.prefixes().contains(&"osd create".to_string()));

    h.fleet.clear_calls();
    let report = h.orch.run_tick().await.unwrap();
    assert_eq!(report.deployed, 0);
    assert!(h.fleet.calls("deploy").is_empty());
}

#[tokio::test]
async fn test_pending_osd_deploy_holds_its_device() {
    let mut h = harness(&["host1"]).await;
    h.fleet.add_device("host1", "/dev/sdb");
    h.fleet.slow_deploys.store(true, Ordering::SeqCst);
    h.orch.apply(vec![osd_spec()]).unwrap();

    h.orch.run_tick().await.unwrap();
    h.orch.run_tick().await.unwrap();

    let deploys: Vec<_> = h
        .fleet
        .calls("deploy")
        .into_iter()
        .filter_map(|c| c.name)
        .collect();
    assert_eq!(deploys, vec!["osd.0"]);

    // the agent finishes the deploy and the device is consumed
    h.fleet.slow_deploys.store(false, Ordering::SeqCst);
    h.fleet.seed("host1", "osd.0", "running", Some("osd.all"));
    h.fleet.devices.lock().unwrap().get_mut("host1").unwrap().insert("/dev/sdb".to_string(), false);
    h.fleet.clear_calls();
    h.orch.run_tick().await.unwrap();
    assert!(h.fleet.calls("deploy").is_empty());
    assert_eq!(h.orch.list_daemons(Some("host1"), Some("osd")).len(), 1);
}

#[tokio::test]
async fn test_deleted_osd_service_goes_through_removal_queue() {
    let mut h = harness(&["host1"]).await;
    h.orch.apply(vec![osd_spec()]).unwrap();
    h.fleet.seed("host1", "osd.4", "running", Some("osd.all"));
    h.orch.run_tick().await.unwrap();

    let msg = h.orch.remove_service("osd.all").unwrap();
    assert_eq!(msg, "Removed service osd.all");

    h.cluster.pg_count.store(2, Ordering::SeqCst);
    h.orch.run_tick().await.unwrap();
    let queued = h.orch.remove_osds_status();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].osd_id, 4);
    assert!(h.fleet.running("host1").contains(&"osd.4".to_string()));
    assert!(h.orch.spec_store().get("osd.all").unwrap().is_deleted());

    h.cluster.pg_count.store(0, Ordering::SeqCst);
    h.orch.run_tick().await.unwrap();
    assert!(h.orch.remove_osds_status().is_empty());
    assert!(h.fleet.running("host1").is_empty());
    assert!(h.orch.spec_store().get("osd.all").is_none());
    assert!(h.cluster.prefixes().contains(&"osd purge".to_string()));
}
