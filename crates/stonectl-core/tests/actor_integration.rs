use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use kameo::actor::Spawn;
use serde_json::{Value, json};

use stonectl_api::{DaemonAction, HostSpec, PlacementSpec, ServiceSpec};
use stonectl_core::*;
use stonectl_exec::{CommandExecutor, CommandResult, ExecError, RunOptions};

// Mock implementations
#[derive(Default)]
struct MockExecutor {
    /// host -> daemon name -> service name
    daemons: Mutex<BTreeMap<String, BTreeMap<String, String>>>,
}

fn ok(stdout: String) -> CommandResult {
    CommandResult {
        status: 0,
        stdout,
        stderr: String::new(),
        duration: Duration::from_millis(1),
    }
}

#[async_trait]
impl CommandExecutor for MockExecutor {
    async fn run(
        &self,
        host: &str,
        argv: &[String],
        _opts: RunOptions,
    ) -> Result<CommandResult, ExecError> {
        let arg = |flag: &str| {
            argv.iter()
                .position(|a| a == flag)
                .and_then(|i| argv.get(i + 1))
                .cloned()
                .unwrap_or_default()
        };
        let mut daemons = self.daemons.lock().unwrap();
        let stdout = match argv.get(1).map(String::as_str) {
            Some("ls") => {
                let entries: Vec<Value> = daemons
                    .get(host)
                    .into_iter()
                    .flatten()
                    .map(|(name, service)| {
                        json!({"name": name, "state": "running", "service_name": service})
                    })
                    .collect();
                Value::Array(entries).to_string()
            }
            Some("deploy") => {
                let meta: Value = serde_json::from_str(&arg("--meta-json")).unwrap_or_default();
                let service = meta["service_name"].as_str().unwrap_or_default().to_string();
                daemons
                    .entry(host.to_string())
                    .or_default()
                    .insert(arg("--name"), service);
                String::new()
            }
            Some("rm-daemon") => {
                if let Some(on_host) = daemons.get_mut(host) {
                    on_host.remove(&arg("--name"));
                }
                String::new()
            }
            Some("stone-volume") => "[]".to_string(),
            Some("list-networks" | "gather-facts") => "{}".to_string(),
            _ => String::new(),
        };
        Ok(ok(stdout))
    }
}

struct MockCluster;

#[async_trait]
impl ClusterClient for MockCluster {
    async fn mon_command(&self, _cmd: &Value) -> Result<MonCommandResult, CoreError> {
        Ok(MonCommandResult::ok("[client]\n\tkey = AQBmock=="))
    }
}

fn args() -> OrchestratorActorArgs {
    OrchestratorActorArgs {
        config: OrchestratorConfig::default(),
        collaborators: Collaborators {
            store: Arc::new(MemoryStore::new()),
            executor: Arc::new(MockExecutor::default()),
            cluster: Arc::new(MockCluster),
        },
    }
}

#[tokio::test]
async fn test_orchestrator_add_host_and_list() {
    let orchestrator = OrchestratorActor::spawn(args());

    let msg = orchestrator
        .ask(AddHost {
            spec: HostSpec::new("host1").with_label("_admin"),
        })
        .await
        .unwrap();
    assert_eq!(msg, "Added host 'host1'");

    let msg = orchestrator
        .ask(AddHostLabel {
            hostname: "host1".to_string(),
            label: "mon".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(msg, "Added label mon to host host1");

    let hosts = orchestrator.ask(ListHosts).await.unwrap();
    assert_eq!(hosts.len(), 1);
    assert_eq!(hosts[0].hostname, "host1");
    assert!(hosts[0].has_label("mon"));

    let err = orchestrator
        .ask(RemoveHostLabel {
            hostname: "host1".to_string(),
            label: "_admin".to_string(),
        })
        .await;
    assert!(err.is_err());

    orchestrator.stop_gracefully().await.unwrap();
}

#[tokio::test]
async fn test_apply_immediate_deploys_through_mailbox() {
    let orchestrator = OrchestratorActor::spawn(args());
    for host in ["host1", "host2"] {
        orchestrator
            .ask(AddHost {
                spec: HostSpec::new(host),
            })
            .await
            .unwrap();
    }

    let results = orchestrator
        .ask(Apply {
            specs: vec![ServiceSpec::new("mgr").with_placement(PlacementSpec::count(2))],
            immediate: true,
        })
        .await
        .unwrap();
    assert_eq!(results, vec!["Scheduled mgr update..."]);

    // a follow-up tick refreshes the cache from the hosts
    let report = orchestrator.ask(RunTick).await.unwrap();
    assert_eq!(report.deployed, 0);

    let daemons = orchestrator
        .ask(ListDaemons {
            service_type: Some("mgr".to_string()),
            ..ListDaemons::default()
        })
        .await
        .unwrap();
    assert_eq!(daemons.len(), 2);

    let described = orchestrator
        .ask(DescribeService::default())
        .await
        .unwrap();
    assert_eq!(described[0].status.running, 2);

    let msg = orchestrator
        .ask(ScheduleDaemonAction {
            name: "mgr.host1".to_string(),
            action: DaemonAction::Restart,
        })
        .await
        .unwrap();
    assert_eq!(msg, "Scheduled to restart mgr.host1 on host 'host1'");
    let cancelled = orchestrator
        .ask(CancelDaemonAction {
            name: "mgr.host1".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(cancelled, Some(DaemonAction::Restart));

    orchestrator.stop_gracefully().await.unwrap();
}

#[tokio::test]
async fn test_tick_report_and_status_messages() {
    let orchestrator = OrchestratorActor::spawn(args());
    orchestrator
        .ask(AddHost {
            spec: HostSpec::new("host1"),
        })
        .await
        .unwrap();

    let report = orchestrator.ask(RunTick).await.unwrap();
    assert_eq!(report.passes, 1);
    assert!(!report.paused);

    let status = orchestrator.ask(GetMigrationStatus).await.unwrap();
    assert_eq!(status.current, status.last);
    assert!(status.error.is_none());
    assert!(status.waiting.is_none());

    let checks = orchestrator.ask(GetHealthChecks).await.unwrap();
    assert!(checks.is_empty());

    let queue = orchestrator.ask(GetOsdRemovalStatus).await.unwrap();
    assert!(queue.is_empty());

    let err = orchestrator
        .ask(RemoveOsds {
            ids: vec![9],
            replace: false,
            force: false,
            zap: false,
        })
        .await;
    assert!(err.is_err());

    orchestrator.stop_gracefully().await.unwrap();
}
