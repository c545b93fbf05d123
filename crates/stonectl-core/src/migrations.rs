//! Numbered, all-or-nothing upgrades of persisted state
//!
//! `migration_current` records the last applied migration. Each step
//! stages its rewrites as store ops; those ops and the bumped version are
//! committed together, so a crash leaves either the old or the new state,
//! never a mix.

use std::collections::BTreeMap;
use std::sync::Arc;

use stonectl_api::{
    ClientKeyringSpec, HostPlacementSpec, HostSpec, HostStatus, PlacementSpec, ServiceSpec,
    host::ADMIN_LABEL,
};
use tracing::{info, warn};

use crate::cache::HostCache;
use crate::error::{CoreError, StoreError};
use crate::inventory::Inventory;
use crate::keyrings::ClientKeyringStore;
use crate::placement::resolve;
use crate::spec_store::{LegacyNfs, SpecStore, spec_key, spec_op};
use crate::store::{
    KvStore, MIGRATION_CURRENT_KEY, NFS_MIGRATION_QUEUE_KEY, StoreOp, document_op, load_document,
};

pub const LAST_MIGRATION: u32 = 4;

/// State a migration reads and rewrites
pub struct MigrationContext<'a> {
    pub inventory: &'a Inventory,
    pub specs: &'a mut SpecStore,
    pub keyrings: &'a mut ClientKeyringStore,
    pub cache: &'a HostCache,
}

enum Step {
    Ready(Vec<StoreOp>),
    /// Preconditions not met yet; retried on a later call
    NotReady(String),
}

pub struct Migrations {
    current: u32,
    nfs_queue: Vec<LegacyNfs>,
    /// Why the next migration did not run on the last attempt
    waiting: Option<String>,
    store: Arc<dyn KvStore>,
}

impl std::fmt::Debug for Migrations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migrations")
            .field("current", &self.current)
            .field("nfs_queue", &self.nfs_queue)
            .field("waiting", &self.waiting)
            .finish_non_exhaustive()
    }
}

impl Migrations {
    /// Read `migration_current` and queue legacy NFS specs for conversion
    ///
    /// A store without a version is fresh and starts at [`LAST_MIGRATION`].
    ///
    /// # Errors
    /// Propagates store failures.
    pub fn load(store: Arc<dyn KvStore>, specs: &SpecStore) -> Result<Self, StoreError> {
        let current = match load_document::<u32>(store.as_ref(), MIGRATION_CURRENT_KEY)? {
            Some(current) => current,
            None => {
                store.commit(vec![document_op(MIGRATION_CURRENT_KEY, &LAST_MIGRATION)?])?;
                info!(version = LAST_MIGRATION, "initialised migration version");
                LAST_MIGRATION
            }
        };
        let mut this = Self {
            current,
            nfs_queue: load_document(store.as_ref(), NFS_MIGRATION_QUEUE_KEY)?.unwrap_or_default(),
            waiting: None,
            store,
        };
        this.queue_legacy_nfs(specs)?;
        Ok(this)
    }

    fn queue_legacy_nfs(&mut self, specs: &SpecStore) -> Result<(), StoreError> {
        if self.current >= 3 {
            return Ok(());
        }
        let before = self.nfs_queue.len();
        for legacy in specs.legacy_nfs() {
            if !self.nfs_queue.contains(legacy) {
                info!(service_id = %legacy[0], "queued legacy NFS spec for conversion");
                self.nfs_queue.push(legacy.clone());
            }
        }
        if self.nfs_queue.len() != before {
            self.store
                .commit(vec![document_op(NFS_MIGRATION_QUEUE_KEY, &self.nfs_queue)?])?;
        }
        Ok(())
    }

    #[must_use]
    pub fn current(&self) -> u32 {
        self.current
    }

    /// Whether reconciliation has to wait for pending migrations
    #[must_use]
    pub fn is_ongoing(&self) -> bool {
        self.current < LAST_MIGRATION
    }

    /// Reason the pending migration is still waiting, if it is
    #[must_use]
    pub fn waiting(&self) -> Option<&str> {
        self.waiting.as_deref()
    }

    #[must_use]
    pub fn nfs_queue(&self) -> &[LegacyNfs] {
        &self.nfs_queue
    }

    /// Apply every pending migration in order
    ///
    /// Stops at the first step that is not ready. `startup` defers steps
    /// that must not run before the first refresh. Returns `true` once
    /// [`LAST_MIGRATION`] is reached.
    ///
    /// # Errors
    /// Returns `Migration` when a step fails, or a store failure; the
    /// version is left at the last completed step.
    pub fn migrate(
        &mut self,
        startup: bool,
        ctx: &mut MigrationContext<'_>,
    ) -> Result<bool, CoreError> {
        while self.current < LAST_MIGRATION {
            let from = self.current;
            let to = from + 1;
            let step = match from {
                0 => Self::migrate_0_1(ctx),
                1 => Self::migrate_1_2(ctx),
                2 => self.migrate_2_3(startup, ctx),
                3 => Self::migrate_3_4(ctx),
                _ => Err(format!("no migration from version {from}")),
            }
            .map_err(|reason| CoreError::Migration { from, to, reason })?;

            let mut ops = match step {
                Step::Ready(ops) => ops,
                Step::NotReady(reason) => {
                    info!(from, to, reason = %reason, "migration not ready");
                    self.waiting = Some(format!("migration {from} -> {to}: {reason}"));
                    return Ok(false);
                }
            };
            self.waiting = None;
            ops.push(document_op(MIGRATION_CURRENT_KEY, &to)?);
            self.store.commit(ops)?;
            self.current = to;
            if from == 2 {
                self.nfs_queue.clear();
            }
            ctx.specs.reload()?;
            ctx.keyrings.reload()?;
            info!(from, to, "migration applied");
        }
        Ok(true)
    }

    /// Pin count-based placements that would now shrink to the hosts
    /// already running the service
    ///
    /// Waits for a daemon refresh of every host the refresh stage probes.
    /// Hosts in maintenance, offline or failing this tick are not waited on.
    fn migrate_0_1(ctx: &MigrationContext<'_>) -> Result<Step, String> {
        let unrefreshed: Vec<&str> = ctx
            .inventory
            .hosts()
            .filter(|h| h.status == HostStatus::Normal && !ctx.cache.is_failed(&h.hostname))
            .filter(|h| ctx.cache.last_daemon_refresh(&h.hostname).is_none())
            .map(|h| h.hostname.as_str())
            .collect();
        if !unrefreshed.is_empty() {
            return Ok(Step::NotReady(format!(
                "waiting for a daemon refresh of {}",
                unrefreshed.join(", ")
            )));
        }

        let hosts: Vec<HostSpec> = ctx.inventory.hosts().cloned().collect();
        let mut ops = Vec::new();
        for entry in ctx.specs.active_specs() {
            let spec = &entry.spec;
            let Some(count) = spec.placement.count else {
                continue;
            };
            if spec.unmanaged || !spec.placement.has_host_selector() {
                continue;
            }
            let existing = ctx.cache.get_daemons_by_service(&spec.service_name());
            let slots = match resolve(&spec.placement, &hosts, &existing) {
                Ok(slots) => slots,
                Err(e) => {
                    warn!(service = %spec.service_name(), error = %e, "cannot resolve placement");
                    continue;
                }
            };
            if slots.len() >= existing.len() {
                continue;
            }

            let mut pinned: Vec<String> = existing.iter().map(|d| d.hostname.clone()).collect();
            pinned.sort();
            pinned.dedup();
            info!(service = %spec.service_name(), hosts = ?pinned, "pinning placement");
            let mut migrated = spec.clone();
            migrated.placement = PlacementSpec {
                hosts: pinned.into_iter().map(HostPlacementSpec::new).collect(),
                count: Some(count),
                ..PlacementSpec::default()
            };
            ops.push(spec_op(&migrated, entry.created, entry.deleted).map_err(|e| e.to_string())?);
        }
        Ok(Step::Ready(ops))
    }

    /// Fold mon/mgr specs stored with a service id into the id-less spec
    fn migrate_1_2(ctx: &MigrationContext<'_>) -> Result<Step, String> {
        let mut merged: BTreeMap<String, (ServiceSpec, _, _)> = BTreeMap::new();
        let mut ops = Vec::new();

        for (key, legacy) in ctx.specs.legacy_ids() {
            let name = legacy.spec.service_type.to_string();
            ops.push(StoreOp::Rm { key: key.clone() });

            if merged.contains_key(&name) {
                continue;
            }
            let (mut spec, created, deleted) = match ctx.specs.get(&name) {
                Some(bare) => (bare.spec.clone(), bare.created, bare.deleted),
                None => {
                    let mut spec = legacy.spec.clone();
                    spec.service_id = None;
                    (spec, legacy.created, legacy.deleted)
                }
            };
            spec.unmanaged = true;
            info!(from = %key, to = %spec_key(&name), "folding legacy service id");
            merged.insert(name, (spec, created, deleted));
        }

        for (spec, created, deleted) in merged.values() {
            ops.push(spec_op(spec, *created, *deleted).map_err(|e| e.to_string())?);
        }
        Ok(Step::Ready(ops))
    }

    /// Convert queued pre-rename NFS specs
    fn migrate_2_3(&self, startup: bool, ctx: &MigrationContext<'_>) -> Result<Step, String> {
        if startup {
            return Ok(Step::NotReady("NFS conversion waits until after startup".to_string()));
        }
        let mut ops = Vec::new();
        for [service_id, pool, namespace] in &self.nfs_queue {
            let old_name = format!("nfs.{service_id}");
            let Some(old) = ctx.specs.get(&old_name) else {
                warn!(service = %old_name, "queued NFS spec no longer exists");
                continue;
            };
            let new_id = service_id.strip_prefix("ganesha-").unwrap_or(service_id);
            let mut spec = old.spec.clone();
            spec.service_id = Some(new_id.to_string());
            spec.config.insert("pool".to_string(), pool.clone());
            if !namespace.is_empty() {
                spec.config.insert("namespace".to_string(), namespace.clone());
            }
            let new_key = spec_key(&spec.service_name());
            if old.key != new_key {
                ops.push(StoreOp::Rm {
                    key: old.key.clone(),
                });
            }
            info!(from = %old_name, to = %spec.service_name(), "converting legacy NFS spec");
            ops.push(spec_op(&spec, old.created, old.deleted).map_err(|e| e.to_string())?);
        }
        ops.push(StoreOp::Rm {
            key: NFS_MIGRATION_QUEUE_KEY.to_string(),
        });
        Ok(Step::Ready(ops))
    }

    /// Distribute the admin keyring to `_admin` hosts
    fn migrate_3_4(ctx: &MigrationContext<'_>) -> Result<Step, String> {
        if ctx.keyrings.get("client.admin").is_some() {
            return Ok(Step::Ready(Vec::new()));
        }
        let mut keyrings = ctx.keyrings.snapshot();
        keyrings.insert(
            "client.admin".to_string(),
            ClientKeyringSpec::new("client.admin", PlacementSpec::label(ADMIN_LABEL)),
        );
        let op = ClientKeyringStore::op(&keyrings).map_err(|e| e.to_string())?;
        Ok(Step::Ready(vec![op]))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;
    use stonectl_api::{DaemonDescription, DaemonStatus, ServiceType};

    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::store::{MemoryStore, SPEC_STORE_PREFIX};

    /// Memory store that refuses to commit version 2 while armed
    #[derive(Default)]
    struct FailingStore {
        inner: MemoryStore,
        fail_version_2: AtomicBool,
    }

    impl KvStore for FailingStore {
        fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
            self.inner.get(key)
        }

        fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
            self.inner.keys_with_prefix(prefix)
        }

        fn commit(&self, ops: Vec<StoreOp>) -> Result<(), StoreError> {
            let bumps_to_2 = ops.iter().any(|op| {
                matches!(op, StoreOp::Set { key, value } if key == MIGRATION_CURRENT_KEY && value["data"] == json!(2))
            });
            if bumps_to_2 && self.fail_version_2.load(Ordering::SeqCst) {
                return Err(StoreError::Io("disk full".to_string()));
            }
            self.inner.commit(ops)
        }
    }

    struct Fixture {
        kv: Arc<dyn KvStore>,
        inventory: Inventory,
        specs: SpecStore,
        keyrings: ClientKeyringStore,
        cache: HostCache,
    }

    impl Fixture {
        fn new(version: Option<u32>, hosts: &[&str]) -> Self {
            Self::with_store(Arc::new(MemoryStore::new()), version, hosts)
        }

        fn with_store(kv: Arc<dyn KvStore>, version: Option<u32>, hosts: &[&str]) -> Self {
            if let Some(version) = version {
                kv.commit(vec![document_op(MIGRATION_CURRENT_KEY, &version).unwrap()])
                    .unwrap();
            }
            let mut inventory = Inventory::load(kv.clone()).unwrap();
            for host in hosts {
                inventory.add_host(HostSpec::new(*host)).unwrap();
            }
            Self {
                specs: SpecStore::load(kv.clone()).unwrap(),
                keyrings: ClientKeyringStore::load(kv.clone()).unwrap(),
                inventory,
                cache: HostCache::new(),
                kv,
            }
        }

        fn put_raw_spec(&mut self, key: &str, spec: serde_json::Value) {
            self.kv
                .set(
                    &format!("{SPEC_STORE_PREFIX}{key}"),
                    json!({"spec": spec, "created": Utc::now()}),
                )
                .unwrap();
            self.specs.reload().unwrap();
        }

        fn migrations(&self) -> Migrations {
            Migrations::load(self.kv.clone(), &self.specs).unwrap()
        }

        fn try_migrate(
            &mut self,
            migrations: &mut Migrations,
            startup: bool,
        ) -> Result<bool, CoreError> {
            let mut ctx = MigrationContext {
                inventory: &self.inventory,
                specs: &mut self.specs,
                keyrings: &mut self.keyrings,
                cache: &self.cache,
            };
            migrations.migrate(startup, &mut ctx)
        }

        fn migrate(&mut self, migrations: &mut Migrations, startup: bool) -> bool {
            self.try_migrate(migrations, startup).unwrap()
        }
    }

    #[test]
    fn test_fresh_store_starts_at_last() {
        let fixture = Fixture::new(None, &[]);
        let migrations = fixture.migrations();
        assert_eq!(migrations.current(), LAST_MIGRATION);
        assert!(!migrations.is_ongoing());
        let stored: Option<u32> =
            load_document(fixture.kv.as_ref(), MIGRATION_CURRENT_KEY).unwrap();
        assert_eq!(stored, Some(LAST_MIGRATION));
    }

    #[test]
    fn test_scheduler_pinning_waits_for_refresh() {
        let mut fixture = Fixture::new(Some(0), &["host1", "host2"]);
        fixture
            .specs
            .save(
                ServiceSpec::new("rgw")
                    .with_id("r.z")
                    .with_placement(PlacementSpec::host_pattern("host1").with_count(2)),
            )
            .unwrap();

        let mut migrations = fixture.migrations();
        assert!(!fixture.migrate(&mut migrations, false));
        assert_eq!(migrations.current(), 0);

        let now = Utc::now();
        for host in ["host1", "host2"] {
            let dd = DaemonDescription::new(ServiceType::Rgw, format!("r.z.{host}"), host, "rgw.r.z")
                .with_status(DaemonStatus::Running);
            fixture
                .cache
                .update_host_daemons(host, vec![dd], now, chrono::Duration::minutes(10));
        }
        assert!(fixture.migrate(&mut migrations, false));
        assert_eq!(migrations.current(), LAST_MIGRATION);

        let spec = fixture.specs.find("rgw.r.z").unwrap();
        assert_eq!(
            spec.placement,
            PlacementSpec {
                hosts: vec![HostPlacementSpec::new("host1"), HostPlacementSpec::new("host2")],
                count: Some(2),
                ..PlacementSpec::default()
            }
        );
    }

    #[test]
    fn test_pinning_skips_hosts_the_refresh_does_not_probe() {
        let mut fixture = Fixture::new(Some(0), &["host1", "host2", "host3"]);
        fixture
            .inventory
            .set_status("host2", HostStatus::Maintenance)
            .unwrap();
        fixture.cache.mark_failed("host3");

        let mut migrations = fixture.migrations();
        assert!(!fixture.migrate(&mut migrations, false));
        assert_eq!(migrations.current(), 0);
        let waiting = migrations.waiting().unwrap();
        assert!(waiting.contains("host1"));
        assert!(!waiting.contains("host2"));
        assert!(!waiting.contains("host3"));

        fixture
            .cache
            .update_host_daemons("host1", vec![], Utc::now(), chrono::Duration::minutes(10));
        assert!(fixture.migrate(&mut migrations, false));
        assert_eq!(migrations.current(), LAST_MIGRATION);
        assert!(migrations.waiting().is_none());
    }

    #[test]
    fn test_failed_commit_resumes_at_unfinished_step() {
        let store = Arc::new(FailingStore::default());
        let mut fixture = Fixture::with_store(store.clone(), Some(0), &[]);
        fixture.put_raw_spec(
            "mgr.legacy",
            json!({"service_type": "mgr", "service_id": "legacy", "placement": {"count": 2}}),
        );
        store.fail_version_2.store(true, Ordering::SeqCst);

        let mut migrations = fixture.migrations();
        let err = fixture.try_migrate(&mut migrations, false).unwrap_err();
        assert!(matches!(err, CoreError::Store(_)));
        assert_eq!(migrations.current(), 1);
        let stored: Option<u32> =
            load_document(fixture.kv.as_ref(), MIGRATION_CURRENT_KEY).unwrap();
        assert_eq!(stored, Some(1));
        assert_eq!(fixture.specs.legacy_ids().len(), 1);

        store.fail_version_2.store(false, Ordering::SeqCst);
        assert!(fixture.migrate(&mut migrations, false));
        assert_eq!(migrations.current(), LAST_MIGRATION);
        assert!(fixture.specs.legacy_ids().is_empty());
        assert!(fixture.specs.find("mgr").unwrap().unmanaged);
    }

    #[test]
    fn test_mon_service_id_folded() {
        let mut fixture = Fixture::new(Some(1), &["host1"]);
        fixture.put_raw_spec(
            "mon.wrong",
            json!({"service_type": "mon", "service_id": "wrong", "placement": {"hosts": ["host1"]}}),
        );
        assert_eq!(fixture.specs.legacy_ids().len(), 1);

        let mut migrations = fixture.migrations();
        fixture.migrate(&mut migrations, false);
        assert!(migrations.current() >= 2);

        assert_eq!(fixture.specs.all_specs().len(), 1);
        assert!(fixture.specs.legacy_ids().is_empty());
        assert_eq!(
            fixture.specs.find("mon").unwrap(),
            &ServiceSpec::new("mon")
                .unmanaged(true)
                .with_placement(PlacementSpec::hosts(["host1"]))
        );
    }

    #[test]
    fn test_existing_bare_mon_spec_wins() {
        let mut fixture = Fixture::new(Some(1), &["host1"]);
        fixture.put_raw_spec(
            "mon",
            json!({"service_type": "mon", "placement": {"count": 5}}),
        );
        fixture.put_raw_spec(
            "mon.wrong",
            json!({"service_type": "mon", "service_id": "wrong", "placement": {"hosts": ["host1"]}}),
        );

        let mut migrations = fixture.migrations();
        fixture.migrate(&mut migrations, false);

        assert_eq!(fixture.specs.all_specs().len(), 1);
        assert_eq!(
            fixture.specs.find("mon").unwrap(),
            &ServiceSpec::new("mon")
                .unmanaged(true)
                .with_placement(PlacementSpec::count(5))
        );
    }

    #[test]
    fn test_legacy_nfs_queued_and_deferred_at_startup() {
        let mut fixture = Fixture::new(Some(1), &["host1"]);
        fixture.put_raw_spec(
            "mds",
            json!({
                "service_type": "nfs",
                "service_id": "ganesha-foo",
                "placement": {"hosts": ["host1"]},
                "spec": {"pool": "mypool", "namespace": "foons"},
            }),
        );

        let mut migrations = fixture.migrations();
        let queued: Option<Vec<LegacyNfs>> =
            load_document(fixture.kv.as_ref(), NFS_MIGRATION_QUEUE_KEY).unwrap();
        assert_eq!(
            queued,
            Some(vec![[
                "ganesha-foo".to_string(),
                "mypool".to_string(),
                "foons".to_string()
            ]])
        );

        assert!(!fixture.migrate(&mut migrations, true));
        assert_eq!(migrations.current(), 2);

        assert!(fixture.migrate(&mut migrations, false));
        assert_eq!(migrations.current(), LAST_MIGRATION);

        let spec = fixture.specs.find("nfs.foo").unwrap();
        assert_eq!(spec.config["pool"], "mypool");
        assert_eq!(spec.config["namespace"], "foons");
        assert!(fixture.specs.get("nfs.ganesha-foo").is_none());
        assert!(fixture.specs.legacy_nfs().is_empty());
        assert!(fixture.kv.get(NFS_MIGRATION_QUEUE_KEY).unwrap().is_none());
    }

    #[test]
    fn test_admin_keyring_added() {
        let mut fixture = Fixture::new(Some(3), &[]);
        assert!(fixture.keyrings.get("client.admin").is_none());

        let mut migrations = fixture.migrations();
        assert!(fixture.migrate(&mut migrations, false));
        assert_eq!(migrations.current(), LAST_MIGRATION);
        assert_eq!(
            fixture
                .keyrings
                .get("client.admin")
                .unwrap()
                .placement
                .label
                .as_deref(),
            Some(ADMIN_LABEL)
        );
    }

    #[test]
    fn test_version_never_decreases() {
        let mut fixture = Fixture::new(Some(LAST_MIGRATION), &[]);
        let mut migrations = fixture.migrations();
        assert!(fixture.migrate(&mut migrations, false));
        let stored: Option<u32> =
            load_document(fixture.kv.as_ref(), MIGRATION_CURRENT_KEY).unwrap();
        assert_eq!(stored, Some(LAST_MIGRATION));
    }
}
