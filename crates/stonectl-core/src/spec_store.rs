//! Durable store of declared service specs

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stonectl_api::{ServiceSpec, ServiceType};
use tracing::{error, info, warn};

use crate::error::{CoreError, StoreError};
use crate::store::{DOCUMENT_VERSION, KvStore, SPEC_STORE_PREFIX, StoreOp};

/// A stored spec and its lifecycle timestamps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecEntry {
    pub spec: ServiceSpec,
    pub created: DateTime<Utc>,
    /// Set by `rm` while daemons are still being drained
    pub deleted: Option<DateTime<Utc>>,
    /// Store key the entry was read from or will be written to
    pub key: String,
}

impl SpecEntry {
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted.is_some()
    }
}

/// On-disk form of one `spec_store/<name>` document
#[derive(Debug, Serialize, Deserialize)]
struct SpecDocument {
    spec: Value,
    #[serde(default)]
    created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    deleted: Option<DateTime<Utc>>,
    #[serde(default)]
    version: u32,
}

/// An NFS spec still in the pre-rename format: `[service_id, pool, namespace]`
pub type LegacyNfs = [String; 3];

#[must_use]
pub fn spec_key(service_name: &str) -> String {
    format!("{SPEC_STORE_PREFIX}{service_name}")
}

/// Build the op persisting `spec` with the given timestamps
///
/// # Errors
/// Returns `StoreError::Encode` if the spec cannot be serialized.
pub fn spec_op(
    spec: &ServiceSpec,
    created: DateTime<Utc>,
    deleted: Option<DateTime<Utc>>,
) -> Result<StoreOp, StoreError> {
    let key = spec_key(&spec.service_name());
    let encode = |e: serde_json::Error| StoreError::Encode {
        key: key.clone(),
        reason: e.to_string(),
    };
    let document = SpecDocument {
        spec: serde_json::to_value(spec).map_err(encode)?,
        created: Some(created),
        deleted,
        version: DOCUMENT_VERSION,
    };
    let value = serde_json::to_value(&document).map_err(encode)?;
    Ok(StoreOp::Set { key, value })
}

/// Declared service specs keyed by service name
pub struct SpecStore {
    specs: BTreeMap<String, SpecEntry>,
    /// Documents that could not be decoded or validated, by key
    corrupt: BTreeMap<String, String>,
    /// mon/mgr specs stored with a service id, by key
    legacy_ids: BTreeMap<String, SpecEntry>,
    legacy_nfs: Vec<LegacyNfs>,
    store: Arc<dyn KvStore>,
}

impl std::fmt::Debug for SpecStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpecStore")
            .field("specs", &self.specs.keys().collect::<Vec<_>>())
            .field("corrupt", &self.corrupt)
            .finish_non_exhaustive()
    }
}

impl SpecStore {
    /// Read every `spec_store/` document
    ///
    /// Undecodable or invalid documents are kept aside as corrupt rather
    /// than dropped; only backend failures are errors.
    ///
    /// # Errors
    /// Propagates store read failures.
    pub fn load(store: Arc<dyn KvStore>) -> Result<Self, StoreError> {
        let mut this = Self {
            specs: BTreeMap::new(),
            corrupt: BTreeMap::new(),
            legacy_ids: BTreeMap::new(),
            legacy_nfs: Vec::new(),
            store,
        };
        this.reload()?;
        Ok(this)
    }

    /// # Errors
    /// Propagates store read failures.
    pub fn reload(&mut self) -> Result<(), StoreError> {
        self.specs.clear();
        self.corrupt.clear();
        self.legacy_ids.clear();
        self.legacy_nfs.clear();

        for key in self.store.keys_with_prefix(SPEC_STORE_PREFIX)? {
            let Some(value) = self.store.get(&key)? else {
                continue;
            };
            match Self::decode(&key, value) {
                Ok((entry, nfs)) => {
                    if let Some(nfs) = nfs {
                        self.legacy_nfs.push(nfs);
                    }
                    if entry.spec.service_type.forbids_service_id()
                        && entry.spec.service_id.is_some()
                    {
                        warn!(key = %key, "spec carries a legacy service id");
                        self.legacy_ids.insert(key, entry);
                        continue;
                    }
                    if let Err(e) = entry.spec.validate() {
                        error!(key = %key, error = %e, "stored spec is invalid");
                        self.corrupt.insert(key, e.to_string());
                        continue;
                    }
                    self.specs.insert(entry.spec.service_name(), entry);
                }
                Err(reason) => {
                    error!(key = %key, reason = %reason, "stored spec does not decode");
                    self.corrupt.insert(key, reason);
                }
            }
        }

        info!(
            specs = self.specs.len(),
            corrupt = self.corrupt.len(),
            "loaded spec store"
        );
        Ok(())
    }

    fn decode(key: &str, value: Value) -> Result<(SpecEntry, Option<LegacyNfs>), String> {
        let document: SpecDocument = serde_json::from_value(value).map_err(|e| e.to_string())?;

        // Pre-rename NFS specs nest pool and namespace under `spec.spec`
        let legacy_nfs = (document.spec.get("service_type").and_then(Value::as_str)
            == Some("nfs"))
        .then(|| {
            let nested = document.spec.get("spec")?;
            let pool = nested.get("pool")?.as_str()?.to_string();
            let namespace = nested
                .get("namespace")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let service_id = document.spec.get("service_id")?.as_str()?.to_string();
            Some([service_id, pool, namespace])
        })
        .flatten();

        let spec: ServiceSpec =
            serde_json::from_value(document.spec).map_err(|e| e.to_string())?;
        let entry = SpecEntry {
            spec,
            created: document.created.unwrap_or_else(Utc::now),
            deleted: document.deleted,
            key: key.to_string(),
        };
        Ok((entry, legacy_nfs))
    }

    /// Persist `spec`, replacing any earlier version
    ///
    /// `created` is kept from the first save; a tombstone is cleared.
    ///
    /// # Errors
    /// Returns `InvalidSpec` if validation fails, or a store failure.
    pub fn save(&mut self, spec: ServiceSpec) -> Result<(), CoreError> {
        spec.validate()?;
        let name = spec.service_name();
        let created = self.specs.get(&name).map_or_else(Utc::now, |e| e.created);

        self.store.commit(vec![spec_op(&spec, created, None)?])?;
        self.specs.insert(
            name.clone(),
            SpecEntry {
                spec,
                created,
                deleted: None,
                key: spec_key(&name),
            },
        );
        info!(service = %name, "saved spec");
        Ok(())
    }

    /// # Errors
    /// Returns `ServiceNotFound` on miss.
    pub fn find(&self, service_name: &str) -> Result<&ServiceSpec, CoreError> {
        self.specs
            .get(service_name)
            .map(|e| &e.spec)
            .ok_or_else(|| CoreError::ServiceNotFound(service_name.to_string()))
    }

    #[must_use]
    pub fn get(&self, service_name: &str) -> Option<&SpecEntry> {
        self.specs.get(service_name)
    }

    #[must_use]
    pub fn contains(&self, service_name: &str) -> bool {
        self.specs.contains_key(service_name)
    }

    /// Remove a spec: purge now, or tombstone while daemons remain
    ///
    /// Returns `true` when the spec was purged immediately.
    ///
    /// # Errors
    /// Returns `ServiceNotFound` on miss, or a store failure.
    pub fn rm(&mut self, service_name: &str, has_daemons: bool) -> Result<bool, CoreError> {
        if !self.specs.contains_key(service_name) {
            return Err(CoreError::ServiceNotFound(service_name.to_string()));
        }
        if !has_daemons {
            self.finally_rm(service_name)?;
            return Ok(true);
        }

        let Some(entry) = self.specs.get_mut(service_name) else {
            return Err(CoreError::ServiceNotFound(service_name.to_string()));
        };
        if entry.deleted.is_none() {
            let deleted = Utc::now();
            self.store
                .commit(vec![spec_op(&entry.spec, entry.created, Some(deleted))?])?;
            entry.deleted = Some(deleted);
            info!(service = %service_name, "marked spec deleted");
        }
        Ok(false)
    }

    /// Drop a spec for good
    ///
    /// # Errors
    /// Propagates store failures.
    pub fn finally_rm(&mut self, service_name: &str) -> Result<(), StoreError> {
        if let Some(entry) = self.specs.get(service_name) {
            self.store.rm(&entry.key)?;
            self.specs.remove(service_name);
            info!(service = %service_name, "purged spec");
        }
        Ok(())
    }

    /// Every stored spec, sorted by service name
    #[must_use]
    pub fn all_specs(&self) -> &BTreeMap<String, SpecEntry> {
        &self.specs
    }

    pub fn active_specs(&self) -> impl Iterator<Item = &SpecEntry> {
        self.specs.values().filter(|e| !e.is_deleted())
    }

    pub fn deleted_specs(&self) -> impl Iterator<Item = &SpecEntry> {
        self.specs.values().filter(|e| e.is_deleted())
    }

    /// Documents that failed to decode or validate, by key
    #[must_use]
    pub fn corrupt(&self) -> &BTreeMap<String, String> {
        &self.corrupt
    }

    /// mon/mgr specs stored with a service id, by key
    #[must_use]
    pub fn legacy_ids(&self) -> &BTreeMap<String, SpecEntry> {
        &self.legacy_ids
    }

    #[must_use]
    pub fn legacy_nfs(&self) -> &[LegacyNfs] {
        &self.legacy_nfs
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use stonectl_api::PlacementSpec;

    use super::*;
    use crate::store::MemoryStore;

    fn store() -> Arc<dyn KvStore> {
        Arc::new(MemoryStore::new())
    }

    #[test]
    fn test_save_keeps_created() {
        let kv = store();
        let mut specs = SpecStore::load(kv.clone()).unwrap();
        specs
            .save(ServiceSpec::new("mgr").with_placement(PlacementSpec::count(2)))
            .unwrap();
        let created = specs.get("mgr").unwrap().created;

        specs
            .save(ServiceSpec::new("mgr").with_placement(PlacementSpec::count(3)))
            .unwrap();
        let entry = specs.get("mgr").unwrap();
        assert_eq!(entry.created, created);
        assert_eq!(entry.spec.placement.count, Some(3));

        let reloaded = SpecStore::load(kv).unwrap();
        assert_eq!(reloaded.get("mgr").unwrap().created, created);
    }

    #[test]
    fn test_save_rejects_invalid() {
        let mut specs = SpecStore::load(store()).unwrap();
        let result = specs.save(ServiceSpec::new("mds"));
        assert!(matches!(result, Err(CoreError::InvalidSpec(_))));
        assert!(specs.all_specs().is_empty());
    }

    #[test]
    fn test_rm_soft_then_purge() {
        let kv = store();
        let mut specs = SpecStore::load(kv.clone()).unwrap();
        specs.save(ServiceSpec::new("crash")).unwrap();

        assert!(!specs.rm("crash", true).unwrap());
        assert!(specs.get("crash").unwrap().is_deleted());
        assert_eq!(specs.active_specs().count(), 0);

        let reloaded = SpecStore::load(kv.clone()).unwrap();
        assert!(reloaded.get("crash").unwrap().is_deleted());

        assert!(specs.rm("crash", false).unwrap());
        assert!(specs.get("crash").is_none());
        assert!(kv.get("spec_store/crash").unwrap().is_none());
    }

    #[test]
    fn test_find_missing() {
        let specs = SpecStore::load(store()).unwrap();
        assert!(matches!(
            specs.find("rgw.foo"),
            Err(CoreError::ServiceNotFound(_))
        ));
    }

    #[test]
    fn test_invalid_document_is_kept_as_corrupt() {
        let kv = store();
        kv.set(
            "spec_store/mds",
            json!({"spec": {"service_type": "mds", "placement": {"hosts": ["host1"]}}}),
        )
        .unwrap();
        kv.set("spec_store/junk", json!({"nope": true})).unwrap();

        let specs = SpecStore::load(kv).unwrap();
        assert!(specs.all_specs().is_empty());
        assert_eq!(
            specs.corrupt().keys().collect::<Vec<_>>(),
            vec!["spec_store/junk", "spec_store/mds"]
        );
    }

    #[test]
    fn test_legacy_documents() {
        let kv = store();
        kv.set(
            "spec_store/mon.wrong",
            json!({"spec": {"service_type": "mon", "service_id": "wrong",
                            "placement": {"hosts": ["host1"]}}}),
        )
        .unwrap();
        kv.set(
            "spec_store/mds",
            json!({"spec": {"service_type": "nfs", "service_id": "foo",
                            "placement": {"hosts": ["host1"]},
                            "spec": {"pool": "mypool", "namespace": "foons"}}}),
        )
        .unwrap();

        let specs = SpecStore::load(kv).unwrap();
        assert!(specs.legacy_ids().contains_key("spec_store/mon.wrong"));
        assert_eq!(
            specs.legacy_nfs(),
            &[[
                "foo".to_string(),
                "mypool".to_string(),
                "foons".to_string()
            ]]
        );
        assert_eq!(specs.get("nfs.foo").unwrap().key, "spec_store/mds");
    }
}
