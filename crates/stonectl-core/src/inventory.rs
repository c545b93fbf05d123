//! Inventory of known hosts

use std::collections::BTreeMap;
use std::sync::Arc;

use stonectl_api::host::ADMIN_LABEL;
use stonectl_api::{HostSpec, HostStatus};
use tracing::info;

use crate::error::{CoreError, StoreError};
use crate::store::{INVENTORY_KEY, KvStore, document_op, load_document};

/// Durable record of hosts, their labels, addresses and status
pub struct Inventory {
    hosts: BTreeMap<String, HostSpec>,
    store: Arc<dyn KvStore>,
}

impl std::fmt::Debug for Inventory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inventory")
            .field("hosts", &self.hosts)
            .finish_non_exhaustive()
    }
}

impl Inventory {
    /// # Errors
    /// Returns `StoreError::Corrupt` if the stored inventory does not decode.
    pub fn load(store: Arc<dyn KvStore>) -> Result<Self, StoreError> {
        let hosts: BTreeMap<String, HostSpec> =
            load_document(store.as_ref(), INVENTORY_KEY)?.unwrap_or_default();
        Ok(Self { hosts, store })
    }

    fn save(&self) -> Result<(), StoreError> {
        self.store
            .commit(vec![document_op(INVENTORY_KEY, &self.hosts)?])
    }

    /// Add a host, or update address and labels of a known one
    ///
    /// # Errors
    /// Propagates store failures.
    pub fn add_host(&mut self, spec: HostSpec) -> Result<(), CoreError> {
        let name = spec.hostname.clone();
        match self.hosts.get_mut(&name) {
            Some(existing) => {
                existing.addr = spec.addr;
                existing.labels = spec.labels;
            }
            None => {
                self.hosts.insert(name.clone(), spec);
            }
        }
        self.save()?;
        info!(host = %name, "added host");
        Ok(())
    }

    /// # Errors
    /// Returns `HostNotFound` for unknown hosts, or a store failure.
    pub fn remove_host(&mut self, hostname: &str) -> Result<HostSpec, CoreError> {
        let spec = self
            .hosts
            .remove(hostname)
            .ok_or_else(|| CoreError::HostNotFound(hostname.to_string()))?;
        self.save()?;
        info!(host = %hostname, "removed host");
        Ok(spec)
    }

    #[must_use]
    pub fn contains(&self, hostname: &str) -> bool {
        self.hosts.contains_key(hostname)
    }

    #[must_use]
    pub fn get(&self, hostname: &str) -> Option<&HostSpec> {
        self.hosts.get(hostname)
    }

    /// # Errors
    /// Returns `HostNotFound` for unknown hosts.
    pub fn require(&self, hostname: &str) -> Result<&HostSpec, CoreError> {
        self.get(hostname)
            .ok_or_else(|| CoreError::HostNotFound(hostname.to_string()))
    }

    /// All hosts, sorted by hostname
    pub fn hosts(&self) -> impl Iterator<Item = &HostSpec> {
        self.hosts.values()
    }

    #[must_use]
    pub fn hostnames(&self) -> Vec<String> {
        self.hosts.keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn filter_by_label<'a>(&'a self, label: &'a str) -> impl Iterator<Item = &'a HostSpec> {
        self.hosts.values().filter(move |h| h.has_label(label))
    }

    /// Whether removing `hostname` would leave no host carrying `_admin`
    #[must_use]
    pub fn is_last_admin(&self, hostname: &str) -> bool {
        self.get(hostname).is_some_and(|h| h.has_label(ADMIN_LABEL))
            && self.filter_by_label(ADMIN_LABEL).count() == 1
    }

    /// # Errors
    /// Returns `HostNotFound` for unknown hosts, or a store failure.
    pub fn add_label(&mut self, hostname: &str, label: &str) -> Result<(), CoreError> {
        let host = self
            .hosts
            .get_mut(hostname)
            .ok_or_else(|| CoreError::HostNotFound(hostname.to_string()))?;
        if host.labels.insert(label.to_string()) {
            self.save()?;
            info!(host = %hostname, label, "added label");
        }
        Ok(())
    }

    /// # Errors
    /// Returns `HostNotFound` for unknown hosts, or a store failure.
    pub fn remove_label(&mut self, hostname: &str, label: &str) -> Result<(), CoreError> {
        let host = self
            .hosts
            .get_mut(hostname)
            .ok_or_else(|| CoreError::HostNotFound(hostname.to_string()))?;
        if host.labels.remove(label) {
            self.save()?;
            info!(host = %hostname, label, "removed label");
        }
        Ok(())
    }

    /// Change a host's status; returns whether anything changed
    ///
    /// # Errors
    /// Returns `HostNotFound` for unknown hosts, or a store failure.
    pub fn set_status(&mut self, hostname: &str, status: HostStatus) -> Result<bool, CoreError> {
        let host = self
            .hosts
            .get_mut(hostname)
            .ok_or_else(|| CoreError::HostNotFound(hostname.to_string()))?;
        if host.status == status {
            return Ok(false);
        }
        let previous = host.status;
        host.status = status;
        self.save()?;
        info!(host = %hostname, from = %previous, to = %status, "host status changed");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_add_and_reload() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let mut inventory = Inventory::load(store.clone()).unwrap();
        inventory
            .add_host(HostSpec::new("host1").with_label("_admin"))
            .unwrap();
        inventory.add_host(HostSpec::new("host2")).unwrap();
        inventory
            .set_status("host2", HostStatus::Maintenance)
            .unwrap();

        let reloaded = Inventory::load(store).unwrap();
        assert_eq!(reloaded.hostnames(), vec!["host1", "host2"]);
        assert_eq!(
            reloaded.get("host2").unwrap().status,
            HostStatus::Maintenance
        );
    }

    #[test]
    fn test_readd_keeps_status() {
        let mut inventory = Inventory::load(Arc::new(MemoryStore::new())).unwrap();
        inventory.add_host(HostSpec::new("host1")).unwrap();
        inventory.set_status("host1", HostStatus::Offline).unwrap();
        inventory
            .add_host(HostSpec::new("host1").with_addr("10.0.0.1"))
            .unwrap();

        let host = inventory.get("host1").unwrap();
        assert_eq!(host.addr, "10.0.0.1");
        assert_eq!(host.status, HostStatus::Offline);
    }

    #[test]
    fn test_last_admin() {
        let mut inventory = Inventory::load(Arc::new(MemoryStore::new())).unwrap();
        inventory.add_host(HostSpec::new("host1")).unwrap();
        inventory.add_host(HostSpec::new("host2")).unwrap();
        inventory.add_label("host2", ADMIN_LABEL).unwrap();

        assert!(inventory.is_last_admin("host2"));
        assert!(!inventory.is_last_admin("host1"));

        inventory.add_label("host1", ADMIN_LABEL).unwrap();
        assert!(!inventory.is_last_admin("host2"));
    }

    #[test]
    fn test_unknown_host() {
        let mut inventory = Inventory::load(Arc::new(MemoryStore::new())).unwrap();
        assert!(matches!(
            inventory.add_label("nope", "x"),
            Err(CoreError::HostNotFound(_))
        ));
    }
}
