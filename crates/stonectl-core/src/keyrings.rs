//! Client keyrings and where they are distributed

use std::collections::BTreeMap;
use std::sync::Arc;

use stonectl_api::ClientKeyringSpec;
use tracing::info;

use crate::error::StoreError;
use crate::store::{CLIENT_KEYRINGS_KEY, KvStore, StoreOp, document_op, load_document};

/// Path of the keyring file written on hosts
#[must_use]
pub fn keyring_path(entity: &str) -> String {
    format!("/etc/stone/stone.{entity}.keyring")
}

pub struct ClientKeyringStore {
    keyrings: BTreeMap<String, ClientKeyringSpec>,
    store: Arc<dyn KvStore>,
}

impl std::fmt::Debug for ClientKeyringStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientKeyringStore")
            .field("keyrings", &self.keyrings)
            .finish_non_exhaustive()
    }
}

impl ClientKeyringStore {
    /// # Errors
    /// Returns `StoreError::Corrupt` if the stored document does not decode.
    pub fn load(store: Arc<dyn KvStore>) -> Result<Self, StoreError> {
        let mut this = Self {
            keyrings: BTreeMap::new(),
            store,
        };
        this.reload()?;
        Ok(this)
    }

    /// # Errors
    /// Returns `StoreError::Corrupt` if the stored document does not decode.
    pub fn reload(&mut self) -> Result<(), StoreError> {
        self.keyrings =
            load_document(self.store.as_ref(), CLIENT_KEYRINGS_KEY)?.unwrap_or_default();
        Ok(())
    }

    #[must_use]
    pub fn get(&self, entity: &str) -> Option<&ClientKeyringSpec> {
        self.keyrings.get(entity)
    }

    pub fn all(&self) -> impl Iterator<Item = &ClientKeyringSpec> {
        self.keyrings.values()
    }

    /// # Errors
    /// Propagates store failures.
    pub fn update(&mut self, keyring: ClientKeyringSpec) -> Result<(), StoreError> {
        let entity = keyring.entity.clone();
        let mut next = self.keyrings.clone();
        next.insert(entity.clone(), keyring);
        self.store.commit(vec![Self::op(&next)?])?;
        self.keyrings = next;
        info!(entity = %entity, "updated client keyring");
        Ok(())
    }

    /// # Errors
    /// Propagates store failures.
    pub fn rm(&mut self, entity: &str) -> Result<(), StoreError> {
        if !self.keyrings.contains_key(entity) {
            return Ok(());
        }
        let mut next = self.keyrings.clone();
        next.remove(entity);
        self.store.commit(vec![Self::op(&next)?])?;
        self.keyrings = next;
        info!(entity = %entity, "removed client keyring");
        Ok(())
    }

    /// Op writing `keyrings` as the whole keyring document
    ///
    /// # Errors
    /// Returns `StoreError::Encode` on serialization failure.
    pub fn op(keyrings: &BTreeMap<String, ClientKeyringSpec>) -> Result<StoreOp, StoreError> {
        document_op(CLIENT_KEYRINGS_KEY, keyrings)
    }

    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, ClientKeyringSpec> {
        self.keyrings.clone()
    }
}

#[cfg(test)]
mod tests {
    use stonectl_api::PlacementSpec;

    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_update_and_reload() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let mut keyrings = ClientKeyringStore::load(kv.clone()).unwrap();
        keyrings
            .update(ClientKeyringSpec::new(
                "client.admin",
                PlacementSpec::label("_admin"),
            ))
            .unwrap();

        let reloaded = ClientKeyringStore::load(kv).unwrap();
        let admin = reloaded.get("client.admin").unwrap();
        assert_eq!(admin.placement.label.as_deref(), Some("_admin"));
        assert_eq!(admin.mode, 0o600);
    }

    #[test]
    fn test_path() {
        assert_eq!(
            keyring_path("client.admin"),
            "/etc/stone/stone.client.admin.keyring"
        );
    }
}
