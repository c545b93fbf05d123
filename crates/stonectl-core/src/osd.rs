//! Drain-then-destroy removal of OSDs
//!
//! Each queued OSD walks the same ordered steps: mark out, wait for its
//! placement groups to move away, revoke its key, remove the daemon, and
//! optionally zap its devices. Every step records its completion on the
//! entry, so a pass interrupted at any point resumes at the next step.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use stonectl_api::{EventLevel, OrchestratorEvent, OsdRemoval};
use tracing::{debug, info, warn};

use crate::agent::HostAgent;
use crate::cache::HostCache;
use crate::cluster::{ClusterClient, check_mon_command};
use crate::error::{CoreError, StoreError};
use crate::events::EventLog;
use crate::registry::DaemonRegistry;
use crate::store::{KvStore, OSD_REMOVAL_QUEUE_KEY, document_op, load_document};

/// Collaborators a removal pass acts through
pub struct RemovalContext<'a> {
    pub cluster: &'a dyn ClusterClient,
    pub agent: &'a HostAgent,
    pub cache: &'a mut HostCache,
    pub registry: &'a mut DaemonRegistry,
    pub events: &'a mut EventLog,
    /// Hosts the agent cannot be reached on this tick
    pub unreachable: &'a BTreeSet<String>,
    pub now: DateTime<Utc>,
}

/// Count placement groups from `pg ls-by-osd`
///
/// Accepts both a bare list and `{"pg_stats": [...]}`.
fn parse_pg_count(out: &str) -> Option<u64> {
    let value: Value = serde_json::from_str(out.trim()).ok()?;
    let list = value
        .as_array()
        .or_else(|| value.get("pg_stats").and_then(Value::as_array))?;
    Some(list.len() as u64)
}

pub struct OsdRemovalQueue {
    queue: BTreeMap<u32, OsdRemoval>,
    store: Arc<dyn KvStore>,
}

impl std::fmt::Debug for OsdRemovalQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OsdRemovalQueue")
            .field("queue", &self.queue.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl OsdRemovalQueue {
    /// # Errors
    /// Returns `StoreError::Corrupt` if the persisted queue does not decode.
    pub fn load(store: Arc<dyn KvStore>) -> Result<Self, StoreError> {
        let entries: Vec<OsdRemoval> =
            load_document(store.as_ref(), OSD_REMOVAL_QUEUE_KEY)?.unwrap_or_default();
        Ok(Self {
            queue: entries.into_iter().map(|e| (e.osd_id, e)).collect(),
            store,
        })
    }

    fn save(&self) -> Result<(), StoreError> {
        let entries: Vec<&OsdRemoval> = self.queue.values().collect();
        self.store
            .commit(vec![document_op(OSD_REMOVAL_QUEUE_KEY, &entries)?])
    }

    /// Queue an OSD; re-queueing keeps the progress already made
    ///
    /// # Errors
    /// Propagates store failures.
    pub fn enqueue(&mut self, osd: OsdRemoval) -> Result<(), StoreError> {
        if let Some(existing) = self.queue.get_mut(&osd.osd_id) {
            existing.force |= osd.force;
            existing.zap |= osd.zap;
            existing.replace |= osd.replace;
        } else {
            info!(osd = osd.osd_id, host = %osd.hostname, "queued OSD for removal");
            self.queue.insert(osd.osd_id, osd);
        }
        self.save()
    }

    #[must_use]
    pub fn contains(&self, osd_id: u32) -> bool {
        self.queue.contains_key(&osd_id)
    }

    #[must_use]
    pub fn all(&self) -> Vec<OsdRemoval> {
        self.queue.values().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Dequeue OSDs, marking those already drained back `in`
    ///
    /// OSDs whose key was already revoked can no longer be stopped and are
    /// left queued. Returns the ids actually dequeued.
    ///
    /// # Errors
    /// Propagates cluster and store failures.
    pub async fn stop(
        &mut self,
        cluster: &dyn ClusterClient,
        ids: &[u32],
    ) -> Result<Vec<u32>, CoreError> {
        let mut stopped = Vec::new();
        for id in ids {
            let Some(entry) = self.queue.get(id) else {
                continue;
            };
            if entry.auth_revoked {
                warn!(osd = id, "OSD already purged, cannot stop its removal");
                continue;
            }
            if entry.drain_started_at.is_some() {
                let cmd = json!({"prefix": "osd in", "ids": [id.to_string()]});
                check_mon_command(cluster, &cmd).await?;
            }
            self.queue.remove(id);
            stopped.push(*id);
            info!(osd = id, "stopped OSD removal");
        }
        self.save()?;
        Ok(stopped)
    }

    /// Advance every queued OSD as far as it can go
    ///
    /// Per-OSD failures are logged and recorded as events; the entry stays
    /// queued and is retried on the next pass.
    ///
    /// # Errors
    /// Only store failures abort the pass.
    pub async fn process_removal_queue(
        &mut self,
        ctx: &mut RemovalContext<'_>,
    ) -> Result<(), StoreError> {
        let ids: Vec<u32> = self.queue.keys().copied().collect();
        for id in ids {
            let Some(mut entry) = self.queue.get(&id).cloned() else {
                continue;
            };
            let outcome = Self::advance(&mut entry, ctx).await;
            let subject = entry.daemon_name();
            match outcome {
                Ok(true) => {
                    self.queue.remove(&id);
                    ctx.events.record(OrchestratorEvent::daemon(
                        &subject,
                        EventLevel::Info,
                        format!("Removed {subject} from host '{}'", entry.hostname),
                    ));
                }
                Ok(false) => {
                    self.queue.insert(id, entry);
                }
                Err(e) => {
                    warn!(osd = id, error = %e, "OSD removal step failed");
                    ctx.events.record(OrchestratorEvent::daemon(
                        &subject,
                        EventLevel::Error,
                        format!("Failed to remove {subject}: {e}"),
                    ));
                    self.queue.insert(id, entry);
                }
            }
            self.save()?;
        }
        Ok(())
    }

    /// Run the next pending steps of one entry; `Ok(true)` when finished
    async fn advance(
        entry: &mut OsdRemoval,
        ctx: &mut RemovalContext<'_>,
    ) -> Result<bool, CoreError> {
        let id = entry.osd_id.to_string();

        if entry.drain_started_at.is_none() {
            check_mon_command(ctx.cluster, &json!({"prefix": "osd out", "ids": [id]})).await?;
            entry.drain_started_at = Some(ctx.now);
            info!(osd = entry.osd_id, "started draining OSD");
        }

        if entry.drain_done_at.is_none() {
            let reply = check_mon_command(
                ctx.cluster,
                &json!({"prefix": "pg ls-by-osd", "id": entry.osd_id, "format": "json"}),
            )
            .await?;
            let pgs = parse_pg_count(&reply.out).ok_or_else(|| CoreError::Cluster {
                prefix: "pg ls-by-osd".to_string(),
                rc: reply.rc,
                err: format!("unexpected reply {:?}", reply.out),
            })?;
            entry.pg_count = Some(pgs);
            if pgs > 0 && !entry.force {
                debug!(osd = entry.osd_id, pgs, "OSD still draining");
                return Ok(false);
            }
            entry.drain_done_at = Some(ctx.now);
            info!(osd = entry.osd_id, pgs, force = entry.force, "OSD drained");
        }

        if !entry.auth_revoked {
            let prefix = if entry.replace { "osd destroy" } else { "osd purge" };
            check_mon_command(
                ctx.cluster,
                &json!({"prefix": prefix, "id": entry.osd_id, "yes_i_really_mean_it": true}),
            )
            .await?;
            check_mon_command(
                ctx.cluster,
                &json!({"prefix": "auth rm", "entity": entry.daemon_name()}),
            )
            .await?;
            entry.auth_revoked = true;
        }

        if ctx.unreachable.contains(&entry.hostname) {
            debug!(
                osd = entry.osd_id,
                host = %entry.hostname,
                "host unreachable, deferring daemon removal"
            );
            return Ok(false);
        }

        let name = entry.daemon_name();
        if !entry.daemon_removed {
            ctx.agent.remove_daemon(&entry.hostname, &name).await?;
            ctx.cache.rm_daemon(&entry.hostname, &name);
            ctx.registry.unregister(&name);
            entry.daemon_removed = true;
        }

        if entry.zap {
            ctx.agent.zap_osd(&entry.hostname, entry.osd_id).await?;
            ctx.cache.invalidate_host_devices(&entry.hostname);
            entry.zap = false;
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_parse_pg_count() {
        assert_eq!(parse_pg_count("[]"), Some(0));
        assert_eq!(parse_pg_count(r#"[{"pgid": "1.0"}, {"pgid": "1.1"}]"#), Some(2));
        assert_eq!(parse_pg_count(r#"{"pg_stats": [{"pgid": "1.0"}]}"#), Some(1));
        assert_eq!(parse_pg_count("garbage"), None);
    }

    #[test]
    fn test_enqueue_persists_and_merges() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let mut queue = OsdRemovalQueue::load(kv.clone()).unwrap();
        queue.enqueue(OsdRemoval::new(1, "host1")).unwrap();

        let mut again = OsdRemoval::new(1, "host1");
        again.force = true;
        queue.enqueue(again).unwrap();

        let reloaded = OsdRemovalQueue::load(kv).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.all()[0].force);
    }
}
