//! OSD removal queue entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// An OSD scheduled for drain and removal
///
/// Progress flags are persisted so that a restart resumes where the
/// previous pass stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OsdRemoval {
    pub osd_id: u32,
    pub hostname: String,
    /// Keep the OSD id reserved (destroy instead of purge)
    #[serde(default)]
    pub replace: bool,
    /// Do not wait for the drain to finish
    #[serde(default)]
    pub force: bool,
    /// Wipe the backing devices after removal
    #[serde(default)]
    pub zap: bool,
    pub process_started_at: DateTime<Utc>,
    #[serde(default)]
    pub drain_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub drain_done_at: Option<DateTime<Utc>>,
    /// Last placement-group count reported for this OSD
    #[serde(default)]
    pub pg_count: Option<u64>,
    #[serde(default)]
    pub auth_revoked: bool,
    #[serde(default)]
    pub daemon_removed: bool,
}

impl OsdRemoval {
    pub fn new(osd_id: u32, hostname: impl Into<String>) -> Self {
        Self {
            osd_id,
            hostname: hostname.into(),
            replace: false,
            force: false,
            zap: false,
            process_started_at: Utc::now(),
            drain_started_at: None,
            drain_done_at: None,
            pg_count: None,
            auth_revoked: false,
            daemon_removed: false,
        }
    }

    #[must_use]
    pub fn daemon_name(&self) -> String {
        format!("osd.{}", self.osd_id)
    }
}
