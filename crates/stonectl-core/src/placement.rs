//! Turning placement rules into host assignments
//!
//! Everything here is pure: the same hosts, rule and existing daemons
//! always give the same answer, and nothing is read from or written to
//! the outside world.

use std::collections::{BTreeMap, BTreeSet};

use stonectl_api::{DaemonDescription, HostPlacementSpec, HostSpec, PlacementSpec, ServiceType};

use crate::error::PlacementError;

/// One daemon slot on one host
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DaemonPlacement {
    pub hostname: String,
    pub network: String,
    /// Distinguishes several slots of one service on the same host
    pub name: String,
}

impl DaemonPlacement {
    pub fn host(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            network: String::new(),
            name: String::new(),
        }
    }

    fn from_spec(spec: &HostPlacementSpec) -> Self {
        Self {
            hostname: spec.hostname.clone(),
            network: spec.network.clone(),
            name: spec.name.clone(),
        }
    }

    /// Whether `daemon` fills this slot
    fn matches(&self, daemon: &DaemonDescription) -> bool {
        daemon.hostname == self.hostname
            && (self.name.is_empty() || daemon.daemon_id.split('.').any(|part| part == self.name))
    }

    /// Id for a new daemon in this slot: `[service_id.]hostname[.name]`
    ///
    /// A numeric suffix is appended while the name is already taken by a
    /// daemon of the same type.
    #[must_use]
    pub fn daemon_id(
        &self,
        daemon_type: &ServiceType,
        service_id: Option<&str>,
        taken: &BTreeSet<String>,
    ) -> String {
        let mut base = String::new();
        if let Some(service_id) = service_id {
            base.push_str(service_id);
            base.push('.');
        }
        base.push_str(&self.hostname);
        if !self.name.is_empty() {
            base.push('.');
            base.push_str(&self.name);
        }

        let mut id = base.clone();
        let mut n = 1;
        while taken.contains(&format!("{daemon_type}.{id}")) {
            id = format!("{base}.{n}");
            n += 1;
        }
        id
    }
}

/// Outcome of placing one service
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlacementResult {
    /// Slots the service should occupy on schedulable hosts
    pub slots: Vec<DaemonPlacement>,
    /// Slots without a daemon yet
    pub to_add: Vec<DaemonPlacement>,
    /// Daemons on schedulable hosts that no slot claims
    pub to_remove: Vec<DaemonDescription>,
    /// Daemons on unreachable hosts; never touched, but counted
    pub frozen: Vec<DaemonDescription>,
    /// Daemons the rule's `count` asks for but no host could take
    pub shortfall: usize,
}

/// Placement of one service against a snapshot of hosts and daemons
pub struct HostAssignment<'a> {
    placement: &'a PlacementSpec,
    hosts: &'a [HostSpec],
    unreachable: &'a BTreeSet<String>,
    existing: &'a [DaemonDescription],
    daemon_counts: Option<&'a BTreeMap<String, usize>>,
}

impl<'a> HostAssignment<'a> {
    /// `hosts` is the whole inventory, `existing` the service's daemons
    pub fn new(
        placement: &'a PlacementSpec,
        hosts: &'a [HostSpec],
        unreachable: &'a BTreeSet<String>,
        existing: &'a [DaemonDescription],
    ) -> Self {
        Self {
            placement,
            hosts,
            unreachable,
            existing,
            daemon_counts: None,
        }
    }

    /// Managed daemons per host, used to spread count-only placements
    #[must_use]
    pub fn with_daemon_counts(mut self, counts: &'a BTreeMap<String, usize>) -> Self {
        self.daemon_counts = Some(counts);
        self
    }

    fn schedulable(&self) -> BTreeSet<&'a str> {
        self.hosts
            .iter()
            .filter(|h| h.is_available() && !self.unreachable.contains(&h.hostname))
            .map(|h| h.hostname.as_str())
            .collect()
    }

    /// Candidate slots on schedulable hosts, best first
    fn candidates(
        &self,
        schedulable: &BTreeSet<&str>,
        live: &[&DaemonDescription],
    ) -> Result<Vec<DaemonPlacement>, PlacementError> {
        let runs_service: BTreeSet<&str> = live.iter().map(|d| d.hostname.as_str()).collect();
        let by_existing_then_name = |mut hosts: Vec<&str>| -> Vec<DaemonPlacement> {
            hosts.sort_by_key(|h| (!runs_service.contains(*h), *h));
            hosts.into_iter().map(DaemonPlacement::host).collect()
        };

        if !self.placement.hosts.is_empty() {
            let known: BTreeSet<&str> = self.hosts.iter().map(|h| h.hostname.as_str()).collect();
            if let Some(unknown) = self
                .placement
                .hosts
                .iter()
                .find(|h| !known.contains(h.hostname.as_str()))
            {
                return Err(PlacementError::UnknownHost(unknown.hostname.clone()));
            }
            return Ok(self
                .placement
                .hosts
                .iter()
                .filter(|h| schedulable.contains(h.hostname.as_str()))
                .map(DaemonPlacement::from_spec)
                .collect());
        }

        if let Some(pattern) = &self.placement.host_pattern {
            let pattern = glob::Pattern::new(pattern).map_err(|e| {
                PlacementError::Invalid(stonectl_api::SpecError::InvalidHostPattern {
                    pattern: pattern.clone(),
                    reason: e.msg.to_string(),
                })
            })?;
            let matching = schedulable
                .iter()
                .copied()
                .filter(|h| pattern.matches(h))
                .collect();
            return Ok(by_existing_then_name(matching));
        }

        if let Some(label) = &self.placement.label {
            let labelled = self
                .hosts
                .iter()
                .filter(|h| h.has_label(label) && schedulable.contains(h.hostname.as_str()))
                .map(|h| h.hostname.as_str())
                .collect();
            return Ok(by_existing_then_name(labelled));
        }

        // count only
        let load = |h: &str| {
            self.daemon_counts
                .and_then(|c| c.get(h))
                .copied()
                .unwrap_or_default()
        };
        let mut hosts: Vec<&str> = schedulable.iter().copied().collect();
        hosts.sort_by_key(|h| (!runs_service.contains(*h), load(*h), *h));
        Ok(hosts.into_iter().map(DaemonPlacement::host).collect())
    }

    /// Resolve the rule and diff it against the existing daemons
    ///
    /// # Errors
    /// Returns `UnknownHost` when an explicit host is not in the inventory,
    /// or `Invalid` for a malformed rule.
    pub fn place(&self) -> Result<PlacementResult, PlacementError> {
        self.placement.validate()?;
        let schedulable = self.schedulable();

        let (live, frozen): (Vec<&DaemonDescription>, Vec<&DaemonDescription>) = self
            .existing
            .iter()
            .partition(|d| schedulable.contains(d.hostname.as_str()));

        let candidates = self.candidates(&schedulable, &live)?;
        let (slots, shortfall) = match self.placement.count {
            Some(count) => {
                let count = count as usize;
                let want = count.saturating_sub(frozen.len());
                let slots: Vec<_> = candidates.into_iter().take(want).collect();
                let shortfall = count.saturating_sub(slots.len() + frozen.len());
                (slots, shortfall)
            }
            None => (candidates, 0),
        };

        // Named slots claim first so a generic slot cannot steal their daemon.
        let mut claimed = vec![false; live.len()];
        let mut filled = vec![false; slots.len()];
        let order = (0..slots.len())
            .filter(|&i| !slots[i].name.is_empty())
            .chain((0..slots.len()).filter(|&i| slots[i].name.is_empty()));
        for i in order.collect::<Vec<_>>() {
            if let Some(j) = (0..live.len()).find(|&j| !claimed[j] && slots[i].matches(live[j])) {
                claimed[j] = true;
                filled[i] = true;
            }
        }

        let to_add = slots
            .iter()
            .zip(&filled)
            .filter(|(_, filled)| !**filled)
            .map(|(slot, _)| slot.clone())
            .collect();
        let to_remove = live
            .iter()
            .zip(&claimed)
            .filter(|(_, claimed)| !**claimed)
            .map(|(d, _)| (*d).clone())
            .collect();

        Ok(PlacementResult {
            slots,
            to_add,
            to_remove,
            frozen: frozen.into_iter().cloned().collect(),
            shortfall,
        })
    }
}

/// Slots a rule yields on `hosts` given the existing daemons
///
/// # Errors
/// See [`HostAssignment::place`].
pub fn resolve(
    placement: &PlacementSpec,
    hosts: &[HostSpec],
    existing: &[DaemonDescription],
) -> Result<Vec<DaemonPlacement>, PlacementError> {
    let unreachable = BTreeSet::new();
    Ok(HostAssignment::new(placement, hosts, &unreachable, existing)
        .place()?
        .slots)
}
