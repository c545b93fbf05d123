//! Bounded per-subject event history

use std::collections::{BTreeMap, VecDeque};

use stonectl_api::{EventLevel, OrchestratorEvent};
use tracing::{error, info};

#[derive(Debug)]
pub struct EventLog {
    events: BTreeMap<String, VecDeque<OrchestratorEvent>>,
    capacity: usize,
}

impl EventLog {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            events: BTreeMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&mut self, event: OrchestratorEvent) {
        match event.level {
            EventLevel::Info => info!(subject = %event.subject, "{}", event.message),
            EventLevel::Error => error!(subject = %event.subject, "{}", event.message),
        }
        let queue = self.events.entry(event.subject.clone()).or_default();
        if queue.len() == self.capacity {
            queue.pop_front();
        }
        queue.push_back(event);
    }

    #[must_use]
    pub fn for_subject(&self, subject: &str) -> Vec<OrchestratorEvent> {
        self.events
            .get(subject)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every event, oldest first
    #[must_use]
    pub fn all(&self) -> Vec<OrchestratorEvent> {
        let mut all: Vec<_> = self.events.values().flatten().cloned().collect();
        all.sort_by_key(|e| e.created);
        all
    }

    pub fn forget(&mut self, subject: &str) {
        self.events.remove(subject);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_bounded() {
        let mut log = EventLog::new(2);
        for i in 0..3 {
            log.record(OrchestratorEvent::daemon(
                "mgr.a",
                EventLevel::Info,
                format!("event {i}"),
            ));
        }
        let messages: Vec<_> = log
            .for_subject("mgr.a")
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(messages, vec!["event 1", "event 2"]);
        assert!(log.for_subject("mgr.b").is_empty());
    }
}
