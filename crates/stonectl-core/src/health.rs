//! Aggregation of per-tick findings into named health checks

use std::collections::BTreeMap;

use stonectl_api::health::codes;
use stonectl_api::{HealthCheck, HealthSeverity};

fn describe(code: &str, count: usize) -> (HealthSeverity, String) {
    use HealthSeverity::{Error, Warning};
    match code {
        codes::STRAY_DAEMON => (
            Warning,
            format!("{count} stray daemon(s) not managed by stoneadm"),
        ),
        codes::DAEMON_PLACE_FAIL => (Warning, format!("Failed to place {count} daemon(s)")),
        codes::APPLY_SPEC_FAIL => (Warning, format!("Failed to apply {count} service(s)")),
        codes::INVALID_CONFIG_OPTION => (
            Warning,
            format!("Ignoring {count} invalid config option(s)"),
        ),
        codes::HOST_UNREACHABLE => (Warning, format!("{count} host(s) unreachable")),
        codes::HOST_IN_MAINTENANCE => (Warning, format!("{count} host(s) in maintenance mode")),
        codes::FAILED_DAEMON => (Warning, format!("{count} failed stoneadm daemon(s)")),
        codes::DAEMON_STOP_BLOCKED => (
            Warning,
            format!("{count} daemon(s) blocked from stopping by ok-to-stop"),
        ),
        codes::SPEC_CORRUPT => (Error, format!("{count} stored spec(s) could not be loaded")),
        codes::MIGRATION_FAILED => (Error, "Migration failed, reconciliation paused".to_string()),
        codes::MIGRATION_WAITING => (
            Warning,
            "Migration waiting, reconciliation paused".to_string(),
        ),
        other => (Warning, format!("{count} {other} finding(s)")),
    }
}

/// Findings gathered while running one tick
#[derive(Debug, Default)]
pub struct HealthCollector {
    findings: BTreeMap<&'static str, Vec<String>>,
}

impl HealthCollector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, code: &'static str, detail: impl Into<String>) {
        self.findings.entry(code).or_default().push(detail.into());
    }

    /// Turn the findings into health checks, sorted by code
    #[must_use]
    pub fn finish(self) -> Vec<HealthCheck> {
        self.findings
            .into_iter()
            .filter(|(_, detail)| !detail.is_empty())
            .map(|(code, detail)| {
                let (severity, summary) = describe(code, detail.len());
                HealthCheck {
                    code: code.to_string(),
                    severity,
                    summary,
                    count: detail.len(),
                    detail,
                }
            })
            .collect()
    }
}
