//! Process metrics record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of recent issues kept in the metrics record.
pub const MAX_RECENT_ISSUES: usize = 10;

/// A reported issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueRecord {
    /// When the issue was reported.
    pub at: DateTime<Utc>,
    /// What happened.
    pub description: String,
}

/// Persisted process metrics.
///
/// Counters only grow; absent fields in a stored record read as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppMetrics {
    /// Duration of the most recent startup, in milliseconds.
    pub startup_latency_ms: u64,
    /// Number of boots that hit a recovery failure.
    pub crash_count: u64,
    /// Number of completed initialization cycles.
    pub session_count: u64,
    /// Time of the last successful backup.
    pub last_backup_at: Option<DateTime<Utc>>,
    /// Most recent issues, oldest first.
    pub recent_issues: Vec<IssueRecord>,
}

impl AppMetrics {
    /// Merges `update` into this record.
    pub fn apply(&mut self, update: &MetricsUpdate, at: DateTime<Utc>) {
        if let Some(latency) = update.startup_latency_ms {
            self.startup_latency_ms = latency;
        }
        self.crash_count = self.crash_count.saturating_add(update.crashes);
        self.session_count = self.session_count.saturating_add(update.sessions);
        if let Some(backup_at) = update.last_backup_at {
            self.last_backup_at = Some(backup_at);
        }
        if let Some(description) = &update.issue {
            self.recent_issues.push(IssueRecord {
                at,
                description: description.clone(),
            });
            if self.recent_issues.len() > MAX_RECENT_ISSUES {
                let excess = self.recent_issues.len() - MAX_RECENT_ISSUES;
                self.recent_issues.drain(..excess);
            }
        }
    }
}

/// A partial, additive change to [`AppMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsUpdate {
    /// New startup latency.
    pub startup_latency_ms: Option<u64>,
    /// Crashes to add.
    pub crashes: u64,
    /// Sessions to add.
    pub sessions: u64,
    /// New last-backup time.
    pub last_backup_at: Option<DateTime<Utc>>,
    /// Issue to append.
    pub issue: Option<String>,
}

impl MetricsUpdate {
    /// An empty update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the latency of a finished startup.
    pub fn startup_latency(mut self, latency: std::time::Duration) -> Self {
        self.startup_latency_ms = Some(u64::try_from(latency.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Counts one crash.
    pub fn crash(mut self) -> Self {
        self.crashes += 1;
        self
    }

    /// Counts one session.
    pub fn session(mut self) -> Self {
        self.sessions += 1;
        self
    }

    /// Sets the last backup time.
    pub fn backup_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_backup_at = Some(at);
        self
    }

    /// Appends an issue description.
    pub fn issue(mut self, description: impl Into<String>) -> Self {
        self.issue = Some(description.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn counters_are_additive() {
        let now = Utc::now();
        let mut metrics = AppMetrics::default();
        metrics.apply(&MetricsUpdate::new().crash().session(), now);
        metrics.apply(&MetricsUpdate::new().crash(), now);

        assert_eq!(metrics.crash_count, 2);
        assert_eq!(metrics.session_count, 1);
    }

    #[test]
    fn latency_and_backup_time_overwrite() {
        let now = Utc::now();
        let mut metrics = AppMetrics::default();
        metrics.apply(
            &MetricsUpdate::new()
                .startup_latency(Duration::from_millis(120))
                .backup_at(now),
            now,
        );
        metrics.apply(&MetricsUpdate::new().startup_latency(Duration::from_millis(80)), now);

        assert_eq!(metrics.startup_latency_ms, 80);
        assert_eq!(metrics.last_backup_at, Some(now));
    }

    #[test]
    fn recent_issues_are_bounded_fifo() {
        let now = Utc::now();
        let mut metrics = AppMetrics::default();
        for i in 0..15 {
            metrics.apply(&MetricsUpdate::new().issue(format!("issue {i}")), now);
        }

        assert_eq!(metrics.recent_issues.len(), MAX_RECENT_ISSUES);
        assert_eq!(metrics.recent_issues[0].description, "issue 5");
        assert_eq!(metrics.recent_issues[9].description, "issue 14");
    }

    #[test]
    fn absent_fields_read_as_zero() {
        let metrics: AppMetrics = serde_json::from_str(r#"{"crash_count": 3}"#).unwrap();
        assert_eq!(metrics.crash_count, 3);
        assert_eq!(metrics.session_count, 0);
        assert!(metrics.recent_issues.is_empty());
    }
}
