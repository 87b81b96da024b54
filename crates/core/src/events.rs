//! Commit events, reports and the metrics reporter interface
//!
//! After a successful commit the producer broadcasts a
//! [`CreateSnapshotEvent`] to its listeners and hands a [`CommitReport`] to
//! its [`MetricsReporter`]. Failures in either never fail the commit; the
//! driver logs and drops them.

use std::collections::HashMap;
use std::time::Duration;

use tracing::info;

use crate::crate_version;

/// Boxed error raised by listeners and reporters; always logged, never
/// propagated.
pub type EventError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Event describing a snapshot that was committed.
#[derive(Debug, Clone)]
pub struct CreateSnapshotEvent {
    /// Name of the table that was committed to
    pub table_name: String,
    /// Operation that produced the snapshot
    pub operation: String,
    /// Identifier of the committed snapshot
    pub snapshot_id: i64,
    /// Sequence number of the committed snapshot
    pub sequence_number: i64,
    /// Summary of the committed snapshot
    pub summary: HashMap<String, String>,
}

/// Receives table events after successful commits.
pub trait Listener: Send + Sync {
    /// Handle a committed snapshot.
    fn notify(&self, event: &CreateSnapshotEvent) -> Result<(), EventError>;
}

/// Measurements collected across all attempts of one commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitMetrics {
    /// Number of attempts, including the successful one
    pub attempts: u32,
    /// Wall-clock duration of the whole commit
    pub total_duration: Duration,
}

/// Report handed to the metrics reporter after a successful commit.
#[derive(Debug, Clone)]
pub struct CommitReport {
    /// Name of the table that was committed to
    pub table_name: String,
    /// Identifier of the committed snapshot
    pub snapshot_id: i64,
    /// Operation that produced the snapshot
    pub operation: String,
    /// Sequence number of the committed snapshot
    pub sequence_number: i64,
    /// Environment metadata the commit ran under
    pub metadata: HashMap<String, String>,
    /// Commit measurements
    pub metrics: CommitMetrics,
}

/// Receives commit reports.
pub trait MetricsReporter: Send + Sync {
    /// Handle a commit report.
    fn report(&self, report: &CommitReport) -> Result<(), EventError>;
}

/// The default reporter: logs reports through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingMetricsReporter;

impl MetricsReporter for LoggingMetricsReporter {
    fn report(&self, report: &CommitReport) -> Result<(), EventError> {
        info!(
            table_name = %report.table_name,
            snapshot_id = report.snapshot_id,
            operation = %report.operation,
            sequence_number = report.sequence_number,
            attempts = report.metrics.attempts,
            total_duration_ms = report.metrics.total_duration.as_millis() as u64,
            "commit report"
        );
        Ok(())
    }
}

/// Key under which the engine name is recorded in summaries and reports.
pub const ENGINE_NAME: &str = "engine-name";
/// Key under which the engine version is recorded in summaries and reports.
pub const ENGINE_VERSION: &str = "engine-version";

/// Metadata about the environment a commit runs in.
///
/// Injected into the producer explicitly rather than read from process
/// globals, so concurrent commits can carry different contexts.
#[derive(Debug, Clone)]
pub struct EnvironmentContext {
    entries: HashMap<String, String>,
}

impl Default for EnvironmentContext {
    fn default() -> Self {
        let mut entries = HashMap::new();
        entries.insert(ENGINE_NAME.to_string(), "floe".to_string());
        entries.insert(ENGINE_VERSION.to_string(), crate_version().to_string());
        Self { entries }
    }
}

impl EnvironmentContext {
    /// Add or replace an entry.
    pub fn with_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    /// All entries of this context.
    pub fn entries(&self) -> &HashMap<String, String> {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_context_names_engine() {
        let context = EnvironmentContext::default();
        assert_eq!(context.entries()[ENGINE_NAME], "floe");
        assert!(!context.entries()[ENGINE_VERSION].is_empty());
    }

    #[test]
    fn test_context_entries_can_be_extended() {
        let context = EnvironmentContext::default().with_entry("engine-host", "worker-1");
        assert_eq!(context.entries()["engine-host"], "worker-1");
    }
}
