//! Execution audit trail.
//!
//! Every rule attempt, test run, and lifecycle change appends one row to
//! the store. The append is fire-and-forget: a failed audit write must
//! never fail the operation that triggered it.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::warn;

use crate::store::{HookStore, LogKind, LogRow, LogStatus, RuleStatistics};
use crate::Result;

/// Output captured in audit metadata is truncated to this many characters.
const MAX_METADATA_OUTPUT: usize = 1_000;

#[derive(Clone)]
pub struct Auditor {
    store: Arc<dyn HookStore>,
}

impl Auditor {
    pub fn new(store: Arc<dyn HookStore>) -> Self {
        Self { store }
    }

    /// Append one audit row. Write failures are logged and swallowed.
    pub async fn record(
        &self,
        rule_id: &str,
        kind: LogKind,
        status: LogStatus,
        duration_ms: u64,
        error_message: Option<String>,
        metadata: Value,
        project_path: Option<&str>,
    ) {
        let row = LogRow {
            id: uuid::Uuid::new_v4().to_string(),
            rule_id: rule_id.to_string(),
            event_type: kind,
            status,
            execution_time_ms: duration_ms,
            error_message,
            metadata,
            project_path: project_path.map(str::to_string),
            created_at: Utc::now(),
        };
        if let Err(e) = self.store.insert_log_row(&row).await {
            warn!(rule = rule_id, error = %e, "failed to write audit row");
        }
    }

    /// Per-rule aggregates over the window. Read errors propagate: stale
    /// statistics are a correctness risk the caller must know about.
    pub async fn statistics(&self, window_days: u32) -> Result<Vec<RuleStatistics>> {
        self.store.aggregate_statistics(window_days).await
    }

    /// Delete rows older than the retention window; returns the count
    /// removed. This is the only deletion path for log rows.
    pub async fn cleanup(&self, retention_days: u32) -> Result<u64> {
        self.store.delete_log_rows_older_than(retention_days).await
    }
}

/// Metadata blob for an execution/test row: event name, command text, and
/// truncated output alongside the dispatch timestamp.
pub fn execution_metadata(event: &str, command: &str, output: &str) -> Value {
    let truncated: String = output.chars().take(MAX_METADATA_OUTPUT).collect();
    json!({
        "event": event,
        "command": command,
        "output": truncated,
        "timestamp": Utc::now().to_rfc3339(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{LogFilter, MemoryStore};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    struct FailingStore;

    #[async_trait]
    impl HookStore for FailingStore {
        async fn select_enabled_rules(&self) -> Result<Vec<crate::engine::rules::HookRule>> {
            Err(crate::HookforgeError::Store("down".into()))
        }
        async fn select_rule_by_id(
            &self,
            _: &str,
        ) -> Result<Option<crate::engine::rules::HookRule>> {
            Err(crate::HookforgeError::Store("down".into()))
        }
        async fn upsert_rule(&self, _: &crate::engine::rules::HookRule) -> Result<()> {
            Err(crate::HookforgeError::Store("down".into()))
        }
        async fn delete_rule(&self, _: &str) -> Result<()> {
            Err(crate::HookforgeError::Store("down".into()))
        }
        async fn insert_log_row(&self, _: &LogRow) -> Result<()> {
            Err(crate::HookforgeError::Store("down".into()))
        }
        async fn select_log_rows(&self, _: &LogFilter) -> Result<Vec<LogRow>> {
            Err(crate::HookforgeError::Store("down".into()))
        }
        async fn delete_log_rows_older_than(&self, _: u32) -> Result<u64> {
            Err(crate::HookforgeError::Store("down".into()))
        }
        async fn aggregate_statistics(&self, _: u32) -> Result<Vec<RuleStatistics>> {
            Err(crate::HookforgeError::Store("down".into()))
        }
    }

    #[tokio::test]
    async fn record_appends_a_row() {
        let store = Arc::new(MemoryStore::new());
        let auditor = Auditor::new(store.clone());
        auditor
            .record(
                "r1",
                LogKind::Execution,
                LogStatus::Success,
                42,
                None,
                execution_metadata("FileChange", "echo hi", "hi"),
                Some("/proj"),
            )
            .await;

        let rows = store.select_log_rows(&LogFilter::default()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].rule_id, "r1");
        assert_eq!(rows[0].execution_time_ms, 42);
        assert_eq!(rows[0].project_path.as_deref(), Some("/proj"));
        assert_eq!(rows[0].metadata["command"], "echo hi");
    }

    #[tokio::test]
    async fn record_swallows_store_failures() {
        let auditor = Auditor::new(Arc::new(FailingStore));
        // Must not panic or propagate.
        auditor
            .record(
                "r1",
                LogKind::Execution,
                LogStatus::Error,
                1,
                Some("boom".into()),
                json!({}),
                None,
            )
            .await;
    }

    #[tokio::test]
    async fn statistics_read_errors_propagate() {
        let auditor = Auditor::new(Arc::new(FailingStore));
        assert!(auditor.statistics(7).await.is_err());
        assert!(auditor.cleanup(7).await.is_err());
    }

    #[test]
    fn metadata_output_is_truncated() {
        let long = "x".repeat(5_000);
        let meta = execution_metadata("FileChange", "cmd", &long);
        assert_eq!(meta["output"].as_str().unwrap().len(), MAX_METADATA_OUTPUT);
    }
}
