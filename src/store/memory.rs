//! In-memory `HookStore` implementation.
//!
//! Backs the CLI and the test suite. Rules keep insertion order so a
//! registry rebuild observes the same ordering a relational store's
//! primary-key scan would give it.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::Mutex;

use super::{HookStore, LogFilter, LogKind, LogRow, LogStatus, RuleStatistics};
use crate::engine::rules::HookRule;
use crate::Result;

#[derive(Default)]
struct Inner {
    rules: Vec<HookRule>,
    logs: Vec<LogRow>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: Vec<HookRule>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                rules,
                logs: Vec::new(),
            }),
        }
    }
}

#[async_trait]
impl HookStore for MemoryStore {
    async fn select_enabled_rules(&self) -> Result<Vec<HookRule>> {
        let inner = self.inner.lock().await;
        Ok(inner.rules.iter().filter(|r| r.enabled).cloned().collect())
    }

    async fn select_rule_by_id(&self, id: &str) -> Result<Option<HookRule>> {
        let inner = self.inner.lock().await;
        Ok(inner.rules.iter().find(|r| r.id == id).cloned())
    }

    async fn upsert_rule(&self, rule: &HookRule) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match inner.rules.iter_mut().find(|r| r.id == rule.id) {
            Some(existing) => *existing = rule.clone(),
            None => inner.rules.push(rule.clone()),
        }
        Ok(())
    }

    async fn delete_rule(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.rules.retain(|r| r.id != id);
        Ok(())
    }

    async fn insert_log_row(&self, row: &LogRow) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.logs.push(row.clone());
        Ok(())
    }

    async fn select_log_rows(&self, filter: &LogFilter) -> Result<Vec<LogRow>> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<LogRow> = inner
            .logs
            .iter()
            .filter(|row| {
                filter
                    .rule_id
                    .as_ref()
                    .map_or(true, |id| &row.rule_id == id)
                    && filter.kind.map_or(true, |k| row.event_type == k)
            })
            .cloned()
            .collect();
        // Newest first, the order the console renders history in.
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn delete_log_rows_older_than(&self, days: u32) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(days as i64);
        let mut inner = self.inner.lock().await;
        let before = inner.logs.len();
        inner.logs.retain(|row| row.created_at >= cutoff);
        Ok((before - inner.logs.len()) as u64)
    }

    async fn aggregate_statistics(&self, window_days: u32) -> Result<Vec<RuleStatistics>> {
        let cutoff = Utc::now() - Duration::days(window_days as i64);
        let inner = self.inner.lock().await;

        let mut out = Vec::new();
        for rule in inner.rules.iter().filter(|r| r.enabled) {
            let rows: Vec<&LogRow> = inner
                .logs
                .iter()
                .filter(|row| {
                    row.rule_id == rule.id
                        && row.event_type == LogKind::Execution
                        && row.created_at >= cutoff
                })
                .collect();

            let execution_count = rows.len() as u64;
            let success_count = rows
                .iter()
                .filter(|row| row.status == LogStatus::Success)
                .count() as u64;
            let avg_duration_ms = if rows.is_empty() {
                0.0
            } else {
                rows.iter().map(|row| row.execution_time_ms as f64).sum::<f64>()
                    / rows.len() as f64
            };
            let last_execution = rows.iter().map(|row| row.created_at).max();

            out.push(RuleStatistics {
                rule_id: rule.id.clone(),
                name: rule.name.clone(),
                event: rule.event,
                execution_count,
                avg_duration_ms,
                success_count,
                last_execution,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::events::EventKind;
    use crate::engine::rules::ConditionKind;
    use pretty_assertions::assert_eq;

    fn rule(id: &str, enabled: bool) -> HookRule {
        HookRule {
            id: id.into(),
            name: format!("rule {id}"),
            description: String::new(),
            event: EventKind::FileChange,
            condition: ConditionKind::Always,
            condition_params: Default::default(),
            command: "true".into(),
            timeout_ms: 5000,
            enabled,
            project_scope: None,
        }
    }

    fn log(rule_id: &str, status: LogStatus, age_days: i64, duration_ms: u64) -> LogRow {
        LogRow {
            id: uuid::Uuid::new_v4().to_string(),
            rule_id: rule_id.into(),
            event_type: LogKind::Execution,
            status,
            execution_time_ms: duration_ms,
            error_message: None,
            metadata: serde_json::json!({}),
            project_path: None,
            created_at: Utc::now() - Duration::days(age_days),
        }
    }

    #[tokio::test]
    async fn enabled_rules_only() {
        let store = MemoryStore::with_rules(vec![rule("a", true), rule("b", false)]);
        let rules = store.select_enabled_rules().await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].id, "a");
    }

    #[tokio::test]
    async fn upsert_replaces_in_place() {
        let store = MemoryStore::with_rules(vec![rule("a", true)]);
        let mut updated = rule("a", true);
        updated.name = "renamed".into();
        store.upsert_rule(&updated).await.unwrap();

        let rules = store.select_enabled_rules().await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].name, "renamed");
    }

    #[tokio::test]
    async fn retention_cleanup_removes_exactly_old_rows() {
        let store = MemoryStore::new();
        store.insert_log_row(&log("a", LogStatus::Success, 10, 5)).await.unwrap();
        store.insert_log_row(&log("a", LogStatus::Success, 8, 5)).await.unwrap();
        store.insert_log_row(&log("a", LogStatus::Success, 1, 5)).await.unwrap();

        let removed = store.delete_log_rows_older_than(7).await.unwrap();
        assert_eq!(removed, 2);

        let rows = store.select_log_rows(&LogFilter::default()).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn statistics_aggregate_per_enabled_rule() {
        let store = MemoryStore::with_rules(vec![rule("a", true), rule("b", false)]);
        store.insert_log_row(&log("a", LogStatus::Success, 0, 10)).await.unwrap();
        store.insert_log_row(&log("a", LogStatus::Error, 0, 30)).await.unwrap();
        // Outside the window.
        store.insert_log_row(&log("a", LogStatus::Success, 40, 500)).await.unwrap();
        // Disabled rule never appears.
        store.insert_log_row(&log("b", LogStatus::Success, 0, 10)).await.unwrap();

        let stats = store.aggregate_statistics(30).await.unwrap();
        assert_eq!(stats.len(), 1);
        let s = &stats[0];
        assert_eq!(s.rule_id, "a");
        assert_eq!(s.execution_count, 2);
        assert_eq!(s.success_count, 1);
        assert_eq!(s.avg_duration_ms, 20.0);
        assert!(s.last_execution.is_some());
    }
}
