//! Persistence seam.
//!
//! The console's relational store lives outside this crate; the engine
//! consumes it through `HookStore`. The in-memory registry is only ever a
//! rebuildable cache over this trait, never the source of truth.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::events::EventKind;
use crate::engine::rules::HookRule;
use crate::Result;

pub mod memory;

pub use memory::MemoryStore;

/// Discriminator for what produced a log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Execution,
    Test,
    Creation,
    Update,
    Deletion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Success,
    Error,
}

/// Append-only audit record of one attempt. Rows are never mutated; the
/// retention cleanup is the only deletion path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRow {
    pub id: String,
    pub rule_id: String,
    pub event_type: LogKind,
    pub status: LogStatus,
    pub execution_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Opaque blob: event name, truncated output, command text, timestamp.
    pub metadata: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Per-rule aggregates over a time window, restricted to enabled rules.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleStatistics {
    pub rule_id: String,
    pub name: String,
    pub event: EventKind,
    pub execution_count: u64,
    pub avg_duration_ms: f64,
    pub success_count: u64,
    pub last_execution: Option<DateTime<Utc>>,
}

/// Read-side filter for log queries.
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub rule_id: Option<String>,
    pub kind: Option<LogKind>,
    pub limit: Option<usize>,
}

/// Operations the engine needs from the persistence collaborator.
#[async_trait]
pub trait HookStore: Send + Sync {
    async fn select_enabled_rules(&self) -> Result<Vec<HookRule>>;
    async fn select_rule_by_id(&self, id: &str) -> Result<Option<HookRule>>;
    async fn upsert_rule(&self, rule: &HookRule) -> Result<()>;
    async fn delete_rule(&self, id: &str) -> Result<()>;
    async fn insert_log_row(&self, row: &LogRow) -> Result<()>;
    async fn select_log_rows(&self, filter: &LogFilter) -> Result<Vec<LogRow>>;
    /// Delete rows older than the window; returns the number removed.
    async fn delete_log_rows_older_than(&self, days: u32) -> Result<u64>;
    async fn aggregate_statistics(&self, window_days: u32) -> Result<Vec<RuleStatistics>>;
}
