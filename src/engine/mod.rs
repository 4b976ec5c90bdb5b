//! The hookforge engine - rule registry and event dispatcher.
//!
//! The registry is a derived, rebuildable cache over the store: an index
//! from event kind to rule ids (in registration order) plus full records by
//! id. The dispatcher routes one event through condition evaluation,
//! template interpolation, and supervised execution, strictly sequentially,
//! and audits every attempt.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

pub mod audit;
pub mod conditions;
pub mod events;
pub mod expr;
pub mod rules;
pub mod supervisor;
pub mod template;
pub mod workflow;

pub use events::{catalog, EventContext, EventDescriptor, EventKind};
pub use rules::{ConditionKind, HookRule, RuleDraft};
pub use workflow::{Workflow, WorkflowResult};

use audit::{execution_metadata, Auditor};
use supervisor::RunOptions;
use workflow::WorkflowRunner;

use crate::store::{HookStore, LogKind, LogStatus, RuleStatistics};
use crate::{HookforgeError, Result};

/// Outcome of one rule attempt within a dispatched event.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub rule_id: String,
    pub rule_name: String,
    pub success: bool,
    /// Trimmed standard output.
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

/// Uniform pass/fail report for console test runs, regardless of whether
/// the failure was a timeout, a non-zero exit, or a spawn error.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestReport {
    pub success: bool,
    pub execution_time_ms: u64,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct Engine {
    store: Arc<dyn HookStore>,
    auditor: Auditor,
    workflows: WorkflowRunner,
    /// Full rule records keyed by id.
    rules: HashMap<String, HookRule>,
    /// Event kind -> rule ids, in registration order.
    index: HashMap<EventKind, Vec<String>>,
}

impl Engine {
    /// Build an engine and populate the registry from the store. A store
    /// read failure propagates: an empty registry would silently drop
    /// events.
    pub async fn new(store: Arc<dyn HookStore>) -> Result<Self> {
        let auditor = Auditor::new(store.clone());
        let mut engine = Self {
            workflows: WorkflowRunner::new(store.clone(), auditor.clone()),
            auditor,
            store,
            rules: HashMap::new(),
            index: HashMap::new(),
        };
        engine.rebuild().await?;
        Ok(engine)
    }

    /// Repopulate the registry from the store's enabled rules. Recovers
    /// from any registry drift; safe to call at any time.
    pub async fn rebuild(&mut self) -> Result<()> {
        let enabled = self.store.select_enabled_rules().await?;
        self.rules.clear();
        self.index.clear();
        let count = enabled.len();
        for rule in enabled {
            self.register_rule(rule);
        }
        info!(rules = count, "registry rebuilt from store");
        Ok(())
    }

    /// Add a rule to the in-memory registry. Disabled rules are ignored:
    /// the registry entry's lifetime is exactly the persisted-and-enabled
    /// window.
    pub fn register_rule(&mut self, rule: HookRule) {
        if !rule.enabled {
            debug!(rule = %rule.id, "not registering disabled rule");
            return;
        }
        let ids = self.index.entry(rule.event).or_default();
        if !ids.iter().any(|id| id == &rule.id) {
            ids.push(rule.id.clone());
        }
        debug!(rule = %rule.id, event = %rule.event, "rule registered");
        self.rules.insert(rule.id.clone(), rule);
    }

    /// Remove a rule from the in-memory registry.
    pub fn unregister_rule(&mut self, id: &str) {
        if let Some(rule) = self.rules.remove(id) {
            if let Some(ids) = self.index.get_mut(&rule.event) {
                ids.retain(|i| i != id);
            }
            debug!(rule = %id, "rule unregistered");
        }
    }

    /// Validate, persist, and register a new rule.
    pub async fn create_rule(&mut self, draft: RuleDraft) -> Result<HookRule> {
        let rule = draft.into_rule()?;
        self.store.upsert_rule(&rule).await?;
        self.auditor
            .record(
                &rule.id,
                LogKind::Creation,
                LogStatus::Success,
                0,
                None,
                serde_json::json!({"name": rule.name, "event": rule.event.as_str()}),
                rule.project_scope.as_deref(),
            )
            .await;
        self.register_rule(rule.clone());
        Ok(rule)
    }

    /// Validate, persist, and re-register an existing rule. Disabling a
    /// rule drops it from the registry while keeping it queryable.
    pub async fn update_rule(&mut self, mut rule: HookRule) -> Result<HookRule> {
        rule.validate()?;
        if self.store.select_rule_by_id(&rule.id).await?.is_none() {
            return Err(HookforgeError::UnknownRule(rule.id));
        }
        self.store.upsert_rule(&rule).await?;
        self.unregister_rule(&rule.id);
        self.auditor
            .record(
                &rule.id,
                LogKind::Update,
                LogStatus::Success,
                0,
                None,
                serde_json::json!({"name": rule.name, "enabled": rule.enabled}),
                rule.project_scope.as_deref(),
            )
            .await;
        self.register_rule(rule.clone());
        Ok(rule)
    }

    /// Persist-delete a rule and drop it from the registry.
    pub async fn delete_rule(&mut self, id: &str) -> Result<()> {
        self.store.delete_rule(id).await?;
        self.unregister_rule(id);
        self.auditor
            .record(
                id,
                LogKind::Deletion,
                LogStatus::Success,
                0,
                None,
                serde_json::json!({}),
                None,
            )
            .await;
        Ok(())
    }

    /// Dispatch one event through every matching rule, strictly in
    /// registration order. Never raises: a failing rule becomes a
    /// `success: false` result, not an aborted batch.
    pub async fn process_event(
        &self,
        event: EventKind,
        data: Value,
        project_scope: Option<&str>,
    ) -> Vec<ExecutionResult> {
        // No registered rules: return before building a context or touching
        // the store.
        let ids = match self.index.get(&event) {
            Some(ids) if !ids.is_empty() => ids,
            _ => return Vec::new(),
        };

        let context = EventContext::new(event, data, project_scope.map(str::to_string));
        debug!(event = %event, candidates = ids.len(), "dispatching event");

        let mut results = Vec::new();
        for id in ids {
            let Some(rule) = self.rules.get(id) else {
                continue;
            };
            if !rule.enabled {
                continue;
            }
            // Scoped rules only fire for their own project; unscoped rules
            // fire everywhere.
            if let Some(scope) = &rule.project_scope {
                if context.project_scope.as_deref() != Some(scope.as_str()) {
                    debug!(rule = %rule.id, "skipping rule scoped to another project");
                    continue;
                }
            }
            if !conditions::evaluate(rule, &context) {
                continue;
            }
            results.push(self.execute_rule(rule, &context, LogKind::Execution).await);
        }
        results
    }

    /// Run one rule against a mock context without requiring it to be
    /// enabled, so the console can preview behavior.
    pub async fn test_rule(
        &self,
        id: &str,
        mock_data: Value,
        project_scope: Option<&str>,
    ) -> Result<TestReport> {
        let rule = self
            .store
            .select_rule_by_id(id)
            .await?
            .ok_or_else(|| HookforgeError::UnknownRule(id.to_string()))?;
        let context =
            EventContext::new(rule.event, mock_data, project_scope.map(str::to_string));
        let result = self.execute_rule(&rule, &context, LogKind::Test).await;
        Ok(TestReport {
            success: result.success,
            execution_time_ms: result.execution_time_ms,
            output: result.output,
            error: result.error,
        })
    }

    /// Execute a workflow definition for a real event.
    pub async fn run_workflow(
        &self,
        workflow: &Workflow,
        event: EventKind,
        data: Value,
        project_scope: Option<&str>,
    ) -> WorkflowResult {
        let context = EventContext::new(event, data, project_scope.map(str::to_string));
        self.workflows
            .run(workflow, &context, LogKind::Execution)
            .await
    }

    /// Run a not-yet-persisted workflow definition against mock event data.
    pub async fn test_workflow(
        &self,
        workflow: &Workflow,
        event: EventKind,
        mock_data: Value,
        project_scope: Option<&str>,
    ) -> WorkflowResult {
        let context = EventContext::new(event, mock_data, project_scope.map(str::to_string));
        self.workflows.run(workflow, &context, LogKind::Test).await
    }

    /// The fixed event catalogue with descriptions and payload shapes.
    pub fn available_events(&self) -> &'static [EventDescriptor] {
        catalog()
    }

    /// Number of registered (enabled) rules per event kind.
    pub fn hook_count_by_event(&self) -> HashMap<EventKind, usize> {
        self.index
            .iter()
            .map(|(kind, ids)| (*kind, ids.len()))
            .collect()
    }

    pub async fn statistics(&self, window_days: u32) -> Result<Vec<RuleStatistics>> {
        self.auditor.statistics(window_days).await
    }

    pub async fn cleanup(&self, retention_days: u32) -> Result<u64> {
        self.auditor.cleanup(retention_days).await
    }

    /// Shared single-rule pipeline: interpolate, supervise, audit.
    async fn execute_rule(
        &self,
        rule: &HookRule,
        context: &EventContext,
        log_kind: LogKind,
    ) -> ExecutionResult {
        let command = template::interpolate(&rule.command, context);
        let started = Instant::now();
        let opts = RunOptions {
            cwd: context.project_scope.as_ref().map(PathBuf::from),
            env: context.env_vars(),
            timeout_ms: rule.timeout_ms,
        };

        let (success, output, error) = match supervisor::run(&command, opts).await {
            Ok(out) if out.success() => (true, out.stdout, None),
            Ok(out) => {
                let error = if out.stderr.is_empty() {
                    format!("command exited with code {}", out.exit_code)
                } else {
                    out.stderr
                };
                (false, out.stdout, Some(error))
            }
            Err(e) => (false, String::new(), Some(e.to_string())),
        };

        let execution_time_ms = started.elapsed().as_millis() as u64;
        let status = if success {
            LogStatus::Success
        } else {
            LogStatus::Error
        };
        self.auditor
            .record(
                &rule.id,
                log_kind,
                status,
                execution_time_ms,
                error.clone(),
                execution_metadata(context.event.as_str(), &command, &output),
                context.project_scope.as_deref(),
            )
            .await;

        ExecutionResult {
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            success,
            output,
            error,
            execution_time_ms,
        }
    }
}
