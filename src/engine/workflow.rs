//! Workflows: ordered multi-step automations over the single-rule pipeline.
//!
//! Steps run sequentially by default, or all at once when the workflow is
//! marked parallel. Parallel mode never cancels already-started siblings;
//! `stop_on_error` there only shapes the aggregate success flag.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::audit::{execution_metadata, Auditor};
use super::conditions;
use super::events::EventContext;
use super::rules::{ConditionKind, HookRule, MAX_TIMEOUT_MS, MIN_TIMEOUT_MS};
use super::supervisor::{self, RunOptions};
use super::template;
use crate::store::{HookStore, LogKind, LogStatus};

fn default_workflow_timeout_ms() -> u64 {
    60_000
}

/// Workflow-level execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSettings {
    #[serde(default)]
    pub parallel: bool,
    #[serde(default)]
    pub stop_on_error: bool,
    /// Default timeout for inline command steps that do not set their own.
    #[serde(rename = "timeout", default = "default_workflow_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            parallel: false,
            stop_on_error: false,
            timeout_ms: default_workflow_timeout_ms(),
        }
    }
}

/// What a step executes: a reference to a persisted hook, or an inline
/// command template.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    #[serde(rename_all = "camelCase")]
    Hook { hook_id: String },
    #[serde(rename_all = "camelCase")]
    Command {
        command: String,
        #[serde(rename = "timeout", default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
}

/// One step of a workflow. Step ids are only unique within the owning
/// workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub kind: StepKind,
    #[serde(default)]
    pub condition: ConditionKind,
    #[serde(default)]
    pub condition_params: HashMap<String, String>,
    /// Failed attempts are retried up to this many additional times.
    #[serde(default)]
    pub retry_count: u32,
    /// Bypasses the workflow-level stop-on-error check for this step.
    #[serde(default)]
    pub continue_on_error: bool,
}

/// A persisted workflow definition. Step order is significant and preserved.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub settings: WorkflowSettings,
}

/// Outcome of one step attempt.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step_id: String,
    pub step_name: String,
    pub success: bool,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
    /// Attempts used, including the final one.
    pub attempts: u32,
}

/// Aggregate outcome of a workflow run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowResult {
    pub success: bool,
    pub execution_time_ms: u64,
    pub step_results: Vec<StepResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Executes workflow definitions. Works on not-yet-persisted definitions
/// too, which is what backs the console's pre-save test mode.
#[derive(Clone)]
pub struct WorkflowRunner {
    store: Arc<dyn HookStore>,
    auditor: Auditor,
}

impl WorkflowRunner {
    pub fn new(store: Arc<dyn HookStore>, auditor: Auditor) -> Self {
        Self { store, auditor }
    }

    /// Run a workflow against an event context. `log_kind` distinguishes
    /// real executions from console test runs in the audit trail.
    pub async fn run(
        &self,
        workflow: &Workflow,
        context: &EventContext,
        log_kind: LogKind,
    ) -> WorkflowResult {
        let started = Instant::now();
        info!(
            workflow = %workflow.id,
            steps = workflow.steps.len(),
            parallel = workflow.settings.parallel,
            "running workflow"
        );

        let (step_results, halted_at) = if workflow.settings.parallel {
            (self.run_parallel(workflow, context, log_kind).await, None)
        } else {
            self.run_sequential(workflow, context, log_kind).await
        };

        let success = step_results.iter().all(|r| r.success);
        let error = halted_at.map(|name: String| {
            format!("workflow halted: step '{name}' failed with stopOnError set")
        });
        let result = WorkflowResult {
            success,
            execution_time_ms: started.elapsed().as_millis() as u64,
            step_results,
            error,
        };

        let status = if result.success {
            LogStatus::Success
        } else {
            LogStatus::Error
        };
        self.auditor
            .record(
                &workflow.id,
                log_kind,
                status,
                result.execution_time_ms,
                result.error.clone(),
                execution_metadata(context.event.as_str(), &workflow.name, ""),
                context.project_scope.as_deref(),
            )
            .await;

        result
    }

    /// Sequential mode: strict order; `stop_on_error` halts after the first
    /// failing step unless that step carries `continue_on_error`. Halted
    /// steps produce no results.
    async fn run_sequential(
        &self,
        workflow: &Workflow,
        context: &EventContext,
        log_kind: LogKind,
    ) -> (Vec<StepResult>, Option<String>) {
        let mut results = Vec::with_capacity(workflow.steps.len());
        let mut halted_at = None;

        for step in &workflow.steps {
            let result = self.execute_step(workflow, step, context, log_kind).await;
            let failed = !result.success;
            results.push(result);

            if failed && workflow.settings.stop_on_error && !step.continue_on_error {
                halted_at = Some(step.name.clone());
                break;
            }
        }

        (results, halted_at)
    }

    /// Parallel mode: all steps launch together and every result is
    /// collected; a failing step does not cancel its siblings.
    async fn run_parallel(
        &self,
        workflow: &Workflow,
        context: &EventContext,
        log_kind: LogKind,
    ) -> Vec<StepResult> {
        let futures: Vec<_> = workflow
            .steps
            .iter()
            .map(|step| self.execute_step(workflow, step, context, log_kind))
            .collect();
        join_all(futures).await
    }

    async fn execute_step(
        &self,
        workflow: &Workflow,
        step: &WorkflowStep,
        context: &EventContext,
        log_kind: LogKind,
    ) -> StepResult {
        let started = Instant::now();

        // Resolve what the step actually runs.
        let resolved = match &step.kind {
            StepKind::Command { command, timeout_ms } => Ok(ResolvedStep {
                audit_id: format!("{}:{}", workflow.id, step.id),
                command: command.clone(),
                timeout_ms: timeout_ms
                    .unwrap_or(workflow.settings.timeout_ms)
                    .clamp(MIN_TIMEOUT_MS, MAX_TIMEOUT_MS),
                condition: step.condition,
                condition_params: step.condition_params.clone(),
            }),
            StepKind::Hook { hook_id } => match self.store.select_rule_by_id(hook_id).await {
                Ok(Some(rule)) => Ok(ResolvedStep::from_rule(rule, step)),
                Ok(None) => Err(format!("referenced hook '{hook_id}' does not exist")),
                Err(e) => Err(format!("failed to load hook '{hook_id}': {e}")),
            },
        };

        let resolved = match resolved {
            Ok(r) => r,
            Err(error) => {
                return StepResult {
                    step_id: step.id.clone(),
                    step_name: step.name.clone(),
                    success: false,
                    output: String::new(),
                    error: Some(error),
                    execution_time_ms: started.elapsed().as_millis() as u64,
                    attempts: 0,
                }
            }
        };

        // A step whose condition does not match is a successful no-op, so a
        // time-gated step cannot trip stop-on-error.
        if !conditions::evaluate(&resolved.as_rule(step, context), context) {
            debug!(step = %step.id, "step condition did not match, skipping");
            return StepResult {
                step_id: step.id.clone(),
                step_name: step.name.clone(),
                success: true,
                output: String::new(),
                error: None,
                execution_time_ms: started.elapsed().as_millis() as u64,
                attempts: 0,
            };
        }

        let command = template::interpolate(&resolved.command, context);
        let max_attempts = step.retry_count + 1;
        let mut last_output = String::new();
        let mut last_error = None;
        let mut success = false;
        let mut attempts = 0;

        for attempt in 1..=max_attempts {
            attempts = attempt;
            let opts = RunOptions {
                cwd: context.project_scope.as_ref().map(PathBuf::from),
                env: context.env_vars(),
                timeout_ms: resolved.timeout_ms,
            };
            match supervisor::run(&command, opts).await {
                Ok(out) if out.success() => {
                    last_output = out.stdout;
                    last_error = None;
                    success = true;
                    break;
                }
                Ok(out) => {
                    debug!(step = %step.id, attempt, code = out.exit_code, "step attempt failed");
                    last_output = out.stdout;
                    last_error = Some(if out.stderr.is_empty() {
                        format!("command exited with code {}", out.exit_code)
                    } else {
                        out.stderr
                    });
                }
                Err(e) => {
                    debug!(step = %step.id, attempt, error = %e, "step attempt errored");
                    last_error = Some(e.to_string());
                }
            }
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        let status = if success {
            LogStatus::Success
        } else {
            LogStatus::Error
        };
        self.auditor
            .record(
                &resolved.audit_id,
                log_kind,
                status,
                duration_ms,
                last_error.clone(),
                execution_metadata(context.event.as_str(), &command, &last_output),
                context.project_scope.as_deref(),
            )
            .await;

        StepResult {
            step_id: step.id.clone(),
            step_name: step.name.clone(),
            success,
            output: last_output,
            error: last_error,
            execution_time_ms: duration_ms,
            attempts,
        }
    }
}

/// A step flattened into the fields the execution pipeline needs.
struct ResolvedStep {
    audit_id: String,
    command: String,
    timeout_ms: u64,
    condition: ConditionKind,
    condition_params: HashMap<String, String>,
}

impl ResolvedStep {
    /// A condition set on the step itself overrides the hook's own; the
    /// default always-condition inherits the hook's.
    fn from_rule(rule: HookRule, step: &WorkflowStep) -> Self {
        let (condition, condition_params) = if step.condition != ConditionKind::Always {
            (step.condition, step.condition_params.clone())
        } else {
            (rule.condition, rule.condition_params)
        };
        Self {
            audit_id: rule.id,
            command: rule.command,
            timeout_ms: rule.timeout_ms,
            condition,
            condition_params,
        }
    }

    /// View the resolved step as a rule so the condition evaluator can run
    /// unchanged against it.
    fn as_rule(&self, step: &WorkflowStep, context: &EventContext) -> HookRule {
        HookRule {
            id: self.audit_id.clone(),
            name: step.name.clone(),
            description: String::new(),
            event: context.event,
            condition: self.condition,
            condition_params: self.condition_params.clone(),
            command: self.command.clone(),
            timeout_ms: self.timeout_ms,
            enabled: true,
            project_scope: None,
        }
    }
}
