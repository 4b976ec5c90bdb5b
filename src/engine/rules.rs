//! Automation rule records and write-time validation.
//!
//! A rule binds one event kind, one trigger condition, and one command
//! template. Unknown event or condition kinds never deserialize, so they are
//! rejected before they can reach the dispatcher.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::events::EventKind;
use crate::{HookforgeError, Result};

/// Timeout bounds enforced at write time (milliseconds).
pub const MIN_TIMEOUT_MS: u64 = 1_000;
pub const MAX_TIMEOUT_MS: u64 = 300_000;
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Trigger condition kinds. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    #[default]
    Always,
    FileType,
    ToolName,
    ProjectPath,
    TimeRange,
    Custom,
}

impl ConditionKind {
    /// Parameter keys that must be present for this condition kind.
    pub fn required_params(&self) -> &'static [&'static str] {
        match self {
            ConditionKind::Always => &[],
            ConditionKind::FileType => &["extension"],
            ConditionKind::ToolName => &["tool"],
            ConditionKind::ProjectPath => &["path"],
            ConditionKind::TimeRange => &["start_time", "end_time"],
            ConditionKind::Custom => &["code"],
        }
    }
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_enabled() -> bool {
    true
}

/// A persisted automation rule ("hook").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookRule {
    /// Opaque unique identifier, assigned at creation, immutable.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub event: EventKind,
    #[serde(default)]
    pub condition: ConditionKind,
    #[serde(default)]
    pub condition_params: HashMap<String, String>,
    /// Untrusted command template, interpolated at execution time.
    pub command: String,
    #[serde(rename = "timeout", default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_scope: Option<String>,
}

/// Rule fields supplied at creation, before an id exists.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDraft {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub event: EventKind,
    #[serde(default)]
    pub condition: ConditionKind,
    #[serde(default)]
    pub condition_params: HashMap<String, String>,
    pub command: String,
    #[serde(rename = "timeout", default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub project_scope: Option<String>,
}

impl RuleDraft {
    /// Assign an id and validate, producing the persistable record.
    pub fn into_rule(self) -> Result<HookRule> {
        let mut rule = HookRule {
            id: uuid::Uuid::new_v4().to_string(),
            name: self.name,
            description: self.description,
            event: self.event,
            condition: self.condition,
            condition_params: self.condition_params,
            command: self.command,
            timeout_ms: self.timeout_ms,
            enabled: self.enabled,
            project_scope: self.project_scope,
        };
        rule.validate()?;
        Ok(rule)
    }
}

impl HookRule {
    /// Validate and normalize the record at write time.
    ///
    /// Clamps the timeout into `[MIN_TIMEOUT_MS, MAX_TIMEOUT_MS]` and rejects
    /// condition parameter maps missing the keys the condition kind needs.
    pub fn validate(&mut self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(HookforgeError::Config("Rule name must not be empty".into()));
        }
        if self.command.trim().is_empty() {
            return Err(HookforgeError::Config(format!(
                "Rule '{}' has an empty command",
                self.name
            )));
        }
        for key in self.condition.required_params() {
            if !self.condition_params.contains_key(*key) {
                return Err(HookforgeError::Config(format!(
                    "Rule '{}': condition requires parameter '{}'",
                    self.name, key
                )));
            }
        }
        self.timeout_ms = self.timeout_ms.clamp(MIN_TIMEOUT_MS, MAX_TIMEOUT_MS);
        Ok(())
    }
}
