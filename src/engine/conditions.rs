//! Trigger condition evaluation.
//!
//! `evaluate` never raises: any internal failure (missing parameter,
//! malformed expression, malformed payload) evaluates to `false`, so a
//! broken rule fails closed instead of firing unexpectedly.

use chrono::{Local, Timelike};
use tracing::warn;

use super::events::EventContext;
use super::expr::{self, Bindings};
use super::rules::{ConditionKind, HookRule};

/// Evaluate a rule's trigger condition against the event context.
pub fn evaluate(rule: &HookRule, context: &EventContext) -> bool {
    match evaluate_inner(rule, context) {
        Ok(matched) => matched,
        Err(reason) => {
            warn!(
                rule = %rule.id,
                condition = ?rule.condition,
                %reason,
                "condition evaluation failed, treating as no-match"
            );
            false
        }
    }
}

fn evaluate_inner(rule: &HookRule, context: &EventContext) -> Result<bool, String> {
    let params = &rule.condition_params;

    match rule.condition {
        ConditionKind::Always => Ok(true),
        ConditionKind::FileType => {
            let expected = params
                .get("extension")
                .ok_or("missing 'extension' parameter")?;
            let path = context
                .payload
                .file_path()
                .ok_or("event payload has no filePath")?;
            Ok(extension_of(path) == Some(expected.as_str()))
        }
        ConditionKind::ToolName => {
            let expected = params.get("tool").ok_or("missing 'tool' parameter")?;
            let tool = context
                .payload
                .tool()
                .ok_or("event payload has no tool")?;
            Ok(tool == expected)
        }
        ConditionKind::ProjectPath => {
            let needle = params.get("path").ok_or("missing 'path' parameter")?;
            let scope = context
                .project_scope
                .as_deref()
                .ok_or("event has no project scope")?;
            Ok(scope.contains(needle.as_str()))
        }
        ConditionKind::TimeRange => {
            let now = Local::now();
            let current = now.hour() * 100 + now.minute();
            let start = parse_hhmm(params.get("start_time").map(String::as_str));
            let end = parse_hhmm(params.get("end_time").map(String::as_str));
            Ok(in_time_range(current, start, end))
        }
        ConditionKind::Custom => {
            let code = params.get("code").ok_or("missing 'code' parameter")?;
            let bindings = Bindings {
                event: context.event.as_str().to_string(),
                data: context.data.clone(),
                project_scope: context.project_scope.clone().unwrap_or_default(),
                timestamp: context.timestamp.to_rfc3339(),
            };
            expr::eval_bool(code, &bindings).map_err(|e| e.to_string())
        }
    }
}

/// Extension of a path without the leading dot, case-sensitive.
fn extension_of(path: &str) -> Option<&str> {
    std::path::Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
}

/// Parse "HH:MM" into the `hour*100+minute` encoding. A missing or
/// unparseable value defaults to 0 as a whole; a garbled minute never
/// yields a partial time.
fn parse_hhmm(value: Option<&str>) -> u32 {
    let Some(value) = value else { return 0 };
    let mut parts = value.splitn(2, ':');
    let hour = parts.next().and_then(|p| p.parse::<u32>().ok());
    let minute = parts.next().and_then(|p| p.parse::<u32>().ok());
    match (hour, minute) {
        (Some(h), Some(m)) => h * 100 + m,
        _ => 0,
    }
}

/// Inclusive range check in `hour*100+minute` encoding. A start greater
/// than the end is an overnight range that wraps midnight.
fn in_time_range(current: u32, start: u32, end: u32) -> bool {
    if start <= end {
        current >= start && current <= end
    } else {
        current >= start || current <= end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::events::EventKind;
    use std::collections::HashMap;

    use serde_json::json;

    fn rule(condition: ConditionKind, params: &[(&str, &str)]) -> HookRule {
        HookRule {
            id: "r1".into(),
            name: "test rule".into(),
            description: String::new(),
            event: EventKind::FileChange,
            condition,
            condition_params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            command: "true".into(),
            timeout_ms: 5000,
            enabled: true,
            project_scope: None,
        }
    }

    fn file_change_context(path: &str) -> EventContext {
        EventContext::new(
            EventKind::FileChange,
            json!({"filePath": path}),
            Some("/home/dev/project".into()),
        )
    }

    #[test]
    fn always_matches_every_context() {
        let r = rule(ConditionKind::Always, &[]);
        for kind in EventKind::ALL {
            let ctx = EventContext::new(kind, json!({}), None);
            assert!(evaluate(&r, &ctx));
        }
    }

    #[test]
    fn file_type_exact_extension_match() {
        let r = rule(ConditionKind::FileType, &[("extension", "js")]);
        assert!(evaluate(&r, &file_change_context("src/a.js")));
        assert!(!evaluate(&r, &file_change_context("src/a.ts")));
        // Case-sensitive.
        assert!(!evaluate(&r, &file_change_context("src/a.JS")));
    }

    #[test]
    fn file_type_without_path_fails_closed() {
        let r = rule(ConditionKind::FileType, &[("extension", "js")]);
        let ctx = EventContext::new(EventKind::SessionStart, json!({"sessionId": "s"}), None);
        assert!(!evaluate(&r, &ctx));
    }

    #[test]
    fn file_type_missing_param_fails_closed() {
        let r = rule(ConditionKind::FileType, &[]);
        assert!(!evaluate(&r, &file_change_context("src/a.js")));
    }

    #[test]
    fn tool_name_exact_match() {
        let r = rule(ConditionKind::ToolName, &[("tool", "Bash")]);
        let ctx = EventContext::new(
            EventKind::ToolUseStart,
            json!({"tool": "Bash", "parameters": {"command": "ls"}}),
            None,
        );
        assert!(evaluate(&r, &ctx));

        let other = EventContext::new(EventKind::ToolUseStart, json!({"tool": "Edit"}), None);
        assert!(!evaluate(&r, &other));
    }

    #[test]
    fn project_path_substring_match() {
        let r = rule(ConditionKind::ProjectPath, &[("path", "dev/project")]);
        assert!(evaluate(&r, &file_change_context("a.js")));

        let r = rule(ConditionKind::ProjectPath, &[("path", "other")]);
        assert!(!evaluate(&r, &file_change_context("a.js")));
    }

    #[test]
    fn project_path_without_scope_fails_closed() {
        let r = rule(ConditionKind::ProjectPath, &[("path", "dev")]);
        let ctx = EventContext::new(EventKind::FileChange, json!({"filePath": "a.js"}), None);
        assert!(!evaluate(&r, &ctx));
    }

    #[test]
    fn time_range_same_day() {
        // 09:00..17:00
        assert!(in_time_range(1200, 900, 1700));
        assert!(in_time_range(900, 900, 1700));
        assert!(in_time_range(1700, 900, 1700));
        assert!(!in_time_range(800, 900, 1700));
        assert!(!in_time_range(1800, 900, 1700));
    }

    #[test]
    fn time_range_overnight_wrap() {
        // 22:00..02:00 matches 23:30 and 01:00, not 12:00.
        assert!(in_time_range(2330, 2200, 200));
        assert!(in_time_range(100, 2200, 200));
        assert!(!in_time_range(1200, 2200, 200));
    }

    #[test]
    fn hhmm_parsing_defaults_to_zero() {
        assert_eq!(parse_hhmm(Some("22:00")), 2200);
        assert_eq!(parse_hhmm(Some("9:05")), 905);
        assert_eq!(parse_hhmm(Some("not a time")), 0);
        assert_eq!(parse_hhmm(None), 0);
        // A garbled component rejects the whole value, never half of it.
        assert_eq!(parse_hhmm(Some("9:xx")), 0);
        assert_eq!(parse_hhmm(Some("9")), 0);
    }

    #[test]
    fn custom_expression_matches() {
        let r = rule(
            ConditionKind::Custom,
            &[("code", "matches(data.filePath, '\\.js$') && event == 'FileChange'")],
        );
        assert!(evaluate(&r, &file_change_context("src/a.js")));
        assert!(!evaluate(&r, &file_change_context("src/a.ts")));
    }

    #[test]
    fn custom_expression_sees_keys_outside_the_typed_shape() {
        let r = rule(ConditionKind::Custom, &[("code", "data.oldPath == 'b.js'")]);
        let ctx = EventContext::new(
            EventKind::FileChange,
            json!({"filePath": "a.js", "oldPath": "b.js"}),
            None,
        );
        assert!(evaluate(&r, &ctx));
    }

    #[test]
    fn custom_expression_error_fails_closed() {
        let r = rule(ConditionKind::Custom, &[("code", "this is ! valid ((")]);
        assert!(!evaluate(&r, &file_change_context("src/a.js")));
    }
}
