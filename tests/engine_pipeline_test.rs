//! End-to-end dispatch: condition evaluation, template interpolation,
//! supervised execution, and the audit trail, all against a real shell.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;

use hookforge::engine::{ConditionKind, Engine, EventKind, HookRule};
use hookforge::store::{HookStore, LogFilter, LogKind, LogStatus, MemoryStore};

fn rule(id: &str, event: EventKind, command: &str) -> HookRule {
    HookRule {
        id: id.into(),
        name: format!("rule {id}"),
        description: String::new(),
        event,
        condition: ConditionKind::Always,
        condition_params: HashMap::new(),
        command: command.into(),
        timeout_ms: 5_000,
        enabled: true,
        project_scope: None,
    }
}

fn with_condition(
    mut r: HookRule,
    condition: ConditionKind,
    params: &[(&str, &str)],
) -> HookRule {
    r.condition = condition;
    r.condition_params = params
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    r
}

#[tokio::test]
async fn file_type_rule_fires_and_interpolates_the_path() {
    let watcher = with_condition(
        rule("js-watch", EventKind::FileChange, "echo changed: ${data.filePath}"),
        ConditionKind::FileType,
        &[("extension", "js")],
    );
    let engine = Engine::new(Arc::new(MemoryStore::with_rules(vec![watcher])))
        .await
        .unwrap();

    let hit = engine
        .process_event(
            EventKind::FileChange,
            json!({"filePath": "src/app.js", "changeType": "modified"}),
            None,
        )
        .await;
    assert_eq!(hit.len(), 1);
    assert!(hit[0].success);
    assert_eq!(hit[0].output, "changed: src/app.js");

    let miss = engine
        .process_event(EventKind::FileChange, json!({"filePath": "src/app.py"}), None)
        .await;
    assert!(miss.is_empty());
}

#[tokio::test]
async fn event_environment_is_injected_into_commands() {
    let engine = Engine::new(Arc::new(MemoryStore::with_rules(vec![rule(
        "env",
        EventKind::GitCommit,
        "echo $HOOK_EVENT",
    )])))
    .await
    .unwrap();

    let results = engine
        .process_event(EventKind::GitCommit, json!({"message": "wip"}), None)
        .await;
    assert_eq!(results[0].output, "GitCommit");
}

#[tokio::test]
async fn unmatched_event_kind_has_no_side_effects() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("fired");
    let engine = Engine::new(Arc::new(MemoryStore::with_rules(vec![rule(
        "marker",
        EventKind::FileChange,
        &format!("touch {}", marker.display()),
    )])))
    .await
    .unwrap();

    let results = engine
        .process_event(EventKind::GitCommit, json!({"message": "m"}), None)
        .await;
    assert!(results.is_empty());
    assert!(!marker.exists());
}

#[tokio::test]
async fn custom_condition_gates_on_event_data() {
    let bash_only = with_condition(
        rule("bash-only", EventKind::ToolUseStart, "echo bash ran"),
        ConditionKind::Custom,
        &[("code", r#"event == "ToolUseStart" && data.tool == "Bash""#)],
    );
    let engine = Engine::new(Arc::new(MemoryStore::with_rules(vec![bash_only])))
        .await
        .unwrap();

    let hit = engine
        .process_event(EventKind::ToolUseStart, json!({"tool": "Bash"}), None)
        .await;
    assert_eq!(hit.len(), 1);

    let miss = engine
        .process_event(EventKind::ToolUseStart, json!({"tool": "Read"}), None)
        .await;
    assert!(miss.is_empty());
}

#[tokio::test]
async fn broken_custom_expression_fails_closed() {
    let broken = with_condition(
        rule("broken", EventKind::FileChange, "echo should not run"),
        ConditionKind::Custom,
        &[("code", "data.filePath ==")],
    );
    let engine = Engine::new(Arc::new(MemoryStore::with_rules(vec![broken])))
        .await
        .unwrap();

    let results = engine
        .process_event(EventKind::FileChange, json!({"filePath": "a.js"}), None)
        .await;
    assert!(results.is_empty());
}

#[tokio::test]
async fn every_attempt_lands_in_the_audit_trail() {
    let store = Arc::new(MemoryStore::with_rules(vec![
        rule("good", EventKind::FileChange, "echo ok"),
        rule("bad", EventKind::FileChange, "exit 2"),
    ]));
    let engine = Engine::new(store.clone()).await.unwrap();

    let proj = tempfile::tempdir().unwrap();
    let scope = proj.path().to_str().unwrap().to_string();
    engine
        .process_event(
            EventKind::FileChange,
            json!({"filePath": "a.js"}),
            Some(&scope),
        )
        .await;

    let rows = store.select_log_rows(&LogFilter::default()).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows
        .iter()
        .all(|r| r.event_type == LogKind::Execution
            && r.project_path.as_deref() == Some(scope.as_str())));

    let good = rows.iter().find(|r| r.rule_id == "good").unwrap();
    assert_eq!(good.status, LogStatus::Success);
    assert_eq!(good.metadata["command"], "echo ok");

    let bad = rows.iter().find(|r| r.rule_id == "bad").unwrap();
    assert_eq!(bad.status, LogStatus::Error);
    assert!(bad.error_message.is_some());
}

#[tokio::test]
async fn statistics_reflect_dispatched_executions() {
    let store = Arc::new(MemoryStore::with_rules(vec![rule(
        "counted",
        EventKind::FileChange,
        "echo ok",
    )]));
    let engine = Engine::new(store).await.unwrap();

    for _ in 0..3 {
        engine
            .process_event(EventKind::FileChange, json!({"filePath": "a.js"}), None)
            .await;
    }

    let stats = engine.statistics(7).await.unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].rule_id, "counted");
    assert_eq!(stats[0].execution_count, 3);
    assert_eq!(stats[0].success_count, 3);
    assert!(stats[0].last_execution.is_some());
}

#[tokio::test]
async fn test_rule_audits_as_test_not_execution() {
    let store = Arc::new(MemoryStore::with_rules(vec![rule(
        "probe",
        EventKind::FileChange,
        "echo probed",
    )]));
    let engine = Engine::new(store.clone()).await.unwrap();

    let report = engine
        .test_rule("probe", json!({"filePath": "a.js"}), None)
        .await
        .unwrap();
    assert!(report.success);

    let rows = store.select_log_rows(&LogFilter::default()).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].event_type, LogKind::Test);
}
