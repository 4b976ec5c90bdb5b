//! Event kinds and per-event payloads.
//!
//! The event catalogue is a closed set: the console and the assistant CLI
//! agree on exactly these kinds, and the dispatcher never routes anything
//! else. Payloads are a tagged union keyed by event kind, with an explicit
//! fallback arm so a malformed payload still dispatches instead of erroring.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// All event kinds the host system can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Before a tool invocation runs
    ToolUseStart,
    /// After a tool invocation completes
    ToolUseEnd,
    /// Outbound message about to be sent
    MessageSend,
    /// Inbound message fully received
    MessageReceive,
    /// A watched file was created, modified, or deleted
    FileChange,
    /// A version-control commit was recorded
    GitCommit,
    /// A project was loaded into the console
    ProjectOpen,
    /// An assistant session started
    SessionStart,
    /// An assistant session ended
    SessionEnd,
    /// The host system reported an error
    Error,
}

impl EventKind {
    pub const ALL: [EventKind; 10] = [
        EventKind::ToolUseStart,
        EventKind::ToolUseEnd,
        EventKind::MessageSend,
        EventKind::MessageReceive,
        EventKind::FileChange,
        EventKind::GitCommit,
        EventKind::ProjectOpen,
        EventKind::SessionStart,
        EventKind::SessionEnd,
        EventKind::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ToolUseStart => "ToolUseStart",
            EventKind::ToolUseEnd => "ToolUseEnd",
            EventKind::MessageSend => "MessageSend",
            EventKind::MessageReceive => "MessageReceive",
            EventKind::FileChange => "FileChange",
            EventKind::GitCommit => "GitCommit",
            EventKind::ProjectOpen => "ProjectOpen",
            EventKind::SessionStart => "SessionStart",
            EventKind::SessionEnd => "SessionEnd",
            EventKind::Error => "Error",
        }
    }
}

impl std::str::FromStr for EventKind {
    type Err = crate::HookforgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .iter()
            .find(|k| k.as_str() == s)
            .copied()
            .ok_or_else(|| crate::HookforgeError::Config(format!("Unknown event kind: {s}")))
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Catalogue entry describing an event kind for the console UI.
#[derive(Debug, Clone, Serialize)]
pub struct EventDescriptor {
    pub kind: EventKind,
    pub description: &'static str,
    /// Expected top-level payload fields, for display only
    pub payload_shape: &'static str,
}

/// The fixed event catalogue with human-readable descriptions.
pub fn catalog() -> &'static [EventDescriptor] {
    static CATALOG: std::sync::OnceLock<Vec<EventDescriptor>> = std::sync::OnceLock::new();
    CATALOG.get_or_init(|| {
        vec![
            EventDescriptor {
                kind: EventKind::ToolUseStart,
                description: "A tool invocation is about to run",
                payload_shape: "{ tool, parameters }",
            },
            EventDescriptor {
                kind: EventKind::ToolUseEnd,
                description: "A tool invocation finished",
                payload_shape: "{ tool, parameters }",
            },
            EventDescriptor {
                kind: EventKind::MessageSend,
                description: "An outbound message is being sent",
                payload_shape: "{ message }",
            },
            EventDescriptor {
                kind: EventKind::MessageReceive,
                description: "An inbound message was received",
                payload_shape: "{ message }",
            },
            EventDescriptor {
                kind: EventKind::FileChange,
                description: "A watched file changed",
                payload_shape: "{ filePath, changeType }",
            },
            EventDescriptor {
                kind: EventKind::GitCommit,
                description: "A commit was recorded",
                payload_shape: "{ message, files }",
            },
            EventDescriptor {
                kind: EventKind::ProjectOpen,
                description: "A project was loaded",
                payload_shape: "{ projectPath }",
            },
            EventDescriptor {
                kind: EventKind::SessionStart,
                description: "An assistant session started",
                payload_shape: "{ sessionId }",
            },
            EventDescriptor {
                kind: EventKind::SessionEnd,
                description: "An assistant session ended",
                payload_shape: "{ sessionId }",
            },
            EventDescriptor {
                kind: EventKind::Error,
                description: "The host reported an error",
                payload_shape: "{ error }",
            },
        ]
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUsePayload {
    pub tool: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChangePayload {
    pub file_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitCommitPayload {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPayload {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemErrorPayload {
    pub error: String,
}

/// Event payload, shaped by the event kind that raised it.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    ToolUse(ToolUsePayload),
    FileChange(FileChangePayload),
    GitCommit(GitCommitPayload),
    Message(MessagePayload),
    Session(SessionPayload),
    SystemError(SystemErrorPayload),
    /// Fallback for payloads that do not match the kind's expected shape.
    /// Rules still dispatch against these; typed accessors return None.
    Other(Value),
}

impl EventPayload {
    /// Interpret raw payload data according to the event kind. A payload
    /// that does not deserialize into the kind's shape lands in `Other`
    /// rather than failing the dispatch.
    pub fn from_value(kind: EventKind, data: Value) -> Self {
        fn typed<T, F>(data: &Value, wrap: F) -> Option<EventPayload>
        where
            T: serde::de::DeserializeOwned,
            F: FnOnce(T) -> EventPayload,
        {
            serde_json::from_value::<T>(data.clone()).ok().map(wrap)
        }

        let parsed = match kind {
            EventKind::ToolUseStart | EventKind::ToolUseEnd => {
                typed(&data, EventPayload::ToolUse)
            }
            EventKind::FileChange => typed(&data, EventPayload::FileChange),
            EventKind::GitCommit => typed(&data, EventPayload::GitCommit),
            EventKind::MessageSend | EventKind::MessageReceive => {
                typed(&data, EventPayload::Message)
            }
            EventKind::SessionStart | EventKind::SessionEnd => {
                typed(&data, EventPayload::Session)
            }
            EventKind::Error => typed(&data, EventPayload::SystemError),
            EventKind::ProjectOpen => None,
        };

        parsed.unwrap_or(EventPayload::Other(data))
    }

    /// Path of the changed file, when the payload carries one.
    pub fn file_path(&self) -> Option<&str> {
        match self {
            EventPayload::FileChange(p) => Some(&p.file_path),
            EventPayload::Other(v) => v.get("filePath").and_then(Value::as_str),
            _ => None,
        }
    }

    /// Name of the tool being invoked, when the payload carries one.
    pub fn tool(&self) -> Option<&str> {
        match self {
            EventPayload::ToolUse(p) => Some(&p.tool),
            EventPayload::Other(v) => v.get("tool").and_then(Value::as_str),
            _ => None,
        }
    }

    /// The typed payload as a JSON value. Lossy relative to the raw data
    /// (optional fields set to null are omitted); callers that must see
    /// the payload verbatim use `EventContext::data` instead.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Ephemeral context constructed once per dispatched event.
///
/// Read-only after construction: condition checks and template substitution
/// operate on derived values and never mutate the context.
#[derive(Debug, Clone)]
pub struct EventContext {
    pub event: EventKind,
    /// Raw payload exactly as received. Interpolation, the custom
    /// expression sandbox, and HOOK_DATA read this, so null values and
    /// keys outside the kind's expected shape survive untouched.
    pub data: Value,
    /// Typed view of `data`, backing the condition accessors.
    pub payload: EventPayload,
    pub project_scope: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl EventContext {
    pub fn new(event: EventKind, data: Value, project_scope: Option<String>) -> Self {
        Self {
            event,
            payload: EventPayload::from_value(event, data.clone()),
            data,
            project_scope,
            timestamp: Utc::now(),
        }
    }

    /// Environment variables describing the triggering event, injected into
    /// every supervised command on top of the inherited environment.
    pub fn env_vars(&self) -> std::collections::HashMap<String, String> {
        let mut env = std::collections::HashMap::new();
        env.insert("HOOK_EVENT".to_string(), self.event.as_str().to_string());
        env.insert(
            "HOOK_PROJECT_PATH".to_string(),
            self.project_scope.clone().unwrap_or_default(),
        );
        env.insert("HOOK_TIMESTAMP".to_string(), self.timestamp.to_rfc3339());
        env.insert(
            "HOOK_DATA".to_string(),
            serde_json::to_string(&self.data).unwrap_or_default(),
        );
        env
    }
}
