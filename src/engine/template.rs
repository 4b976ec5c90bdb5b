//! Command template interpolation.
//!
//! Three ordered substitution passes; later passes see the output of
//! earlier ones. No escaping or quoting is applied: the resolved string is
//! handed verbatim to the shell, so the rule author is the trust boundary.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use super::events::EventContext;

/// Resolve a command template against the event context. Pure and total.
pub fn interpolate(template: &str, context: &EventContext) -> String {
    // Pass 1: context markers.
    let mut result = template.replace("${event}", context.event.as_str());
    result = result.replace(
        "${projectPath}",
        context.project_scope.as_deref().unwrap_or(""),
    );
    result = result.replace("${timestamp}", &context.timestamp.to_rfc3339());

    // Pass 2: top-level payload keys, read from the raw data so null
    // values and keys outside the event's typed shape still substitute.
    if let Value::Object(map) = &context.data {
        for (key, value) in map {
            let marker = format!("${{data.{key}}}");
            if result.contains(&marker) {
                result = result.replace(&marker, &value_as_string(value));
            }
        }
    }

    // Pass 3: $UPPER_SNAKE_CASE environment variables. Unset variables keep
    // the token, so an unresolved reference stays visible in the command.
    env_token_regex()
        .replace_all(&result, |caps: &regex::Captures<'_>| {
            match std::env::var(&caps[1]) {
                Ok(value) => value,
                Err(_) => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn env_token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$([A-Z][A-Z0-9_]*)").expect("static regex"))
}

fn value_as_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}
