pub mod capabilities;
pub mod chat;
pub mod config;

use serde::Serialize;
use serde_json::Value;

/// What a subcommand hands back to `main`: the text to print and the process exit code.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
enum Status {
    Ok,
    Error,
}

#[derive(Debug, Serialize)]
struct Envelope<'a> {
    command: &'a str,
    status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_class: Option<&'a str>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl CommandResult {
    pub fn success_with(command: &str, message: impl Into<String>, details: Option<Value>) -> Self {
        let envelope = Envelope {
            command,
            status: Status::Ok,
            error_class: None,
            message: message.into(),
            details,
        };
        Self { exit_code: 0, output: render(&envelope) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let envelope = Envelope {
            command,
            status: Status::Error,
            error_class: Some(error_class),
            message: message.into(),
            details: None,
        };
        Self { exit_code, output: render(&envelope) }
    }
}

fn render(envelope: &Envelope<'_>) -> String {
    serde_json::to_string(envelope).unwrap_or_else(|error| {
        serde_json::json!({
            "command": envelope.command,
            "status": "error",
            "error_class": "serialization",
            "message": error.to_string(),
        })
        .to_string()
    })
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::CommandResult;

    #[test]
    fn failure_carries_class_and_exit_code() {
        let result = CommandResult::failure("chat", "provider_setup", "no key", 3);
        let payload: Value = serde_json::from_str(&result.output).expect("json envelope");

        assert_eq!(result.exit_code, 3);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "provider_setup");
        assert!(payload.get("details").is_none());
    }

    #[test]
    fn success_omits_error_class_and_keeps_details() {
        let result = CommandResult::success_with("chat", "done", Some(json!({"turns": 2})));
        let payload: Value = serde_json::from_str(&result.output).expect("json envelope");

        assert_eq!(result.exit_code, 0);
        assert_eq!(payload["status"], "ok");
        assert!(payload.get("error_class").is_none());
        assert_eq!(payload["details"]["turns"], 2);
    }
}
