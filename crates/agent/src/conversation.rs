use std::collections::{BTreeMap, BTreeSet};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// A policy-issued request to run one capability.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InvocationRequest {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl InvocationRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self { id: id.into(), name: name.into(), arguments }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub invocation_requests: Vec<InvocationRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<String>,
    /// Capability that produced a tool message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            invocation_requests: Vec::new(),
            invocation_id: None,
            capability: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, ..Self::user(content) }
    }

    pub fn assistant_requesting(
        content: impl Into<String>,
        invocation_requests: Vec<InvocationRequest>,
    ) -> Self {
        Self { invocation_requests, ..Self::assistant(content) }
    }

    pub fn tool_result(
        invocation_id: impl Into<String>,
        capability: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::Tool,
            invocation_id: Some(invocation_id.into()),
            capability: Some(capability.into()),
            ..Self::user(content)
        }
    }

    pub fn requests_invocations(&self) -> bool {
        self.role == Role::Assistant && !self.invocation_requests.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultCategory {
    Analysis,
    Patterns,
    Prioritization,
    Story,
}

impl ResultCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analysis => "analysis",
            Self::Patterns => "patterns",
            Self::Prioritization => "prioritization",
            Self::Story => "story",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TranscriptError {
    #[error("tool message at index {index} has no preceding invocation request")]
    ToolWithoutRequest { index: usize },
    #[error("tool message at index {index} carries no invocation id")]
    MissingInvocationId { index: usize },
    #[error("tool message at index {index} answers `{invocation_id}`, which is not pending")]
    UnmatchedInvocationId { index: usize, invocation_id: String },
    #[error("assistant message at index {index} repeats invocation id `{invocation_id}`")]
    DuplicateInvocationId { index: usize, invocation_id: String },
    #[error("assistant message at index {index} has unanswered invocations: {}", .invocation_ids.join(", "))]
    UnansweredInvocations { index: usize, invocation_ids: Vec<String> },
}

/// Everything one session knows: the transcript, the newest result per category, and the
/// error recorded by the last turn, if any.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub latest_results: BTreeMap<ResultCategory, Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self, category: ResultCategory) -> Option<&Value> {
        self.latest_results.get(&category)
    }

    pub fn latest_as<T>(&self, category: ResultCategory) -> Option<T>
    where
        T: DeserializeOwned,
    {
        self.latest(category).and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Assistant messages with visible text appended at or after `start`.
    pub fn assistant_replies_since(&self, start: usize) -> impl Iterator<Item = &Message> {
        self.messages
            .iter()
            .skip(start)
            .filter(|message| message.role == Role::Assistant && !message.content.trim().is_empty())
    }

    /// Checks that every tool message answers a pending request of the assistant message
    /// right before its run of tool messages, and that no request is left unanswered
    /// once the conversation moves on.
    pub fn validate_transcript(&self) -> Result<(), TranscriptError> {
        let mut pending: Option<(usize, Vec<String>)> = None;

        for (index, message) in self.messages.iter().enumerate() {
            if message.role == Role::Tool {
                let Some((_, remaining)) = pending.as_mut() else {
                    return Err(TranscriptError::ToolWithoutRequest { index });
                };
                let invocation_id = message
                    .invocation_id
                    .as_deref()
                    .filter(|id| !id.is_empty())
                    .ok_or(TranscriptError::MissingInvocationId { index })?;
                let Some(position) = remaining.iter().position(|id| id == invocation_id) else {
                    return Err(TranscriptError::UnmatchedInvocationId {
                        index,
                        invocation_id: invocation_id.to_string(),
                    });
                };
                remaining.remove(position);
                continue;
            }

            if let Some((request_index, remaining)) = pending.take() {
                if !remaining.is_empty() {
                    return Err(TranscriptError::UnansweredInvocations {
                        index: request_index,
                        invocation_ids: remaining,
                    });
                }
            }

            if message.requests_invocations() {
                let mut seen = BTreeSet::new();
                for request in &message.invocation_requests {
                    if request.id.is_empty() || !seen.insert(request.id.as_str()) {
                        return Err(TranscriptError::DuplicateInvocationId {
                            index,
                            invocation_id: request.id.clone(),
                        });
                    }
                }
                let ids = message.invocation_requests.iter().map(|request| request.id.clone());
                pending = Some((index, ids.collect()));
            }
        }

        match pending {
            Some((index, remaining)) if !remaining.is_empty() => {
                Err(TranscriptError::UnansweredInvocations { index, invocation_ids: remaining })
            }
            _ => Ok(()),
        }
    }
}
