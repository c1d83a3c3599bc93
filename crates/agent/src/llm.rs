use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

use crate::conversation::{InvocationRequest, Message};

/// Plain prompt-in, text-out completion used by capabilities that need a model.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

#[derive(Clone, Debug, PartialEq)]
pub enum DecisionOutcome {
    Final(String),
    /// `content` is any text the policy produced alongside its calls.
    RequestInvocations { content: String, requests: Vec<InvocationRequest> },
}

impl DecisionOutcome {
    pub fn requesting(requests: Vec<InvocationRequest>) -> Self {
        Self::RequestInvocations { content: String::new(), requests }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, Self::Final(_))
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecisionError {
    #[error("decision policy unavailable: {0}")]
    Unavailable(String),
}

/// Chooses the next step from the full transcript: answer, or ask for capability calls.
#[async_trait]
pub trait DecisionPolicy: Send + Sync {
    async fn decide(&self, messages: &[Message]) -> Result<DecisionOutcome, DecisionError>;
}
