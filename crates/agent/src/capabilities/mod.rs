//! The product-owner capabilities the decision policy can call.

pub mod feedback_analysis;
pub mod pattern_detection;
pub mod prioritization;
pub mod prompt;
pub mod story_writing;

use std::sync::Arc;

use async_trait::async_trait;
use feedloop_core::Framework;
use serde::de::DeserializeOwned;

use crate::llm::LlmClient;
use crate::tools::{CapabilityDefinition, CapabilityError, CapabilityRegistry, RegistryError};

pub use feedback_analysis::FeedbackAnalysis;
pub use pattern_detection::PatternDetection;
pub use prioritization::{FeaturePrioritization, ScoringSource, MAX_PROMPT_ATTEMPTS};
pub use prompt::{shared_lines, LineScorePrompt, ScorePrompt, ScriptedScorePrompt, SharedLines};
pub use story_writing::StoryWriting;

pub fn build_registry(
    llm: Arc<dyn LlmClient>,
    scoring: ScoringSource,
    default_framework: Framework,
) -> Result<CapabilityRegistry, RegistryError> {
    let mut registry = CapabilityRegistry::new();
    registry.register(FeedbackAnalysis::new(llm.clone()))?;
    registry.register(PatternDetection::new(llm.clone()))?;
    registry.register(FeaturePrioritization::new(llm.clone(), scoring, default_framework))?;
    registry.register(StoryWriting::new(llm))?;
    Ok(registry)
}

/// Definitions of every capability, for listing without a configured model.
pub fn catalog() -> Vec<CapabilityDefinition> {
    build_registry(Arc::new(Unconfigured), ScoringSource::Model, Framework::default())
        .map(|registry| registry.definitions())
        .unwrap_or_default()
}

struct Unconfigured;

#[async_trait]
impl LlmClient for Unconfigured {
    async fn complete(&self, _prompt: &str) -> anyhow::Result<String> {
        Err(anyhow::anyhow!("no language model is configured"))
    }
}

pub(crate) async fn complete(llm: &dyn LlmClient, prompt: &str) -> Result<String, CapabilityError> {
    llm.complete(prompt)
        .await
        .map_err(|error| CapabilityError::Failed(format!("model call failed: {error:#}")))
}

/// Parses the JSON a model was asked for. Markdown code fences and chatter around the
/// payload are tolerated.
pub fn parse_model_json<T>(text: &str) -> Result<T, CapabilityError>
where
    T: DeserializeOwned,
{
    let payload = extract_json(text);
    serde_json::from_str(payload).map_err(|error| {
        CapabilityError::Failed(format!("model returned unusable JSON: {error}"))
    })
}

fn extract_json(text: &str) -> &str {
    let text = text.trim();
    if let Some(start) = text.find("```") {
        let after_fence = &text[start + 3..];
        let body_start = after_fence.find('\n').map(|index| index + 1).unwrap_or(0);
        let body = &after_fence[body_start..];
        if let Some(end) = body.find("```") {
            return body[..end].trim();
        }
    }

    let start = text.find(['{', '[']);
    let end = text.rfind(['}', ']']);
    match (start, end) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;

    use crate::llm::LlmClient;

    /// Returns canned completions in order and keeps the prompts it received.
    #[derive(Default)]
    pub struct CannedLlm {
        replies: Mutex<VecDeque<Result<String, String>>>,
        pub prompts: Mutex<Vec<String>>,
    }

    impl CannedLlm {
        pub fn replying<I, S>(replies: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            Self {
                replies: Mutex::new(replies.into_iter().map(|reply| Ok(reply.into())).collect()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn failing(message: &str) -> Self {
            Self {
                replies: Mutex::new(VecDeque::from([Err(message.to_string())])),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn prompt_count(&self) -> usize {
            self.prompts.lock().expect("prompts lock").len()
        }
    }

    #[async_trait]
    impl LlmClient for CannedLlm {
        async fn complete(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().expect("prompts lock").push(prompt.to_string());
            match self.replies.lock().expect("replies lock").pop_front() {
                Some(Ok(reply)) => Ok(reply),
                Some(Err(message)) => Err(anyhow!(message)),
                None => Err(anyhow!("no canned reply left")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use feedloop_core::{AnalysisResult, Framework};

    use super::test_support::CannedLlm;
    use super::{build_registry, catalog, parse_model_json, ScoringSource};

    #[test]
    fn parses_fenced_json() {
        let text = "Here you go:\n```json\n{\"items\": []}\n```\nAnything else?";
        let parsed: AnalysisResult = parse_model_json(text).expect("fenced payload");
        assert!(parsed.items.is_empty());
    }

    #[test]
    fn parses_json_surrounded_by_chatter() {
        let parsed: Vec<String> =
            parse_model_json("Patterns: [\"slow exports\"] hope that helps").expect("array");
        assert_eq!(parsed, vec!["slow exports".to_string()]);
    }

    #[test]
    fn rejects_non_json_replies() {
        assert!(parse_model_json::<AnalysisResult>("I could not find anything").is_err());
    }

    #[test]
    fn registry_holds_the_four_capabilities() {
        let registry = build_registry(
            Arc::new(CannedLlm::default()),
            ScoringSource::Model,
            Framework::Rice,
        )
        .expect("unique names");

        let names: Vec<_> =
            registry.definitions().into_iter().map(|definition| definition.name).collect();
        assert_eq!(
            names,
            vec!["analyze_feedback", "detect_patterns", "prioritize_features", "write_user_story"]
        );
        assert_eq!(catalog(), registry.definitions());
    }
}
