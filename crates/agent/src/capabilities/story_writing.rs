use std::sync::Arc;

use async_trait::async_trait;
use feedloop_core::UserStory;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{complete, parse_model_json};
use crate::conversation::ResultCategory;
use crate::llm::LlmClient;
use crate::tools::{decode_arguments, encode_output, Capability, CapabilityError, FieldKind, FieldSpec};

pub const NAME: &str = "write_user_story";

const FIELDS: &[FieldSpec] = &[FieldSpec {
    name: "feature_description",
    kind: FieldKind::Text,
    required: true,
    description: "Description of the feature to turn into a user story.",
}];

#[derive(Deserialize)]
struct WriteUserStoryInput {
    feature_description: String,
}

#[derive(Serialize)]
struct StoryOutput {
    #[serde(flatten)]
    story: UserStory,
    /// Backlog-ready rendering of the same story.
    markdown: String,
}

pub struct StoryWriting {
    llm: Arc<dyn LlmClient>,
}

impl StoryWriting {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Capability for StoryWriting {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "Writes a user story with acceptance criteria and a complexity estimate for a feature."
    }

    fn input_fields(&self) -> &'static [FieldSpec] {
        FIELDS
    }

    fn category(&self) -> Option<ResultCategory> {
        Some(ResultCategory::Story)
    }

    async fn invoke(&self, arguments: Value) -> Result<Value, CapabilityError> {
        let input: WriteUserStoryInput = decode_arguments(arguments)?;
        let description = input.feature_description.trim();
        if description.is_empty() {
            return Err(CapabilityError::invalid("feature_description", "feature description is empty"));
        }

        let prompt = format!(
            "You are a product owner writing backlog items. Write one user story for the feature \
             below. The narrative follows \"As a <user>, I want <action> so that <benefit>\". \
             Give at least two acceptance criteria in Given/When/Then form and estimate the \
             complexity as \"low\", \"medium\" or \"high\".\n\n\
             Feature: {description}\n\n\
             Reply with JSON only: {{\"title\": \"...\", \"narrative\": \"...\", \
             \"acceptance_criteria\": [\"...\"], \"estimated_complexity\": \"medium\"}}"
        );
        let reply = complete(self.llm.as_ref(), &prompt).await?;
        let story: UserStory = parse_model_json(&reply)?;
        story.validate().map_err(CapabilityError::failed)?;

        let markdown = story.to_markdown();
        encode_output(&StoryOutput { story, markdown })
    }
}
