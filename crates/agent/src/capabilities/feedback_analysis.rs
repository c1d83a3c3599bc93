use std::sync::Arc;

use async_trait::async_trait;
use feedloop_core::AnalysisResult;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{complete, parse_model_json};
use crate::conversation::ResultCategory;
use crate::llm::LlmClient;
use crate::tools::{decode_arguments, encode_output, Capability, CapabilityError, FieldKind, FieldSpec};

pub const NAME: &str = "analyze_feedback";

const FIELDS: &[FieldSpec] = &[FieldSpec {
    name: "feedback_text",
    kind: FieldKind::Text,
    required: true,
    description: "Raw feedback to analyze: emails, comments, support tickets, interview notes.",
}];

#[derive(Deserialize)]
struct AnalyzeFeedbackInput {
    feedback_text: String,
}

pub struct FeedbackAnalysis {
    llm: Arc<dyn LlmClient>,
}

impl FeedbackAnalysis {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

fn analysis_prompt(feedback_text: &str) -> String {
    format!(
        "You help a product owner turn user feedback into actionable items.\n\
         Read the feedback below and list every distinct request or problem it contains. \
         Only group excerpts that talk about exactly the same thing. For each item give a short \
         name, a description of what is wanted, the exact excerpts that support it, and a \
         category: \"bug\", \"feature\" or \"comment\". If nothing actionable is mentioned, return \
         an empty list.\n\n\
         Feedback:\n---\n{feedback_text}\n---\n\n\
         Reply with JSON only, shaped as:\n\
         {{\"items\": [{{\"name\": \"...\", \"description\": \"...\", \"source_excerpts\": [\"...\"], \
         \"category\": \"feature\"}}]}}"
    )
}

#[async_trait]
impl Capability for FeedbackAnalysis {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "Extracts structured bugs, feature requests and comments from raw user feedback text."
    }

    fn input_fields(&self) -> &'static [FieldSpec] {
        FIELDS
    }

    fn category(&self) -> Option<ResultCategory> {
        Some(ResultCategory::Analysis)
    }

    async fn invoke(&self, arguments: Value) -> Result<Value, CapabilityError> {
        let input: AnalyzeFeedbackInput = decode_arguments(arguments)?;
        if input.feedback_text.trim().is_empty() {
            return encode_output(&AnalysisResult::default());
        }

        let reply = complete(self.llm.as_ref(), &analysis_prompt(&input.feedback_text)).await?;
        let result = parse_model_json::<AnalysisResult>(&reply)?.normalized();
        debug!(
            event_name = "capability.analyze_feedback.completed",
            item_count = result.items.len(),
            "feedback analyzed"
        );
        encode_output(&result)
    }
}
