use std::sync::Arc;

use async_trait::async_trait;
use feedloop_core::PatternSummary;
use serde::Deserialize;
use serde_json::Value;

use super::{complete, parse_model_json};
use crate::conversation::ResultCategory;
use crate::llm::LlmClient;
use crate::tools::{decode_arguments, encode_output, Capability, CapabilityError, FieldKind, FieldSpec};

pub const NAME: &str = "detect_patterns";

const FIELDS: &[FieldSpec] = &[FieldSpec {
    name: "feedbacks",
    kind: FieldKind::TextList,
    required: true,
    description: "Individual feedback entries to compare.",
}];

#[derive(Deserialize)]
struct DetectPatternsInput {
    feedbacks: Vec<String>,
}

// Models answer with either a bare list or an object holding one.
#[derive(Deserialize)]
#[serde(untagged)]
enum PatternReply {
    Summary(PatternSummary),
    List(Vec<String>),
}

pub struct PatternDetection {
    llm: Arc<dyn LlmClient>,
}

impl PatternDetection {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Capability for PatternDetection {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "Finds recurring themes across several feedback entries. Call it only when the user \
         explicitly asks for recurring patterns or themes."
    }

    fn input_fields(&self) -> &'static [FieldSpec] {
        FIELDS
    }

    fn category(&self) -> Option<ResultCategory> {
        Some(ResultCategory::Patterns)
    }

    async fn invoke(&self, arguments: Value) -> Result<Value, CapabilityError> {
        let input: DetectPatternsInput = decode_arguments(arguments)?;
        let feedbacks: Vec<&str> = input
            .feedbacks
            .iter()
            .map(|feedback| feedback.trim())
            .filter(|feedback| !feedback.is_empty())
            .collect();
        if feedbacks.is_empty() {
            return encode_output(&PatternSummary::default());
        }

        let listed: String =
            feedbacks.iter().map(|feedback| format!("- {feedback}\n")).collect();
        let prompt = format!(
            "Identify the themes that recur across the feedback entries below. Name each theme \
             in a few words and skip one-off remarks.\n\n{listed}\n\
             Reply with JSON only: {{\"patterns\": [\"...\"]}}"
        );
        let reply = complete(self.llm.as_ref(), &prompt).await?;
        let summary = match parse_model_json::<PatternReply>(&reply)? {
            PatternReply::Summary(summary) => summary,
            PatternReply::List(patterns) => PatternSummary { patterns },
        };
        encode_output(&summary.deduplicated())
    }
}
