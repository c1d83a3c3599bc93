use std::sync::Arc;

use async_trait::async_trait;
use feedloop_core::{
    FeatureToPrioritize, Framework, MoscowTier, PrioritizationResult, PrioritizedFeature,
    RiceFactor, ScoreHints,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use super::prompt::ScorePrompt;
use super::{complete, parse_model_json};
use crate::conversation::ResultCategory;
use crate::llm::LlmClient;
use crate::tools::{decode_arguments, encode_output, Capability, CapabilityError, FieldKind, FieldSpec};

pub const NAME: &str = "prioritize_features";

/// Answers accepted per factor before interactive scoring gives up on a feature.
pub const MAX_PROMPT_ATTEMPTS: usize = 5;

const HINT_FIELDS: &[FieldSpec] = &[
    FieldSpec { name: "reach", kind: FieldKind::Number, required: false, description: "0 to 10" },
    FieldSpec { name: "impact", kind: FieldKind::Number, required: false, description: "0 to 10" },
    FieldSpec {
        name: "confidence",
        kind: FieldKind::Number,
        required: false,
        description: "0 to 10",
    },
    FieldSpec {
        name: "effort",
        kind: FieldKind::Number,
        required: false,
        description: "above 0 and up to 5, lower is easier",
    },
    FieldSpec {
        name: "tier",
        kind: FieldKind::Parsed(&["must", "should", "could", "wont"], is_moscow_tier),
        required: false,
        description: "MoSCoW tier, \"Must have\" style spellings accepted",
    },
];

const FEATURE_FIELDS: &[FieldSpec] = &[
    FieldSpec { name: "name", kind: FieldKind::Text, required: true, description: "Feature name" },
    FieldSpec {
        name: "description",
        kind: FieldKind::Text,
        required: false,
        description: "What the feature does",
    },
    FieldSpec {
        name: "score_hints",
        kind: FieldKind::Record(HINT_FIELDS),
        required: false,
        description: "Scores already known for this feature; they are kept unchanged",
    },
];

const FIELDS: &[FieldSpec] = &[
    FieldSpec {
        name: "features",
        kind: FieldKind::RecordList(FEATURE_FIELDS),
        required: true,
        description: "Features to prioritize",
    },
    FieldSpec {
        name: "framework",
        kind: FieldKind::Choice(&["RICE", "MoSCoW"]),
        required: false,
        description: "Prioritization framework, RICE when omitted",
    },
];

fn is_moscow_tier(text: &str) -> bool {
    text.parse::<MoscowTier>().is_ok()
}

/// Where missing scores come from.
#[derive(Clone)]
pub enum ScoringSource {
    Model,
    Operator(Arc<dyn ScorePrompt>),
}

#[derive(Deserialize)]
struct PrioritizeFeaturesInput {
    features: Vec<FeatureToPrioritize>,
    #[serde(default)]
    framework: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ModelEstimate {
    #[serde(flatten)]
    scores: ScoreHints,
    #[serde(default)]
    justification: String,
}

pub struct FeaturePrioritization {
    llm: Arc<dyn LlmClient>,
    scoring: ScoringSource,
    default_framework: Framework,
}

impl FeaturePrioritization {
    pub fn new(llm: Arc<dyn LlmClient>, scoring: ScoringSource, default_framework: Framework) -> Self {
        Self { llm, scoring, default_framework }
    }

    async fn score_feature(
        &self,
        framework: Framework,
        feature: &FeatureToPrioritize,
    ) -> Result<PrioritizedFeature, CapabilityError> {
        let hints = &feature.score_hints;
        match (framework, hints.tier) {
            (Framework::Rice, _) if hints.missing_rice_factors().is_empty() => {
                let factors = hints.rice_factors().map_err(CapabilityError::failed)?;
                Ok(PrioritizedFeature::rice(&feature.name, factors, "Scored from supplied values.".to_string()))
            }
            (Framework::Moscow, Some(tier)) => {
                Ok(PrioritizedFeature::tiered(&feature.name, tier, "Tier supplied with the request.".to_string()))
            }
            _ => match &self.scoring {
                ScoringSource::Model => self.score_with_model(framework, feature).await,
                ScoringSource::Operator(prompt) => {
                    score_with_operator(prompt.as_ref(), framework, feature).await
                }
            },
        }
    }

    async fn score_with_model(
        &self,
        framework: Framework,
        feature: &FeatureToPrioritize,
    ) -> Result<PrioritizedFeature, CapabilityError> {
        let reply = complete(self.llm.as_ref(), &estimate_prompt(framework, feature)).await?;
        let estimate: ModelEstimate = parse_model_json(&reply)?;
        let merged = feature.score_hints.filled_from(&estimate.scores);
        let justification = if estimate.justification.trim().is_empty() {
            "Estimated by the model.".to_string()
        } else {
            estimate.justification.trim().to_string()
        };

        match framework {
            Framework::Rice => {
                let factors = merged.rice_factors().map_err(|error| {
                    CapabilityError::Failed(format!("estimate for `{}` is unusable: {error}", feature.name))
                })?;
                Ok(PrioritizedFeature::rice(&feature.name, factors, justification))
            }
            Framework::Moscow => {
                let tier = merged.tier.ok_or_else(|| {
                    CapabilityError::Failed(format!("estimate for `{}` has no tier", feature.name))
                })?;
                Ok(PrioritizedFeature::tiered(&feature.name, tier, justification))
            }
        }
    }
}

fn estimate_prompt(framework: Framework, feature: &FeatureToPrioritize) -> String {
    let known = serde_json::to_string(&feature.score_hints).unwrap_or_else(|_| "{}".to_string());
    let shape = match framework {
        Framework::Rice => {
            "{\"reach\": 0-10, \"impact\": 0-10, \"confidence\": 0-10, \
             \"effort\": above 0 up to 5 (lower is easier), \"justification\": \"...\"}"
        }
        Framework::Moscow => "{\"tier\": \"must\" | \"should\" | \"could\" | \"wont\", \"justification\": \"...\"}",
    };
    format!(
        "You help a product owner prioritize with the {framework} framework.\n\
         Feature: {}\nDescription: {}\nAlready known scores (keep them): {known}\n\n\
         Estimate the missing scores and explain them in one sentence.\n\
         Reply with JSON only: {shape}",
        feature.name, feature.description
    )
}

async fn score_with_operator(
    prompt: &dyn ScorePrompt,
    framework: Framework,
    feature: &FeatureToPrioritize,
) -> Result<PrioritizedFeature, CapabilityError> {
    prompt.notify(&format!("Scoring feature: {}", feature.name)).await;
    let justification = "Scored by the operator.".to_string();

    match framework {
        Framework::Rice => {
            let mut hints = feature.score_hints.clone();
            for factor in hints.missing_rice_factors() {
                let value = ask_factor(prompt, &feature.name, factor).await?;
                hints.set_factor(factor, value);
            }
            let factors = hints.rice_factors().map_err(CapabilityError::failed)?;
            Ok(PrioritizedFeature::rice(&feature.name, factors, justification))
        }
        Framework::Moscow => {
            let tier = ask_tier(prompt, &feature.name).await?;
            Ok(PrioritizedFeature::tiered(&feature.name, tier, justification))
        }
    }
}

async fn ask_factor(
    prompt: &dyn ScorePrompt,
    feature: &str,
    factor: RiceFactor,
) -> Result<f64, CapabilityError> {
    let question = match factor {
        RiceFactor::Effort => format!("[{feature}] effort (above 0 up to 5, lower is easier):"),
        _ => format!("[{feature}] {} (0 to 10):", factor.key()),
    };

    for _ in 0..MAX_PROMPT_ATTEMPTS {
        let answer = ask(prompt, &question).await?;
        match answer.trim().replace(',', ".").parse::<f64>() {
            Ok(value) if factor == RiceFactor::Effort && value == 0.0 => {
                prompt.notify("Effort cannot be 0, try again.").await;
            }
            Ok(value) => match factor.check(value) {
                Ok(value) => return Ok(value),
                Err(error) => prompt.notify(&format!("{error}, try again.")).await,
            },
            Err(_) => prompt.notify(&format!("`{}` is not a number, try again.", answer.trim())).await,
        }
    }
    Err(CapabilityError::Failed(format!(
        "no valid {} for `{feature}` after {MAX_PROMPT_ATTEMPTS} attempts",
        factor.key()
    )))
}

async fn ask_tier(prompt: &dyn ScorePrompt, feature: &str) -> Result<MoscowTier, CapabilityError> {
    let tiers: Vec<&str> = MoscowTier::ALL.iter().map(MoscowTier::as_str).collect();
    let question = format!("[{feature}] tier ({}):", tiers.join(", "));
    for _ in 0..MAX_PROMPT_ATTEMPTS {
        let answer = ask(prompt, &question).await?;
        match answer.parse::<MoscowTier>() {
            Ok(tier) => return Ok(tier),
            Err(_) => prompt.notify(&format!("`{}` is not a MoSCoW tier, try again.", answer.trim())).await,
        }
    }
    Err(CapabilityError::Failed(format!("no valid tier for `{feature}` after {MAX_PROMPT_ATTEMPTS} attempts")))
}

async fn ask(prompt: &dyn ScorePrompt, question: &str) -> Result<String, CapabilityError> {
    prompt
        .ask(question)
        .await
        .map_err(|error| CapabilityError::Failed(format!("operator prompt failed: {error:#}")))
}

/// Out-of-range hints are the caller's mistake, reported with their full path.
fn invalid_hints(features: &[FeatureToPrioritize]) -> Option<CapabilityError> {
    let mut fields = Vec::new();
    let mut messages = Vec::new();
    for (index, feature) in features.iter().enumerate() {
        for factor in RiceFactor::ALL {
            if let Some(value) = feature.score_hints.factor(factor) {
                if let Err(error) = factor.check(value) {
                    fields.push(format!("features[{index}].score_hints.{}", factor.key()));
                    messages.push(format!("{}: {error}", feature.name));
                }
            }
        }
    }
    if fields.is_empty() {
        None
    } else {
        Some(CapabilityError::InvalidArguments { fields, message: messages.join("; ") })
    }
}

#[async_trait]
impl Capability for FeaturePrioritization {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "Ranks features with RICE (reach, impact, confidence, effort) or MoSCoW tiers. Scores \
         supplied in score_hints are kept; missing ones are estimated."
    }

    fn input_fields(&self) -> &'static [FieldSpec] {
        FIELDS
    }

    fn category(&self) -> Option<ResultCategory> {
        Some(ResultCategory::Prioritization)
    }

    fn may_block_on_input(&self) -> bool {
        matches!(self.scoring, ScoringSource::Operator(_))
    }

    async fn invoke(&self, arguments: Value) -> Result<Value, CapabilityError> {
        let input: PrioritizeFeaturesInput = decode_arguments(arguments)?;
        let framework = match input.framework.as_deref() {
            Some(framework) => framework
                .parse::<Framework>()
                .map_err(|error| CapabilityError::invalid("framework", error.to_string()))?,
            None => self.default_framework,
        };
        if let Some(error) = invalid_hints(&input.features) {
            return Err(error);
        }

        let mut scored = Vec::with_capacity(input.features.len());
        for feature in &input.features {
            let prioritized = self.score_feature(framework, feature).await?;
            debug!(
                event_name = "capability.prioritize_features.scored",
                feature = %feature.name,
                final_score = ?prioritized.final_score,
                "feature scored"
            );
            scored.push(prioritized);
        }

        let result = PrioritizationResult::ranked(framework, scored);
        info!(
            event_name = "capability.prioritize_features.completed",
            framework = %framework,
            feature_count = result.features.len(),
            "features prioritized"
        );
        encode_output(&result)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use feedloop_core::{Framework, MoscowTier, PrioritizationResult};
    use serde_json::json;

    use super::{FeaturePrioritization, ScoringSource, MAX_PROMPT_ATTEMPTS};
    use crate::capabilities::prompt::ScriptedScorePrompt;
    use crate::capabilities::test_support::CannedLlm;
    use crate::tools::{Capability, CapabilityError, CapabilityRegistry, DispatchErrorKind};

    fn with_model(llm: Arc<CannedLlm>) -> FeaturePrioritization {
        FeaturePrioritization::new(llm, ScoringSource::Model, Framework::Rice)
    }

    fn with_operator(prompt: Arc<ScriptedScorePrompt>) -> FeaturePrioritization {
        FeaturePrioritization::new(
            Arc::new(CannedLlm::default()),
            ScoringSource::Operator(prompt),
            Framework::Rice,
        )
    }

    fn parse(output: serde_json::Value) -> PrioritizationResult {
        serde_json::from_value(output).expect("prioritization shape")
    }

    #[tokio::test]
    async fn complete_hints_need_no_estimate() {
        let llm = Arc::new(CannedLlm::default());
        let output = with_model(llm.clone())
            .invoke(json!({"features": [
                {"name": "A", "score_hints": {"reach": 2, "impact": 2, "confidence": 2, "effort": 4}},
                {"name": "B", "score_hints": {"reach": 8, "impact": 5, "confidence": 5, "effort": 2}}
            ]}))
            .await
            .expect("prioritized");

        let result = parse(output);
        assert_eq!(result.framework, Framework::Rice);
        assert_eq!(result.features[0].feature_name, "B");
        assert_eq!(result.features[0].final_score, Some(100.0));
        assert_eq!(result.features[1].final_score, Some(2.0));
        assert_eq!(result.features[0].rank, None);
        assert_eq!(llm.prompt_count(), 0);
    }

    #[tokio::test]
    async fn model_fills_only_missing_factors() {
        let llm = Arc::new(CannedLlm::replying([
            r#"{"reach": 1, "impact": 4, "confidence": 5, "effort": 2, "justification": "Broad demand."}"#,
        ]));
        let output = with_model(llm)
            .invoke(json!({"features": [{"name": "PDF export", "score_hints": {"reach": 9}}]}))
            .await
            .expect("prioritized");

        let result = parse(output);
        assert_eq!(result.features[0].final_score, Some(90.0));
        assert_eq!(result.features[0].justification, "Broad demand.");
    }

    #[tokio::test]
    async fn moscow_uses_tiers_and_orders_by_them() {
        let llm = Arc::new(CannedLlm::replying([r#"{"tier": "Must have", "justification": "Blocks sign-in."}"#]));
        let output = with_model(llm)
            .invoke(json!({
                "framework": "moscow",
                "features": [
                    {"name": "Dark mode", "score_hints": {"tier": "could"}},
                    {"name": "Google login"}
                ]
            }))
            .await
            .expect("prioritized");

        let result = parse(output);
        assert_eq!(result.framework, Framework::Moscow);
        assert_eq!(result.features[0].feature_name, "Google login");
        assert_eq!(result.features[0].rank, Some(MoscowTier::Must));
        assert_eq!(result.features[0].final_score, None);
        assert_eq!(result.features[1].rank, Some(MoscowTier::Could));
    }

    #[tokio::test]
    async fn tier_hints_accept_what_the_tier_parser_accepts() {
        let mut registry = CapabilityRegistry::new();
        registry.register(with_model(Arc::new(CannedLlm::default()))).expect("register");

        let spelled_out = registry
            .dispatch(
                "prioritize_features",
                json!({"framework": "MoSCoW", "features": [
                    {"name": "Google login", "score_hints": {"tier": "Must have"}},
                    {"name": "Dark mode", "score_hints": {"tier": "won't-have"}}
                ]}),
            )
            .await;
        assert!(!spelled_out.is_error(), "unexpected error: {}", spelled_out.content());
        let result = parse(spelled_out.content());
        assert_eq!(result.features[0].rank, Some(MoscowTier::Must));
        assert_eq!(result.features[1].rank, Some(MoscowTier::Wont));

        let unknown = registry
            .dispatch(
                "prioritize_features",
                json!({"framework": "MoSCoW", "features": [
                    {"name": "Dark mode", "score_hints": {"tier": "urgent"}}
                ]}),
            )
            .await;
        assert_eq!(unknown.error_kind(), Some(DispatchErrorKind::InvalidArguments));
        assert_eq!(unknown.content()["error"]["fields"], json!(["features[0].score_hints.tier"]));
    }

    #[tokio::test]
    async fn out_of_range_hints_are_invalid_arguments() {
        let error = with_model(Arc::new(CannedLlm::default()))
            .invoke(json!({"features": [{"name": "A", "score_hints": {"reach": 12, "effort": 0}}]}))
            .await
            .err();

        match error {
            Some(CapabilityError::InvalidArguments { fields, .. }) => assert_eq!(
                fields,
                vec!["features[0].score_hints.reach", "features[0].score_hints.effort"]
            ),
            other => panic!("expected invalid arguments, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn operator_is_asked_again_on_bad_answers() {
        let prompt = Arc::new(ScriptedScorePrompt::new(["lots", "11", "8", "5", "5", "0", "2"]));
        let output = with_operator(prompt.clone())
            .invoke(json!({"features": [{"name": "Attachments"}]}))
            .await
            .expect("prioritized");

        let result = parse(output);
        assert_eq!(result.features[0].final_score, Some(100.0));
        assert_eq!(prompt.remaining(), 0);
        assert_eq!(prompt.questions().len(), 7);
    }

    #[tokio::test]
    async fn operator_keeps_supplied_hints() {
        let prompt = Arc::new(ScriptedScorePrompt::new(["1"]));
        let output = with_operator(prompt.clone())
            .invoke(json!({"features": [
                {"name": "A", "score_hints": {"reach": 3, "impact": 3, "confidence": 3}}
            ]}))
            .await
            .expect("prioritized");

        assert_eq!(parse(output).features[0].final_score, Some(27.0));
        assert_eq!(prompt.questions(), vec!["[A] effort (above 0 up to 5, lower is easier):"]);
    }

    #[tokio::test]
    async fn operator_gives_up_after_repeated_bad_answers() {
        let answers = vec!["nope"; MAX_PROMPT_ATTEMPTS];
        let prompt = Arc::new(ScriptedScorePrompt::new(answers));
        let capability = with_operator(prompt);

        assert!(capability.may_block_on_input());
        let error = capability.invoke(json!({"features": [{"name": "A"}]})).await.err();
        assert!(matches!(error, Some(CapabilityError::Failed(message)) if message.contains("no valid reach")));
    }

    #[tokio::test]
    async fn empty_feature_list_is_an_empty_ranking() {
        let output = with_model(Arc::new(CannedLlm::default()))
            .invoke(json!({"features": []}))
            .await
            .expect("prioritized");

        assert_eq!(output, json!({"framework": "RICE", "features": []}));
    }
}
