use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Framework {
    /// Weighted factors: reach × impact × confidence / effort.
    #[default]
    #[serde(rename = "RICE", alias = "rice", alias = "Rice")]
    Rice,
    /// Qualitative tiers: must, should, could, won't.
    #[serde(rename = "MoSCoW", alias = "moscow", alias = "MOSCOW", alias = "Moscow")]
    Moscow,
}

impl Framework {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rice => "RICE",
            Self::Moscow => "MoSCoW",
        }
    }
}

impl std::fmt::Display for Framework {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Framework {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "rice" => Ok(Self::Rice),
            "moscow" => Ok(Self::Moscow),
            other => Err(DomainError::UnknownVariant { kind: "framework", value: other.to_string() }),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum MoscowTier {
    Must,
    Should,
    Could,
    Wont,
}

impl MoscowTier {
    pub const ALL: [MoscowTier; 4] = [Self::Must, Self::Should, Self::Could, Self::Wont];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Must => "must",
            Self::Should => "should",
            Self::Could => "could",
            Self::Wont => "wont",
        }
    }
}

impl TryFrom<String> for MoscowTier {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl std::str::FromStr for MoscowTier {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace(['\'', ' ', '-'], "");
        match normalized.trim_end_matches("have") {
            "must" => Ok(Self::Must),
            "should" => Ok(Self::Should),
            "could" => Ok(Self::Could),
            "wont" => Ok(Self::Wont),
            _ => Err(DomainError::UnknownVariant { kind: "moscow tier", value: value.to_string() }),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RiceFactor {
    Reach,
    Impact,
    Confidence,
    Effort,
}

impl RiceFactor {
    pub const ALL: [RiceFactor; 4] = [Self::Reach, Self::Impact, Self::Confidence, Self::Effort];

    pub fn key(&self) -> &'static str {
        match self {
            Self::Reach => "reach",
            Self::Impact => "impact",
            Self::Confidence => "confidence",
            Self::Effort => "effort",
        }
    }

    pub fn upper_bound(&self) -> f64 {
        match self {
            Self::Effort => 5.0,
            _ => 10.0,
        }
    }

    pub fn check(&self, value: f64) -> Result<f64, DomainError> {
        let in_range = match self {
            Self::Effort => value > 0.0 && value <= self.upper_bound(),
            _ => (0.0..=self.upper_bound()).contains(&value),
        };
        if value.is_finite() && in_range {
            Ok(value)
        } else {
            Err(DomainError::FactorOutOfRange { factor: self.key(), value })
        }
    }
}

/// Partial scores supplied with a feature. Whatever is present here is kept as-is.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreHints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reach: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effort: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<MoscowTier>,
}

impl ScoreHints {
    pub fn factor(&self, factor: RiceFactor) -> Option<f64> {
        match factor {
            RiceFactor::Reach => self.reach,
            RiceFactor::Impact => self.impact,
            RiceFactor::Confidence => self.confidence,
            RiceFactor::Effort => self.effort,
        }
    }

    pub fn set_factor(&mut self, factor: RiceFactor, value: f64) {
        let slot = match factor {
            RiceFactor::Reach => &mut self.reach,
            RiceFactor::Impact => &mut self.impact,
            RiceFactor::Confidence => &mut self.confidence,
            RiceFactor::Effort => &mut self.effort,
        };
        *slot = Some(value);
    }

    pub fn missing_rice_factors(&self) -> Vec<RiceFactor> {
        RiceFactor::ALL.into_iter().filter(|factor| self.factor(*factor).is_none()).collect()
    }

    /// Fills gaps from `estimate`; values already present in `self` win.
    pub fn filled_from(&self, estimate: &ScoreHints) -> ScoreHints {
        ScoreHints {
            reach: self.reach.or(estimate.reach),
            impact: self.impact.or(estimate.impact),
            confidence: self.confidence.or(estimate.confidence),
            effort: self.effort.or(estimate.effort),
            tier: self.tier.or(estimate.tier),
        }
    }

    pub fn rice_factors(&self) -> Result<RiceFactors, DomainError> {
        let value = |factor: RiceFactor| {
            self.factor(factor)
                .ok_or(DomainError::MissingFactor { factor: factor.key() })
                .and_then(|value| factor.check(value))
        };
        Ok(RiceFactors {
            reach: value(RiceFactor::Reach)?,
            impact: value(RiceFactor::Impact)?,
            confidence: value(RiceFactor::Confidence)?,
            effort: value(RiceFactor::Effort)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureToPrioritize {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub score_hints: ScoreHints,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RiceFactors {
    pub reach: f64,
    pub impact: f64,
    pub confidence: f64,
    pub effort: f64,
}

impl RiceFactors {
    pub fn score(&self) -> f64 {
        self.reach * self.impact * self.confidence / self.effort
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureScore {
    Rice(RiceFactors),
    Tier { tier: MoscowTier },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrioritizedFeature {
    pub feature_name: String,
    pub score: FeatureScore,
    pub final_score: Option<f64>,
    pub rank: Option<MoscowTier>,
    pub justification: String,
}

impl PrioritizedFeature {
    pub fn rice(feature_name: impl Into<String>, factors: RiceFactors, justification: String) -> Self {
        Self {
            feature_name: feature_name.into(),
            final_score: Some(factors.score()),
            score: FeatureScore::Rice(factors),
            rank: None,
            justification,
        }
    }

    pub fn tiered(feature_name: impl Into<String>, tier: MoscowTier, justification: String) -> Self {
        Self {
            feature_name: feature_name.into(),
            score: FeatureScore::Tier { tier },
            final_score: None,
            rank: Some(tier),
            justification,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrioritizationResult {
    pub framework: Framework,
    pub features: Vec<PrioritizedFeature>,
}

impl PrioritizationResult {
    /// Orders features best-first. The sort is stable so ties keep their input order.
    pub fn ranked(framework: Framework, mut features: Vec<PrioritizedFeature>) -> Self {
        match framework {
            Framework::Rice => features.sort_by(|left, right| {
                let left = left.final_score.unwrap_or(f64::MIN);
                let right = right.final_score.unwrap_or(f64::MIN);
                right.total_cmp(&left)
            }),
            Framework::Moscow => features.sort_by_key(|feature| feature.rank.unwrap_or(MoscowTier::Wont)),
        }
        Self { framework, features }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        Framework, MoscowTier, PrioritizationResult, PrioritizedFeature, RiceFactor, RiceFactors,
        ScoreHints,
    };
    use crate::errors::DomainError;

    fn factors(reach: f64, impact: f64, confidence: f64, effort: f64) -> RiceFactors {
        RiceFactors { reach, impact, confidence, effort }
    }

    #[test]
    fn rice_score_divides_by_effort() {
        assert_eq!(factors(8.0, 5.0, 5.0, 2.0).score(), 100.0);
    }

    #[test]
    fn hints_win_over_estimates() {
        let hints = ScoreHints { reach: Some(9.0), effort: Some(1.0), ..ScoreHints::default() };
        let estimate = ScoreHints {
            reach: Some(2.0),
            impact: Some(4.0),
            confidence: Some(5.0),
            effort: Some(3.0),
            tier: None,
        };

        let merged = hints.filled_from(&estimate).rice_factors().expect("complete factors");
        assert_eq!(merged, factors(9.0, 4.0, 5.0, 1.0));
    }

    #[test]
    fn zero_effort_is_rejected() {
        let hints = ScoreHints {
            reach: Some(1.0),
            impact: Some(1.0),
            confidence: Some(1.0),
            effort: Some(0.0),
            tier: None,
        };
        assert_eq!(
            hints.rice_factors(),
            Err(DomainError::FactorOutOfRange { factor: "effort", value: 0.0 })
        );
    }

    #[test]
    fn missing_factor_is_reported_by_name() {
        let hints = ScoreHints { reach: Some(1.0), ..ScoreHints::default() };
        assert_eq!(
            hints.missing_rice_factors(),
            vec![RiceFactor::Impact, RiceFactor::Confidence, RiceFactor::Effort]
        );
        assert_eq!(hints.rice_factors(), Err(DomainError::MissingFactor { factor: "impact" }));
    }

    #[test]
    fn rice_ranking_is_descending_and_stable() {
        let ranked = PrioritizationResult::ranked(
            Framework::Rice,
            vec![
                PrioritizedFeature::rice("a", factors(1.0, 1.0, 1.0, 1.0), String::new()),
                PrioritizedFeature::rice("b", factors(5.0, 5.0, 5.0, 1.0), String::new()),
                PrioritizedFeature::rice("c", factors(1.0, 1.0, 1.0, 1.0), String::new()),
            ],
        );
        let names: Vec<_> = ranked.features.iter().map(|f| f.feature_name.as_str()).collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }

    #[test]
    fn moscow_ranking_follows_tier_order() {
        let ranked = PrioritizationResult::ranked(
            Framework::Moscow,
            vec![
                PrioritizedFeature::tiered("later", MoscowTier::Could, String::new()),
                PrioritizedFeature::tiered("now", MoscowTier::Must, String::new()),
            ],
        );
        assert_eq!(ranked.features[0].feature_name, "now");
        assert_eq!(ranked.features[0].final_score, None);
        assert_eq!(ranked.features[0].rank, Some(MoscowTier::Must));
    }

    #[test]
    fn frameworks_and_tiers_parse_loosely() {
        assert_eq!("rice".parse::<Framework>().ok(), Some(Framework::Rice));
        assert_eq!("MoSCoW".parse::<Framework>().ok(), Some(Framework::Moscow));
        assert_eq!("Won't have".parse::<MoscowTier>().ok(), Some(MoscowTier::Wont));
        assert_eq!("must-have".parse::<MoscowTier>().ok(), Some(MoscowTier::Must));
    }

    #[test]
    fn framework_serializes_with_conventional_spelling() {
        let json = serde_json::to_string(&Framework::Moscow).expect("serialize framework");
        assert_eq!(json, "\"MoSCoW\"");
        let parsed: Framework = serde_json::from_str("\"rice\"").expect("lowercase alias");
        assert_eq!(parsed, Framework::Rice);
    }

    #[test]
    fn tiers_deserialize_through_loose_parsing() {
        let parsed: ScoreHints = serde_json::from_str(r#"{"tier":"Should Have"}"#).expect("tier");
        assert_eq!(parsed.tier, Some(MoscowTier::Should));
        assert!(serde_json::from_str::<ScoreHints>(r#"{"tier":"maybe"}"#).is_err());
        assert_eq!(serde_json::to_string(&MoscowTier::Wont).expect("serialize"), "\"wont\"");
    }
}
