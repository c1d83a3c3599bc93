pub mod config;
pub mod domain;
pub mod errors;

pub use domain::feedback::{AnalysisResult, FeedbackCategory, FeedbackItem};
pub use domain::pattern::PatternSummary;
pub use domain::prioritization::{
    FeatureScore, FeatureToPrioritize, Framework, MoscowTier, PrioritizationResult,
    PrioritizedFeature, RiceFactor, RiceFactors, ScoreHints,
};
pub use domain::story::{Complexity, UserStory};
pub use errors::DomainError;
