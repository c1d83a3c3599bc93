use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackCategory {
    #[serde(alias = "Bug")]
    Bug,
    #[serde(alias = "Feature", alias = "feature_request")]
    Feature,
    #[serde(alias = "Comment")]
    Comment,
}

impl std::str::FromStr for FeedbackCategory {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "bug" | "defect" => Ok(Self::Bug),
            "feature" | "feature_request" => Ok(Self::Feature),
            "comment" | "praise" => Ok(Self::Comment),
            other => Err(DomainError::UnknownVariant { kind: "feedback category", value: other.to_string() }),
        }
    }
}

/// One actionable item extracted from raw feedback.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackItem {
    pub name: String,
    pub description: String,
    #[serde(default, alias = "source_feedbacks")]
    pub source_excerpts: Vec<String>,
    pub category: FeedbackCategory,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    #[serde(default, alias = "features")]
    pub items: Vec<FeedbackItem>,
}

impl AnalysisResult {
    pub fn count(&self, category: FeedbackCategory) -> usize {
        self.items.iter().filter(|item| item.category == category).count()
    }

    /// Drops items without a name and trims whitespace the model tends to leave behind.
    pub fn normalized(self) -> Self {
        let items = self
            .items
            .into_iter()
            .filter(|item| !item.name.trim().is_empty())
            .map(|item| FeedbackItem {
                name: item.name.trim().to_string(),
                description: item.description.trim().to_string(),
                source_excerpts: item
                    .source_excerpts
                    .into_iter()
                    .map(|excerpt| excerpt.trim().to_string())
                    .filter(|excerpt| !excerpt.is_empty())
                    .collect(),
                category: item.category,
            })
            .collect();
        Self { items }
    }
}

#[cfg(test)]
mod tests {
    use super::{AnalysisResult, FeedbackCategory, FeedbackItem};

    fn item(name: &str, category: FeedbackCategory) -> FeedbackItem {
        FeedbackItem {
            name: name.to_string(),
            description: format!("{name} description"),
            source_excerpts: vec![format!("  {name} excerpt ")],
            category,
        }
    }

    #[test]
    fn counts_items_per_category() {
        let result = AnalysisResult {
            items: vec![
                item("PDF export", FeedbackCategory::Feature),
                item("Google login", FeedbackCategory::Bug),
                item("File attachments", FeedbackCategory::Feature),
            ],
        };

        assert_eq!(result.count(FeedbackCategory::Feature), 2);
        assert_eq!(result.count(FeedbackCategory::Bug), 1);
        assert_eq!(result.count(FeedbackCategory::Comment), 0);
    }

    #[test]
    fn normalization_drops_unnamed_items_and_trims_excerpts() {
        let mut padded = item("PDF export", FeedbackCategory::Feature);
        padded.name = "  PDF export ".to_string();
        let result =
            AnalysisResult { items: vec![padded, item("   ", FeedbackCategory::Bug)] }.normalized();

        assert_eq!(result.items.len(), 1);
        assert_eq!(result.items[0].name, "PDF export");
        assert_eq!(result.items[0].source_excerpts, vec!["PDF export excerpt".to_string()]);
    }

    #[test]
    fn accepts_legacy_source_feedbacks_field() {
        let parsed: FeedbackItem = serde_json::from_str(
            r#"{"name":"Export","description":"d","source_feedbacks":["a"],"category":"feature"}"#,
        )
        .expect("legacy field should deserialize");

        assert_eq!(parsed.source_excerpts, vec!["a".to_string()]);
    }

    #[test]
    fn parses_category_synonyms() {
        assert_eq!("Defect".parse::<FeedbackCategory>().ok(), Some(FeedbackCategory::Bug));
        assert!("roadmap".parse::<FeedbackCategory>().is_err());
    }
}
