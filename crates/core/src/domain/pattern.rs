use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternSummary {
    #[serde(default)]
    pub patterns: Vec<String>,
}

impl PatternSummary {
    /// Keeps the first occurrence of each theme, compared case-insensitively.
    pub fn deduplicated(self) -> Self {
        let mut seen = std::collections::BTreeSet::new();
        let patterns = self
            .patterns
            .into_iter()
            .map(|pattern| pattern.trim().to_string())
            .filter(|pattern| !pattern.is_empty())
            .filter(|pattern| seen.insert(pattern.to_lowercase()))
            .collect();
        Self { patterns }
    }
}
