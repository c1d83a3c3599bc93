use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

impl TryFrom<String> for Complexity {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl std::str::FromStr for Complexity {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" | "small" => Ok(Self::Low),
            "medium" | "moderate" => Ok(Self::Medium),
            "high" | "large" => Ok(Self::High),
            other => Err(DomainError::UnknownVariant { kind: "complexity", value: other.to_string() }),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStory {
    pub title: String,
    #[serde(alias = "story")]
    pub narrative: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    pub estimated_complexity: Complexity,
}

impl UserStory {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.title.trim().is_empty() {
            return Err(DomainError::InvariantViolation("user story title is empty".to_string()));
        }
        if self.narrative.trim().is_empty() {
            return Err(DomainError::InvariantViolation(
                "user story narrative is empty".to_string(),
            ));
        }
        if self.acceptance_criteria.iter().all(|criterion| criterion.trim().is_empty()) {
            return Err(DomainError::InvariantViolation(
                "user story has no acceptance criteria".to_string(),
            ));
        }
        Ok(())
    }

    pub fn to_markdown(&self) -> String {
        let mut lines = vec![format!("### {}", self.title), String::new(), self.narrative.clone()];
        lines.push(String::new());
        lines.push("#### Acceptance criteria".to_string());
        for (index, criterion) in self.acceptance_criteria.iter().enumerate() {
            lines.push(format!("{}. {criterion}", index + 1));
        }
        lines.push(String::new());
        lines.push(format!("Estimated complexity: {:?}", self.estimated_complexity).to_lowercase());
        lines.join("\n")
    }
}
