use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum DomainError {
    #[error("unknown {kind} `{value}`")]
    UnknownVariant { kind: &'static str, value: String },
    #[error("missing {factor} score")]
    MissingFactor { factor: &'static str },
    #[error("{factor} score {value} is out of range")]
    FactorOutOfRange { factor: &'static str, value: f64 },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[cfg(test)]
mod tests {
    use crate::errors::DomainError;

    #[test]
    fn factor_errors_name_the_factor() {
        let error = DomainError::FactorOutOfRange { factor: "effort", value: 0.0 };
        assert_eq!(error.to_string(), "effort score 0 is out of range");
        assert_eq!(
            DomainError::MissingFactor { factor: "reach" }.to_string(),
            "missing reach score"
        );
    }

    #[test]
    fn invariant_errors_carry_their_message() {
        let error = DomainError::InvariantViolation("user story title is empty".to_owned());
        assert!(error.to_string().contains("user story title is empty"));
    }
}
