//! Discriminator error types.

use thiserror::Error;

/// Errors returned while picking a winning candidate.
///
/// "No candidate qualifies" is not an error; it is `Ok(None)`.
#[derive(Debug, Error)]
pub enum DiscriminatorError {
    /// Two or more candidates matched the same rule.
    #[error("rule {rule_index} matched {} candidates: {}", .matches.len(), .matches.join(", "))]
    Ambiguous {
        rule_index: usize,
        matches: Vec<String>,
    },

    /// A candidate's attributes could not be fetched; the reference may be
    /// stale and the request should be retried.
    #[error("candidate {dn} is unavailable: {reason}")]
    CandidateUnavailable { dn: String, reason: String },

    /// Evaluation was asked to choose from nothing.
    #[error("cannot discriminate an empty candidate set")]
    EmptyCandidateSet,

    /// Several candidates but no discriminator fields configured.
    #[error("{count} candidates but no discriminator fields are configured")]
    UnconfiguredMultipleCandidates { count: usize },

    /// Discriminator fields configured without any rule template.
    #[error("discriminator fields are configured but no templates are")]
    MissingTemplates,

    /// A configured field cannot be exposed to rule templates.
    #[error("invalid discriminator field '{name}': {reason}")]
    InvalidField { name: String, reason: String },

    /// A rule template failed to compile.
    #[error("failed to compile rule template '{template}': {message}")]
    TemplateCompile { template: String, message: String },

    /// A rule template failed while evaluating a candidate.
    #[error("rule template '{template}' failed for {dn}: {message}")]
    TemplateEvaluation {
        template: String,
        dn: String,
        message: String,
    },
}

impl DiscriminatorError {
    /// Returns true if retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, DiscriminatorError::CandidateUnavailable { .. })
    }

    /// Returns true for caller or configuration contract violations.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            DiscriminatorError::EmptyCandidateSet
                | DiscriminatorError::UnconfiguredMultipleCandidates { .. }
                | DiscriminatorError::MissingTemplates
                | DiscriminatorError::InvalidField { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let unavailable = DiscriminatorError::CandidateUnavailable {
            dn: "uid=a".to_string(),
            reason: "not found".to_string(),
        };
        assert!(unavailable.is_transient());
        assert!(!unavailable.is_contract_violation());

        assert!(DiscriminatorError::EmptyCandidateSet.is_contract_violation());
        assert!(DiscriminatorError::MissingTemplates.is_contract_violation());

        let ambiguous = DiscriminatorError::Ambiguous {
            rule_index: 0,
            matches: vec!["uid=a".to_string(), "uid=b".to_string()],
        };
        assert!(!ambiguous.is_transient());
        assert!(!ambiguous.is_contract_violation());
    }

    #[test]
    fn test_ambiguous_display() {
        let err = DiscriminatorError::Ambiguous {
            rule_index: 1,
            matches: vec!["uid=a".to_string(), "uid=b".to_string()],
        };
        assert_eq!(err.to_string(), "rule 1 matched 2 candidates: uid=a, uid=b");
    }
}
