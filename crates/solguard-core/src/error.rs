use thiserror::Error;

use crate::scanner::RuleValidationError;

/// Errors surfaced to callers of [`crate::Auditor::audit`].
///
/// Everything else in the pipeline is recovered locally and only logged.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("failed to parse contract source: {message}")]
    FatalParse { message: String },
    #[error("solidity grammar could not be loaded: {0}")]
    Grammar(String),
    #[error(transparent)]
    RuleValidation(#[from] RuleValidationError),
    #[error("invalid auditor configuration: {0}")]
    Config(String),
}

impl AuditError {
    pub fn fatal_parse(message: impl Into<String>) -> Self {
        Self::FatalParse {
            message: message.into(),
        }
    }
}

/// A single declaration could not be turned into metadata; it is skipped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("{kind} declaration at line {line} is missing its `{field}`")]
    MissingField {
        kind: &'static str,
        field: &'static str,
        line: usize,
    },
}

/// A structural rule failed; its contribution is treated as empty.
#[derive(Debug, Error)]
#[error("rule `{rule_id}` failed on contract `{contract}`: {source:#}")]
pub struct RuleEvaluationError {
    pub rule_id: String,
    pub contract: String,
    #[source]
    pub source: anyhow::Error,
}

/// The semantic analysis call failed; the merge falls back to a no-op analysis.
#[derive(Debug, Error)]
pub enum SemanticAnalysisError {
    #[error("semantic analysis is not configured")]
    Unconfigured,
    #[error("semantic analysis timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("semantic analysis request failed: {0:#}")]
    Request(anyhow::Error),
    #[error("semantic analysis returned malformed data: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grammar_failure_is_not_reported_as_a_parse_error() {
        let err = AuditError::Grammar("Incompatible language version 15".into());
        assert!(!matches!(err, AuditError::FatalParse { .. }));
        assert_eq!(
            err.to_string(),
            "solidity grammar could not be loaded: Incompatible language version 15"
        );
    }
}
