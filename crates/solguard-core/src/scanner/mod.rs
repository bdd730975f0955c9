use std::{collections::HashSet, fmt, sync::Arc};

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ast::SourceUnit;
use crate::metadata::ContractMetadata;
use crate::model::{Severity, Vulnerability};

pub mod builtin;
pub mod engine;
pub mod file_repository;

/// Predicate behind a structural rule. Must be pure: same metadata, same findings.
pub type StructuralPredicate =
    Arc<dyn Fn(&SourceUnit, &ContractMetadata) -> AnyResult<Vec<Vulnerability>> + Send + Sync>;

/// How a rule recognizes its pattern.
#[derive(Clone)]
pub enum Matcher {
    /// Regular expression over the raw source text; one finding per match.
    Lexical(Regex),
    /// Evaluated once per extracted contract.
    Structural(StructuralPredicate),
}

impl Matcher {
    pub fn kind(&self) -> &'static str {
        match self {
            Matcher::Lexical(_) => "lexical",
            Matcher::Structural(_) => "structural",
        }
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Lexical(regex) => f.debug_tuple("Lexical").field(&regex.as_str()).finish(),
            Matcher::Structural(_) => f.write_str("Structural(..)"),
        }
    }
}

/// Definition of a single detection rule.
#[derive(Debug, Clone)]
pub struct Rule {
    /// Unique identifier, `<CATEGORY>-<NN>` for built-ins (e.g. `RE-01`).
    pub id: String,
    pub name: String,
    pub severity: Severity,
    pub description: String,
    pub matcher: Matcher,
    pub recommendation: String,
    pub references: Vec<String>,
    /// Confidence attached to lexical findings. Structural predicates set their own.
    pub confidence: f32,
}

impl Rule {
    /// Construct a regex-backed rule, validating invariants before returning.
    #[allow(clippy::too_many_arguments)]
    pub fn lexical(
        id: impl Into<String>,
        name: impl Into<String>,
        severity: Severity,
        description: impl Into<String>,
        pattern: &str,
        recommendation: impl Into<String>,
        references: Vec<String>,
        confidence: f32,
    ) -> Result<Self, RuleValidationError> {
        let id = id.into();
        if pattern.trim().is_empty() {
            return Err(RuleValidationError::EmptyPattern { rule_id: id });
        }
        let regex = Regex::new(pattern).map_err(|err| RuleValidationError::InvalidPattern {
            rule_id: id.clone(),
            message: err.to_string(),
        })?;
        let rule = Self {
            id,
            name: name.into(),
            severity,
            description: description.into(),
            matcher: Matcher::Lexical(regex),
            recommendation: recommendation.into(),
            references,
            confidence,
        };
        rule.validate()?;
        Ok(rule)
    }

    /// Construct a predicate-backed rule, validating invariants before returning.
    #[allow(clippy::too_many_arguments)]
    pub fn structural<F>(
        id: impl Into<String>,
        name: impl Into<String>,
        severity: Severity,
        description: impl Into<String>,
        predicate: F,
        recommendation: impl Into<String>,
        references: Vec<String>,
        confidence: f32,
    ) -> Result<Self, RuleValidationError>
    where
        F: Fn(&SourceUnit, &ContractMetadata) -> AnyResult<Vec<Vulnerability>>
            + Send
            + Sync
            + 'static,
    {
        let rule = Self {
            id: id.into(),
            name: name.into(),
            severity,
            description: description.into(),
            matcher: Matcher::Structural(Arc::new(predicate)),
            recommendation: recommendation.into(),
            references,
            confidence,
        };
        rule.validate()?;
        Ok(rule)
    }

    /// Validate invariants for existing rule definitions.
    pub fn validate(&self) -> Result<(), RuleValidationError> {
        if self.id.trim().is_empty() {
            return Err(RuleValidationError::EmptyId);
        }
        if self.name.trim().is_empty() {
            return Err(RuleValidationError::EmptyName {
                rule_id: self.id.clone(),
            });
        }
        if let Matcher::Lexical(regex) = &self.matcher {
            if regex.as_str().trim().is_empty() {
                return Err(RuleValidationError::EmptyPattern {
                    rule_id: self.id.clone(),
                });
            }
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(RuleValidationError::InvalidConfidence {
                rule_id: self.id.clone(),
                confidence: self.confidence,
            });
        }
        Ok(())
    }
}

/// Errors emitted while validating rule definitions.
#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleValidationError {
    #[error("rule id must not be blank")]
    EmptyId,
    #[error("rule `{rule_id}` name must not be blank")]
    EmptyName { rule_id: String },
    #[error("rule `{rule_id}` pattern must not be empty")]
    EmptyPattern { rule_id: String },
    #[error("rule `{rule_id}` pattern does not compile: {message}")]
    InvalidPattern { rule_id: String, message: String },
    #[error("rule `{rule_id}` confidence must be within 0.0..=1.0 (got {confidence})")]
    InvalidConfidence { rule_id: String, confidence: f32 },
    #[error("duplicate rule id `{rule_id}`")]
    DuplicateId { rule_id: String },
}

/// Ordered, immutable set of rules shared by every evaluation.
#[derive(Debug, Clone)]
pub struct RuleRegistry {
    rules: Arc<[Rule]>,
}

impl RuleRegistry {
    /// Registry holding the built-in catalogue in severity order.
    pub fn builtin() -> Result<Self, RuleValidationError> {
        Self::from_rules(builtin::catalogue()?)
    }

    pub fn from_rules(rules: Vec<Rule>) -> Result<Self, RuleValidationError> {
        let mut seen = HashSet::new();
        for rule in &rules {
            rule.validate()?;
            if !seen.insert(rule.id.clone()) {
                return Err(RuleValidationError::DuplicateId {
                    rule_id: rule.id.clone(),
                });
            }
        }
        Ok(Self {
            rules: rules.into(),
        })
    }

    /// Derive the registry a single audit runs with.
    ///
    /// A custom rule whose id matches an existing rule replaces it in place; the
    /// rest are appended in the order given. Skipped ids are then removed.
    pub fn configured(
        &self,
        skip_rules: &[String],
        custom_rules: &[Rule],
    ) -> Result<Self, RuleValidationError> {
        if skip_rules.is_empty() && custom_rules.is_empty() {
            return Ok(self.clone());
        }

        let mut rules: Vec<Rule> = self.rules.to_vec();
        let mut custom_seen = HashSet::new();
        for custom in custom_rules {
            custom.validate()?;
            if !custom_seen.insert(custom.id.as_str()) {
                return Err(RuleValidationError::DuplicateId {
                    rule_id: custom.id.clone(),
                });
            }
            match rules.iter_mut().find(|rule| rule.id == custom.id) {
                Some(existing) => *existing = custom.clone(),
                None => rules.push(custom.clone()),
            }
        }

        let skip: HashSet<&str> = skip_rules.iter().map(String::as_str).collect();
        rules.retain(|rule| !skip.contains(rule.id.as_str()));
        Ok(Self {
            rules: rules.into(),
        })
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn get(&self, rule_id: &str) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.id == rule_id)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Abstraction over custom rule loading so different backends (files, HTTP, in-memory) can be swapped transparently.
#[async_trait]
pub trait RuleRepository: Send + Sync {
    /// Retrieve the full rule set currently provided.
    async fn load_rules(&self) -> AnyResult<Vec<Rule>>;

    /// Fetch a single rule by identifier if it exists.
    async fn get_rule(&self, rule_id: &str) -> AnyResult<Option<Rule>>;
}
