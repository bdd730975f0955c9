use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default file name attached to locations when the caller does not supply one.
pub const DEFAULT_FILE_NAME: &str = "contract.sol";

/// Finding severity. Declaration order is the ranking order, so `Critical < Info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::Info,
    ];

    /// Contribution of one finding of this severity to the fallback risk score.
    pub fn weight(self) -> f64 {
        match self {
            Severity::Critical => 4.0,
            Severity::High => 3.0,
            Severity::Medium => 2.0,
            Severity::Low => 1.0,
            Severity::Info => 0.5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
            Severity::Low => "LOW",
            Severity::Info => "INFO",
        }
    }

    /// Case-insensitive parse used for model output and rule packs.
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|severity| severity.as_str().eq_ignore_ascii_case(value.trim()))
    }

    pub fn is_blocking(self) -> bool {
        matches!(self, Severity::Critical | Severity::High)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position of a finding or declaration. `line == 0` means the position is unknown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeLocation {
    pub file: String,
    pub line: usize,
    pub column: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_name: Option<String>,
}

impl CodeLocation {
    pub fn new(file: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            file: file.into(),
            line,
            column,
            function_name: None,
            contract_name: None,
        }
    }

    pub fn unknown(file: impl Into<String>) -> Self {
        Self::new(file, 0, 0)
    }

    pub fn in_function(mut self, name: impl Into<String>) -> Self {
        self.function_name = Some(name.into());
        self
    }

    pub fn in_contract(mut self, name: impl Into<String>) -> Self {
        self.contract_name = Some(name.into());
        self
    }
}

/// One reported issue instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vulnerability {
    pub id: String,
    pub name: String,
    pub severity: Severity,
    pub description: String,
    pub location: CodeLocation,
    pub technical_explanation: String,
    pub exploit_scenario: String,
    pub recommendation: String,
    #[serde(default)]
    pub code_snippet: String,
    #[serde(default)]
    pub references: Vec<String>,
    pub confidence: f32,
}

impl Vulnerability {
    /// Category key: the id prefix before the first `-` (`RE` for `RE-01`).
    pub fn category(&self) -> &str {
        self.id.split('-').next().unwrap_or(&self.id)
    }

    pub fn validate(&self) -> Result<(), VulnerabilityValidationError> {
        if self.id.trim().is_empty() {
            return Err(VulnerabilityValidationError::EmptyId);
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(VulnerabilityValidationError::InvalidConfidence {
                id: self.id.clone(),
                confidence: self.confidence,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VulnerabilityValidationError {
    #[error("finding id must not be blank")]
    EmptyId,
    #[error("finding `{id}` confidence must be within 0.0..=1.0 (got {confidence})")]
    InvalidConfidence { id: String, confidence: f32 },
}
