//! Built-in rule catalogue.
//!
//! Rules are listed by severity, most severe first; the registry keeps this
//! order and evaluation reports findings in it.

use anyhow::Result as AnyResult;

use super::{Rule, RuleValidationError};
use crate::ast::SourceUnit;
use crate::metadata::ContractMetadata;
use crate::model::{CodeLocation, Severity, Vulnerability};

mod access;
mod calls;
mod hygiene;
mod version;

pub use version::SolidityVersion;

/// Registry-level description of a rule.
pub(crate) struct RuleDef {
    pub id: &'static str,
    pub name: &'static str,
    pub severity: Severity,
    pub description: &'static str,
    pub recommendation: &'static str,
    pub references: &'static [&'static str],
    pub confidence: f32,
}

impl RuleDef {
    fn references(&self) -> Vec<String> {
        self.references.iter().map(|r| r.to_string()).collect()
    }

    fn lexical(&self, pattern: &str) -> Result<Rule, RuleValidationError> {
        Rule::lexical(
            self.id,
            self.name,
            self.severity,
            self.description,
            pattern,
            self.recommendation,
            self.references(),
            self.confidence,
        )
    }

    fn structural<F>(&self, predicate: F) -> Result<Rule, RuleValidationError>
    where
        F: Fn(&SourceUnit, &ContractMetadata) -> AnyResult<Vec<Vulnerability>>
            + Send
            + Sync
            + 'static,
    {
        Rule::structural(
            self.id,
            self.name,
            self.severity,
            self.description,
            predicate,
            self.recommendation,
            self.references(),
            self.confidence,
        )
    }
}

/// Static texts of a finding emitted by a structural rule.
pub(crate) struct FindingTemplate {
    pub id: &'static str,
    pub name: &'static str,
    pub severity: Severity,
    pub technical_explanation: &'static str,
    pub exploit_scenario: &'static str,
    pub recommendation: &'static str,
    pub code_snippet: &'static str,
    pub references: &'static [&'static str],
    pub confidence: f32,
}

impl FindingTemplate {
    pub fn finding(&self, description: String, location: CodeLocation) -> Vulnerability {
        Vulnerability {
            id: self.id.to_string(),
            name: self.name.to_string(),
            severity: self.severity,
            description,
            location,
            technical_explanation: self.technical_explanation.to_string(),
            exploit_scenario: self.exploit_scenario.to_string(),
            recommendation: self.recommendation.to_string(),
            code_snippet: self.code_snippet.to_string(),
            references: self.references.iter().map(|r| r.to_string()).collect(),
            confidence: self.confidence,
        }
    }
}

const FRONT_RUNNING: RuleDef = RuleDef {
    id: "FR-01",
    name: "Front-Running Vulnerability",
    severity: Severity::High,
    description: "Price or state changes visible before execution can be front-run",
    recommendation: "Use commit-reveal scheme for sensitive operations",
    references: &["Front-Running", "MEV"],
    confidence: 0.5,
};

const WEAK_RANDOMNESS: RuleDef = RuleDef {
    id: "RN-01",
    name: "Weak Randomness Source",
    severity: Severity::High,
    description: "Using block properties for randomness is predictable",
    recommendation: "Use Chainlink VRF or similar oracle for secure randomness",
    references: &["SWC-120", "Predictable Randomness"],
    confidence: 0.6,
};

const TIMESTAMP_DEPENDENCE: RuleDef = RuleDef {
    id: "TD-01",
    name: "Timestamp Dependence",
    severity: Severity::Medium,
    description: "Usage of block.timestamp for critical logic can be manipulated by miners",
    recommendation: "Use block.number for time-sensitive logic or accept miner manipulation risk",
    references: &["SWC-116"],
    confidence: 0.6,
};

const TX_ORIGIN: RuleDef = RuleDef {
    id: "TX-01",
    name: "Tx.origin Authentication",
    severity: Severity::Medium,
    description: "Using tx.origin for authorization is vulnerable to phishing attacks",
    recommendation: "Use msg.sender instead of tx.origin for authentication",
    references: &["SWC-115"],
    confidence: 0.8,
};

const FLOATING_PRAGMA: RuleDef = RuleDef {
    id: "FP-01",
    name: "Floating Pragma",
    severity: Severity::Medium,
    description: "Pragma version not locked to specific compiler version",
    recommendation: "Lock pragma to specific Solidity version for production contracts",
    references: &["SWC-103"],
    confidence: 0.9,
};

const UNBOUNDED_LOOP: RuleDef = RuleDef {
    id: "DOS-01",
    name: "DoS with Block Gas Limit",
    severity: Severity::Medium,
    description: "Unbounded loops over dynamic arrays can lead to DoS",
    recommendation: "Implement pagination or pull pattern for large arrays",
    references: &["SWC-128"],
    confidence: 0.6,
};

const UNINITIALIZED_STORAGE: RuleDef = RuleDef {
    id: "US-01",
    name: "Uninitialized Storage Pointers",
    severity: Severity::Medium,
    description: "Local structs without explicit storage location can corrupt state",
    recommendation: "Explicitly declare memory or storage for struct variables",
    references: &["SWC-109"],
    confidence: 0.5,
};

const SHORT_ADDRESS: RuleDef = RuleDef {
    id: "SA-01",
    name: "Short Address Attack",
    severity: Severity::Low,
    description: "Missing input validation for address length",
    recommendation: "Validate address parameter length",
    references: &["Short Address Attack"],
    confidence: 0.4,
};

const ASSERT_MISUSE: RuleDef = RuleDef {
    id: "AR-01",
    name: "Improper Use of Assert",
    severity: Severity::Low,
    description: "Assert should only be used for invariants, not input validation",
    recommendation: "Use require() for input validation, assert() only for invariants",
    references: &["Best Practice"],
    confidence: 0.6,
};

/// The full built-in catalogue in registry order.
pub fn catalogue() -> Result<Vec<Rule>, RuleValidationError> {
    Ok(vec![
        // CRITICAL
        calls::reentrancy()?,
        calls::unchecked_call()?,
        calls::delegatecall()?,
        // HIGH
        hygiene::integer_overflow()?,
        access::access_control()?,
        access::selfdestruct()?,
        FRONT_RUNNING
            .lexical(r"function\s+\w+.*public.*payable|function\s+\w+.*external.*payable")?,
        WEAK_RANDOMNESS.lexical(r"block\.timestamp|block\.number|block\.difficulty|blockhash")?,
        // MEDIUM
        TIMESTAMP_DEPENDENCE.lexical(r"block\.timestamp|\bnow\b")?,
        TX_ORIGIN.lexical(r"tx\.origin")?,
        FLOATING_PRAGMA.lexical(r"pragma\s+solidity\s+[\^~]")?,
        UNBOUNDED_LOOP.lexical(r"for\s*\([^)]*\.length")?,
        UNINITIALIZED_STORAGE.lexical(r"struct\s+\w+\s+\w+\s*;")?,
        // LOW
        access::zero_address()?,
        hygiene::unused_variable()?,
        hygiene::missing_event()?,
        SHORT_ADDRESS.lexical(
            r"function.*\(.*address.*\).*external|function.*\(.*address.*\).*public",
        )?,
        ASSERT_MISUSE.lexical(r"assert\s*\(")?,
        // INFO
        hygiene::storage_packing()?,
        hygiene::public_to_external()?,
    ])
}

/// Functions the compiler names itself; naming-based rules skip them.
pub(crate) fn is_sentinel_name(name: &str) -> bool {
    name == crate::metadata::CONSTRUCTOR_NAME || name.starts_with('<')
}
