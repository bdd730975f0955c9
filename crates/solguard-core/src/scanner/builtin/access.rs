use aho_corasick::AhoCorasick;
use anyhow::{Context, Result as AnyResult};
use once_cell::sync::OnceCell;

use super::{FindingTemplate, RuleDef};
use crate::model::Severity;
use crate::scanner::{Rule, RuleValidationError};

const CRITICAL_KEYWORDS: [&str; 7] = [
    "withdraw",
    "transferOwnership",
    "setOwner",
    "pause",
    "unpause",
    "mint",
    "burn",
];
const AUTH_MODIFIERS: [&str; 4] = ["onlyOwner", "onlyAdmin", "requiresAuth", "authorized"];
const DESTRUCT_KEYWORDS: [&str; 2] = ["destruct", "kill"];
const DESTRUCT_GUARDS: [&str; 2] = ["onlyOwner", "onlyAdmin"];

static CRITICAL_NAMES: OnceCell<AhoCorasick> = OnceCell::new();
static DESTRUCT_NAMES: OnceCell<AhoCorasick> = OnceCell::new();

fn keyword_automaton(
    cell: &'static OnceCell<AhoCorasick>,
    keywords: &[&str],
) -> AnyResult<&'static AhoCorasick> {
    cell.get_or_try_init(|| {
        AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .build(keywords)
            .context("failed to build function-name keyword automaton")
    })
}

const ACCESS_CONTROL: RuleDef = RuleDef {
    id: "AC-01",
    name: "Missing Access Control",
    severity: Severity::High,
    description: "Critical functions lack proper access control modifiers",
    recommendation: "Add appropriate access control modifiers to critical functions",
    references: &["SWC-105", "CWE-284"],
    confidence: 0.90,
};

const ACCESS_CONTROL_FINDING: FindingTemplate = FindingTemplate {
    id: "AC-01",
    name: "Missing Access Control",
    severity: Severity::High,
    technical_explanation: "Functions that modify critical contract state or handle funds should be restricted to authorized addresses only.",
    exploit_scenario: "",
    recommendation: "Add access control modifier such as \"onlyOwner\" or implement role-based access control.",
    code_snippet: "",
    references: &[
        "SWC-105: Unprotected Ether Withdrawal",
        "CWE-284: Improper Access Control",
    ],
    confidence: 0.90,
};

/// AC-01: externally callable function named like a privileged operation, with no auth modifier.
pub(super) fn access_control() -> Result<Rule, RuleValidationError> {
    ACCESS_CONTROL.structural(|_, contract| {
        let critical = keyword_automaton(&CRITICAL_NAMES, &CRITICAL_KEYWORDS)?;
        Ok(contract
            .functions
            .iter()
            .filter(|function| {
                critical.is_match(function.name.as_str())
                    && !AUTH_MODIFIERS.iter().any(|auth| function.has_modifier(auth))
                    && function.is_externally_callable()
            })
            .map(|function| {
                let name = &function.name;
                let mut finding = ACCESS_CONTROL_FINDING.finding(
                    format!(
                        "Critical function \"{name}\" is {} without access control",
                        function.visibility
                    ),
                    function.location.clone(),
                );
                finding.exploit_scenario = format!(
                    "Any user can call {name}() and perform privileged operations, potentially draining funds or taking over the contract."
                );
                finding.code_snippet = format!(
                    "// Vulnerable:\nfunction {name}() public {{\n  // critical operation\n}}\n\n// Fixed:\nfunction {name}() public onlyOwner {{\n  // critical operation\n}}"
                );
                finding
            })
            .collect())
    })
}

const SELFDESTRUCT: RuleDef = RuleDef {
    id: "SD-01",
    name: "Unprotected Selfdestruct",
    severity: Severity::High,
    description: "Selfdestruct without proper access control can destroy the contract",
    recommendation: "Add onlyOwner modifier to selfdestruct functions",
    references: &["SWC-106"],
    confidence: 0.85,
};

const SELFDESTRUCT_FINDING: FindingTemplate = FindingTemplate {
    id: "SD-01",
    name: "Unprotected Selfdestruct",
    severity: Severity::High,
    technical_explanation: "The selfdestruct() function permanently destroys the contract and sends all remaining Ether to a specified address. Without proper access control, anyone can destroy the contract.",
    exploit_scenario: "An attacker calls the selfdestruct function, permanently destroying the contract and potentially stealing all funds.",
    recommendation: "Protect selfdestruct with onlyOwner or equivalent modifier. Consider if selfdestruct is even necessary.",
    code_snippet: "// Vulnerable:\nfunction destroy(address payable recipient) public {\n  selfdestruct(recipient);\n}\n\n// Fixed:\nfunction destroy(address payable recipient) public onlyOwner {\n  selfdestruct(recipient);\n}",
    references: &[
        "SWC-106: Unprotected SELFDESTRUCT Instruction",
        "Parity Wallet Hack (2017)",
    ],
    confidence: 0.85,
};

/// SD-01: function named like a destructor without an owner/admin guard.
pub(super) fn selfdestruct() -> Result<Rule, RuleValidationError> {
    SELFDESTRUCT.structural(|_, contract| {
        let destructive = keyword_automaton(&DESTRUCT_NAMES, &DESTRUCT_KEYWORDS)?;
        Ok(contract
            .functions
            .iter()
            .filter(|function| {
                destructive.is_match(function.name.as_str())
                    && !DESTRUCT_GUARDS.iter().any(|guard| function.has_modifier(guard))
            })
            .map(|function| {
                SELFDESTRUCT_FINDING.finding(
                    format!(
                        "Function \"{}\" may contain selfdestruct without access control",
                        function.name
                    ),
                    function.location.clone(),
                )
            })
            .collect())
    })
}

const ZERO_ADDRESS: RuleDef = RuleDef {
    id: "ZA-01",
    name: "Missing Zero Address Check",
    severity: Severity::Low,
    description: "Address parameters should be validated against zero address",
    recommendation: "Add require(address != address(0)) checks",
    references: &["Best Practice"],
    confidence: 0.60,
};

const ZERO_ADDRESS_FINDING: FindingTemplate = FindingTemplate {
    id: "ZA-01",
    name: "Missing Zero Address Check",
    severity: Severity::Low,
    technical_explanation: "Address parameters should be validated to ensure they are not the zero address (0x0) to prevent accidental loss of funds or broken functionality.",
    exploit_scenario: "User accidentally passes zero address, causing funds to be permanently locked or functionality to break.",
    recommendation: "Add require statement to check address != address(0).",
    code_snippet: "// Vulnerable:\nfunction setOwner(address newOwner) public {\n  owner = newOwner;\n}\n\n// Fixed:\nfunction setOwner(address newOwner) public {\n  require(newOwner != address(0), \"Zero address\");\n  owner = newOwner;\n}",
    references: &["Best Practice"],
    confidence: 0.60,
};

fn is_address_type(type_name: &str) -> bool {
    type_name == "address" || type_name == "address payable"
}

/// ZA-01: externally callable function taking an address it never compares to `address(0)`.
pub(super) fn zero_address() -> Result<Rule, RuleValidationError> {
    ZERO_ADDRESS.structural(|_, contract| {
        Ok(contract
            .functions
            .iter()
            .filter(|function| function.is_externally_callable())
            .filter(|function| {
                function.parameters.iter().any(|param| {
                    is_address_type(&param.type_name)
                        && !function.zero_checked_params.contains(&param.name)
                })
            })
            .map(|function| {
                ZERO_ADDRESS_FINDING.finding(
                    format!(
                        "Function \"{}\" accepts address parameter without zero address validation",
                        function.name
                    ),
                    function.location.clone(),
                )
            })
            .collect())
    })
}
