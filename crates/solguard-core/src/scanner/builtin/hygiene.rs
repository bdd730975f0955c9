use super::{is_sentinel_name, FindingTemplate, RuleDef, SolidityVersion};
use crate::metadata::{ContractMetadata, StateVariable};
use crate::model::{CodeLocation, Severity};
use crate::scanner::{Rule, RuleValidationError};

const SLOT_BYTES: u32 = 32;

const INTEGER_OVERFLOW: RuleDef = RuleDef {
    id: "IO-01",
    name: "Integer Overflow/Underflow",
    severity: Severity::High,
    description: "Arithmetic operations without SafeMath in Solidity < 0.8.0",
    recommendation: "Use Solidity 0.8.0+ or SafeMath library",
    references: &["SWC-101", "CWE-190", "CWE-191"],
    confidence: 0.70,
};

const INTEGER_OVERFLOW_FINDING: FindingTemplate = FindingTemplate {
    id: "IO-01",
    name: "Potential Integer Overflow/Underflow",
    severity: Severity::High,
    technical_explanation: "Solidity versions prior to 0.8.0 do not automatically check for integer overflow and underflow. Unchecked arithmetic can wrap around, leading to unexpected behavior.",
    exploit_scenario: "An attacker could manipulate arithmetic operations to overflow/underflow values, potentially bypassing balance checks or manipulating token supplies.",
    recommendation: "Upgrade to Solidity 0.8.0+ which has built-in overflow/underflow checking, or use SafeMath library for older versions.",
    code_snippet: "// Vulnerable (Solidity < 0.8.0):\nuint256 balance = 0;\nbalance = balance - 1; // underflows to max uint256\n\n// Fixed (Solidity >= 0.8.0):\n// Automatically reverts on overflow/underflow\n\n// Or use SafeMath:\nusing SafeMath for uint256;\nbalance = balance.sub(1); // safely reverts",
    references: &[
        "SWC-101: Integer Overflow and Underflow",
        "CWE-190: Integer Overflow",
        "CWE-191: Integer Underflow",
    ],
    confidence: 0.70,
};

/// IO-01: once per contract when the pragma admits a compiler without checked arithmetic.
pub(super) fn integer_overflow() -> Result<Rule, RuleValidationError> {
    INTEGER_OVERFLOW.structural(|unit, contract| {
        let Some(pragma) = unit.solidity_pragma() else {
            return Ok(Vec::new());
        };
        let Some(lowest) = SolidityVersion::lowest_admitted(&pragma.value) else {
            return Ok(Vec::new());
        };
        if lowest.has_checked_arithmetic() {
            return Ok(Vec::new());
        }
        let location = CodeLocation::new(
            contract.location.file.clone(),
            pragma.pos.line,
            pragma.pos.column,
        )
        .in_contract(contract.name.as_str());
        Ok(vec![INTEGER_OVERFLOW_FINDING.finding(
            format!(
                "Contract \"{}\" may compile with Solidity {lowest}, where arithmetic operations can overflow/underflow",
                contract.name
            ),
            location,
        )])
    })
}

const UNUSED_VARIABLE: RuleDef = RuleDef {
    id: "UV-01",
    name: "Unused Variables",
    severity: Severity::Low,
    description: "Declared variables that are never used",
    recommendation: "Remove unused variables or prefix with underscore",
    references: &["Code Quality"],
    confidence: 0.60,
};

const UNUSED_VARIABLE_FINDING: FindingTemplate = FindingTemplate {
    id: "UV-01",
    name: "Unused Variables",
    severity: Severity::Low,
    technical_explanation: "A state variable that no function, modifier or initializer of the contract reads or writes occupies storage and adds deployment cost without affecting behavior.",
    exploit_scenario: "Not directly exploitable, but unused state often signals incomplete logic, such as a flag that was meant to be checked.",
    recommendation: "Remove unused variables or prefix with underscore",
    code_snippet: "",
    references: &["Code Quality"],
    confidence: 0.60,
};

fn is_unused(variable: &StateVariable, contract: &ContractMetadata) -> bool {
    !variable.constant
        && variable.visibility != "public"
        && !variable.name.starts_with('_')
        && !contract.referenced_identifiers.contains(&variable.name)
}

/// UV-01: non-public, non-constant state variables the contract never references.
pub(super) fn unused_variable() -> Result<Rule, RuleValidationError> {
    UNUSED_VARIABLE.structural(|_, contract| {
        Ok(contract
            .state_variables
            .iter()
            .filter(|variable| is_unused(variable, contract))
            .map(|variable| {
                let mut finding = UNUSED_VARIABLE_FINDING.finding(
                    format!("State variable \"{}\" is never used", variable.name),
                    variable.location.clone(),
                );
                finding.code_snippet = format!(
                    "{} {} {};",
                    variable.type_name, variable.visibility, variable.name
                );
                finding
            })
            .collect())
    })
}

const MISSING_EVENT: RuleDef = RuleDef {
    id: "EM-01",
    name: "Missing Event Emission",
    severity: Severity::Low,
    description: "State-changing functions should emit events",
    recommendation: "Emit events for all state changes",
    references: &["Best Practice"],
    confidence: 0.50,
};

const MISSING_EVENT_FINDING: FindingTemplate = FindingTemplate {
    id: "EM-01",
    name: "Missing Event Emission",
    severity: Severity::Low,
    technical_explanation: "Functions that modify state should emit events for off-chain tracking and transparency.",
    exploit_scenario: "State changes without events make it difficult to track contract behavior and audit trails.",
    recommendation: "Add event emission for all significant state changes.",
    code_snippet: "",
    references: &["Best Practice"],
    confidence: 0.50,
};

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// EM-01: state-mutating function with a body and no `emit`.
pub(super) fn missing_event() -> Result<Rule, RuleValidationError> {
    MISSING_EVENT.structural(|_, contract| {
        Ok(contract
            .functions
            .iter()
            .filter(|function| {
                !function.is_read_only()
                    && function.has_body
                    && function.emitted_events.is_empty()
                    && !function.name.starts_with('_')
                    && !is_sentinel_name(&function.name)
            })
            .map(|function| {
                let mut finding = MISSING_EVENT_FINDING.finding(
                    format!(
                        "Function \"{}\" modifies state but may not emit events",
                        function.name
                    ),
                    function.location.clone(),
                );
                finding.code_snippet = format!("event {}(...);", capitalize(&function.name));
                finding
            })
            .collect())
    })
}

const STORAGE_PACKING: RuleDef = RuleDef {
    id: "SP-01",
    name: "Inefficient Storage Packing",
    severity: Severity::Info,
    description: "Storage variables could be better packed to save gas",
    recommendation: "Reorder state variables to optimize storage slots",
    references: &["Gas Optimization"],
    confidence: 0.60,
};

const STORAGE_PACKING_FINDING: FindingTemplate = FindingTemplate {
    id: "SP-01",
    name: "Inefficient Storage Packing",
    severity: Severity::Info,
    technical_explanation: "The EVM stores state in 32-byte slots and packs consecutive variables smaller than a slot together. Declaration order decides which variables share a slot, so interleaving small and full-width types wastes slots.",
    exploit_scenario: "Not a security issue, but every additional slot costs gas on first write and on each cold read.",
    recommendation: "Reorder state variables to optimize storage slots",
    code_snippet: "// Before: 3 slots\nuint128 a;\nuint256 b;\nuint128 c;\n\n// After: 2 slots\nuint128 a;\nuint128 c;\nuint256 b;",
    references: &["Gas Optimization"],
    confidence: 0.60,
};

/// Bytes a value of this type occupies in storage; anything not packable takes a full slot.
fn storage_size(type_name: &str) -> u32 {
    let sized = |prefix: &str, divisor: u32| {
        type_name
            .strip_prefix(prefix)
            .and_then(|bits| bits.parse::<u32>().ok())
            .map(|n| n / divisor)
            .filter(|size| (1..=SLOT_BYTES).contains(size))
    };
    match type_name {
        "bool" => 1,
        "address" | "address payable" => 20,
        _ => sized("uint", 8)
            .or_else(|| sized("int", 8))
            .or_else(|| sized("bytes", 1))
            .unwrap_or(SLOT_BYTES),
    }
}

fn slots_in_order(sizes: &[u32]) -> usize {
    let mut slots = 0;
    let mut free = 0;
    for &size in sizes {
        if size > free {
            slots += 1;
            free = SLOT_BYTES;
        }
        free -= size;
    }
    slots
}

fn slots_first_fit_decreasing(sizes: &[u32]) -> usize {
    let mut sorted = sizes.to_vec();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    let mut free: Vec<u32> = Vec::new();
    for size in sorted {
        match free.iter_mut().find(|remaining| **remaining >= size) {
            Some(remaining) => *remaining -= size,
            None => free.push(SLOT_BYTES - size),
        }
    }
    free.len()
}

/// SP-01: declared order uses more slots than first-fit-decreasing packing would.
pub(super) fn storage_packing() -> Result<Rule, RuleValidationError> {
    STORAGE_PACKING.structural(|_, contract| {
        let sizes: Vec<u32> = contract
            .state_variables
            .iter()
            .filter(|variable| !variable.constant)
            .map(|variable| storage_size(&variable.type_name))
            .collect();
        let declared = slots_in_order(&sizes);
        let packed = slots_first_fit_decreasing(&sizes);
        if declared <= packed {
            return Ok(Vec::new());
        }
        Ok(vec![STORAGE_PACKING_FINDING.finding(
            format!(
                "Contract \"{}\" uses {declared} storage slots; reordering state variables could use {packed}",
                contract.name
            ),
            contract.location.clone(),
        )])
    })
}

const PUBLIC_TO_EXTERNAL: RuleDef = RuleDef {
    id: "PE-01",
    name: "Public Functions Could Be External",
    severity: Severity::Info,
    description: "Public functions not called internally should be external for gas savings",
    recommendation: "Change public to external for gas optimization",
    references: &["Gas Optimization"],
    confidence: 0.50,
};

const PUBLIC_TO_EXTERNAL_FINDING: FindingTemplate = FindingTemplate {
    id: "PE-01",
    name: "Public Function Could Be External",
    severity: Severity::Info,
    technical_explanation: "Functions that are not called internally can be marked as external instead of public, saving gas.",
    exploit_scenario: "Not a security issue, but wastes gas unnecessarily.",
    recommendation: "Change visibility from public to external if the function is not called internally.",
    code_snippet: "",
    references: &["Gas Optimization"],
    confidence: 0.50,
};

/// PE-01: public function that nothing in the contract calls by name.
pub(super) fn public_to_external() -> Result<Rule, RuleValidationError> {
    PUBLIC_TO_EXTERNAL.structural(|_, contract| {
        Ok(contract
            .functions
            .iter()
            .filter(|function| {
                function.visibility == "public"
                    && !function.name.starts_with('_')
                    && !is_sentinel_name(&function.name)
                    && !contract.internal_calls.contains(&function.name)
            })
            .map(|function| {
                let name = &function.name;
                let mut finding = PUBLIC_TO_EXTERNAL_FINDING.finding(
                    format!("Function \"{name}\" is public but could be external"),
                    function.location.clone(),
                );
                finding.code_snippet = format!(
                    "// Before:\nfunction {name}() public {{ }}\n\n// After:\nfunction {name}() external {{ }}"
                );
                finding
            })
            .collect())
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::findings_for;
    use super::*;

    #[test]
    fn integer_overflow_depends_on_lowest_admitted_version() {
        let legacy = "pragma solidity >=0.6.0 <0.9.0;\ncontract A {}\ncontract B {}\n";
        let findings = findings_for(legacy, "IO-01");
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].location.line, 1);
        assert_eq!(findings[1].location.contract_name.as_deref(), Some("B"));
        assert!(findings[0].description.contains("0.6.0"));

        assert!(findings_for("pragma solidity ^0.8.4;\ncontract A {}\n", "IO-01").is_empty());
        assert!(findings_for("contract A {}\n", "IO-01").is_empty());
    }

    #[test]
    fn unused_variable_skips_public_constant_and_referenced() {
        let source = r#"
contract Store {
    uint256 private stale;
    uint256 public exposed;
    uint256 constant LIMIT = 10;
    uint256 internal _reserved;
    uint256 counter;
    function bump() public { counter += 1; }
}
"#;
        let findings = findings_for(source, "UV-01");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].description, "State variable \"stale\" is never used");
        assert_eq!(findings[0].code_snippet, "uint256 private stale;");
    }

    #[test]
    fn missing_event_skips_views_emitters_and_helpers() {
        let source = r#"
contract Token {
    event Minted(uint256 amount);
    uint256 supply;
    function mint(uint256 amount) public { supply += amount; emit Minted(amount); }
    function burn(uint256 amount) public { supply -= amount; }
    function total() public view returns (uint256) { return supply; }
    function _sync() internal { supply = 0; }
    constructor() { supply = 1; }
}
"#;
        let findings = findings_for(source, "EM-01");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].location.function_name.as_deref(), Some("burn"));
        assert_eq!(findings[0].code_snippet, "event Burn(...);");
    }

    #[test]
    fn public_to_external_skips_internally_called_functions() {
        let source = r#"
contract Router {
    function quote() public view returns (uint256) { return 1; }
    function swap() public { quote(); }
    function route() external {}
}
"#;
        let findings = findings_for(source, "PE-01");
        let names: Vec<_> = findings
            .iter()
            .filter_map(|f| f.location.function_name.as_deref())
            .collect();
        assert_eq!(names, vec!["swap"]);
        assert!(findings[0].code_snippet.contains("function swap() external"));
    }

    #[test]
    fn storage_sizes_follow_elementary_types() {
        assert_eq!(storage_size("bool"), 1);
        assert_eq!(storage_size("uint8"), 1);
        assert_eq!(storage_size("int128"), 16);
        assert_eq!(storage_size("address payable"), 20);
        assert_eq!(storage_size("bytes4"), 4);
        assert_eq!(storage_size("bytes"), 32);
        assert_eq!(storage_size("uint"), 32);
        assert_eq!(storage_size("mapping(address => uint256)"), 32);
    }

    #[test]
    fn slot_counting_compares_declared_and_packed_order() {
        assert_eq!(slots_in_order(&[16, 32, 16]), 3);
        assert_eq!(slots_first_fit_decreasing(&[16, 32, 16]), 2);
        assert_eq!(slots_in_order(&[20, 1, 1, 32]), 2);
        assert_eq!(slots_first_fit_decreasing(&[20, 1, 1, 32]), 2);
        assert_eq!(slots_in_order(&[]), 0);
    }

    #[test]
    fn storage_packing_reports_wasteful_layouts_once() {
        let wasteful = r#"
contract Layout {
    uint128 a;
    uint256 b;
    uint128 c;
}
"#;
        let findings = findings_for(wasteful, "SP-01");
        assert_eq!(findings.len(), 1);
        assert_eq!(
            findings[0].description,
            "Contract \"Layout\" uses 3 storage slots; reordering state variables could use 2"
        );

        let tight = "contract Tight { uint128 a; uint128 c; uint256 b; }\n";
        assert!(findings_for(tight, "SP-01").is_empty());
    }
}
