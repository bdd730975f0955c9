use super::{FindingTemplate, RuleDef};
use crate::metadata::ExternalCallKind;
use crate::model::Severity;
use crate::scanner::{Rule, RuleValidationError};

const REENTRANCY_GUARD: &str = "nonReentrant";

const REENTRANCY: RuleDef = RuleDef {
    id: "RE-01",
    name: "Reentrancy Vulnerability",
    severity: Severity::Critical,
    description: "External calls followed by state changes can lead to reentrancy attacks",
    recommendation: "Implement checks-effects-interactions pattern or use ReentrancyGuard",
    references: &["SWC-107", "CWE-841"],
    confidence: 0.85,
};

const REENTRANCY_FINDING: FindingTemplate = FindingTemplate {
    id: "RE-01",
    name: "Reentrancy Vulnerability",
    severity: Severity::Critical,
    technical_explanation: "External calls using .call{value:}() can allow malicious contracts to reenter the function before state changes are finalized, potentially draining funds.",
    exploit_scenario: "An attacker creates a malicious contract with a fallback function that calls back into this function, withdrawing funds multiple times before the balance is updated.",
    recommendation: "Use the checks-effects-interactions pattern: perform all state changes before making external calls, or use a ReentrancyGuard modifier.",
    code_snippet: "// Vulnerable:\nfunction withdraw() public {\n  (bool success, ) = msg.sender.call{value: balance}(\"\");\n  balance = 0; // State change after external call\n}\n\n// Fixed:\nfunction withdraw() public nonReentrant {\n  uint amount = balance;\n  balance = 0; // State change before external call\n  (bool success, ) = msg.sender.call{value: amount}(\"\");\n}",
    references: &[
        "CWE-841: Improper Enforcement of Behavioral Workflow",
        "SWC-107: Reentrancy",
        "The DAO Hack (2016)",
    ],
    confidence: 0.85,
};

/// RE-01: a function issuing `.call` without the `nonReentrant` guard.
pub(super) fn reentrancy() -> Result<Rule, RuleValidationError> {
    REENTRANCY.structural(|_, contract| {
        Ok(contract
            .functions
            .iter()
            .filter(|function| {
                contract
                    .calls_in(&function.name)
                    .any(|call| call.kind == ExternalCallKind::Call)
                    && !function.has_modifier(REENTRANCY_GUARD)
            })
            .map(|function| {
                REENTRANCY_FINDING.finding(
                    format!(
                        "Function \"{}\" makes external calls without reentrancy protection",
                        function.name
                    ),
                    function.location.clone(),
                )
            })
            .collect())
    })
}

const UNCHECKED_CALL: RuleDef = RuleDef {
    id: "UR-01",
    name: "Unchecked Low-Level Call",
    severity: Severity::Critical,
    description: "Low-level calls without return value checks can fail silently",
    recommendation: "Always verify return values from low-level calls",
    references: &["SWC-104", "CWE-252"],
    confidence: 0.95,
};

const UNCHECKED_CALL_FINDING: FindingTemplate = FindingTemplate {
    id: "UR-01",
    name: "Unchecked Low-Level Call",
    severity: Severity::Critical,
    technical_explanation: "",
    exploit_scenario: "An attacker could force the external call to fail (e.g., by consuming all gas), but the contract continues assuming the call succeeded, potentially leading to incorrect state or loss of funds.",
    recommendation: "Always check the return value: require(success, \"Call failed\"); or use if-statement to handle failure.",
    code_snippet: "// Vulnerable:\n(bool success, ) = target.call(data);\n// continues without checking success\n\n// Fixed:\n(bool success, ) = target.call(data);\nrequire(success, \"Call failed\");",
    references: &[
        "SWC-104: Unchecked Call Return Value",
        "CWE-252: Unchecked Return Value",
    ],
    confidence: 0.95,
};

/// UR-01: `call`, `delegatecall` or `send` whose status is never tested.
pub(super) fn unchecked_call() -> Result<Rule, RuleValidationError> {
    UNCHECKED_CALL.structural(|_, contract| {
        Ok(contract
            .external_calls
            .iter()
            .filter(|call| call.kind.returns_status() && !call.checked)
            .map(|call| {
                let kind = call.kind.as_str();
                let mut finding = UNCHECKED_CALL_FINDING.finding(
                    format!("Unchecked {kind}() return value"),
                    call.location.clone(),
                );
                finding.technical_explanation = format!(
                    "The {kind}() function returns a boolean indicating success or failure. Not checking this return value means the contract will continue execution even if the call failed."
                );
                finding
            })
            .collect())
    })
}

const DELEGATECALL: RuleDef = RuleDef {
    id: "DC-01",
    name: "Delegatecall to Untrusted Address",
    severity: Severity::Critical,
    description: "Delegatecall to user-controlled addresses can lead to complete contract takeover",
    recommendation: "Whitelist approved contracts and restrict delegatecall usage",
    references: &["SWC-112"],
    confidence: 0.90,
};

const DELEGATECALL_FINDING: FindingTemplate = FindingTemplate {
    id: "DC-01",
    name: "Delegatecall to Untrusted Address",
    severity: Severity::Critical,
    technical_explanation: "Delegatecall executes code from another contract in the context of the calling contract, preserving msg.sender and storage. If the target is malicious or user-controlled, it can completely take over the contract.",
    exploit_scenario: "An attacker provides a malicious contract address that, when called via delegatecall, overwrites critical storage slots like the owner address, draining funds or destroying the contract.",
    recommendation: "Only use delegatecall with trusted, whitelisted contract addresses. Implement strict access controls and validate target addresses.",
    code_snippet: "// Vulnerable:\nfunction execute(address target, bytes memory data) public {\n  target.delegatecall(data); // target is user-controlled!\n}\n\n// Fixed:\nmapping(address => bool) public trustedTargets;\n\nfunction execute(address target, bytes memory data) public onlyOwner {\n  require(trustedTargets[target], \"Untrusted target\");\n  target.delegatecall(data);\n}",
    references: &[
        "SWC-112: Delegatecall to Untrusted Callee",
        "Parity Wallet Hack (2017)",
    ],
    confidence: 0.90,
};

/// DC-01: every delegatecall, since target trust cannot be decided statically.
pub(super) fn delegatecall() -> Result<Rule, RuleValidationError> {
    DELEGATECALL.structural(|_, contract| {
        Ok(contract
            .external_calls
            .iter()
            .filter(|call| call.kind == ExternalCallKind::Delegatecall)
            .map(|call| {
                DELEGATECALL_FINDING.finding(
                    "Delegatecall usage detected - verify target address is trusted".to_string(),
                    call.location.clone(),
                )
            })
            .collect())
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::findings_for;

    #[test]
    fn reentrancy_flags_unguarded_value_call() {
        let source = r#"
contract Bank {
    uint256 balance;
    function withdraw() public {
        (bool ok, ) = msg.sender.call{value: balance}("");
        balance = 0;
    }
    function safeWithdraw() public nonReentrant {
        (bool ok, ) = msg.sender.call{value: balance}("");
        require(ok);
    }
}
"#;
        let findings = findings_for(source, "RE-01");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].location.function_name.as_deref(), Some("withdraw"));
        assert_eq!(
            findings[0].description,
            "Function \"withdraw\" makes external calls without reentrancy protection"
        );
        assert!((findings[0].confidence - 0.85).abs() < f32::EPSILON);
    }

    #[test]
    fn reentrancy_ignores_transfer_and_send() {
        let source = r#"
contract Payout {
    function pay(address payable to) public {
        to.transfer(1);
        require(to.send(1));
    }
}
"#;
        assert!(findings_for(source, "RE-01").is_empty());
    }

    #[test]
    fn unchecked_call_reports_each_unchecked_site() {
        let source = r#"
contract Relay {
    function relay(address target, bytes memory data) public {
        target.call(data);
        (bool ok, ) = target.call(data);
        require(ok, "failed");
        payable(target).transfer(1);
    }
}
"#;
        let findings = findings_for(source, "UR-01");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].description, "Unchecked call() return value");
        assert_eq!(findings[0].location.line, 4);
        assert!(findings[0].technical_explanation.starts_with("The call() function"));
    }

    #[test]
    fn delegatecall_is_always_reported() {
        let source = r#"
contract Proxy {
    function forward(address impl, bytes memory data) public {
        (bool ok, ) = impl.delegatecall(data);
        require(ok);
    }
}
"#;
        let delegate = findings_for(source, "DC-01");
        assert_eq!(delegate.len(), 1);
        assert_eq!(delegate[0].location.function_name.as_deref(), Some("forward"));
        assert!(findings_for(source, "UR-01").is_empty());
    }
}
