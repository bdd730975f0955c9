use std::path::PathBuf;

use insta::assert_json_snapshot;
use serde_json::json;
use solguard_core::{AuditOptions, Auditor, AuditorConfig, RuleRegistry, Severity};

fn rules_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../rules")
}

#[test]
fn builtin_catalogue_snapshot() {
    let registry = RuleRegistry::builtin().expect("built-in catalogue is valid");
    let catalogue: Vec<_> = registry
        .rules()
        .iter()
        .map(|rule| {
            json!({
                "id": rule.id,
                "kind": rule.matcher.kind(),
                "name": rule.name,
                "severity": rule.severity.as_str(),
            })
        })
        .collect();
    assert_json_snapshot!("builtin_catalogue", catalogue);
}

#[test]
fn catalogue_is_ordered_by_severity() {
    let registry = RuleRegistry::builtin().unwrap();
    let severities: Vec<Severity> = registry.rules().iter().map(|rule| rule.severity).collect();
    let mut sorted = severities.clone();
    sorted.sort();
    assert_eq!(severities, sorted);
    assert_eq!(registry.len(), 20);
}

#[tokio::test(flavor = "current_thread")]
async fn sample_rule_pack_extends_the_catalogue() {
    let config = AuditorConfig {
        rules_dir: Some(rules_dir()),
        ..AuditorConfig::default()
    };
    let auditor = Auditor::from_config(&config).await.expect("auditor builds");
    assert_eq!(auditor.registry().len(), 23);
    assert!(auditor.registry().get("ASM-01").is_some());

    let source = r#"pragma solidity 0.8.20;

contract Hasher {
    function digest(uint256 a) external pure returns (uint256 out) {
        assembly {
            out := add(a, 1)
        }
    }
}
"#;
    let report = auditor
        .audit(source, "Hasher", &AuditOptions::pattern_only())
        .await
        .expect("audit succeeds");
    let asm = report
        .vulnerabilities
        .iter()
        .find(|finding| finding.id == "ASM-01")
        .expect("inline assembly flagged");
    assert_eq!(asm.severity, Severity::Medium);
    assert_eq!(asm.location.line, 5);
}
