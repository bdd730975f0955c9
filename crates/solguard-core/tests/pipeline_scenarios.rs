use std::{fs, path::PathBuf};

use solguard_core::report::{self, ReportInput};
use solguard_core::{
    from_json, to_json, to_markdown, AuditError, AuditOptions, AuditReport, Auditor,
    CodeLocation, DeploymentRecommendation, Severity, Vulnerability,
};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn fixture(name: &str) -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name);
    fs::read_to_string(&path)
        .unwrap_or_else(|err| panic!("failed to read fixture {}: {err}", path.display()))
}

async fn audit_fixture(name: &str, contract: &str) -> AuditReport {
    init_tracing();
    let auditor = Auditor::builtin().expect("built-in catalogue");
    auditor
        .audit(&fixture(name), contract, &AuditOptions::pattern_only())
        .await
        .unwrap_or_else(|err| panic!("audit failed for fixture {name}: {err}"))
}

fn findings<'a>(report: &'a AuditReport, id: &str) -> Vec<&'a Vulnerability> {
    report
        .vulnerabilities
        .iter()
        .filter(|finding| finding.id == id)
        .collect()
}

#[tokio::test(flavor = "current_thread")]
async fn unguarded_withdraw_is_reentrant_and_unchecked() {
    let report = audit_fixture("reentrant_vault.sol", "Vault").await;

    let reentrancy = findings(&report, "RE-01");
    assert_eq!(reentrancy.len(), 1);
    assert_eq!(reentrancy[0].severity, Severity::Critical);
    assert_eq!(reentrancy[0].location.function_name.as_deref(), Some("withdraw"));

    let unchecked = findings(&report, "UR-01");
    assert_eq!(unchecked.len(), 1);
    assert_eq!(unchecked[0].severity, Severity::Critical);
    assert_eq!(unchecked[0].location.line, 12);

    assert_eq!(
        report.executive_summary.deployment_recommendation,
        DeploymentRecommendation::DoNotDeploy
    );
    assert_eq!(report.executive_summary.critical_count, 2);
    assert!(report
        .executive_summary
        .top_concerns
        .iter()
        .any(|name| name == "Reentrancy Vulnerability"));
}

#[tokio::test(flavor = "current_thread")]
async fn unprotected_set_owner_lacks_access_control_and_zero_check() {
    let report = audit_fixture("owned.sol", "Owned").await;

    let access = findings(&report, "AC-01");
    assert_eq!(access.len(), 1);
    assert_eq!(access[0].severity, Severity::High);
    assert_eq!(access[0].location.function_name.as_deref(), Some("setOwner"));

    let zero = findings(&report, "ZA-01");
    assert_eq!(zero.len(), 1);
    assert_eq!(zero[0].severity, Severity::Low);
    assert_eq!(zero[0].location.function_name.as_deref(), Some("setOwner"));

    assert_eq!(
        report.executive_summary.deployment_recommendation,
        DeploymentRecommendation::Review
    );
}

#[test]
fn clean_contract_is_safe() {
    let report = futures::executor::block_on(audit_fixture("counter.sol", "Counter"));
    assert!(report.vulnerabilities.is_empty(), "{:?}", report.vulnerabilities);
    assert_eq!(report.executive_summary.overall_risk_score, 1.0);
    assert_eq!(
        report.executive_summary.deployment_recommendation,
        DeploymentRecommendation::Safe
    );
    assert!(report.risk_assessment.category_breakdown.is_empty());
}

fn finding(id: &str, severity: Severity) -> Vulnerability {
    Vulnerability {
        id: id.into(),
        name: format!("{id} finding"),
        severity,
        description: String::new(),
        location: CodeLocation::new("contract.sol", 1, 0),
        technical_explanation: String::new(),
        exploit_scenario: String::new(),
        recommendation: String::new(),
        code_snippet: String::new(),
        references: Vec::new(),
        confidence: 0.9,
    }
}

#[test]
fn critical_and_high_score_four_and_a_half_but_block_deployment() {
    let findings = vec![finding("AC-01", Severity::High), finding("RE-01", Severity::Critical)];
    let score = solguard_core::risk::score(&findings);
    assert_eq!(score, 4.5);

    let report = report::synthesize(ReportInput {
        contract_name: "Scenario".into(),
        source_code: String::new(),
        findings,
        risk_score: score,
        summary: "pattern-based".into(),
        gas_optimizations: Vec::new(),
        best_practices: Vec::new(),
        ai_model: None,
        analysis_time_ms: 3,
    });
    assert_eq!(
        report.executive_summary.deployment_recommendation,
        DeploymentRecommendation::DoNotDeploy
    );
    assert_eq!(report.vulnerabilities[0].id, "RE-01");
    assert_eq!(report.executive_summary.top_concerns, vec!["AC-01 finding", "RE-01 finding"]);
}

#[tokio::test(flavor = "current_thread")]
async fn legacy_token_exports_round_trip() {
    let report = audit_fixture("legacy_token.sol", "LegacyToken").await;

    for id in ["IO-01", "TX-01", "SD-01", "AC-01", "FP-01"] {
        assert!(!findings(&report, id).is_empty(), "expected {id}");
    }
    assert_ne!(
        report.executive_summary.deployment_recommendation,
        DeploymentRecommendation::Safe
    );
    let positions: Vec<_> = report.vulnerabilities.iter().map(|v| v.severity).collect();
    let mut sorted = positions.clone();
    sorted.sort();
    assert_eq!(positions, sorted);

    let json = to_json(&report).expect("serializes");
    let restored = from_json(&json).expect("deserializes");
    assert_eq!(restored, report);

    let markdown = to_markdown(&report).expect("renders");
    assert!(markdown.contains("LegacyToken"));
    assert!(markdown.contains("Unprotected Selfdestruct"));
}

#[tokio::test(flavor = "current_thread")]
async fn unparseable_source_aborts_the_audit() {
    let auditor = Auditor::builtin().unwrap();
    auditor
        .audit(&fixture("counter.sol"), "Counter", &AuditOptions::default())
        .await
        .expect("well-formed contract audits with the same auditor");
    let err = auditor
        .audit("}}} not a contract", "Broken", &AuditOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AuditError::FatalParse { .. }));
    assert!(err.to_string().starts_with("failed to parse contract source"));
}
