//! Reconciles rule findings with the semantic analysis result.

use std::collections::HashSet;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::SemanticAnalysisError;
use crate::llm::{AiFinding, SemanticAnalysis};
use crate::model::{Severity, Vulnerability};
use crate::report::{BestPractice, GasOptimization};
use crate::risk;

pub const SKIPPED_SUMMARY: &str =
    "Semantic analysis skipped; risk score derived from pattern-based findings only.";
pub const UNAVAILABLE_SUMMARY: &str = "Semantic analysis unavailable";
const UNAVAILABLE_RISK_SCORE: f64 = 5.0;
const AI_CONFIDENCE: f32 = 0.7;
const AI_REFERENCE: &str = "AI Analysis";

/// What the semantic stage produced for one audit.
#[derive(Debug)]
pub enum SemanticOutcome {
    /// Disabled by the caller or no analyzer configured.
    Skipped,
    /// The call failed, timed out or returned malformed data.
    Failed(SemanticAnalysisError),
    Completed(SemanticAnalysis),
}

/// Findings and report inputs after merging.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedFindings {
    pub findings: Vec<Vulnerability>,
    pub risk_score: f64,
    pub summary: String,
    pub gas_optimizations: Vec<GasOptimization>,
    pub best_practices: Vec<BestPractice>,
    pub ai_model: Option<String>,
}

/// Merge `pattern_findings` with `outcome`.
///
/// Model findings are appended after the rule findings with fresh `AI-` ids,
/// then every finding whose id the model listed as a false positive is
/// dropped. Confirmed ids do not change the output.
pub fn merge(
    pattern_findings: Vec<Vulnerability>,
    outcome: SemanticOutcome,
    file: &str,
) -> MergedFindings {
    match outcome {
        SemanticOutcome::Skipped => MergedFindings {
            risk_score: risk::score(&pattern_findings),
            findings: pattern_findings,
            summary: SKIPPED_SUMMARY.to_string(),
            gas_optimizations: Vec::new(),
            best_practices: Vec::new(),
            ai_model: None,
        },
        SemanticOutcome::Failed(err) => {
            warn!(error = %err, "semantic analysis failed; continuing with pattern-based findings");
            MergedFindings {
                findings: pattern_findings,
                risk_score: UNAVAILABLE_RISK_SCORE,
                summary: UNAVAILABLE_SUMMARY.to_string(),
                gas_optimizations: Vec::new(),
                best_practices: Vec::new(),
                ai_model: None,
            }
        }
        SemanticOutcome::Completed(analysis) => merge_analysis(pattern_findings, analysis, file),
    }
}

fn merge_analysis(
    mut findings: Vec<Vulnerability>,
    analysis: SemanticAnalysis,
    file: &str,
) -> MergedFindings {
    let added_before = findings.len();
    findings.extend(
        analysis
            .additional_findings
            .into_iter()
            .filter_map(|finding| ai_vulnerability(finding, file)),
    );
    let added = findings.len() - added_before;

    let false_positives: HashSet<&str> =
        analysis.false_positive_ids.iter().map(String::as_str).collect();
    let before_filter = findings.len();
    findings.retain(|finding| !false_positives.contains(finding.id.as_str()));

    debug!(
        added,
        removed = before_filter - findings.len(),
        validated = analysis.validated_ids.len(),
        "merged semantic analysis"
    );

    MergedFindings {
        findings,
        risk_score: risk::clamp(analysis.risk_score),
        summary: analysis.summary,
        gas_optimizations: analysis.gas_optimizations,
        best_practices: analysis.best_practices,
        ai_model: analysis.model,
    }
}

fn ai_vulnerability(finding: AiFinding, file: &str) -> Option<Vulnerability> {
    let Some(severity) = Severity::parse(&finding.severity) else {
        warn!(severity = %finding.severity, "skipping model finding with unknown severity");
        return None;
    };
    let mut location = finding.location;
    if location.file.is_empty() {
        location.file = file.to_string();
    }
    Some(Vulnerability {
        id: ai_finding_id(),
        name: finding.description.clone(),
        severity,
        technical_explanation: finding.description.clone(),
        description: finding.description,
        location,
        exploit_scenario: finding.recommendation.clone(),
        recommendation: finding.recommendation,
        code_snippet: String::new(),
        references: vec![AI_REFERENCE.to_string()],
        confidence: AI_CONFIDENCE,
    })
}

fn ai_finding_id() -> String {
    let random: String = Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(9)
        .collect();
    format!("AI-{random}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CodeLocation;
    use proptest::prelude::*;

    fn finding(id: &str, severity: Severity) -> Vulnerability {
        Vulnerability {
            id: id.into(),
            name: id.into(),
            severity,
            description: String::new(),
            location: CodeLocation::new("Vault.sol", 3, 4),
            technical_explanation: String::new(),
            exploit_scenario: String::new(),
            recommendation: String::new(),
            code_snippet: String::new(),
            references: Vec::new(),
            confidence: 0.8,
        }
    }

    fn analysis() -> SemanticAnalysis {
        SemanticAnalysis {
            risk_score: 6.0,
            summary: "Owner can drain funds".into(),
            additional_findings: Vec::new(),
            validated_ids: Vec::new(),
            false_positive_ids: Vec::new(),
            gas_optimizations: Vec::new(),
            best_practices: Vec::new(),
            model: Some("gpt-test".into()),
        }
    }

    fn ai_finding(severity: &str) -> AiFinding {
        AiFinding {
            description: "Oracle price can be manipulated".into(),
            severity: severity.into(),
            location: CodeLocation::new("Vault.sol", 12, 0),
            recommendation: "Use a time-weighted price".into(),
        }
    }

    #[test]
    fn skipped_uses_risk_scorer() {
        let findings = vec![finding("RE-01", Severity::Critical), finding("AC-01", Severity::High)];
        let merged = merge(findings.clone(), SemanticOutcome::Skipped, "Vault.sol");
        assert_eq!(merged.findings, findings);
        assert_eq!(merged.risk_score, 4.5);
        assert_eq!(merged.summary, SKIPPED_SUMMARY);
        assert!(merged.ai_model.is_none());
    }

    #[test]
    fn failure_falls_back_to_midpoint() {
        let findings = vec![finding("TD-01", Severity::Medium)];
        let merged = merge(
            findings.clone(),
            SemanticOutcome::Failed(SemanticAnalysisError::Malformed("not json".into())),
            "Vault.sol",
        );
        assert_eq!(merged.findings, findings);
        assert_eq!(merged.risk_score, 5.0);
        assert_eq!(merged.summary, UNAVAILABLE_SUMMARY);
        assert!(merged.gas_optimizations.is_empty());
        assert!(merged.best_practices.is_empty());
    }

    #[test]
    fn appends_ai_findings_and_removes_false_positives() {
        let findings = vec![
            finding("RE-01", Severity::Critical),
            finding("TD-01", Severity::Medium),
            finding("TD-01", Severity::Medium),
        ];
        let mut analysis = analysis();
        analysis.additional_findings = vec![ai_finding("high"), ai_finding("catastrophic")];
        analysis.false_positive_ids = vec!["TD-01".into()];
        analysis.validated_ids = vec!["RE-01".into()];

        let merged = merge(findings, SemanticOutcome::Completed(analysis), "Vault.sol");
        assert_eq!(merged.findings.len(), 2);
        assert_eq!(merged.findings[0].id, "RE-01");

        let ai = &merged.findings[1];
        assert!(ai.id.starts_with("AI-"));
        assert_eq!(ai.id.len(), 12);
        assert_eq!(ai.severity, Severity::High);
        assert_eq!(ai.name, "Oracle price can be manipulated");
        assert_eq!(ai.recommendation, "Use a time-weighted price");
        assert_eq!(ai.references, vec!["AI Analysis"]);
        assert_eq!(ai.location.line, 12);
        assert!((ai.confidence - 0.7).abs() < f32::EPSILON);

        assert_eq!(merged.risk_score, 6.0);
        assert_eq!(merged.summary, "Owner can drain funds");
        assert_eq!(merged.ai_model.as_deref(), Some("gpt-test"));
    }

    #[test]
    fn ai_ids_are_unique() {
        let mut analysis = analysis();
        analysis.additional_findings = vec![ai_finding("LOW"), ai_finding("LOW")];
        let merged = merge(Vec::new(), SemanticOutcome::Completed(analysis), "Vault.sol");
        assert_ne!(merged.findings[0].id, merged.findings[1].id);
    }

    fn severity() -> impl Strategy<Value = Severity> {
        prop::sample::select(Severity::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn empty_analysis_leaves_findings_untouched(
            entries in prop::collection::vec(("[A-Z]{2}-0[1-9]", severity()), 0..20)
        ) {
            let findings: Vec<_> = entries
                .iter()
                .map(|(id, severity)| finding(id, *severity))
                .collect();
            let merged = merge(findings.clone(), SemanticOutcome::Completed(analysis()), "Vault.sol");
            prop_assert_eq!(merged.findings, findings);
        }
    }
}
