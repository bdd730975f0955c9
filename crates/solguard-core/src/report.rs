use std::collections::BTreeMap;
use std::fmt::{self, Write};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{CodeLocation, Severity, Vulnerability};

pub const ANALYSIS_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const RULES_VERSION: &str = "1.0.0";
const TOP_CONCERNS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentRecommendation {
    Safe,
    Review,
    DoNotDeploy,
}

impl DeploymentRecommendation {
    /// Decision table, first match wins: critical or score >= 8 blocks, high or score >= 5 needs review.
    pub fn decide(has_critical: bool, has_high: bool, risk_score: f64) -> Self {
        if has_critical || risk_score >= 8.0 {
            Self::DoNotDeploy
        } else if has_high || risk_score >= 5.0 {
            Self::Review
        } else {
            Self::Safe
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Safe => "SAFE",
            Self::Review => "REVIEW",
            Self::DoNotDeploy => "DO_NOT_DEPLOY",
        }
    }

    fn glyph(self) -> &'static str {
        match self {
            Self::Safe => "✅",
            Self::Review => "⚠️",
            Self::DoNotDeploy => "🚫",
        }
    }
}

impl fmt::Display for DeploymentRecommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Difficulty {
    Low,
    Medium,
    High,
}

impl Difficulty {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "LOW" => Some(Self::Low),
            "MEDIUM" => Some(Self::Medium),
            "HIGH" => Some(Self::High),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GasOptimization {
    pub description: String,
    pub location: CodeLocation,
    pub estimated_savings: String,
    pub difficulty: Difficulty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestPractice {
    pub description: String,
    pub location: CodeLocation,
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutiveSummary {
    pub total_vulnerabilities: usize,
    pub critical_count: usize,
    pub high_count: usize,
    pub medium_count: usize,
    pub low_count: usize,
    pub info_count: usize,
    pub overall_risk_score: f64,
    pub deployment_recommendation: DeploymentRecommendation,
    pub top_concerns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub overall_score: f64,
    /// Finding count per id prefix (`RE`, `AC`, `AI`, ...).
    pub category_breakdown: BTreeMap<String, usize>,
    /// Narrative from semantic analysis, or a note that it was skipped.
    pub historical_context: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub analysis_version: String,
    pub rules_version: String,
    pub ai_model: Option<String>,
    pub analysis_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub contract_name: String,
    pub source_code: String,
    pub executive_summary: ExecutiveSummary,
    pub vulnerabilities: Vec<Vulnerability>,
    pub gas_optimizations: Vec<GasOptimization>,
    pub best_practices: Vec<BestPractice>,
    pub risk_assessment: RiskAssessment,
    pub metadata: ReportMetadata,
}

/// Everything the synthesizer needs; findings are in registry/emission order.
#[derive(Debug, Clone)]
pub struct ReportInput {
    pub contract_name: String,
    pub source_code: String,
    pub findings: Vec<Vulnerability>,
    pub risk_score: f64,
    pub summary: String,
    pub gas_optimizations: Vec<GasOptimization>,
    pub best_practices: Vec<BestPractice>,
    pub ai_model: Option<String>,
    pub analysis_time_ms: u64,
}

/// Counts per severity, in `Severity::ALL` order.
pub fn severity_tally(findings: &[Vulnerability]) -> [usize; 5] {
    let mut counts = [0usize; 5];
    for finding in findings {
        counts[finding.severity as usize] += 1;
    }
    counts
}

pub fn top_concerns(findings: &[Vulnerability]) -> Vec<String> {
    findings
        .iter()
        .filter(|finding| finding.severity.is_blocking())
        .take(TOP_CONCERNS)
        .map(|finding| finding.name.clone())
        .collect()
}

pub fn category_breakdown(findings: &[Vulnerability]) -> BTreeMap<String, usize> {
    let mut breakdown = BTreeMap::new();
    for finding in findings {
        *breakdown.entry(finding.category().to_string()).or_insert(0) += 1;
    }
    breakdown
}

/// Stable sort, most severe first.
pub fn sort_by_severity(findings: &mut [Vulnerability]) {
    findings.sort_by_key(|finding| finding.severity);
}

fn report_id(now: DateTime<Utc>) -> String {
    let random: String = Uuid::new_v4().simple().to_string().chars().take(9).collect();
    format!("audit-{}-{random}", now.timestamp_millis())
}

pub fn synthesize(input: ReportInput) -> AuditReport {
    let now = Utc::now();
    let counts = severity_tally(&input.findings);
    let [critical, high, medium, low, info] = counts;

    let executive_summary = ExecutiveSummary {
        total_vulnerabilities: input.findings.len(),
        critical_count: critical,
        high_count: high,
        medium_count: medium,
        low_count: low,
        info_count: info,
        overall_risk_score: input.risk_score,
        deployment_recommendation: DeploymentRecommendation::decide(
            critical > 0,
            high > 0,
            input.risk_score,
        ),
        top_concerns: top_concerns(&input.findings),
    };
    let risk_assessment = RiskAssessment {
        overall_score: input.risk_score,
        category_breakdown: category_breakdown(&input.findings),
        historical_context: input.summary,
    };

    let mut vulnerabilities = input.findings;
    sort_by_severity(&mut vulnerabilities);

    AuditReport {
        id: report_id(now),
        timestamp: now,
        contract_name: input.contract_name,
        source_code: input.source_code,
        executive_summary,
        vulnerabilities,
        gas_optimizations: input.gas_optimizations,
        best_practices: input.best_practices,
        risk_assessment,
        metadata: ReportMetadata {
            analysis_version: ANALYSIS_VERSION.to_string(),
            rules_version: RULES_VERSION.to_string(),
            ai_model: input.ai_model,
            analysis_time_ms: input.analysis_time_ms,
        },
    }
}

fn severity_glyph(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "🔴",
        Severity::High => "🟠",
        Severity::Medium => "🟡",
        Severity::Low => "🔵",
        Severity::Info => "⚪",
    }
}

fn describe_location(location: &CodeLocation) -> String {
    match &location.function_name {
        Some(function) => format!("Line {} in function `{function}`", location.line),
        None => format!("Line {}", location.line),
    }
}

pub fn to_markdown(report: &AuditReport) -> Result<String> {
    let mut out = String::new();
    let summary = &report.executive_summary;

    writeln!(out, "# Smart Contract Security Audit Report")?;
    writeln!(out)?;
    writeln!(out, "**Contract:** {}", report.contract_name)?;
    writeln!(out, "**Date:** {}", report.timestamp.to_rfc3339())?;
    writeln!(out, "**Report ID:** {}", report.id)?;
    writeln!(out)?;

    writeln!(out, "## Executive Summary")?;
    writeln!(out)?;
    writeln!(out, "**Overall Risk Score:** {:.1}/10", summary.overall_risk_score)?;
    writeln!(
        out,
        "**Deployment Recommendation:** {} {}",
        summary.deployment_recommendation.glyph(),
        summary.deployment_recommendation
    )?;
    writeln!(out)?;
    writeln!(out, "**Vulnerabilities Found:**")?;
    writeln!(out, "- 🔴 Critical: {}", summary.critical_count)?;
    writeln!(out, "- 🟠 High: {}", summary.high_count)?;
    writeln!(out, "- 🟡 Medium: {}", summary.medium_count)?;
    writeln!(out, "- 🔵 Low: {}", summary.low_count)?;
    writeln!(out, "- ⚪ Info: {}", summary.info_count)?;
    writeln!(out)?;

    if !summary.top_concerns.is_empty() {
        writeln!(out, "**Top Concerns:**")?;
        for (idx, concern) in summary.top_concerns.iter().enumerate() {
            writeln!(out, "{}. {concern}", idx + 1)?;
        }
        writeln!(out)?;
    }

    writeln!(out, "## Detailed Findings")?;
    writeln!(out)?;
    if report.vulnerabilities.is_empty() {
        writeln!(out, "No vulnerabilities detected.")?;
        writeln!(out)?;
    }
    for finding in &report.vulnerabilities {
        writeln!(
            out,
            "### {} {} [{}]",
            severity_glyph(finding.severity),
            finding.name,
            finding.id
        )?;
        writeln!(out, "**Severity:** {}", finding.severity)?;
        writeln!(out, "**Location:** {}", describe_location(&finding.location))?;
        writeln!(out, "**Confidence:** {:.0}%", finding.confidence * 100.0)?;
        writeln!(out)?;
        for (heading, text) in [
            ("Description", &finding.description),
            ("Technical Explanation", &finding.technical_explanation),
            ("Exploit Scenario", &finding.exploit_scenario),
            ("Recommendation", &finding.recommendation),
        ] {
            writeln!(out, "**{heading}:**")?;
            writeln!(out, "{text}")?;
            writeln!(out)?;
        }
        if !finding.code_snippet.is_empty() {
            writeln!(out, "**Code:**")?;
            writeln!(out, "```solidity\n{}\n```", finding.code_snippet)?;
            writeln!(out)?;
        }
        if !finding.references.is_empty() {
            writeln!(out, "**References:** {}", finding.references.join(", "))?;
            writeln!(out)?;
        }
        writeln!(out, "---")?;
        writeln!(out)?;
    }

    if !report.gas_optimizations.is_empty() {
        writeln!(out, "## Gas Optimization Opportunities")?;
        writeln!(out)?;
        for (idx, item) in report.gas_optimizations.iter().enumerate() {
            writeln!(
                out,
                "{}. **{}** (Line {})",
                idx + 1,
                item.description,
                item.location.line
            )?;
            writeln!(out, "   - Estimated Savings: {}", item.estimated_savings)?;
            writeln!(out, "   - Difficulty: {}", item.difficulty.as_str())?;
        }
        writeln!(out)?;
    }

    if !report.best_practices.is_empty() {
        writeln!(out, "## Best Practice Violations")?;
        writeln!(out)?;
        for (idx, item) in report.best_practices.iter().enumerate() {
            writeln!(
                out,
                "{}. **{}:** {} (Line {})",
                idx + 1,
                item.category,
                item.description,
                item.location.line
            )?;
        }
        writeln!(out)?;
    }

    writeln!(out, "## Risk Assessment")?;
    writeln!(out)?;
    writeln!(
        out,
        "**Overall Risk Score:** {:.1}/10",
        report.risk_assessment.overall_score
    )?;
    writeln!(out)?;
    if !report.risk_assessment.historical_context.is_empty() {
        writeln!(out, "{}", report.risk_assessment.historical_context)?;
        writeln!(out)?;
    }
    writeln!(out, "**Category Breakdown:**")?;
    for (category, count) in &report.risk_assessment.category_breakdown {
        writeln!(out, "- {category}: {count}")?;
    }
    writeln!(out)?;

    writeln!(out, "## Audit Metadata")?;
    writeln!(out)?;
    writeln!(out, "- **Analysis Version:** {}", report.metadata.analysis_version)?;
    writeln!(out, "- **Rules Version:** {}", report.metadata.rules_version)?;
    writeln!(
        out,
        "- **AI Model:** {}",
        report.metadata.ai_model.as_deref().unwrap_or("none")
    )?;
    writeln!(out, "- **Analysis Time:** {}ms", report.metadata.analysis_time_ms)?;
    writeln!(out)?;
    writeln!(out, "---")?;
    writeln!(out)?;
    write!(out, "*Generated by solguard {}*", report.metadata.analysis_version)?;

    Ok(out)
}

pub fn to_json(report: &AuditReport) -> Result<String> {
    serde_json::to_string_pretty(report).context("failed to serialize audit report")
}

pub fn from_json(text: &str) -> Result<AuditReport> {
    serde_json::from_str(text).context("failed to deserialize audit report")
}
