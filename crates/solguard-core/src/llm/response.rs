//! Decoding of the model's JSON answer into [`SemanticAnalysis`].
//!
//! Models wrap JSON in code fences, leave raw newlines inside strings, drop
//! trailing braces or emit trailing commas. Decoding tries strict JSON first,
//! then a repaired copy, then JSON5, and only then gives up.

use serde::Deserialize;
use tracing::warn;

use super::{debug_enabled, AiFinding, SemanticAnalysis};
use crate::error::SemanticAnalysisError;
use crate::model::CodeLocation;
use crate::report::{BestPractice, Difficulty, GasOptimization};
use crate::risk;

const DEFAULT_RISK_SCORE: f64 = 5.0;
const DEFAULT_SUMMARY: &str = "No summary available";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct WireAnalysis {
    overall_risk_score: Option<f64>,
    executive_summary: Option<String>,
    additional_vulnerabilities: Vec<WireVulnerability>,
    validated_findings: Vec<String>,
    false_positives: Vec<String>,
    gas_optimizations: Vec<WireGasOptimization>,
    best_practice_violations: Vec<WireBestPractice>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct WireVulnerability {
    description: String,
    severity: String,
    location: WireLocation,
    recommendation: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct WireGasOptimization {
    description: String,
    location: WireLocation,
    estimated_savings: String,
    difficulty: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct WireBestPractice {
    description: String,
    location: WireLocation,
    category: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireLocation {
    line: Option<serde_json::Value>,
}

impl WireLocation {
    /// Models send the line as an integer, a float or a numeric string.
    fn line(&self) -> usize {
        match &self.line {
            Some(serde_json::Value::Number(n)) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|v| *v >= 0.0).map(|v| v as u64))
                .unwrap_or(0) as usize,
            Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(0),
            _ => 0,
        }
    }

    fn to_location(&self, file: &str) -> CodeLocation {
        CodeLocation::new(file, self.line(), 0)
    }
}

impl WireAnalysis {
    fn into_analysis(self, file: &str, model: Option<String>) -> SemanticAnalysis {
        // A zero score is treated as absent.
        let risk_score = match self.overall_risk_score {
            Some(score) if score.is_finite() && score != 0.0 => risk::clamp(score),
            _ => DEFAULT_RISK_SCORE,
        };
        let summary = self
            .executive_summary
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_SUMMARY.to_string());

        let additional_findings = self
            .additional_vulnerabilities
            .into_iter()
            .map(|item| AiFinding {
                location: item.location.to_location(file),
                description: item.description,
                severity: item.severity,
                recommendation: item.recommendation,
            })
            .collect();

        let gas_optimizations = self
            .gas_optimizations
            .into_iter()
            .map(|item| GasOptimization {
                location: item.location.to_location(file),
                difficulty: Difficulty::parse(&item.difficulty).unwrap_or(Difficulty::Medium),
                description: item.description,
                estimated_savings: item.estimated_savings,
            })
            .collect();

        let best_practices = self
            .best_practice_violations
            .into_iter()
            .map(|item| BestPractice {
                location: item.location.to_location(file),
                description: item.description,
                category: item.category,
            })
            .collect();

        SemanticAnalysis {
            risk_score,
            summary,
            additional_findings,
            validated_ids: self.validated_findings,
            false_positive_ids: self.false_positives,
            gas_optimizations,
            best_practices,
            model,
        }
    }
}

/// Decode a raw model reply. `file` is attached to every location the model reports.
pub fn parse_analysis(
    raw: &str,
    file: &str,
    model: Option<String>,
) -> Result<SemanticAnalysis, SemanticAnalysisError> {
    let payload = strip_code_fence(raw).unwrap_or_else(|| json_object_slice(raw).to_string());
    match decode(&payload) {
        Ok(wire) => Ok(wire.into_analysis(file, model)),
        Err(reason) => {
            if debug_enabled() {
                warn!(payload = %raw, "undecodable semantic analysis payload");
            }
            Err(SemanticAnalysisError::Malformed(reason))
        }
    }
}

fn decode(payload: &str) -> Result<WireAnalysis, String> {
    let strict_err = match serde_json::from_str::<WireAnalysis>(payload) {
        Ok(wire) => return Ok(wire),
        Err(err) => err,
    };

    let repaired = repair_json(payload);
    if repaired != payload {
        if let Ok(wire) = serde_json::from_str::<WireAnalysis>(&repaired) {
            return Ok(wire);
        }
    }

    let value: serde_json::Value =
        json5::from_str(&repaired).map_err(|_| format!("invalid JSON: {strict_err}"))?;
    serde_json::from_value(value).map_err(|err| format!("unexpected analysis shape: {err}"))
}

/// Trims surrounding prose by keeping the outermost `{ ... }` span.
fn json_object_slice(input: &str) -> &str {
    let trimmed = input.trim();
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        (Some(start), _) => &trimmed[start..],
        _ => trimmed,
    }
}

fn strip_code_fence(input: &str) -> Option<String> {
    let trimmed = input.trim().strip_prefix("```")?;
    let trimmed = trimmed.trim_start_matches(|c: char| c.is_ascii_whitespace());
    let trimmed = trimmed
        .strip_prefix("json")
        .unwrap_or(trimmed)
        .trim_start_matches(|c: char| c.is_ascii_whitespace());
    let end = trimmed.rfind("```").unwrap_or(trimmed.len());
    Some(trimmed[..end].trim().to_string())
}

/// Escapes raw newlines inside strings, terminates a dangling string and
/// closes any brackets left open, innermost first.
fn repair_json(payload: &str) -> String {
    let mut result = String::with_capacity(payload.len() + 8);
    let mut open = Vec::new();
    let mut in_string = false;
    let mut escape = false;

    for ch in payload.chars() {
        if in_string {
            match ch {
                _ if escape => {
                    escape = false;
                    result.push(ch);
                }
                '\\' => {
                    escape = true;
                    result.push(ch);
                }
                '"' => {
                    in_string = false;
                    result.push(ch);
                }
                '\n' => result.push_str("\\n"),
                '\r' => result.push_str("\\r"),
                _ => result.push(ch),
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => open.push('}'),
            '[' => open.push(']'),
            '}' | ']' => {
                if open.last() == Some(&ch) {
                    open.pop();
                }
            }
            _ => {}
        }
        result.push(ch);
    }

    if in_string {
        result.push('"');
    }
    while let Some(close) = open.pop() {
        result.push(close);
    }
    result
}
