mod anthropic;
mod openai;
mod response;
mod settings;

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{RequestBuilder, Response};
use tokio::time::sleep;
use tracing::debug;

use crate::error::SemanticAnalysisError;
use crate::model::{CodeLocation, Vulnerability};
use crate::report::{BestPractice, GasOptimization};

pub use anthropic::AnthropicAnalyzer;
pub use openai::OpenAiAnalyzer;
pub use response::parse_analysis;
pub use settings::LlmSettings;

const USER_AGENT: &str = concat!("solguard/", env!("CARGO_PKG_VERSION"));
const INITIAL_BACKOFF: Duration = Duration::from_millis(200);
const MAX_BACKOFF: Duration = Duration::from_secs(5);
const MAX_SOURCE_CHARS: usize = 24_000;

/// What a semantic analyzer is asked to review.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisRequest<'a> {
    pub file: &'a str,
    pub source: &'a str,
    pub findings: &'a [Vulnerability],
}

/// A finding proposed by the model. Severity stays textual until merge validates it.
#[derive(Debug, Clone, PartialEq)]
pub struct AiFinding {
    pub description: String,
    pub severity: String,
    pub location: CodeLocation,
    pub recommendation: String,
}

/// Structured result of a semantic review.
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticAnalysis {
    pub risk_score: f64,
    pub summary: String,
    pub additional_findings: Vec<AiFinding>,
    /// Ids the model confirmed. Informational only.
    pub validated_ids: Vec<String>,
    pub false_positive_ids: Vec<String>,
    pub gas_optimizations: Vec<GasOptimization>,
    pub best_practices: Vec<BestPractice>,
    pub model: Option<String>,
}

/// Capability interface for semantic review; one implementation per provider.
#[async_trait]
pub trait SemanticAnalyzer: Send + Sync {
    async fn analyze(
        &self,
        request: &AnalysisRequest<'_>,
    ) -> Result<SemanticAnalysis, SemanticAnalysisError>;

    /// Model identifier recorded in report metadata.
    fn model(&self) -> Option<&str> {
        None
    }
}

/// Analyzer used when no provider is configured; every call reports `Unconfigured`.
#[derive(Debug, Default, Clone)]
pub struct NoopAnalyzer;

#[async_trait]
impl SemanticAnalyzer for NoopAnalyzer {
    async fn analyze(
        &self,
        _request: &AnalysisRequest<'_>,
    ) -> Result<SemanticAnalysis, SemanticAnalysisError> {
        Err(SemanticAnalysisError::Unconfigured)
    }
}

/// Build the analyzer named by `settings.provider`.
pub fn analyzer_from_settings(settings: &LlmSettings) -> Result<Box<dyn SemanticAnalyzer>> {
    match settings.provider.to_ascii_lowercase().as_str() {
        "openai" => Ok(Box::new(OpenAiAnalyzer::new(settings)?)),
        "anthropic" => Ok(Box::new(AnthropicAnalyzer::new(settings)?)),
        "noop" => Ok(Box::new(NoopAnalyzer)),
        other => bail!("unsupported semantic analysis provider `{other}`"),
    }
}

const SYSTEM_PROMPT: &str =
    "You are an expert smart contract security auditor. Always respond with valid JSON.";

fn build_prompt(request: &AnalysisRequest<'_>) -> String {
    let detected = if request.findings.is_empty() {
        "None".to_string()
    } else {
        request
            .findings
            .iter()
            .map(|finding| {
                format!(
                    "- {}: {} ({}) at line {}",
                    finding.id, finding.name, finding.severity, finding.location.line
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        r#"Analyze the following Solidity contract for security vulnerabilities, business logic flaws, and best practice violations.

CONTRACT SOURCE CODE ({file}):
```solidity
{source}
```

ALREADY DETECTED ISSUES:
{detected}

ANALYSIS INSTRUCTIONS:
1. Validate the detected issues above and list any false positives by id.
2. Identify additional security vulnerabilities not caught by pattern matching.
3. Analyze business logic for potential flaws.
4. Identify gas optimization opportunities.
5. Note best practice violations.
6. Provide an overall risk score from 1 to 10 where 10 is most risky.
7. Write an executive summary in plain language.

RESPONSE FORMAT (JSON):
{{
  "overallRiskScore": <number 1-10>,
  "executiveSummary": "<plain language summary>",
  "additionalVulnerabilities": [
    {{"description": "...", "severity": "CRITICAL|HIGH|MEDIUM|LOW|INFO", "location": {{"line": <number>}}, "recommendation": "..."}}
  ],
  "validatedFindings": ["<ids confirmed as true positives>"],
  "falsePositives": ["<ids that are false positives>"],
  "gasOptimizations": [
    {{"description": "...", "location": {{"line": <number>}}, "estimatedSavings": "...", "difficulty": "LOW|MEDIUM|HIGH"}}
  ],
  "bestPracticeViolations": [
    {{"description": "...", "location": {{"line": <number>}}, "category": "..."}}
  ]
}}

Respond ONLY with valid JSON, no additional text."#,
        file = request.file,
        source = truncate(request.source, MAX_SOURCE_CHARS),
    )
}

fn truncate(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    input.chars().take(max_chars).collect::<String>() + "…"
}

/// Sends the request built by `build`, retrying transport errors and non-success
/// statuses with exponential backoff (200ms doubling, capped at 5s).
async fn send_with_retries<F>(provider: &str, max_retries: u32, build: F) -> Result<Response>
where
    F: Fn() -> RequestBuilder,
{
    let mut attempt = 0u32;
    let mut backoff = INITIAL_BACKOFF;
    loop {
        match build().send().await {
            Ok(response) if response.status().is_success() => return Ok(response),
            Ok(response) => {
                if attempt >= max_retries {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    bail!("{provider} API error ({status}): {body}");
                }
                debug!(provider, status = %response.status(), attempt, "retrying semantic analysis request");
            }
            Err(err) => {
                if attempt >= max_retries {
                    return Err(err).with_context(|| format!("failed to call {provider} API"));
                }
                debug!(provider, error = %err, attempt, "retrying semantic analysis request");
            }
        }
        sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
        attempt += 1;
    }
}

fn debug_enabled() -> bool {
    matches!(std::env::var("SOLGUARD_DEBUG"), Ok(val) if !val.is_empty() && val != "0")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Severity;

    fn settings(provider: &str) -> LlmSettings {
        LlmSettings {
            provider: provider.into(),
            api_key: "key".into(),
            endpoint: None,
            model: None,
            timeout_secs: None,
            max_retries: 0,
            api_version: None,
        }
    }

    #[test]
    fn analyzer_selection_follows_provider() {
        assert!(analyzer_from_settings(&settings("openai")).is_ok());
        assert!(analyzer_from_settings(&settings("Anthropic")).is_ok());
        assert!(analyzer_from_settings(&settings("noop")).is_ok());
        let err = analyzer_from_settings(&settings("gemini"))
            .err()
            .expect("unknown provider");
        assert!(err.to_string().contains("unsupported semantic analysis provider `gemini`"));
    }

    #[tokio::test]
    async fn noop_analyzer_reports_unconfigured() {
        let request = AnalysisRequest {
            file: "contract.sol",
            source: "contract A {}",
            findings: &[],
        };
        let err = NoopAnalyzer.analyze(&request).await.unwrap_err();
        assert!(matches!(err, SemanticAnalysisError::Unconfigured));
    }

    #[test]
    fn prompt_lists_detected_findings() {
        let finding = Vulnerability {
            id: "RE-01".into(),
            name: "Reentrancy Vulnerability".into(),
            severity: Severity::Critical,
            description: String::new(),
            location: CodeLocation::new("Vault.sol", 7, 8),
            technical_explanation: String::new(),
            exploit_scenario: String::new(),
            recommendation: String::new(),
            code_snippet: String::new(),
            references: Vec::new(),
            confidence: 0.85,
        };
        let findings = [finding];
        let prompt = build_prompt(&AnalysisRequest {
            file: "Vault.sol",
            source: "contract Vault {}",
            findings: &findings,
        });
        assert!(prompt.contains("- RE-01: Reentrancy Vulnerability (CRITICAL) at line 7"));
        assert!(prompt.contains("CONTRACT SOURCE CODE (Vault.sol)"));
        assert!(prompt.contains("\"falsePositives\""));

        let empty = build_prompt(&AnalysisRequest {
            file: "Vault.sol",
            source: "contract Vault {}",
            findings: &[],
        });
        assert!(empty.contains("ALREADY DETECTED ISSUES:\nNone"));
    }

    #[test]
    fn truncate_adds_ellipsis_when_exceeding_limit() {
        assert_eq!(truncate("abc", 10), "abc");
        assert_eq!(truncate("abcdefghijklmnopqrstuvwxyz", 5), "abcde…");
    }
}
