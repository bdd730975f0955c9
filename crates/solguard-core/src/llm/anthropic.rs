use super::{
    build_prompt, parse_analysis, send_with_retries, AnalysisRequest, LlmSettings,
    SemanticAnalysis, SemanticAnalyzer, SYSTEM_PROMPT, USER_AGENT,
};
use crate::error::SemanticAnalysisError;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";
const DEFAULT_API_VERSION: &str = "2023-06-01";
const PROVIDER: &str = "Anthropic";

#[derive(Debug, Clone)]
pub struct AnthropicAnalyzer {
    http: Client,
    url: String,
    api_key: String,
    api_version: String,
    model: String,
    max_retries: u32,
}

impl AnthropicAnalyzer {
    pub fn new(settings: &LlmSettings) -> Result<Self> {
        if settings.api_key.trim().is_empty() {
            bail!("Anthropic API key must be provided via SOLGUARD_API_KEY");
        }
        let base = settings
            .endpoint
            .as_deref()
            .unwrap_or("https://api.anthropic.com");
        let url = format!("{}/v1/messages", base.trim_end_matches('/'));
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(settings.timeout_secs.unwrap_or(30)))
            .build()
            .context("failed to build Anthropic HTTP client")?;
        Ok(Self {
            http,
            url,
            api_key: settings.api_key.clone(),
            api_version: settings
                .api_version
                .clone()
                .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            model: settings
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_retries: settings.max_retries,
        })
    }

    async fn complete(&self, prompt: String) -> Result<String> {
        let payload = MessagesRequest {
            model: &self.model,
            system: SYSTEM_PROMPT,
            messages: vec![AnthropicMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: 4000,
        };

        let response = send_with_retries(PROVIDER, self.max_retries, || {
            self.http
                .post(&self.url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", &self.api_version)
                .json(&payload)
        })
        .await?;

        let message: MessagesResponse = response
            .json()
            .await
            .context("failed to parse Anthropic response")?;
        message
            .content
            .into_iter()
            .filter(|part| part.kind == "text")
            .find_map(|part| part.text)
            .ok_or_else(|| anyhow!("Anthropic response missing message content"))
    }
}

#[async_trait]
impl SemanticAnalyzer for AnthropicAnalyzer {
    async fn analyze(
        &self,
        request: &AnalysisRequest<'_>,
    ) -> Result<SemanticAnalysis, SemanticAnalysisError> {
        debug!(model = %self.model, findings = request.findings.len(), "requesting Anthropic analysis");
        let content = self
            .complete(build_prompt(request))
            .await
            .map_err(SemanticAnalysisError::Request)?;
        parse_analysis(&content, request.file, Some(self.model.clone()))
    }

    fn model(&self) -> Option<&str> {
        Some(&self.model)
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    system: &'static str,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<AnthropicContent>,
}

#[derive(Deserialize)]
struct AnthropicContent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}
