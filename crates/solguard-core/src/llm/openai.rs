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

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const PROVIDER: &str = "OpenAI";

#[derive(Debug, Clone)]
pub struct OpenAiAnalyzer {
    http: Client,
    url: String,
    api_key: String,
    model: String,
    max_retries: u32,
}

impl OpenAiAnalyzer {
    pub fn new(settings: &LlmSettings) -> Result<Self> {
        if settings.api_key.trim().is_empty() {
            bail!("OpenAI API key must be provided via SOLGUARD_API_KEY");
        }
        let base = settings
            .endpoint
            .as_deref()
            .unwrap_or("https://api.openai.com");
        let url = format!("{}/v1/chat/completions", base.trim_end_matches('/'));
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(settings.timeout_secs.unwrap_or(30)))
            .build()
            .context("failed to build OpenAI HTTP client")?;
        Ok(Self {
            http,
            url,
            api_key: settings.api_key.clone(),
            model: settings
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_retries: settings.max_retries,
        })
    }

    async fn complete(&self, prompt: String) -> Result<String> {
        let payload = ChatCompletionRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: 0.1,
            max_tokens: 4000,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let response = send_with_retries(PROVIDER, self.max_retries, || {
            self.http
                .post(&self.url)
                .bearer_auth(&self.api_key)
                .json(&payload)
        })
        .await?;

        let chat: ChatCompletionResponse = response
            .json()
            .await
            .context("failed to parse OpenAI response")?;
        chat.choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("OpenAI response missing message content"))
    }
}

#[async_trait]
impl SemanticAnalyzer for OpenAiAnalyzer {
    async fn analyze(
        &self,
        request: &AnalysisRequest<'_>,
    ) -> Result<SemanticAnalysis, SemanticAnalysisError> {
        debug!(model = %self.model, findings = request.findings.len(), "requesting OpenAI analysis");
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
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}
