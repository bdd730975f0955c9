use anyhow::{bail, Result};
use serde::Deserialize;
use std::collections::HashMap;

const DEFAULT_MAX_RETRIES: u32 = 2;

/// Provider configuration for semantic analysis.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LlmSettings {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub api_version: Option<String>,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl LlmSettings {
    pub(crate) const PROVIDER_ENV: &'static str = "SOLGUARD_PROVIDER";
    pub(crate) const API_KEY_ENV: &'static str = "SOLGUARD_API_KEY";
    const ENDPOINT_ENV: &'static str = "SOLGUARD_ENDPOINT";
    const MODEL_ENV: &'static str = "SOLGUARD_MODEL";
    const TIMEOUT_ENV: &'static str = "SOLGUARD_TIMEOUT_SECS";
    const RETRIES_ENV: &'static str = "SOLGUARD_MAX_RETRIES";
    const API_VERSION_ENV: &'static str = "SOLGUARD_API_VERSION";

    /// Load settings from environment variables.
    ///
    /// * `SOLGUARD_PROVIDER`: `openai` (default), `anthropic` or `noop`.
    /// * `SOLGUARD_API_KEY`: API key/token, required unless the provider is `noop`.
    /// * `SOLGUARD_ENDPOINT`: optional custom base URL.
    pub fn from_env() -> Result<Self> {
        Self::from_map(std::env::vars().collect())
    }

    pub(crate) fn from_map(vars: HashMap<String, String>) -> Result<Self> {
        let non_blank = |key: &str| {
            vars.get(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let provider = non_blank(Self::PROVIDER_ENV).unwrap_or_else(default_provider);
        let api_key = match non_blank(Self::API_KEY_ENV) {
            Some(key) => key,
            None if provider.eq_ignore_ascii_case("noop") => String::new(),
            None => bail!(
                "environment variable {} must be set for provider `{provider}`",
                Self::API_KEY_ENV
            ),
        };

        Ok(Self {
            provider,
            api_key,
            endpoint: non_blank(Self::ENDPOINT_ENV),
            model: non_blank(Self::MODEL_ENV),
            timeout_secs: non_blank(Self::TIMEOUT_ENV).and_then(|v| v.parse::<u64>().ok()),
            max_retries: non_blank(Self::RETRIES_ENV)
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(DEFAULT_MAX_RETRIES),
            api_version: non_blank(Self::API_VERSION_ENV),
        })
    }

    /// Settings that select the no-op analyzer.
    pub fn noop() -> Self {
        Self {
            provider: "noop".to_string(),
            api_key: String::new(),
            endpoint: None,
            model: None,
            timeout_secs: None,
            max_retries: DEFAULT_MAX_RETRIES,
            api_version: None,
        }
    }
}
