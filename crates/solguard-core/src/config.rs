//! Layered auditor configuration: an optional file, then `SOLGUARD__*` environment overrides.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::AuditError;
use crate::llm::LlmSettings;
use crate::model::DEFAULT_FILE_NAME;

const ENV_PREFIX: &str = "SOLGUARD";
const ENV_SEPARATOR: &str = "__";
const DEFAULT_ANALYSIS_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AuditorConfig {
    #[serde(default = "enabled")]
    pub enable_ai_analysis: bool,
    #[serde(default)]
    pub skip_rules: Vec<String>,
    /// Directory holding `rules.json` / `rules.yaml` custom rule packs.
    #[serde(default)]
    pub rules_dir: Option<PathBuf>,
    #[serde(default = "enabled")]
    pub parallel_rules: bool,
    /// Upper bound on the semantic analysis call, e.g. `"45s"` or `"2m"`.
    #[serde(
        default = "default_analysis_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub analysis_timeout: Duration,
    /// Name attached to finding locations.
    #[serde(default = "default_file_name")]
    pub file_name: String,
    #[serde(default)]
    pub llm: Option<LlmSettings>,
}

fn enabled() -> bool {
    true
}

fn default_analysis_timeout() -> Duration {
    DEFAULT_ANALYSIS_TIMEOUT
}

fn default_file_name() -> String {
    DEFAULT_FILE_NAME.to_string()
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
}

impl Default for AuditorConfig {
    fn default() -> Self {
        Self {
            enable_ai_analysis: true,
            skip_rules: Vec::new(),
            rules_dir: None,
            parallel_rules: true,
            analysis_timeout: DEFAULT_ANALYSIS_TIMEOUT,
            file_name: default_file_name(),
            llm: None,
        }
    }
}

impl AuditorConfig {
    /// Load from `path` (TOML, YAML or JSON, by extension) when given, then apply
    /// environment overrides such as `SOLGUARD__ANALYSIS_TIMEOUT=30s`,
    /// `SOLGUARD__SKIP_RULES=TD-01,FP-01` or `SOLGUARD__LLM__PROVIDER=anthropic`.
    pub fn load(path: Option<&Path>) -> Result<Self, AuditError> {
        Self::load_with_env(path, None)
    }

    pub(crate) fn load_with_env(
        path: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, AuditError> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            if !path.exists() {
                return Err(AuditError::Config(format!(
                    "configuration file {} does not exist",
                    path.display()
                )));
            }
            builder = builder.add_source(::config::File::from(path));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .separator(ENV_SEPARATOR)
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("skip_rules")
                .source(env),
        );

        let config: Self = builder
            .build()
            .and_then(|built| built.try_deserialize())
            .map_err(|err| AuditError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AuditError> {
        if self.analysis_timeout.is_zero() {
            return Err(AuditError::Config(
                "analysis_timeout must be greater than zero".into(),
            ));
        }
        if self.file_name.trim().is_empty() {
            return Err(AuditError::Config("file_name must not be blank".into()));
        }
        Ok(())
    }
}
