//! The `audit` entry point: parse, extract, evaluate, merge, synthesize.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;
use tracing::{debug, info, instrument};

use crate::config::AuditorConfig;
use crate::error::{AuditError, SemanticAnalysisError};
use crate::llm::{analyzer_from_settings, AnalysisRequest, SemanticAnalyzer};
use crate::merge::{merge, SemanticOutcome};
use crate::metadata;
use crate::model::{Vulnerability, DEFAULT_FILE_NAME};
use crate::parser::parse_source;
use crate::report::{synthesize, AuditReport, ReportInput};
use crate::scanner::{
    engine::RuleEngine, file_repository::FileRuleRepository, Rule, RuleRegistry, RuleRepository,
};

const DEFAULT_ANALYSIS_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-call options.
#[derive(Debug, Clone)]
pub struct AuditOptions {
    pub enable_ai_analysis: bool,
    /// Rule ids removed before evaluation.
    pub skip_rules: Vec<String>,
    /// Rules that replace a rule with the same id, or are appended.
    pub custom_rules: Vec<Rule>,
}

impl Default for AuditOptions {
    fn default() -> Self {
        Self {
            enable_ai_analysis: true,
            skip_rules: Vec::new(),
            custom_rules: Vec::new(),
        }
    }
}

impl AuditOptions {
    /// Options for a pattern-only audit.
    pub fn pattern_only() -> Self {
        Self {
            enable_ai_analysis: false,
            ..Self::default()
        }
    }

    pub fn from_config(config: &AuditorConfig) -> Self {
        Self {
            enable_ai_analysis: config.enable_ai_analysis,
            skip_rules: config.skip_rules.clone(),
            custom_rules: Vec::new(),
        }
    }
}

/// Holds the read-only state shared by every audit: the rule registry and the
/// optional semantic analyzer. Cheap to clone and safe to share across tasks.
#[derive(Clone)]
pub struct Auditor {
    registry: RuleRegistry,
    analyzer: Option<Arc<dyn SemanticAnalyzer>>,
    analysis_timeout: Duration,
    parallel_rules: bool,
    file_name: String,
}

impl std::fmt::Debug for Auditor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Auditor")
            .field("rules", &self.registry.len())
            .field("analyzer", &self.analyzer.as_ref().and_then(|a| a.model()))
            .field("analysis_timeout", &self.analysis_timeout)
            .field("parallel_rules", &self.parallel_rules)
            .field("file_name", &self.file_name)
            .finish()
    }
}

impl Auditor {
    pub fn new(registry: RuleRegistry) -> Self {
        Self {
            registry,
            analyzer: None,
            analysis_timeout: DEFAULT_ANALYSIS_TIMEOUT,
            parallel_rules: true,
            file_name: DEFAULT_FILE_NAME.to_string(),
        }
    }

    /// Auditor over the built-in catalogue with no semantic analyzer.
    pub fn builtin() -> Result<Self, AuditError> {
        Ok(Self::new(RuleRegistry::builtin()?))
    }

    /// Build an auditor from configuration, loading custom rule packs from
    /// `rules_dir` and the analyzer named by the `llm` table.
    pub async fn from_config(config: &AuditorConfig) -> Result<Self, AuditError> {
        let mut registry = RuleRegistry::builtin()?;
        if let Some(dir) = &config.rules_dir {
            let custom = FileRuleRepository::new(dir)
                .load_rules()
                .await
                .map_err(|err| AuditError::Config(format!("{err:#}")))?;
            debug!(custom = custom.len(), dir = %dir.display(), "loaded custom rules");
            registry = registry.configured(&[], &custom)?;
        }

        let mut auditor = Self::new(registry)
            .with_timeout(config.analysis_timeout)
            .with_parallelism(config.parallel_rules)
            .with_file_name(config.file_name.clone());
        if let Some(settings) = &config.llm {
            let analyzer = analyzer_from_settings(settings)
                .map_err(|err| AuditError::Config(format!("{err:#}")))?;
            auditor = auditor.with_analyzer(Arc::from(analyzer));
        }
        Ok(auditor)
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn SemanticAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    pub fn with_timeout(mut self, analysis_timeout: Duration) -> Self {
        self.analysis_timeout = analysis_timeout;
        self
    }

    pub fn with_parallelism(mut self, parallel: bool) -> Self {
        self.parallel_rules = parallel;
        self
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    /// Audit one contract source.
    ///
    /// Only a source that yields no recognizable declarations, or invalid
    /// `options`, fails the call. Semantic analysis problems degrade to a
    /// pattern-based report.
    #[instrument(skip_all, fields(contract = %contract_name, source_len = source.len()))]
    pub async fn audit(
        &self,
        source: &str,
        contract_name: &str,
        options: &AuditOptions,
    ) -> Result<AuditReport, AuditError> {
        let started = Instant::now();
        info!("audit started");

        let unit = parse_source(source)?;
        let contracts = metadata::extract(&unit, &self.file_name);
        let registry = self
            .registry
            .configured(&options.skip_rules, &options.custom_rules)?;
        let findings = RuleEngine::new(registry)
            .with_parallelism(self.parallel_rules)
            .evaluate(source, &unit, &contracts, &self.file_name);

        let outcome = self.semantic_outcome(source, &findings, options).await;
        let merged = merge(findings, outcome, &self.file_name);

        let report = synthesize(ReportInput {
            contract_name: contract_name.to_string(),
            source_code: source.to_string(),
            findings: merged.findings,
            risk_score: merged.risk_score,
            summary: merged.summary,
            gas_optimizations: merged.gas_optimizations,
            best_practices: merged.best_practices,
            ai_model: merged.ai_model,
            analysis_time_ms: elapsed_millis(started.elapsed()),
        });
        info!(
            findings = report.vulnerabilities.len(),
            risk_score = report.executive_summary.overall_risk_score,
            recommendation = %report.executive_summary.deployment_recommendation,
            elapsed_ms = report.metadata.analysis_time_ms,
            "audit finished"
        );
        Ok(report)
    }

    async fn semantic_outcome(
        &self,
        source: &str,
        findings: &[Vulnerability],
        options: &AuditOptions,
    ) -> SemanticOutcome {
        if !options.enable_ai_analysis {
            return SemanticOutcome::Skipped;
        }
        let Some(analyzer) = &self.analyzer else {
            debug!("no semantic analyzer configured");
            return SemanticOutcome::Skipped;
        };

        let request = AnalysisRequest {
            file: &self.file_name,
            source,
            findings,
        };
        match timeout(self.analysis_timeout, analyzer.analyze(&request)).await {
            Ok(Ok(analysis)) => SemanticOutcome::Completed(analysis),
            Ok(Err(SemanticAnalysisError::Unconfigured)) => SemanticOutcome::Skipped,
            Ok(Err(err)) => SemanticOutcome::Failed(err),
            Err(_) => SemanticOutcome::Failed(SemanticAnalysisError::Timeout(self.analysis_timeout)),
        }
    }
}

fn elapsed_millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
