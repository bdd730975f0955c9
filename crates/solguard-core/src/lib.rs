pub mod ast;
pub mod auditor;
pub mod config;
pub mod error;
pub mod llm;
pub mod merge;
pub mod metadata;
pub mod model;
pub mod parser;
pub mod report;
pub mod risk;
pub mod scanner;

pub use auditor::{AuditOptions, Auditor};
pub use config::AuditorConfig;
pub use error::{AuditError, ExtractionError, RuleEvaluationError, SemanticAnalysisError};
pub use llm::{
    analyzer_from_settings, AnalysisRequest, AnthropicAnalyzer, LlmSettings, NoopAnalyzer,
    OpenAiAnalyzer, SemanticAnalysis, SemanticAnalyzer,
};
pub use metadata::ContractMetadata;
pub use model::{CodeLocation, Severity, Vulnerability, VulnerabilityValidationError};
pub use report::{
    from_json, to_json, to_markdown, AuditReport, DeploymentRecommendation, ExecutiveSummary,
};
pub use scanner::{
    engine::RuleEngine, file_repository::FileRuleRepository, Matcher, Rule, RuleRegistry,
    RuleRepository, RuleValidationError,
};
