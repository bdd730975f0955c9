use rayon::prelude::*;
use tracing::{debug, instrument, trace, warn};

use super::{Matcher, Rule, RuleRegistry};
use crate::ast::SourceUnit;
use crate::error::RuleEvaluationError;
use crate::metadata::ContractMetadata;
use crate::model::{CodeLocation, Vulnerability};

const MAX_SNIPPET_CHARS: usize = 240;

/// Evaluates a [`RuleRegistry`] against one parsed source file.
///
/// Findings come back in registry order, then in per-rule emission order,
/// whether or not the rules ran in parallel.
#[derive(Debug, Clone)]
pub struct RuleEngine {
    registry: RuleRegistry,
    parallel: bool,
}

impl RuleEngine {
    pub fn new(registry: RuleRegistry) -> Self {
        Self {
            registry,
            parallel: true,
        }
    }

    pub fn with_parallelism(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    #[instrument(
        name = "evaluate_rules",
        skip(self, source, unit, contracts),
        fields(rules = self.registry.len(), contracts = contracts.len(), source_len = source.len())
    )]
    pub fn evaluate(
        &self,
        source: &str,
        unit: &SourceUnit,
        contracts: &[ContractMetadata],
        file: &str,
    ) -> Vec<Vulnerability> {
        let lines = LineIndex::new(source);
        let evaluate = |rule: &Rule| evaluate_rule(rule, source, &lines, unit, contracts, file);

        let per_rule: Vec<Vec<Vulnerability>> = if self.parallel {
            self.registry.rules().par_iter().map(evaluate).collect()
        } else {
            self.registry.rules().iter().map(evaluate).collect()
        };

        let findings: Vec<_> = per_rule.into_iter().flatten().collect();
        debug!(findings = findings.len(), "rule evaluation completed");
        findings
    }
}

fn evaluate_rule(
    rule: &Rule,
    source: &str,
    lines: &LineIndex,
    unit: &SourceUnit,
    contracts: &[ContractMetadata],
    file: &str,
) -> Vec<Vulnerability> {
    trace!(rule_id = %rule.id, kind = rule.matcher.kind(), "evaluating rule");
    match &rule.matcher {
        Matcher::Lexical(regex) => regex
            .find_iter(source)
            .filter(|mat| mat.start() < mat.end())
            .map(|mat| lexical_finding(rule, source, lines, unit, file, mat.start(), mat.as_str()))
            .collect(),
        Matcher::Structural(predicate) => {
            let mut findings = Vec::new();
            for contract in contracts {
                match predicate(unit, contract) {
                    Ok(produced) => findings.extend(produced.into_iter().filter(|finding| {
                        match finding.validate() {
                            Ok(()) => true,
                            Err(err) => {
                                warn!(rule_id = %rule.id, error = %err, "dropping invalid finding");
                                false
                            }
                        }
                    })),
                    Err(cause) => {
                        let err = RuleEvaluationError {
                            rule_id: rule.id.clone(),
                            contract: contract.name.clone(),
                            source: cause,
                        };
                        warn!(error = %err, "structural rule failed; contribution ignored");
                    }
                }
            }
            findings
        }
    }
}

fn lexical_finding(
    rule: &Rule,
    source: &str,
    lines: &LineIndex,
    unit: &SourceUnit,
    file: &str,
    offset: usize,
    matched: &str,
) -> Vulnerability {
    let (line, column) = lines.position(offset);
    let mut location = CodeLocation::new(file, line, column);
    if let Some(contract) = unit.contract_at(offset) {
        location = location.in_contract(contract);
    }

    Vulnerability {
        id: rule.id.clone(),
        name: rule.name.clone(),
        severity: rule.severity,
        description: rule.description.clone(),
        location,
        technical_explanation: rule.description.clone(),
        exploit_scenario: format!(
            "Source text `{}` at line {line} matches this pattern.",
            truncate(matched.trim(), 80)
        ),
        recommendation: rule.recommendation.clone(),
        code_snippet: truncate(lines.line_text(source, line).trim(), MAX_SNIPPET_CHARS),
        references: rule.references.clone(),
        confidence: rule.confidence,
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Byte offsets of line starts, for mapping match offsets to line/column.
struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(source: &str) -> Self {
        let starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(idx, _)| idx + 1))
            .collect();
        Self { starts }
    }

    /// 1-based line, 0-based byte column.
    fn position(&self, offset: usize) -> (usize, usize) {
        let line_idx = match self.starts.binary_search(&offset) {
            Ok(idx) => idx,
            Err(idx) => idx.saturating_sub(1),
        };
        let start = self.starts.get(line_idx).copied().unwrap_or(0);
        (line_idx + 1, offset - start)
    }

    fn line_text<'s>(&self, source: &'s str, line: usize) -> &'s str {
        let start = self.starts.get(line.saturating_sub(1)).copied().unwrap_or(0);
        let end = self
            .starts
            .get(line)
            .copied()
            .unwrap_or(source.len())
            .min(source.len());
        source.get(start..end).unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::extract;
    use crate::model::Severity;
    use crate::parser::parse_source;

    const SOURCE: &str = "pragma solidity ^0.8.0;\n\ncontract Gate {\n    function check() public view returns (bool) {\n        return tx.origin == msg.sender;\n    }\n}\n";

    fn lexical(id: &str, pattern: &str) -> Rule {
        Rule::lexical(
            id,
            id,
            Severity::Medium,
            "desc",
            pattern,
            "fix",
            vec!["REF".into()],
            0.8,
        )
        .expect("valid rule")
    }

    fn engine(rules: Vec<Rule>) -> RuleEngine {
        RuleEngine::new(RuleRegistry::from_rules(rules).expect("registry"))
    }

    fn run(engine: &RuleEngine, source: &str) -> Vec<Vulnerability> {
        let unit = parse_source(source).expect("parses");
        let contracts = extract(&unit, "Gate.sol");
        engine.evaluate(source, &unit, &contracts, "Gate.sol")
    }

    #[test]
    fn lexical_matches_carry_line_column_and_contract() {
        let findings = run(&engine(vec![lexical("TX-01", r"tx\.origin")]), SOURCE);
        assert_eq!(findings.len(), 1);
        let location = &findings[0].location;
        assert_eq!((location.line, location.column), (5, 15));
        assert_eq!(location.contract_name.as_deref(), Some("Gate"));
        assert_eq!(findings[0].code_snippet, "return tx.origin == msg.sender;");
        assert_eq!(findings[0].references, vec!["REF"]);
    }

    #[test]
    fn matches_outside_contracts_have_no_contract_name() {
        let findings = run(&engine(vec![lexical("FP-01", r"pragma\s+solidity\s+[\^~]")]), SOURCE);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].location.line, 1);
        assert_eq!(findings[0].location.contract_name, None);
    }

    #[test]
    fn failing_predicate_contributes_nothing() {
        let failing = Rule::structural(
            "BOOM-01",
            "Boom",
            Severity::High,
            "always fails",
            |_, _| Err(anyhow::anyhow!("predicate exploded")),
            "none",
            Vec::new(),
            0.5,
        )
        .expect("valid rule");
        let findings = run(&engine(vec![failing, lexical("TX-01", r"tx\.origin")]), SOURCE);
        let ids: Vec<_> = findings.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["TX-01"]);
    }

    #[test]
    fn invalid_findings_are_dropped() {
        let sloppy = Rule::structural(
            "SLOPPY-01",
            "Sloppy",
            Severity::Low,
            "emits out-of-range confidence",
            |_, contract| {
                Ok(vec![Vulnerability {
                    id: "SLOPPY-01".into(),
                    name: "Sloppy".into(),
                    severity: Severity::Low,
                    description: String::new(),
                    location: contract.location.clone(),
                    technical_explanation: String::new(),
                    exploit_scenario: String::new(),
                    recommendation: String::new(),
                    code_snippet: String::new(),
                    references: Vec::new(),
                    confidence: 2.0,
                }])
            },
            "none",
            Vec::new(),
            0.5,
        )
        .expect("valid rule");
        assert!(run(&engine(vec![sloppy]), SOURCE).is_empty());
    }

    #[test]
    fn parallel_and_sequential_agree_on_order() {
        let rules = vec![
            lexical("A-01", r"msg\.sender"),
            lexical("B-01", r"function"),
            lexical("C-01", r"tx\.origin"),
        ];
        let parallel = run(&engine(rules.clone()), SOURCE);
        let sequential = run(&engine(rules).with_parallelism(false), SOURCE);
        assert_eq!(parallel, sequential);
        let ids: Vec<_> = parallel.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["A-01", "B-01", "C-01"]);
    }

    #[test]
    fn line_index_maps_offsets() {
        let index = LineIndex::new("ab\ncd\n\nef");
        assert_eq!(index.position(0), (1, 0));
        assert_eq!(index.position(4), (2, 1));
        assert_eq!(index.position(7), (4, 0));
        assert_eq!(index.line_text("ab\ncd\n\nef", 2), "cd\n");
    }
}
