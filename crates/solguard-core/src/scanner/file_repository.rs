use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use once_cell::sync::OnceCell;
use serde::Deserialize;
use tracing::debug;

use super::{Rule, RuleRepository};
use crate::model::Severity;

const DEFAULT_CONFIDENCE: f32 = 0.5;

/// Loads custom lexical rules from `rules.json` and `rules.yaml` (or `rules.yml`) under a base directory.
///
/// Both files hold a list of rule entries. Ids must be unique across files.
pub struct FileRuleRepository {
    base_path: PathBuf,
    cache: OnceCell<Vec<Rule>>,
}

impl FileRuleRepository {
    /// Create a repository rooted at the given directory.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            cache: OnceCell::new(),
        }
    }

    fn json_path(&self) -> PathBuf {
        self.base_path.join("rules.json")
    }

    fn yaml_path(&self) -> Option<PathBuf> {
        ["rules.yaml", "rules.yml"]
            .iter()
            .map(|name| self.base_path.join(name))
            .find(|path| path.exists())
    }

    fn load_json(&self, seen: &mut HashSet<String>) -> Result<Vec<Rule>> {
        let path = self.json_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read rule file at {}", path.display()))?;
        let entries: Vec<RuleEntry> = serde_json::from_str(&raw).with_context(|| {
            format!("invalid JSON structure in rule file at {}", path.display())
        })?;
        build_rules(entries, &path, seen)
    }

    fn load_yaml(&self, seen: &mut HashSet<String>) -> Result<Vec<Rule>> {
        let Some(path) = self.yaml_path() else {
            return Ok(Vec::new());
        };
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read rule file at {}", path.display()))?;
        let entries: Vec<RuleEntry> = serde_yaml::from_str(&raw).with_context(|| {
            format!("invalid YAML structure in rule file at {}", path.display())
        })?;
        build_rules(entries, &path, seen)
    }
}

fn build_rules(entries: Vec<RuleEntry>, path: &Path, seen: &mut HashSet<String>) -> Result<Vec<Rule>> {
    let mut rules = Vec::with_capacity(entries.len());
    for entry in entries {
        if !seen.insert(entry.id.clone()) {
            return Err(anyhow!("duplicate rule id `{}`", entry.id));
        }
        let severity = Severity::parse(&entry.severity).ok_or_else(|| {
            anyhow!(
                "unknown severity `{}` for rule `{}` in {}",
                entry.severity,
                entry.id,
                path.display()
            )
        })?;
        let id = entry.id.clone();
        let rule = Rule::lexical(
            entry.id,
            entry.name,
            severity,
            entry.description,
            &entry.pattern,
            entry.recommendation,
            entry.references,
            entry.confidence,
        )
        .with_context(|| format!("invalid rule `{id}` in {}", path.display()))?;
        rules.push(rule);
    }
    Ok(rules)
}

#[async_trait::async_trait]
impl RuleRepository for FileRuleRepository {
    async fn load_rules(&self) -> Result<Vec<Rule>> {
        let rules = self.cache.get_or_try_init(|| {
            let mut seen = HashSet::new();
            let mut rules = self.load_json(&mut seen)?;
            rules.extend(self.load_yaml(&mut seen)?);
            debug!(path = %self.base_path.display(), rules = rules.len(), "custom rules loaded");
            Ok::<_, anyhow::Error>(rules)
        })?;
        Ok(rules.clone())
    }

    async fn get_rule(&self, rule_id: &str) -> Result<Option<Rule>> {
        let rules = self.load_rules().await?;
        Ok(rules.into_iter().find(|rule| rule.id == rule_id))
    }
}

#[derive(Deserialize)]
struct RuleEntry {
    id: String,
    name: String,
    severity: String,
    #[serde(default)]
    description: String,
    pattern: String,
    #[serde(default)]
    recommendation: String,
    #[serde(default)]
    references: Vec<String>,
    #[serde(default = "default_confidence")]
    confidence: f32,
}

fn default_confidence() -> f32 {
    DEFAULT_CONFIDENCE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::Matcher;
    use proptest::prelude::*;
    use serde_json::json;

    fn write(path: &Path, contents: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    fn load(path: &Path) -> Result<Vec<Rule>> {
        let repo = FileRuleRepository::new(path);
        futures::executor::block_on(RuleRepository::load_rules(&repo))
    }

    #[test]
    fn loads_json_and_yaml_rules() {
        let temp = tempfile::tempdir().unwrap();
        write(
            &temp.path().join("rules.json"),
            r#"
[
    {
        "id": "CUSTOM-01",
        "name": "Inline assembly",
        "severity": "MEDIUM",
        "description": "Inline assembly bypasses compiler checks",
        "pattern": "assembly\\s*\\{",
        "references": ["Best Practice"],
        "confidence": 0.7
    }
]
"#,
        );
        write(
            &temp.path().join("rules.yaml"),
            r#"
- id: CUSTOM-02
  name: Hardcoded gas
  severity: low
  pattern: 'gas:\s*\d+'
  recommendation: Avoid fixed gas stipends
"#,
        );

        let rules = load(temp.path()).unwrap();
        let ids: Vec<_> = rules.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["CUSTOM-01", "CUSTOM-02"]);
        assert_eq!(rules[0].severity, Severity::Medium);
        assert_eq!(rules[1].severity, Severity::Low);
        assert!((rules[1].confidence - DEFAULT_CONFIDENCE).abs() < f32::EPSILON);
        assert!(matches!(rules[0].matcher, Matcher::Lexical(_)));
    }

    #[test]
    fn missing_files_yield_no_rules() {
        let temp = tempfile::tempdir().unwrap();
        assert!(load(temp.path()).unwrap().is_empty());
    }

    #[test]
    fn duplicate_ids_across_files_error() {
        let temp = tempfile::tempdir().unwrap();
        write(
            &temp.path().join("rules.json"),
            r#"[{"id": "DUP", "name": "a", "severity": "LOW", "pattern": "a"}]"#,
        );
        write(
            &temp.path().join("rules.yml"),
            "- id: DUP\n  name: b\n  severity: LOW\n  pattern: b\n",
        );
        let err = load(temp.path()).unwrap_err();
        assert!(err.to_string().contains("duplicate rule id `DUP`"));
    }

    #[test]
    fn invalid_regex_and_severity_are_rejected() {
        let temp = tempfile::tempdir().unwrap();
        write(
            &temp.path().join("rules.json"),
            r#"[{"id": "BAD-01", "name": "bad", "severity": "LOW", "pattern": "(unclosed"}]"#,
        );
        let err = load(temp.path()).unwrap_err();
        assert!(format!("{err:#}").contains("does not compile"));

        let temp = tempfile::tempdir().unwrap();
        write(
            &temp.path().join("rules.json"),
            r#"[{"id": "BAD-02", "name": "bad", "severity": "SEVERE", "pattern": "x"}]"#,
        );
        let err = load(temp.path()).unwrap_err();
        assert!(err.to_string().contains("unknown severity `SEVERE`"));
    }

    #[test]
    fn get_rule_uses_cached_load() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("rules.json");
        write(
            &path,
            r#"[{"id": "CACHED-01", "name": "cached", "severity": "INFO", "pattern": "x"}]"#,
        );
        let repo = FileRuleRepository::new(temp.path());
        futures::executor::block_on(repo.load_rules()).unwrap();
        fs::remove_file(&path).unwrap();
        let rule = futures::executor::block_on(repo.get_rule("CACHED-01")).unwrap();
        assert_eq!(rule.map(|r| r.name), Some("cached".to_string()));
    }

    #[test]
    fn loads_sample_rule_pack_from_repo() {
        let repo_path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../rules")
            .canonicalize()
            .expect("rules directory should exist");
        let rules = load(&repo_path).expect("sample rules should parse");
        assert!(
            rules.iter().any(|rule| rule.id == "ASM-01"),
            "rules.yaml should provide ASM-01"
        );
    }

    fn plain_text() -> impl Strategy<Value = String> {
        proptest::string::string_regex("[A-Za-z0-9 _\\-]{3,48}")
            .unwrap()
            .prop_filter("text must contain non-whitespace", |s| !s.trim().is_empty())
    }

    proptest! {
        #[test]
        fn json_rules_round_trip(
            entries in proptest::collection::vec(
                (plain_text(), plain_text(), 0.0f32..=1.0f32, 0usize..5),
                1..12
            )
        ) {
            let temp = tempfile::tempdir().unwrap();
            let items: Vec<_> = entries
                .iter()
                .enumerate()
                .map(|(idx, (name, pattern, confidence, severity))| {
                    json!({
                        "id": format!("AUTO-{idx:02}"),
                        "name": name,
                        "severity": Severity::ALL[*severity].as_str(),
                        "pattern": regex::escape(pattern),
                        "confidence": confidence,
                    })
                })
                .collect();
            write(&temp.path().join("rules.json"), &serde_json::to_string(&items).unwrap());

            let rules = load(temp.path()).expect("generated rules should parse");
            prop_assert_eq!(rules.len(), entries.len());
            for (rule, (_, _, _, severity)) in rules.iter().zip(&entries) {
                prop_assert_eq!(rule.severity, Severity::ALL[*severity]);
                prop_assert!((0.0..=1.0).contains(&rule.confidence));
            }
        }
    }

    proptest! {
        #[test]
        fn duplicate_ids_trigger_error(pattern in plain_text()) {
            let temp = tempfile::tempdir().unwrap();
            let yaml = format!(
                "- id: DUPLICATE_ID\n  name: one\n  severity: LOW\n  pattern: '{p}'\n- id: DUPLICATE_ID\n  name: two\n  severity: LOW\n  pattern: '{p}_again'\n",
                p = regex::escape(&pattern)
            );
            write(&temp.path().join("rules.yaml"), &yaml);
            let err = load(temp.path()).expect_err("duplicate ids should error");
            prop_assert!(err.to_string().contains("duplicate rule id"));
        }
    }
}
