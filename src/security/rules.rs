//! Rejection rules for the input validator.
//!
//! # Responsibilities
//! - Define the built-in rule catalogue (injection, traversal, null bytes)
//! - Compile custom rules from configuration
//! - Carry structural limits (nesting depth, string length)
//!
//! # Design Decisions
//! - Rules are evaluated in catalogue order, custom rules last
//! - A rule targets map keys, string values, or both
//! - Patterns are compiled once per rule set; a rule set is immutable after build

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::schema::{RuleConfig, ValidatorConfig};

/// Rule id for payloads nested deeper than the configured limit.
pub const MAX_DEPTH_RULE: &str = "max-depth";
/// Rule id for oversized string values.
pub const MAX_STRING_RULE: &str = "max-string-length";
/// Rule id for empty lookup keys.
pub const EMPTY_KEY_RULE: &str = "empty-key";

/// What kind of attack a rule detects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleCategory {
    ScriptInjection,
    ShellMetacharacter,
    QueryInjection,
    OperatorInjection,
    PathTraversal,
    NullByte,
    Structural,
}

impl RuleCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleCategory::ScriptInjection => "script-injection",
            RuleCategory::ShellMetacharacter => "shell-metacharacter",
            RuleCategory::QueryInjection => "query-injection",
            RuleCategory::OperatorInjection => "operator-injection",
            RuleCategory::PathTraversal => "path-traversal",
            RuleCategory::NullByte => "null-byte",
            RuleCategory::Structural => "structural",
        }
    }
}

impl fmt::Display for RuleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Which part of a map entry a rule inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuleTarget {
    Key,
    #[default]
    Value,
    Both,
}

impl RuleTarget {
    pub fn matches_keys(&self) -> bool {
        matches!(self, RuleTarget::Key | RuleTarget::Both)
    }

    pub fn matches_values(&self) -> bool {
        matches!(self, RuleTarget::Value | RuleTarget::Both)
    }
}

/// A compiled rejection rule.
#[derive(Debug, Clone)]
pub struct Rule {
    pub id: String,
    pub category: RuleCategory,
    pub severity: Severity,
    pub target: RuleTarget,
    pattern: Regex,
}

impl Rule {
    /// Compile a rule.
    pub fn new(
        id: impl Into<String>,
        category: RuleCategory,
        severity: Severity,
        target: RuleTarget,
        pattern: &str,
    ) -> Result<Self, RuleError> {
        let id = id.into();
        let pattern = Regex::new(pattern).map_err(|source| RuleError::InvalidPattern {
            id: id.clone(),
            source,
        })?;
        Ok(Self {
            id,
            category,
            severity,
            target,
            pattern,
        })
    }

    /// Whether `text` trips this rule.
    pub fn is_match(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }
}

/// Errors building a rule set.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("rule '{id}' has an invalid pattern: {source}")]
    InvalidPattern {
        id: String,
        #[source]
        source: regex::Error,
    },

    #[error("rule '{0}' is defined more than once")]
    DuplicateId(String),

    #[error("disabled rule '{0}' does not exist")]
    UnknownDisabledRule(String),
}

struct Builtin {
    id: &'static str,
    category: RuleCategory,
    severity: Severity,
    target: RuleTarget,
    pattern: &'static str,
}

const BUILTIN_RULES: &[Builtin] = &[
    Builtin {
        id: "null-byte",
        category: RuleCategory::NullByte,
        severity: Severity::Critical,
        target: RuleTarget::Both,
        pattern: r"(?i)\x00|%00|\\0|\\x00|\\u0000",
    },
    Builtin {
        id: "nosql-operator-key",
        category: RuleCategory::OperatorInjection,
        severity: Severity::Critical,
        target: RuleTarget::Key,
        pattern: r"^\s*\$",
    },
    Builtin {
        id: "nosql-operator-value",
        category: RuleCategory::OperatorInjection,
        severity: Severity::High,
        target: RuleTarget::Value,
        pattern: r#"(?i)^\s*\$[a-z]+|\{\s*["']?\$[a-z]+["']?\s*:"#,
    },
    Builtin {
        id: "script-injection",
        category: RuleCategory::ScriptInjection,
        severity: Severity::Critical,
        target: RuleTarget::Both,
        pattern: r"(?i)(<|%3c|&lt;)\s*(/|%2f)?\s*script\b",
    },
    Builtin {
        id: "markup-injection",
        category: RuleCategory::ScriptInjection,
        severity: Severity::High,
        target: RuleTarget::Both,
        pattern: r"(?i)(<|%3c|&lt;)\s*(iframe|object|embed|svg|style|link|meta|base|form)\b",
    },
    Builtin {
        id: "markup-event-handler",
        category: RuleCategory::ScriptInjection,
        severity: Severity::High,
        target: RuleTarget::Both,
        pattern: r"(?i)<[^>]*\bon[a-z]+\s*=",
    },
    Builtin {
        id: "javascript-uri",
        category: RuleCategory::ScriptInjection,
        severity: Severity::High,
        target: RuleTarget::Both,
        pattern: r"(?i)\b(javascript|vbscript)\s*:|\bdata\s*:\s*text/html",
    },
    Builtin {
        id: "path-traversal",
        category: RuleCategory::PathTraversal,
        severity: Severity::High,
        target: RuleTarget::Both,
        pattern: r"(?i)\.\.[/\\]|[/\\]\.\.$|%2e%2e(%2f|%5c|/|\\)|\.\.%2f|\.\.%5c|%252e%252e",
    },
    Builtin {
        id: "shell-metacharacter",
        category: RuleCategory::ShellMetacharacter,
        severity: Severity::High,
        target: RuleTarget::Both,
        pattern: r"[;|`]|&&|\$\(|\$\{",
    },
    Builtin {
        id: "sql-injection",
        category: RuleCategory::QueryInjection,
        severity: Severity::High,
        target: RuleTarget::Both,
        pattern: r#"(?i)\bunion\s+(all\s+)?select\b|\b(drop|truncate|alter)\s+table\b|\binsert\s+into\b|\bdelete\s+from\b|['"]\s*(or|and)\s+['"\w]+\s*=|--\s*$|/\*|\*/|\bexec(\s+|\s*\()"#,
    },
];

/// Ids of every built-in rule, in evaluation order.
pub fn builtin_rule_ids() -> impl Iterator<Item = &'static str> {
    BUILTIN_RULES.iter().map(|b| b.id)
}

/// The compiled, immutable rule set used by the validator.
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<Rule>,
    /// Deepest allowed nesting (root is depth 0).
    pub max_depth: usize,
    /// Longest allowed string value, in bytes.
    pub max_string_len: usize,
}

impl RuleSet {
    /// All built-in rules with the given structural limits.
    ///
    /// Fails if any built-in pattern does not compile; a partial set is never returned.
    pub fn builtin(max_depth: usize, max_string_len: usize) -> Result<Self, RuleError> {
        let rules = BUILTIN_RULES
            .iter()
            .map(|b| Rule::new(b.id, b.category, b.severity, b.target, b.pattern))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            rules,
            max_depth,
            max_string_len,
        })
    }

    /// Build from validator configuration: built-ins minus disabled ones, then custom rules.
    pub fn from_config(config: &ValidatorConfig) -> Result<Self, RuleError> {
        for disabled in &config.disabled_rules {
            if !builtin_rule_ids().any(|id| id == disabled) {
                return Err(RuleError::UnknownDisabledRule(disabled.clone()));
            }
        }

        let mut set = Self::builtin(config.max_depth, config.max_string_len)?;
        set.rules
            .retain(|rule| !config.disabled_rules.iter().any(|d| d == &rule.id));

        for custom in &config.rules {
            set.push(compile_custom(custom)?)?;
        }
        Ok(set)
    }

    /// Append a rule; ids must be unique.
    pub fn push(&mut self, rule: Rule) -> Result<(), RuleError> {
        if self.rules.iter().any(|r| r.id == rule.id) {
            return Err(RuleError::DuplicateId(rule.id));
        }
        self.rules.push(rule);
        Ok(())
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}


fn compile_custom(config: &RuleConfig) -> Result<Rule, RuleError> {
    Rule::new(
        config.id.clone(),
        config.category,
        config.severity,
        config.target,
        &config.pattern,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> RuleSet {
        RuleSet::from_config(&ValidatorConfig::default()).unwrap()
    }

    fn rule(set: &RuleSet, id: &str) -> Rule {
        set.rules().iter().find(|r| r.id == id).cloned().unwrap()
    }

    #[test]
    fn test_builtin_patterns_compile() {
        let set = RuleSet::builtin(4, 64).unwrap();
        assert_eq!(set.len(), BUILTIN_RULES.len());
        assert!(builtin_rule_ids().eq(set.rules().iter().map(|r| r.id.as_str())));
    }

    #[test]
    fn test_builtin_rules_match_attacks() {
        let set = defaults();
        let cases = [
            ("script-injection", "<script>alert(1)</script>"),
            ("script-injection", "< SCRIPT src=x>"),
            ("script-injection", "%3Cscript%3Ealert(1)%3C/script%3E"),
            ("script-injection", "%3c%2Fscript%3e"),
            ("script-injection", "&lt;script&gt;alert(1)"),
            ("markup-injection", "%3Ciframe src=//evil%3E"),
            ("markup-injection", "<iframe src=//evil>"),
            ("markup-event-handler", "<img src=x onerror=alert(1)>"),
            ("javascript-uri", "javascript:alert(1)"),
            ("shell-metacharacter", "a; rm -rf /"),
            ("shell-metacharacter", "$(whoami)"),
            ("shell-metacharacter", "`id`"),
            ("sql-injection", "' OR '1'='1"),
            ("sql-injection", "1 UNION SELECT password"),
            ("sql-injection", "x; DROP TABLE users"),
            ("nosql-operator-key", "$where"),
            ("nosql-operator-value", "$ne"),
            ("nosql-operator-value", r#"{"$gt": ""}"#),
            ("path-traversal", "../../etc/passwd"),
            ("path-traversal", "..%2f..%2fetc"),
            ("path-traversal", r"..\windows"),
            ("null-byte", "file.txt\0.jpg"),
            ("null-byte", "file%00.jpg"),
        ];
        for (id, input) in cases {
            assert!(rule(&set, id).is_match(input), "{} should match {:?}", id, input);
        }
    }

    #[test]
    fn test_builtin_rules_admit_ordinary_values() {
        let set = defaults();
        let ordinary = [
            "sku-42",
            "Blue cotton t-shirt, size M",
            "$19.99",
            "store/aisle-7",
            "2024-03-10T14:30:00Z",
            "user@example.com",
            "a < b and c > d",
        ];
        for input in ordinary {
            for r in set.rules().iter().filter(|r| r.target.matches_values()) {
                assert!(!r.is_match(input), "{} should not match {:?}", r.id, input);
            }
        }
    }

    #[test]
    fn test_from_config_disables_and_extends() {
        let mut config = ValidatorConfig::default();
        config.disabled_rules = vec!["shell-metacharacter".into()];
        config.rules.push(RuleConfig {
            id: "no-credit-cards".into(),
            category: RuleCategory::QueryInjection,
            severity: Severity::Medium,
            target: RuleTarget::Value,
            pattern: r"\b\d{4}-\d{4}-\d{4}-\d{4}\b".into(),
        });

        let set = RuleSet::from_config(&config).unwrap();
        assert!(set.rules().iter().all(|r| r.id != "shell-metacharacter"));
        assert_eq!(set.rules().last().unwrap().id, "no-credit-cards");
    }

    #[test]
    fn test_from_config_rejects_bad_input() {
        let mut config = ValidatorConfig::default();
        config.disabled_rules = vec!["does-not-exist".into()];
        assert!(matches!(
            RuleSet::from_config(&config),
            Err(RuleError::UnknownDisabledRule(_))
        ));

        let mut config = ValidatorConfig::default();
        config.rules.push(RuleConfig {
            id: "broken".into(),
            category: RuleCategory::Structural,
            severity: Severity::Low,
            target: RuleTarget::Value,
            pattern: "(unclosed".into(),
        });
        assert!(matches!(
            RuleSet::from_config(&config),
            Err(RuleError::InvalidPattern { .. })
        ));

        let mut config = ValidatorConfig::default();
        config.rules.push(RuleConfig {
            id: "null-byte".into(),
            category: RuleCategory::NullByte,
            severity: Severity::Low,
            target: RuleTarget::Value,
            pattern: "x".into(),
        });
        assert!(matches!(
            RuleSet::from_config(&config),
            Err(RuleError::DuplicateId(_))
        ));
    }
}
