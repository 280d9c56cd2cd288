//! Input validation for documents and lookup keys.
//!
//! # Responsibilities
//! - Walk a `Payload` and check every map key and string value against the rule set
//! - Enforce structural limits (nesting depth, string length)
//! - Admit clean payloads unchanged, reject on the first violation
//!
//! # Design Decisions
//! - Fail-fast: `validate` stops at the first finding to bound cost on hostile input
//! - `inspect` collects every finding for diagnostics; admission is the same either way
//! - Deterministic order: map keys sorted, list items by index, rules in rule-set order
//! - The rule set sits behind `ArcSwap` so a reload never blocks validation

use std::ops::ControlFlow;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Serialize;
use thiserror::Error;

use crate::observability::metrics;
use crate::security::payload::{CleanPayload, Payload};
use crate::security::rules::{
    RuleCategory, RuleSet, Severity, EMPTY_KEY_RULE, MAX_DEPTH_RULE, MAX_STRING_RULE,
};

/// Field name used when a bare lookup key is validated.
pub const KEY_FIELD: &str = "key";

/// Whether a finding came from a map key or a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingLocation {
    Key,
    Value,
}

/// One rule match inside a payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationFinding {
    /// Dotted path to the offending field, e.g. `filters.price.$gt` or `items[2]`.
    pub field: String,
    pub rule_id: String,
    pub category: RuleCategory,
    pub severity: Severity,
    pub location: FindingLocation,
}

/// A rejected payload.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("field '{field}' rejected by rule '{rule_id}' ({category})")]
pub struct ValidationError {
    pub field: String,
    pub rule_id: String,
    pub category: RuleCategory,
    pub severity: Severity,
}

impl From<ValidationFinding> for ValidationError {
    fn from(finding: ValidationFinding) -> Self {
        Self {
            field: finding.field,
            rule_id: finding.rule_id,
            category: finding.category,
            severity: finding.severity,
        }
    }
}

/// Stateless (apart from its rule set) payload validator.
#[derive(Debug)]
pub struct InputValidator {
    rules: ArcSwap<RuleSet>,
}

impl InputValidator {
    /// Create a validator with the given rules.
    pub fn new(rules: RuleSet) -> Self {
        Self {
            rules: ArcSwap::from_pointee(rules),
        }
    }

    /// Replace the rule set. In-flight validations finish with the old set.
    pub fn reload_rules(&self, rules: RuleSet) {
        tracing::info!(rules = rules.len(), "Validator rule set replaced");
        self.rules.store(Arc::new(rules));
    }

    /// The rule set currently in force.
    pub fn rules(&self) -> Arc<RuleSet> {
        self.rules.load_full()
    }

    /// Admit `payload` unchanged or reject it on the first violation found.
    pub fn validate(&self, payload: Payload) -> Result<CleanPayload, ValidationError> {
        let rules = self.rules.load();
        let mut first = None;
        let _ = walk(&rules, &payload, &mut String::new(), 0, &mut |finding| {
            first = Some(finding);
            ControlFlow::Break(())
        });

        match first {
            None => Ok(CleanPayload::new(payload)),
            Some(finding) => Err(reject(finding)),
        }
    }

    /// Check a lookup key. Key-only and value-only rules both apply.
    pub fn validate_key(&self, key: &str) -> Result<(), ValidationError> {
        if key.trim().is_empty() {
            return Err(reject(ValidationFinding {
                field: KEY_FIELD.to_string(),
                rule_id: EMPTY_KEY_RULE.to_string(),
                category: RuleCategory::Structural,
                severity: Severity::Low,
                location: FindingLocation::Value,
            }));
        }

        let rules = self.rules.load();
        if key.len() > rules.max_string_len {
            return Err(reject(structural(KEY_FIELD, MAX_STRING_RULE, FindingLocation::Value)));
        }
        match rules.rules().iter().find(|rule| rule.is_match(key)) {
            Some(rule) => Err(reject(ValidationFinding {
                field: KEY_FIELD.to_string(),
                rule_id: rule.id.clone(),
                category: rule.category,
                severity: rule.severity,
                location: FindingLocation::Value,
            })),
            None => Ok(()),
        }
    }

    /// Every finding in `payload`, in traversal order. Does not log or count.
    pub fn inspect(&self, payload: &Payload) -> Vec<ValidationFinding> {
        let rules = self.rules.load();
        let mut findings = Vec::new();
        let _ = walk(&rules, payload, &mut String::new(), 0, &mut |finding| {
            findings.push(finding);
            ControlFlow::Continue(())
        });
        findings
    }
}

fn reject(finding: ValidationFinding) -> ValidationError {
    tracing::warn!(
        field = %finding.field,
        rule = %finding.rule_id,
        category = %finding.category,
        "Payload rejected"
    );
    metrics::record_validation_rejection(&finding.rule_id);
    finding.into()
}

fn structural(field: &str, rule_id: &str, location: FindingLocation) -> ValidationFinding {
    ValidationFinding {
        field: field.to_string(),
        rule_id: rule_id.to_string(),
        category: RuleCategory::Structural,
        severity: Severity::Medium,
        location,
    }
}

type Sink<'a> = dyn FnMut(ValidationFinding) -> ControlFlow<()> + 'a;

fn walk(
    rules: &RuleSet,
    node: &Payload,
    path: &mut String,
    depth: usize,
    sink: &mut Sink<'_>,
) -> ControlFlow<()> {
    if depth > rules.max_depth {
        return sink(structural(path, MAX_DEPTH_RULE, FindingLocation::Value));
    }

    match node {
        Payload::Null | Payload::Bool(_) | Payload::Number(_) => ControlFlow::Continue(()),
        Payload::String(s) => check_value(rules, s, path, sink),
        Payload::List(items) => {
            for (index, item) in items.iter().enumerate() {
                let restore = path.len();
                path.push_str(&format!("[{}]", index));
                let flow = walk(rules, item, path, depth + 1, sink);
                path.truncate(restore);
                flow?;
            }
            ControlFlow::Continue(())
        }
        Payload::Map(fields) => {
            for (key, value) in fields {
                let restore = path.len();
                if !path.is_empty() {
                    path.push('.');
                }
                path.push_str(key);
                let mut flow = check_key(rules, key, path, sink);
                if flow.is_continue() {
                    flow = walk(rules, value, path, depth + 1, sink);
                }
                path.truncate(restore);
                flow?;
            }
            ControlFlow::Continue(())
        }
    }
}

fn check_key(rules: &RuleSet, key: &str, path: &str, sink: &mut Sink<'_>) -> ControlFlow<()> {
    for rule in rules.rules().iter().filter(|r| r.target.matches_keys()) {
        if rule.is_match(key) {
            sink(ValidationFinding {
                field: path.to_string(),
                rule_id: rule.id.clone(),
                category: rule.category,
                severity: rule.severity,
                location: FindingLocation::Key,
            })?;
        }
    }
    ControlFlow::Continue(())
}

fn check_value(rules: &RuleSet, value: &str, path: &str, sink: &mut Sink<'_>) -> ControlFlow<()> {
    if value.len() > rules.max_string_len {
        sink(structural(path, MAX_STRING_RULE, FindingLocation::Value))?;
    }
    for rule in rules.rules().iter().filter(|r| r.target.matches_values()) {
        if rule.is_match(value) {
            sink(ValidationFinding {
                field: path.to_string(),
                rule_id: rule.id.clone(),
                category: rule.category,
                severity: rule.severity,
                location: FindingLocation::Value,
            })?;
        }
    }
    ControlFlow::Continue(())
}
