//! Consistency checks between the graph, the rule collections and the two scope trees.

use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use crate::core::workflow::scope::Scope;
use crate::core::workflow::state::WorkflowState;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub code: String,
    pub message: String,
}

impl ValidationIssue {
    fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.issues.iter().any(|issue| issue.code == code)
    }

    /// Error raised when a strict controller refuses to commit an inconsistent state.
    pub fn to_error(&self) -> AppError {
        let mut err = AppError::new(
            ErrorCategory::StateError,
            format!("workflow state is inconsistent: {}", self),
        )
        .with_code("RF-VALID-001");
        err.add_context("issues", &self.issues.len().to_string());
        err
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.issues.iter().map(ToString::to_string).collect();
        write!(f, "{}", parts.join("; "))
    }
}

pub fn validate(state: &WorkflowState) -> ValidationReport {
    let mut issues = Vec::new();
    check_steps(state, &mut issues);
    check_scopes(state, &mut issues);
    check_rules(state, &mut issues);
    ValidationReport { issues }
}

fn scopes_by_node(
    entries: Vec<(Scope, String)>,
    tree: &str,
    issues: &mut Vec<ValidationIssue>,
) -> HashMap<String, Scope> {
    let mut out = HashMap::new();
    for (scope, id) in entries {
        if out.insert(id.clone(), scope).is_some() {
            issues.push(ValidationIssue::new(
                "RF-V-002",
                format!("node {} is recorded more than once in the {}", id, tree),
            ));
        }
    }
    out
}

fn check_steps(state: &WorkflowState, issues: &mut Vec<ValidationIssue>) {
    let indexed = scopes_by_node(
        state.steps_by_stage.collect_steps(&Scope::root()),
        "step index",
        issues,
    );
    let booked = scopes_by_node(
        state.bookkeeping.collect_steps(&Scope::root()),
        "bookkeeping",
        issues,
    );

    for node in state.dag.nodes() {
        if !indexed.contains_key(&node.id) {
            issues.push(ValidationIssue::new(
                "RF-V-001",
                format!("node {} ({}) is missing from the step index", node.id, node.name),
            ));
        }
        if !booked.contains_key(&node.id) {
            issues.push(ValidationIssue::new(
                "RF-V-001",
                format!("node {} ({}) is missing from the bookkeeping", node.id, node.name),
            ));
        }
    }
    for (tree, recorded) in [("step index", &indexed), ("bookkeeping", &booked)] {
        for id in recorded.keys() {
            if !state.dag.contains(id) {
                issues.push(ValidationIssue::new(
                    "RF-V-003",
                    format!("{} references unknown node {}", tree, id),
                ));
            }
        }
    }
    for (id, scope) in &indexed {
        if let Some(other) = booked.get(id) {
            if other != scope {
                issues.push(ValidationIssue::new(
                    "RF-V-004",
                    format!(
                        "node {} is indexed under '{}' but booked under '{}'",
                        id, scope, other
                    ),
                ));
            }
        }
    }
}

fn check_scopes(state: &WorkflowState, issues: &mut Vec<ValidationIssue>) {
    let mut indexed: HashSet<Scope> = HashSet::from([Scope::root()]);
    for (position, offset) in state.steps_by_stage.collect_scopes(&Scope::root()) {
        if position != offset {
            issues.push(ValidationIssue::new(
                "RF-V-006",
                format!(
                    "sub-workflow at '{}' records offset '{}'",
                    position, offset
                ),
            ));
        }
        indexed.insert(position);
    }
    let booked: HashSet<Scope> = state.bookkeeping.collect_scopes().into_iter().collect();
    for scope in indexed.difference(&booked) {
        issues.push(ValidationIssue::new(
            "RF-V-005",
            format!("scope '{}' exists in the step index but not in the bookkeeping", scope),
        ));
    }
    for scope in booked.difference(&indexed) {
        issues.push(ValidationIssue::new(
            "RF-V-005",
            format!("scope '{}' exists in the bookkeeping but not in the step index", scope),
        ));
    }
}

fn check_rules(state: &WorkflowState, issues: &mut Vec<ValidationIssue>) {
    let mut pending = HashSet::new();
    for rule in &state.rules {
        if !pending.insert(rule.id.as_str()) {
            issues.push(ValidationIssue::new(
                "RF-V-007",
                format!("rule {} is listed twice as pending", rule.id),
            ));
        }
    }
    let mut applied = HashSet::new();
    for rule in &state.applied {
        if !applied.insert(rule.id.as_str()) {
            issues.push(ValidationIssue::new(
                "RF-V-007",
                format!("rule {} is listed twice as applied", rule.id),
            ));
        }
        if pending.contains(rule.id.as_str()) {
            issues.push(ValidationIssue::new(
                "RF-V-007",
                format!("rule {} is both pending and applied", rule.id),
            ));
        }
    }

    let booked = state.bookkeeping.collect_rules();
    for id in &booked {
        if !pending.contains(id.as_str()) && !applied.contains(id.as_str()) {
            issues.push(ValidationIssue::new(
                "RF-V-008",
                format!("bookkeeping references unknown rule {}", id),
            ));
        }
    }
    for rule in state.rules.iter().chain(state.applied.iter()) {
        let recorded = state
            .bookkeeping
            .resolve(&rule.offset)
            .map(|ledger| ledger.meta.rules.iter().any(|id| id == &rule.id))
            .unwrap_or(false);
        if !recorded {
            issues.push(ValidationIssue::new(
                "RF-V-009",
                format!(
                    "rule {} ({}) is not recorded in the bookkeeping at its offset",
                    rule.id,
                    rule.label()
                ),
            ));
        }
    }
}
