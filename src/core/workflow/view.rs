#![allow(clippy::result_large_err)] // View operations return AppError to keep scope diagnostics structured.

//! Scope-bound facades over a [`WorkflowState`].
//!
//! A view lets a rule act as if its scope were the root of its own workflow: queries run
//! against the step index at that scope and additions land there. Views borrow the state,
//! so every mutation goes straight into the underlying trees and graph.

use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use crate::core::workflow::graph::Node;
use crate::core::workflow::index::{Ledger, StageEntry, StepIndex};
use crate::core::workflow::query::{PathExpr, QueryMatch};
use crate::core::workflow::rule::{OffsetRule, Rule, MAX_SCOPE_DEPTH};
use crate::core::workflow::scope::Scope;
use crate::core::workflow::state::WorkflowState;
use crate::core::workflow::task::StepSpec;
use serde_json::Value;
use std::collections::HashSet;

/// Read-only view of a workflow at one scope.
#[derive(Clone, Copy)]
pub struct WorkflowView<'a> {
    state: &'a WorkflowState,
    scope: &'a Scope,
}

impl<'a> WorkflowView<'a> {
    pub fn new(state: &'a WorkflowState, scope: &'a Scope) -> Self {
        Self { state, scope }
    }

    pub fn scope(&self) -> &'a Scope {
        self.scope
    }

    pub fn state(&self) -> &'a WorkflowState {
        self.state
    }

    /// Step index subtree at this scope, if the scope exists.
    pub fn steps(&self) -> Option<&'a StepIndex> {
        self.state.steps_by_stage.resolve(self.scope)
    }

    pub fn bookkeeper(&self) -> Option<&'a Ledger> {
        self.state.bookkeeping.resolve(self.scope)
    }

    pub fn query(&self, expr: &str) -> Result<Vec<QueryMatch>, AppError> {
        let parsed = PathExpr::parse(expr)?;
        Ok(self
            .steps()
            .map(|steps| parsed.evaluate(steps))
            .unwrap_or_default())
    }

    /// Graph nodes referenced by the matches of `expr`. Sub-workflow matches contribute nothing.
    pub fn steps_for(&self, expr: &str) -> Result<Vec<&'a Node>, AppError> {
        let mut nodes = Vec::new();
        for found in self.query(expr)? {
            for entry in found.value.entries() {
                if let Some(node) = entry.node_id().and_then(|id| self.state.dag.node(id)) {
                    nodes.push(node);
                }
            }
        }
        Ok(nodes)
    }

    /// Find a rule by stage name at `offset` relative to this view, pending or applied.
    pub fn get_rule(&self, name: &str, offset: &Scope) -> Option<&'a OffsetRule> {
        let target = self.scope.join(offset);
        self.state
            .rules
            .iter()
            .chain(self.state.applied.iter())
            .find(|rule| rule.offset == target && rule.rule.name() == name)
    }

    pub fn entry_done(&self, entry: &StageEntry) -> Result<bool, AppError> {
        match entry {
            StageEntry::Step(step) => Ok(self
                .state
                .dag
                .node(&step.node_id)
                .map(Node::has_result)
                .unwrap_or(false)),
            StageEntry::Scope(sub) => self.scope_done(&sub.offset),
        }
    }

    /// Every rule recorded under `scope` is applied and every step has a result, recursively.
    pub fn scope_done(&self, scope: &Scope) -> Result<bool, AppError> {
        let Some(ledger) = self.state.bookkeeping.resolve(scope) else {
            return Ok(false);
        };
        if self.state.scope_superseded(scope) {
            return Ok(false);
        }
        let applied = self.state.applied_ids();
        self.ledger_done(ledger, &applied, scope.depth())
    }

    fn ledger_done(
        &self,
        ledger: &Ledger,
        applied: &HashSet<&str>,
        depth: usize,
    ) -> Result<bool, AppError> {
        if depth > MAX_SCOPE_DEPTH {
            return Err(AppError::new(
                ErrorCategory::StateError,
                format!(
                    "bookkeeping nests deeper than {} levels under {}",
                    MAX_SCOPE_DEPTH, self.scope
                ),
            )
            .with_code("RF-DEPTH-001"));
        }
        if !ledger
            .meta
            .rules
            .iter()
            .all(|id| applied.contains(id.as_str()))
        {
            return Ok(false);
        }
        let steps_ok = ledger.meta.steps.iter().all(|id| {
            self.state
                .dag
                .node(id)
                .map(Node::has_result)
                .unwrap_or(false)
        });
        if !steps_ok {
            return Ok(false);
        }
        for child in ledger.children.values() {
            if !self.ledger_done(child, applied, depth + 1)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Mutable view of a workflow at one scope.
pub struct WorkflowViewMut<'a> {
    state: &'a mut WorkflowState,
    scope: Scope,
}

impl<'a> WorkflowViewMut<'a> {
    pub fn new(state: &'a mut WorkflowState, scope: Scope) -> Self {
        Self { state, scope }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn as_view(&self) -> WorkflowView<'_> {
        WorkflowView::new(&*self.state, &self.scope)
    }

    /// Register `rule` as pending at `self.scope + relative`. Returns the new rule id.
    pub fn add_rule(&mut self, rule: Rule, relative: &Scope) -> Result<String, AppError> {
        let target = self.scope.join(relative);
        if self.state.steps_by_stage.resolve(&target).is_none() {
            return Err(AppError::new(
                ErrorCategory::LookupError,
                format!("cannot add rule '{}' at unknown scope '{}'", rule.name(), target),
            )
            .with_code("RF-SCOPE-002"));
        }
        let offset_rule = OffsetRule::new(rule, target.clone());
        let id = offset_rule.id.clone();
        tracing::debug!(rule = %offset_rule.rule.name(), scope = %target, rule_id = %id, "rule added");
        self.state.bookkeeping.ensure(&target).meta.rules.push(id.clone());
        self.state.rules.push(offset_rule);
        Ok(id)
    }

    /// Add every rule at this view's scope.
    pub fn add_rules(&mut self, rules: Vec<Rule>) -> Result<Vec<String>, AppError> {
        let mut ids = Vec::with_capacity(rules.len());
        for rule in rules {
            ids.push(self.add_rule(rule, &Scope::root())?);
        }
        Ok(ids)
    }

    /// Insert a node for `step` under `stage` at this scope, wired to its declared inputs.
    pub fn add_step(&mut self, step: StepSpec, stage: &str) -> Result<String, AppError> {
        validate_stage_name(stage)?;
        if self.state.steps_by_stage.resolve(&self.scope).is_none() {
            return Err(unknown_scope(&self.scope));
        }
        let node = Node::from_step(&step);
        let id = self.state.dag.add_node(node, &step.inputs)?;
        // Scope presence was checked above, so both trees accept the write.
        if let Some(index) = self.state.steps_by_stage.resolve_mut(&self.scope) {
            index.push_step(stage, &id);
        }
        self.state.bookkeeping.ensure(&self.scope).meta.steps.push(id.clone());
        tracing::debug!(step = %step.name, stage, scope = %self.scope, node_id = %id, "step added");
        Ok(id)
    }

    /// Open a new sub-workflow under `stage` and add `rules` inside it. Returns its scope.
    pub fn add_workflow(&mut self, rules: Vec<Rule>, stage: &str) -> Result<Scope, AppError> {
        validate_stage_name(stage)?;
        let Some(index) = self.state.steps_by_stage.resolve_mut(&self.scope) else {
            return Err(unknown_scope(&self.scope));
        };
        let (position, offset) = index.open_scope(stage, &self.scope);
        self.state.bookkeeping.ensure(&offset);
        let relative = Scope::root().child(stage, position);
        for rule in rules {
            self.add_rule(rule, &relative)?;
        }
        tracing::debug!(stage, scope = %offset, "sub-workflow added");
        Ok(offset)
    }

    /// Seed this scope with a bootstrap rule carrying `data`.
    pub fn init(&mut self, data: Value) -> Result<String, AppError> {
        self.add_rule(Rule::bootstrap(data), &Scope::root())
    }
}

fn unknown_scope(scope: &Scope) -> AppError {
    AppError::new(
        ErrorCategory::LookupError,
        format!("scope '{}' does not exist in the step index", scope),
    )
    .with_code("RF-SCOPE-002")
}

/// Stage names must be addressable by path expressions and distinguishable from indices.
pub fn validate_stage_name(stage: &str) -> Result<(), AppError> {
    let valid = !stage.is_empty()
        && !stage.chars().all(|c| c.is_ascii_digit())
        && stage
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(AppError::new(
            ErrorCategory::ValidationError,
            format!("invalid stage name '{}'", stage),
        )
        .with_code("RF-STAGE-001"))
    }
}
