//! Compensating resets: clear nodes and everything downstream of them, then reopen the
//! rules whose firings produced the cleared nodes.

use crate::core::workflow::scope::Scope;
use crate::core::workflow::state::WorkflowState;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResetSummary {
    pub reset_nodes: Vec<String>,
    pub reopened_rules: Vec<String>,
}

/// Transitive downstream of `ids`, excluding the ids themselves, without duplicates.
pub fn collective_downstream(state: &WorkflowState, ids: &[String]) -> Vec<String> {
    let start: HashSet<&str> = ids.iter().map(String::as_str).collect();
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for id in ids {
        for downstream in state.dag.descendants(id) {
            if start.contains(downstream.as_str()) {
                continue;
            }
            if seen.insert(downstream.clone()) {
                out.push(downstream);
            }
        }
    }
    out
}

/// Reset `ids` plus their downstream and reopen the owning rules, each once.
///
/// Seed steps keep their prepublished data through a reset. A reset seed at the root leaves
/// its bootstrap rule applied. A reset seed inside a sub-workflow reopens the rule that
/// opened that sub-workflow instead, since the seed data came from the cleared upstream;
/// the scope is then held back until that rule fires again and rebuilds it. Rules inside a
/// scope being rebuilt are not reopened on their own. Unknown ids are skipped.
pub fn reset_steps(state: &mut WorkflowState, ids: &[String]) -> ResetSummary {
    let mut known = Vec::with_capacity(ids.len());
    for id in ids {
        if state.dag.contains(id) {
            if !known.contains(id) {
                known.push(id.clone());
            }
        } else {
            tracing::warn!(node_id = %id, "reset skipped unknown node");
        }
    }
    let mut to_reset = known.clone();
    to_reset.extend(collective_downstream(state, &known));

    let owners = state.rule_steps_indices();
    let step_scopes: HashMap<String, Scope> = state
        .steps_by_stage
        .collect_steps(&Scope::root())
        .into_iter()
        .map(|(scope, id)| (id, scope))
        .collect();
    let mut summary = ResetSummary::default();
    let mut reopen: Vec<String> = Vec::new();
    for id in &to_reset {
        let Some(node) = state.dag.node_mut(id) else {
            continue;
        };
        node.reset();
        let seeded = node.task.prepublished.is_some();
        summary.reset_nodes.push(id.clone());
        let owner = if seeded {
            step_scopes
                .get(id)
                .and_then(|scope| owners.scope_to_rule.get(scope))
        } else {
            owners.step_to_rule.get(id)
        };
        if let Some(rule_id) = owner {
            if !reopen.contains(rule_id) {
                reopen.push(rule_id.clone());
            }
        }
    }

    let rebuilt: Vec<&Scope> = reopen
        .iter()
        .filter_map(|rule_id| owners.rule_to_scopes.get(rule_id))
        .flatten()
        .collect();
    for rule_id in reopen {
        let inside_rebuilt = state
            .rule(&rule_id)
            .map(|rule| rebuilt.iter().any(|scope| rule.offset.starts_with(scope)))
            .unwrap_or(false);
        if inside_rebuilt {
            continue;
        }
        if state.reopen_rule(&rule_id) {
            summary.reopened_rules.push(rule_id);
        }
    }
    tracing::info!(
        reset_nodes = summary.reset_nodes.len(),
        reopened_rules = summary.reopened_rules.len(),
        "reset applied"
    );
    summary
}

/// Reset every step the rule produced, including steps inside sub-workflows it opened,
/// plus their downstream.
pub fn reset_rule(state: &mut WorkflowState, rule_id: &str) -> Option<ResetSummary> {
    state.rule(rule_id)?;
    let mut owners = state.rule_steps_indices();
    let mut steps = owners.rule_to_steps.remove(rule_id).unwrap_or_default();
    if let Some(scopes) = owners.rule_to_scopes.get(rule_id) {
        steps.extend(
            state
                .steps_by_stage
                .collect_steps(&Scope::root())
                .into_iter()
                .filter(|(scope, _)| scopes.iter().any(|opened| scope.starts_with(opened)))
                .map(|(_, id)| id),
        );
    }
    Some(reset_steps(state, &steps))
}
