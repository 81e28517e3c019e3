#![allow(clippy::result_large_err)] // Controller operations return AppError directly for structured diagnostics.

//! Controllers drive a workflow state through its lifecycle: find applicable rules, apply
//! them, submit ready nodes and pull execution results back from the backend.
//!
//! [`Controller`] owns its state in memory. [`PersistentController`] wraps every mutating
//! step in [`with_transaction`] so the external store stays the source of truth between
//! invocations. Both run the same operations from [`ops`].

use crate::core::config::EngineConfig;
use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use crate::core::workflow::backend::ExecutionBackend;
use crate::core::workflow::handler::HandlerRegistry;
use crate::core::workflow::reset::ResetSummary;
use crate::core::workflow::rule::{OffsetRule, Rule};
use crate::core::workflow::scope::Scope;
use crate::core::workflow::state::WorkflowState;
use crate::core::workflow::store::{open_store, StateSpec, StateStore};
use crate::core::workflow::validate::{validate, ValidationReport};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// What a transaction does when the mutated state fails validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationPolicy {
    /// Log the issues and commit anyway.
    #[default]
    Lenient,
    /// Refuse to commit.
    Strict,
}

impl FromStr for ValidationPolicy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lenient" => Ok(ValidationPolicy::Lenient),
            "strict" => Ok(ValidationPolicy::Strict),
            other => Err(AppError::new(
                ErrorCategory::ConfigurationError,
                format!("unknown validation policy '{}', expected lenient or strict", other),
            )),
        }
    }
}

impl fmt::Display for ValidationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationPolicy::Lenient => write!(f, "lenient"),
            ValidationPolicy::Strict => write!(f, "strict"),
        }
    }
}

/// A step that firing a rule would add.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviewNode {
    pub id: String,
    pub name: String,
    pub upstream: Vec<String>,
}

/// What firing a pending rule would change, worked out on a copy of the state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RulePreview {
    pub rule_id: String,
    pub label: String,
    pub applicable: bool,
    pub new_rules: Vec<OffsetRule>,
    pub new_nodes: Vec<PreviewNode>,
    /// Nodes an earlier firing left that would be replaced.
    pub retired_nodes: Vec<String>,
}

/// Load the latest state, run `f` against it, validate, then commit.
///
/// An error from `f` propagates before anything is committed.
pub async fn with_transaction<T, F>(
    store: &dyn StateStore,
    policy: ValidationPolicy,
    f: F,
) -> Result<(WorkflowState, T), AppError>
where
    F: FnOnce(&mut WorkflowState) -> Result<T, AppError> + Send,
    T: Send,
{
    let mut state = store.load().await?;
    let value = f(&mut state)?;
    let report = validate(&state);
    if !report.is_valid() {
        match policy {
            ValidationPolicy::Lenient => {
                tracing::warn!(
                    store = %store.describe(),
                    issues = report.issues.len(),
                    details = %report,
                    "committing workflow state that failed validation"
                );
            }
            ValidationPolicy::Strict => return Err(report.to_error()),
        }
    }
    store.commit(&state).await?;
    Ok((state, value))
}

/// Controller operations over a bare [`WorkflowState`].
pub mod ops {
    use super::*;
    use crate::core::workflow::graph::NodeState;
    use crate::core::workflow::reset::reset_steps;
    use std::collections::HashSet;

    pub fn applicable_rules(state: &WorkflowState) -> Result<Vec<String>, AppError> {
        let mut ids = Vec::new();
        for rule in &state.rules {
            if rule.applicable(state)? {
                ids.push(rule.id.clone());
            }
        }
        Ok(ids)
    }

    /// Apply pending rules in the given order. Every id is checked before any rule runs, and
    /// a failing rule leaves the state as it was before that rule.
    pub fn apply_rules(
        state: &mut WorkflowState,
        registry: &HandlerRegistry,
        ids: &[String],
    ) -> Result<(), AppError> {
        for id in ids {
            if !state.is_pending(id) {
                return Err(AppError::new(
                    ErrorCategory::StateError,
                    format!("rule {} is not pending", id),
                )
                .with_code("RF-RULE-001"));
            }
        }
        for id in ids {
            let Some(rule) = state.rule(id).cloned() else {
                continue;
            };
            let snapshot = state.clone();
            let retired = state.retire_rule_steps(id);
            if !retired.is_empty() {
                tracing::debug!(
                    rule = %rule.label(),
                    nodes = retired.nodes.len(),
                    scopes = retired.scopes.len(),
                    rules = retired.rules.len(),
                    "retired work of earlier firing"
                );
            }
            if let Err(err) = rule.apply(state, registry) {
                *state = snapshot;
                tracing::warn!(rule = %rule.label(), rule_id = %id, error = %err, "rule application failed");
                return Err(err);
            }
            state.mark_applied(id);
            tracing::debug!(rule = %rule.label(), rule_id = %id, "rule applied");
        }
        Ok(())
    }

    /// Defined nodes without a result whose upstream is complete and whose rule is applied.
    /// Steps inside a sub-workflow waiting to be rebuilt are held back.
    pub fn submittable_nodes(state: &WorkflowState) -> Vec<String> {
        let owners = state.rule_steps_indices();
        let held: HashSet<String> = state
            .steps_by_stage
            .collect_steps(&Scope::root())
            .into_iter()
            .filter(|(scope, _)| !scope.is_root() && state.scope_superseded(scope))
            .map(|(_, id)| id)
            .collect();
        state
            .dag
            .nodes()
            .filter(|node| node.state == NodeState::Defined && !node.has_result())
            .filter(|node| !held.contains(&node.id))
            .filter(|node| {
                owners
                    .step_to_rule
                    .get(&node.id)
                    .map(|rule_id| !state.is_pending(rule_id))
                    .unwrap_or(true)
            })
            .filter(|node| state.dag.upstream_complete(&node.id))
            .map(|node| node.id.clone())
            .collect()
    }

    /// Hand payloads to the backend. Returns the ids actually submitted.
    pub fn submit_nodes(
        state: &mut WorkflowState,
        backend: &dyn ExecutionBackend,
        ids: &[String],
    ) -> Vec<String> {
        let mut submitted = Vec::new();
        for id in ids {
            let Some(node) = state.dag.node_mut(id) else {
                tracing::warn!(node_id = %id, "submit skipped unknown node");
                continue;
            };
            if node.state != NodeState::Defined || node.has_result() {
                continue;
            }
            match backend.submit(&node.task) {
                Ok(handle) => {
                    tracing::debug!(node_id = %id, step = %node.name, handle = %handle, "node submitted");
                    node.mark_submitted(handle);
                    submitted.push(id.clone());
                }
                Err(err) => {
                    tracing::warn!(node_id = %id, step = %node.name, error = %err, "submission failed");
                    node.state = NodeState::Failed;
                    node.finished_at = Some(chrono::Utc::now());
                }
            }
        }
        submitted
    }

    /// Poll every in-flight node. Returns how many nodes changed state.
    pub fn sync_backend(state: &mut WorkflowState, backend: &dyn ExecutionBackend) -> usize {
        let mut changed = 0;
        for node in state.dag.nodes_mut() {
            if !node.state.is_in_flight() {
                continue;
            }
            let Some(handle) = node.backend_handle.clone() else {
                continue;
            };
            let outcome = match backend.poll(&handle) {
                Ok(outcome) => outcome,
                Err(err) => {
                    tracing::warn!(node_id = %node.id, handle = %handle, error = %err, "poll failed");
                    continue;
                }
            };
            if outcome.state == node.state {
                continue;
            }
            node.state = outcome.state;
            if outcome.state.is_terminal() {
                node.finished_at = Some(chrono::Utc::now());
                if outcome.state == NodeState::Succeeded {
                    node.result = outcome.result;
                }
            }
            tracing::debug!(node_id = %node.id, step = %node.name, state = node.state.as_str(), "node state synced");
            changed += 1;
        }
        changed
    }

    pub fn finished(state: &WorkflowState) -> Result<bool, AppError> {
        if state.dag.nodes().any(|node| node.state.is_in_flight()) {
            return Ok(false);
        }
        if !submittable_nodes(state).is_empty() {
            return Ok(false);
        }
        Ok(applicable_rules(state)?.is_empty())
    }

    pub fn successful(state: &WorkflowState) -> Result<bool, AppError> {
        Ok(finished(state)? && !state.dag.nodes().any(|node| node.state == NodeState::Failed))
    }

    /// Fire `rule_id` on a copy of `state` and report what it would add. `state` is untouched.
    pub fn preview_rule(
        state: &WorkflowState,
        registry: &HandlerRegistry,
        rule_id: &str,
    ) -> Result<RulePreview, AppError> {
        let Some(rule) = state.rules.iter().find(|rule| rule.id == rule_id) else {
            return Err(AppError::new(
                ErrorCategory::StateError,
                format!("rule {} is not pending", rule_id),
            )
            .with_code("RF-RULE-001"));
        };
        let applicable = rule.applicable(state)?;
        let mut copy = state.clone();
        apply_rules(&mut copy, registry, &[rule_id.to_string()])?;

        let known_rules: HashSet<&str> = state
            .rules
            .iter()
            .chain(state.applied.iter())
            .map(|rule| rule.id.as_str())
            .collect();
        let new_rules = copy
            .rules
            .iter()
            .chain(copy.applied.iter())
            .filter(|rule| !known_rules.contains(rule.id.as_str()))
            .cloned()
            .collect();
        let new_nodes = copy
            .dag
            .nodes()
            .filter(|node| !state.dag.contains(&node.id))
            .map(|node| PreviewNode {
                id: node.id.clone(),
                name: node.name.clone(),
                upstream: copy
                    .dag
                    .predecessors(&node.id)
                    .iter()
                    .map(|parent| parent.id.clone())
                    .collect(),
            })
            .collect();
        let retired_nodes = state
            .dag
            .node_ids()
            .into_iter()
            .filter(|id| !copy.dag.contains(id))
            .collect();
        Ok(RulePreview {
            rule_id: rule_id.to_string(),
            label: rule.label(),
            applicable,
            new_rules,
            new_nodes,
            retired_nodes,
        })
    }

    /// Submittable nodes that `rule_id` produced.
    pub fn rule_submittable_nodes(
        state: &WorkflowState,
        rule_id: &str,
    ) -> Result<Vec<String>, AppError> {
        if state.rule(rule_id).is_none() {
            return Err(AppError::new(
                ErrorCategory::LookupError,
                format!("unknown rule {}", rule_id),
            )
            .with_code("RF-RULE-002"));
        }
        let owners = state.rule_steps_indices();
        Ok(submittable_nodes(state)
            .into_iter()
            .filter(|id| owners.step_to_rule.get(id).map(String::as_str) == Some(rule_id))
            .collect())
    }

    pub fn reset_nodes(state: &mut WorkflowState, ids: &[String]) -> ResetSummary {
        reset_steps(state, ids)
    }

    /// Open a sub-workflow holding `rules` under `stage` at `offset`.
    pub fn add_workflow(
        state: &mut WorkflowState,
        rules: Vec<Rule>,
        offset: &Scope,
        stage: &str,
    ) -> Result<Scope, AppError> {
        let snapshot = state.clone();
        match state.view_mut(offset.clone()).add_workflow(rules, stage) {
            Ok(scope) => Ok(scope),
            Err(err) => {
                *state = snapshot;
                Err(err)
            }
        }
    }
}

/// Operations a driving loop or operator tool needs from a controller.
#[async_trait]
pub trait WorkflowController: Send + Sync {
    fn state(&self) -> &WorkflowState;

    fn applicable_rules(&self) -> Result<Vec<String>, AppError> {
        ops::applicable_rules(self.state())
    }

    fn submittable_nodes(&self) -> Vec<String> {
        ops::submittable_nodes(self.state())
    }

    fn finished(&self) -> Result<bool, AppError> {
        ops::finished(self.state())
    }

    fn successful(&self) -> Result<bool, AppError> {
        ops::successful(self.state())
    }

    fn validate(&self) -> ValidationReport {
        validate(self.state())
    }

    fn registry(&self) -> &HandlerRegistry;

    /// Dry run of one pending rule against the current copy of the state.
    fn preview_rule(&self, rule_id: &str) -> Result<RulePreview, AppError> {
        ops::preview_rule(self.state(), self.registry(), rule_id)
    }

    async fn apply_rules(&mut self, ids: &[String]) -> Result<(), AppError>;

    async fn submit_nodes(&mut self, ids: &[String]) -> Result<Vec<String>, AppError>;

    /// Submit every submittable step the rule produced.
    async fn submit_rule_steps(&mut self, rule_id: &str) -> Result<Vec<String>, AppError> {
        let ids = ops::rule_submittable_nodes(self.state(), rule_id)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.submit_nodes(&ids).await
    }

    async fn sync_backend(&mut self) -> Result<usize, AppError>;

    async fn reset_nodes(&mut self, ids: &[String]) -> Result<ResetSummary, AppError>;

    async fn add_workflow(
        &mut self,
        rules: Vec<Rule>,
        offset: &Scope,
        stage: &str,
    ) -> Result<Scope, AppError>;
}

/// Controller over a state held in memory.
pub struct Controller {
    state: WorkflowState,
    registry: HandlerRegistry,
    backend: Arc<dyn ExecutionBackend>,
}

impl Controller {
    pub fn new(
        state: WorkflowState,
        registry: HandlerRegistry,
        backend: Arc<dyn ExecutionBackend>,
    ) -> Self {
        Self {
            state,
            registry,
            backend,
        }
    }

    pub fn into_state(self) -> WorkflowState {
        self.state
    }
}

#[async_trait]
impl WorkflowController for Controller {
    fn state(&self) -> &WorkflowState {
        &self.state
    }

    fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    async fn apply_rules(&mut self, ids: &[String]) -> Result<(), AppError> {
        ops::apply_rules(&mut self.state, &self.registry, ids)
    }

    async fn submit_nodes(&mut self, ids: &[String]) -> Result<Vec<String>, AppError> {
        Ok(ops::submit_nodes(&mut self.state, self.backend.as_ref(), ids))
    }

    async fn sync_backend(&mut self) -> Result<usize, AppError> {
        Ok(ops::sync_backend(&mut self.state, self.backend.as_ref()))
    }

    async fn reset_nodes(&mut self, ids: &[String]) -> Result<ResetSummary, AppError> {
        Ok(ops::reset_nodes(&mut self.state, ids))
    }

    async fn add_workflow(
        &mut self,
        rules: Vec<Rule>,
        offset: &Scope,
        stage: &str,
    ) -> Result<Scope, AppError> {
        ops::add_workflow(&mut self.state, rules, offset, stage)
    }
}

/// Controller whose mutations each run as a load, mutate, validate, commit transaction.
///
/// Read-only queries answer from the copy returned by the last transaction.
pub struct PersistentController {
    store: Arc<dyn StateStore>,
    state: WorkflowState,
    registry: HandlerRegistry,
    backend: Arc<dyn ExecutionBackend>,
    policy: ValidationPolicy,
}

impl PersistentController {
    pub async fn new(
        store: Arc<dyn StateStore>,
        registry: HandlerRegistry,
        backend: Arc<dyn ExecutionBackend>,
        policy: ValidationPolicy,
    ) -> Result<Self, AppError> {
        let state = store.load().await?;
        tracing::info!(store = %store.describe(), policy = %policy, "persistent controller attached");
        Ok(Self {
            store,
            state,
            registry,
            backend,
            policy,
        })
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub fn policy(&self) -> ValidationPolicy {
        self.policy
    }

    /// Reload the cached copy from the store.
    pub async fn refresh(&mut self) -> Result<(), AppError> {
        self.state = self.store.load().await?;
        Ok(())
    }
}

#[async_trait]
impl WorkflowController for PersistentController {
    fn state(&self) -> &WorkflowState {
        &self.state
    }

    fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    async fn apply_rules(&mut self, ids: &[String]) -> Result<(), AppError> {
        let registry = &self.registry;
        let (state, ()) = with_transaction(self.store.as_ref(), self.policy, |state| {
            ops::apply_rules(state, registry, ids)
        })
        .await?;
        self.state = state;
        Ok(())
    }

    async fn submit_nodes(&mut self, ids: &[String]) -> Result<Vec<String>, AppError> {
        let backend = self.backend.as_ref();
        let (state, submitted) = with_transaction(self.store.as_ref(), self.policy, |state| {
            Ok(ops::submit_nodes(state, backend, ids))
        })
        .await?;
        self.state = state;
        Ok(submitted)
    }

    async fn sync_backend(&mut self) -> Result<usize, AppError> {
        let backend = self.backend.as_ref();
        let (state, changed) = with_transaction(self.store.as_ref(), self.policy, |state| {
            Ok(ops::sync_backend(state, backend))
        })
        .await?;
        self.state = state;
        Ok(changed)
    }

    async fn reset_nodes(&mut self, ids: &[String]) -> Result<ResetSummary, AppError> {
        let (state, summary) = with_transaction(self.store.as_ref(), self.policy, |state| {
            Ok(ops::reset_nodes(state, ids))
        })
        .await?;
        self.state = state;
        Ok(summary)
    }

    async fn add_workflow(
        &mut self,
        rules: Vec<Rule>,
        offset: &Scope,
        stage: &str,
    ) -> Result<Scope, AppError> {
        let (state, scope) = with_transaction(self.store.as_ref(), self.policy, |state| {
            ops::add_workflow(state, rules, offset, stage)
        })
        .await?;
        self.state = state;
        Ok(scope)
    }
}

/// Build a controller for `spec`. With `initial`, persistent stores are initialized with it
/// first; without it they must already hold a document.
pub async fn setup_controller(
    spec: &StateSpec,
    workflow_id: &str,
    initial: Option<WorkflowState>,
    registry: HandlerRegistry,
    backend: Arc<dyn ExecutionBackend>,
    policy: ValidationPolicy,
) -> Result<Box<dyn WorkflowController>, AppError> {
    if *spec == StateSpec::InMemory {
        let state = initial.unwrap_or_default();
        return Ok(Box::new(Controller::new(state, registry, backend)));
    }
    let store = open_store(spec, workflow_id).await?;
    if let Some(state) = initial {
        store.commit(&state).await?;
        tracing::info!(store = %store.describe(), "workflow state initialized");
    }
    let controller = PersistentController::new(store, registry, backend, policy).await?;
    Ok(Box::new(controller))
}

/// Build a controller from the `[state]` and `[controller]` sections of an engine config.
pub async fn setup_from_config(
    config: &EngineConfig,
    initial: Option<WorkflowState>,
    registry: HandlerRegistry,
    backend: Arc<dyn ExecutionBackend>,
) -> Result<Box<dyn WorkflowController>, AppError> {
    let spec = config.state_spec()?;
    tracing::debug!(
        state = %config.state.spec,
        workflow_id = %config.state.workflow_id,
        policy = %config.controller.validation,
        "setting up controller from config"
    );
    setup_controller(
        &spec,
        &config.state.workflow_id,
        initial,
        registry,
        backend,
        config.controller.validation,
    )
    .await
}
