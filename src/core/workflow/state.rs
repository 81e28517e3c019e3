#![allow(clippy::result_large_err)] // State module returns AppError to preserve structured diagnostic context.

use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use crate::core::workflow::definition::WorkflowDefinition;
use crate::core::workflow::graph::{Node, TaskGraph};
use crate::core::workflow::index::{Ledger, StageEntry, StepIndex};
use crate::core::workflow::rule::{OffsetRule, Rule};
use crate::core::workflow::scope::{Scope, Segment};
use crate::core::workflow::view::{WorkflowView, WorkflowViewMut};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Version embedded in persisted workflow documents.
pub const WORKFLOW_STATE_FORMAT_VERSION: &str = "1";

fn default_format_version() -> String {
    WORKFLOW_STATE_FORMAT_VERSION.to_string()
}

/// Complete persisted state of one workflow: the graph, both rule collections and the two
/// scope trees that say where every step and rule belongs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    #[serde(default = "default_format_version")]
    pub format_version: String,
    pub dag: TaskGraph,
    #[serde(default)]
    pub rules: Vec<OffsetRule>,
    #[serde(default)]
    pub applied: Vec<OffsetRule>,
    #[serde(default)]
    pub steps_by_stage: StepIndex,
    #[serde(default)]
    pub bookkeeping: Ledger,
}

impl Default for WorkflowState {
    fn default() -> Self {
        Self::new()
    }
}

/// Which steps and sub-workflow scopes each rule produced, in both directions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleStepIndex {
    pub rule_to_steps: HashMap<String, Vec<String>>,
    pub step_to_rule: HashMap<String, String>,
    pub rule_to_scopes: HashMap<String, Vec<Scope>>,
    pub scope_to_rule: HashMap<Scope, String>,
}

/// What [`WorkflowState::retire_rule_steps`] removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetiredWork {
    pub nodes: Vec<String>,
    pub scopes: Vec<Scope>,
    pub rules: Vec<String>,
}

impl RetiredWork {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.scopes.is_empty()
    }
}

impl WorkflowState {
    pub fn new() -> Self {
        Self {
            format_version: default_format_version(),
            dag: TaskGraph::new(),
            rules: Vec::new(),
            applied: Vec::new(),
            steps_by_stage: StepIndex::default(),
            bookkeeping: Ledger::default(),
        }
    }

    /// Root workflow with `rules` pending at the root scope, seeded with `init` when given.
    pub fn from_rules(rules: Vec<Rule>, init: Option<Value>) -> Result<Self, AppError> {
        let mut state = Self::new();
        {
            let mut view = state.view_mut(Scope::root());
            if let Some(data) = init {
                view.init(data)?;
            }
            view.add_rules(rules)?;
        }
        Ok(state)
    }

    pub fn from_definitions(
        definition: WorkflowDefinition,
        init: Option<Value>,
    ) -> Result<Self, AppError> {
        definition.validate()?;
        Self::from_rules(definition.into_rules(), init)
    }

    pub fn view<'a>(&'a self, scope: &'a Scope) -> WorkflowView<'a> {
        WorkflowView::new(self, scope)
    }

    pub fn view_mut(&mut self, scope: Scope) -> WorkflowViewMut<'_> {
        WorkflowViewMut::new(self, scope)
    }

    pub fn rule(&self, id: &str) -> Option<&OffsetRule> {
        self.rules
            .iter()
            .chain(self.applied.iter())
            .find(|rule| rule.id == id)
    }

    pub fn is_applied(&self, id: &str) -> bool {
        self.applied.iter().any(|rule| rule.id == id)
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.rules.iter().any(|rule| rule.id == id)
    }

    pub fn applied_ids(&self) -> HashSet<&str> {
        self.applied.iter().map(|rule| rule.id.as_str()).collect()
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.dag.node(id)
    }

    /// Move a pending rule to the applied collection. Returns false for unknown ids.
    pub fn mark_applied(&mut self, id: &str) -> bool {
        let Some(pos) = self.rules.iter().position(|rule| rule.id == id) else {
            return false;
        };
        let rule = self.rules.remove(pos);
        self.applied.push(rule);
        true
    }

    /// Move an applied rule back to pending. Returns false when it is not applied.
    pub fn reopen_rule(&mut self, id: &str) -> bool {
        let Some(pos) = self.applied.iter().position(|rule| rule.id == id) else {
            return false;
        };
        let rule = self.applied.remove(pos);
        self.rules.push(rule);
        true
    }

    /// True when `scope` lies inside a sub-workflow whose opening rule is pending again.
    ///
    /// Such scopes were seeded from results a reset cleared. Their rules are not applicable
    /// and their steps are not submittable until the opening rule fires and rebuilds them.
    pub fn scope_superseded(&self, scope: &Scope) -> bool {
        scope.ancestors().iter().any(|ancestor| {
            let segments = ancestor.segments();
            let [.., Segment::Stage(stage), Segment::Index(_)] = segments else {
                return false;
            };
            let parent = Scope::from_segments(segments[..segments.len() - 2].to_vec());
            self.rules
                .iter()
                .any(|rule| rule.offset == parent && rule.rule.name() == stage.as_str())
        })
    }

    /// Remove everything an earlier firing of `rule_id` left under its stage: step nodes,
    /// and for sub-workflows the whole scope with its nodes, rules and bookkeeping.
    pub fn retire_rule_steps(&mut self, rule_id: &str) -> RetiredWork {
        let Some(rule) = self.rule(rule_id) else {
            return RetiredWork::default();
        };
        let offset = rule.offset.clone();
        let stage = rule.rule.name().to_string();
        let Some(index) = self.steps_by_stage.resolve_mut(&offset) else {
            return RetiredWork::default();
        };
        let mut retired = RetiredWork::default();
        for entry in index.remove_stage(&stage) {
            match entry {
                StageEntry::Step(step) => retired.nodes.push(step.node_id),
                StageEntry::Scope(sub) => {
                    retired.nodes.extend(
                        sub.index
                            .collect_steps(&sub.offset)
                            .into_iter()
                            .map(|(_, id)| id),
                    );
                    retired.scopes.push(sub.offset);
                }
            }
        }

        let ledger = self.bookkeeping.ensure(&offset);
        ledger.meta.steps.retain(|id| !retired.nodes.contains(id));
        if !retired.scopes.is_empty() {
            ledger.remove_stage(&stage);
            let scopes = &retired.scopes;
            let inside = |rule: &OffsetRule| scopes.iter().any(|scope| rule.offset.starts_with(scope));
            retired.rules = self
                .rules
                .iter()
                .chain(self.applied.iter())
                .filter(|rule| inside(*rule))
                .map(|rule| rule.id.clone())
                .collect();
            self.rules.retain(|rule| !inside(rule));
            self.applied.retain(|rule| !inside(rule));
        }
        for id in &retired.nodes {
            self.dag.remove_node(id);
        }
        retired
    }

    /// Steps and sub-workflow scopes recorded under each rule's stage at its offset.
    pub fn rule_steps_indices(&self) -> RuleStepIndex {
        let mut out = RuleStepIndex::default();
        for rule in self.rules.iter().chain(self.applied.iter()) {
            let Some(entries) = self
                .steps_by_stage
                .resolve(&rule.offset)
                .and_then(|index| index.stage(rule.rule.name()))
            else {
                continue;
            };
            let mut steps = Vec::new();
            let mut scopes = Vec::new();
            for entry in entries {
                match entry {
                    StageEntry::Step(step) => {
                        out.step_to_rule.insert(step.node_id.clone(), rule.id.clone());
                        steps.push(step.node_id.clone());
                    }
                    StageEntry::Scope(sub) => {
                        out.scope_to_rule.insert(sub.offset.clone(), rule.id.clone());
                        scopes.push(sub.offset.clone());
                    }
                }
            }
            out.rule_to_steps.insert(rule.id.clone(), steps);
            if !scopes.is_empty() {
                out.rule_to_scopes.insert(rule.id.clone(), scopes);
            }
        }
        out
    }

    pub fn to_json(&self) -> Result<Value, AppError> {
        serde_json::to_value(self).map_err(|err| {
            AppError::new(
                ErrorCategory::SerializationError,
                format!("failed to serialize workflow state: {}", err),
            )
        })
    }

    pub fn to_json_string(&self) -> Result<String, AppError> {
        serde_json::to_string_pretty(self).map_err(|err| {
            AppError::new(
                ErrorCategory::SerializationError,
                format!("failed to serialize workflow state: {}", err),
            )
        })
    }

    pub fn from_json(document: Value) -> Result<Self, AppError> {
        let state: WorkflowState = serde_json::from_value(document).map_err(|err| {
            AppError::new(
                ErrorCategory::SerializationError,
                format!("failed to parse workflow state: {}", err),
            )
        })?;
        state.check_version()?;
        Ok(state)
    }

    pub fn from_json_str(text: &str) -> Result<Self, AppError> {
        let state: WorkflowState = serde_json::from_str(text).map_err(|err| {
            AppError::new(
                ErrorCategory::SerializationError,
                format!("failed to parse workflow state: {}", err),
            )
        })?;
        state.check_version()?;
        Ok(state)
    }

    fn check_version(&self) -> Result<(), AppError> {
        if self.format_version != WORKFLOW_STATE_FORMAT_VERSION {
            return Err(AppError::new(
                ErrorCategory::StateError,
                format!(
                    "unsupported workflow state format {}, expected {}",
                    self.format_version, WORKFLOW_STATE_FORMAT_VERSION
                ),
            )
            .with_code("RF-STATE-002"));
        }
        Ok(())
    }
}
