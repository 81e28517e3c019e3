#![allow(clippy::result_large_err)] // Rule evaluation returns AppError to keep expansion diagnostics structured.

use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use crate::core::workflow::handler::HandlerRegistry;
use crate::core::workflow::scope::Scope;
use crate::core::workflow::state::WorkflowState;
use crate::core::workflow::task::StepSpec;
use crate::core::workflow::view::{WorkflowView, WorkflowViewMut};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Deepest bookkeeping nesting walked when checking whether a sub-workflow is done.
pub const MAX_SCOPE_DEPTH: usize = 64;

/// Stage name used by bootstrap rules.
pub const INIT_STAGE: &str = "init";

fn default_params() -> Value {
    Value::Object(Map::new())
}

/// Adds one pre-seeded step carrying externally supplied data. Always applicable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapRule {
    pub name: String,
    pub step: StepSpec,
}

/// Named handler plus its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpansionDirective {
    pub handler: String,
    #[serde(default = "default_params")]
    pub params: Value,
}

/// Fires once every dependency expression matches completed work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpansionRule {
    pub name: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub directive: ExpansionDirective,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Rule {
    Bootstrap(BootstrapRule),
    Expansion(ExpansionRule),
}

impl Rule {
    pub fn bootstrap(data: Value) -> Self {
        Rule::Bootstrap(BootstrapRule {
            name: INIT_STAGE.to_string(),
            step: StepSpec::init(INIT_STAGE, data),
        })
    }

    pub fn bootstrap_step(step: StepSpec) -> Self {
        Rule::Bootstrap(BootstrapRule {
            name: INIT_STAGE.to_string(),
            step,
        })
    }

    pub fn expansion(
        name: impl Into<String>,
        dependencies: Vec<String>,
        handler: impl Into<String>,
        params: Value,
    ) -> Self {
        Rule::Expansion(ExpansionRule {
            name: name.into(),
            dependencies,
            directive: ExpansionDirective {
                handler: handler.into(),
                params,
            },
        })
    }

    pub fn name(&self) -> &str {
        match self {
            Rule::Bootstrap(rule) => &rule.name,
            Rule::Expansion(rule) => &rule.name,
        }
    }

    pub fn dependencies(&self) -> &[String] {
        match self {
            Rule::Bootstrap(_) => &[],
            Rule::Expansion(rule) => &rule.dependencies,
        }
    }

    /// Every dependency expression must match at least one entry and every match must be done.
    /// A match that holds no entries counts as missing work, not finished work.
    pub fn applicable(&self, view: &WorkflowView<'_>) -> Result<bool, AppError> {
        for expr in self.dependencies() {
            let matches = view.query(expr)?;
            if matches.is_empty() {
                return Ok(false);
            }
            for found in &matches {
                let entries = found.value.entries();
                if entries.is_empty() {
                    return Ok(false);
                }
                for entry in entries {
                    if !view.entry_done(entry)? {
                        return Ok(false);
                    }
                }
            }
        }
        Ok(true)
    }

    pub fn apply(
        &self,
        view: &mut WorkflowViewMut<'_>,
        registry: &HandlerRegistry,
    ) -> Result<(), AppError> {
        match self {
            Rule::Bootstrap(rule) => {
                tracing::debug!(stage = %rule.name, scope = %view.scope(), "applying bootstrap rule");
                view.add_step(rule.step.clone(), &rule.name)?;
                Ok(())
            }
            Rule::Expansion(rule) => {
                tracing::debug!(stage = %rule.name, handler = %rule.directive.handler, scope = %view.scope(), "applying expansion rule");
                let handler = registry.get(&rule.directive.handler).ok_or_else(|| {
                    AppError::new(
                        ErrorCategory::ConfigurationError,
                        format!(
                            "stage '{}' names unknown expansion handler '{}'",
                            rule.name, rule.directive.handler
                        ),
                    )
                    .with_code("RF-HANDLER-001")
                })?;
                handler.validate_params(&rule.directive.params)?;
                handler.expand(&rule.name, &rule.directive.params, view)
            }
        }
    }

    pub fn to_document(&self) -> Result<Value, AppError> {
        Ok(serde_json::to_value(self)?)
    }
}

/// A rule bound to an absolute scope; the unit tracked as pending or applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OffsetRule {
    pub id: String,
    pub offset: Scope,
    pub rule: Rule,
}

impl OffsetRule {
    pub fn new(rule: Rule, offset: Scope) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            offset,
            rule,
        }
    }

    pub fn applicable(&self, state: &WorkflowState) -> Result<bool, AppError> {
        if state.scope_superseded(&self.offset) {
            return Ok(false);
        }
        self.rule
            .applicable(&WorkflowView::new(state, &self.offset))
    }

    pub fn apply(&self, state: &mut WorkflowState, registry: &HandlerRegistry) -> Result<(), AppError> {
        let mut view = WorkflowViewMut::new(state, self.offset.clone());
        self.rule.apply(&mut view, registry)
    }

    /// Display label `<offset>/<stage>`.
    pub fn label(&self) -> String {
        format!("{}/{}", self.offset, self.rule.name())
    }

    pub fn to_document(&self) -> Result<Value, AppError> {
        Ok(serde_json::to_value(self)?)
    }
}
