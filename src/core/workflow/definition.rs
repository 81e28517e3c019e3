#![allow(clippy::result_large_err)] // Definition loading returns AppError directly for structured diagnostics.

//! Minimal authoring shape for stages: a name, dependency expressions and an expansion
//! directive. Definitions are read from YAML (which also accepts JSON).

use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use crate::core::workflow::query::PathExpr;
use crate::core::workflow::rule::{Rule, INIT_STAGE};
use crate::core::workflow::view::validate_stage_name;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DependencySpec {
    #[serde(default)]
    pub expressions: Vec<String>,
}

/// Handler name plus every other key as the handler's params.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerSpec {
    pub scheduler_type: String,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDefinition {
    pub name: String,
    #[serde(default)]
    pub dependencies: DependencySpec,
    pub scheduler: SchedulerSpec,
}

impl StageDefinition {
    pub fn validate(&self) -> Result<(), AppError> {
        validate_stage_name(&self.name)?;
        if self.name == INIT_STAGE {
            return Err(AppError::new(
                ErrorCategory::ValidationError,
                format!("stage name '{}' is reserved for bootstrap steps", INIT_STAGE),
            )
            .with_code("RF-DEF-004"));
        }
        if self.scheduler.scheduler_type.trim().is_empty() {
            return Err(AppError::new(
                ErrorCategory::ValidationError,
                format!("stage '{}' has an empty scheduler_type", self.name),
            )
            .with_code("RF-DEF-001"));
        }
        for expr in &self.dependencies.expressions {
            PathExpr::parse(expr).map_err(|err| {
                let mut err = AppError::from(err);
                err.add_context("stage", &self.name);
                err
            })?;
        }
        Ok(())
    }

    pub fn into_rule(self) -> Rule {
        Rule::expansion(
            self.name,
            self.dependencies.expressions,
            self.scheduler.scheduler_type,
            Value::Object(self.scheduler.params),
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    #[serde(default)]
    pub stages: Vec<StageDefinition>,
}

impl WorkflowDefinition {
    pub fn validate(&self) -> Result<(), AppError> {
        let mut seen = std::collections::HashSet::new();
        for stage in &self.stages {
            stage.validate()?;
            if !seen.insert(stage.name.as_str()) {
                return Err(AppError::new(
                    ErrorCategory::ValidationError,
                    format!("stage '{}' is defined more than once", stage.name),
                )
                .with_code("RF-DEF-002"));
            }
        }
        Ok(())
    }

    pub fn into_rules(self) -> Vec<Rule> {
        self.stages
            .into_iter()
            .map(StageDefinition::into_rule)
            .collect()
    }
}

/// Parse and validate a definition from YAML or JSON text.
pub fn parse_definition(text: &str) -> Result<WorkflowDefinition, AppError> {
    let definition: WorkflowDefinition = serde_yaml::from_str(text).map_err(|err| {
        AppError::new(
            ErrorCategory::ValidationError,
            format!("failed to parse workflow definition: {}", err),
        )
        .with_code("RF-DEF-003")
    })?;
    definition.validate()?;
    Ok(definition)
}

pub fn load_definition(path: &Path) -> Result<WorkflowDefinition, AppError> {
    let text = fs::read_to_string(path).map_err(|err| {
        AppError::new(
            ErrorCategory::IoError,
            format!("failed to read {}: {}", path.display(), err),
        )
    })?;
    parse_definition(&text).map_err(|mut err| {
        err.add_context("path", &path.display().to_string());
        err
    })
}
