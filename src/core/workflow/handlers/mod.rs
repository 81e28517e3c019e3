#![allow(clippy::result_large_err)] // Handler helpers return AppError directly for structured diagnostics.

pub mod multi_step;
pub mod single_step;
pub mod sub_workflow;

use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use crate::core::workflow::handler::HandlerRegistryBuilder;
use crate::core::workflow::view::WorkflowView;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};

/// Register built-in expansion handlers into the supplied builder.
pub fn register_builtins(builder: &mut HandlerRegistryBuilder) {
    builder
        .register(single_step::SingleStepHandler::new())
        .register(multi_step::MultiStepHandler::new())
        .register(sub_workflow::SubWorkflowHandler::new());
}

fn default_spec() -> Value {
    Value::Object(Map::new())
}

/// Shape of the step a handler stamps out. `name` falls back to the stage name.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct StepTemplate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_spec")]
    pub spec: Value,
}

impl Default for StepTemplate {
    fn default() -> Self {
        Self {
            name: None,
            spec: default_spec(),
        }
    }
}

impl StepTemplate {
    pub fn name_or<'a>(&'a self, stage: &'a str) -> &'a str {
        self.name.as_deref().unwrap_or(stage)
    }
}

pub(crate) fn parse_params<T: DeserializeOwned>(handler: &str, params: &Value) -> Result<T, AppError> {
    serde_json::from_value(params.clone()).map_err(|err| {
        AppError::new(
            ErrorCategory::ValidationError,
            format!("invalid params for {}: {}", handler, err),
        )
        .with_code("RF-HANDLER-002")
    })
}

/// Node ids and results of the steps selected by `exprs`, deduplicated in match order.
pub(crate) fn collect_inputs(
    view: &WorkflowView<'_>,
    exprs: &[String],
) -> Result<Vec<(String, Value)>, AppError> {
    let mut inputs: Vec<(String, Value)> = Vec::new();
    for expr in exprs {
        for node in view.steps_for(expr)? {
            if inputs.iter().any(|(id, _)| id == &node.id) {
                continue;
            }
            inputs.push((node.id.clone(), node.result().cloned().unwrap_or(Value::Null)));
        }
    }
    Ok(inputs)
}
