use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use crate::core::workflow::handler::ExpansionHandler;
use crate::core::workflow::handlers::{collect_inputs, parse_params, StepTemplate};
use crate::core::workflow::task::{StepSpec, TaskPayload};
use crate::core::workflow::view::WorkflowViewMut;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
struct MultiStepParams {
    source: String,
    /// Field of each source result holding the array to scatter. The whole result when absent.
    #[serde(default)]
    scatter: Option<String>,
    #[serde(default)]
    step: StepTemplate,
}

/// Adds one step per element of an array found in the results selected by `source`.
pub struct MultiStepHandler;

impl Default for MultiStepHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl MultiStepHandler {
    pub fn new() -> Self {
        Self
    }
}

impl ExpansionHandler for MultiStepHandler {
    fn name(&self) -> &'static str {
        "multi_step"
    }

    fn validate_params(&self, params: &Value) -> Result<(), AppError> {
        parse_params::<MultiStepParams>(self.name(), params).map(|_| ())
    }

    fn expand(
        &self,
        stage: &str,
        params: &Value,
        view: &mut WorkflowViewMut<'_>,
    ) -> Result<(), AppError> {
        let params: MultiStepParams = parse_params(self.name(), params)?;
        let sources = collect_inputs(&view.as_view(), std::slice::from_ref(&params.source))?;
        let ids: Vec<String> = sources.iter().map(|(id, _)| id.clone()).collect();
        let elements = scatter_elements(&sources, params.scatter.as_deref())?;
        let base = params.step.name_or(stage).to_string();
        tracing::debug!(stage, elements = elements.len(), "scattering steps");
        for (i, element) in elements.into_iter().enumerate() {
            let name = format!("{}_{}", base, i);
            let task = TaskPayload::new(
                name.clone(),
                json!({"params": params.step.spec.clone(), "input": element}),
            );
            view.add_step(StepSpec::new(name, task).with_inputs(ids.clone()), stage)?;
        }
        Ok(())
    }
}

/// Flatten the scatter arrays of every source result, in source order.
pub(crate) fn scatter_elements(
    sources: &[(String, Value)],
    field: Option<&str>,
) -> Result<Vec<Value>, AppError> {
    let mut elements = Vec::new();
    for (id, result) in sources {
        let target = match field {
            Some(field) => result.get(field),
            None => Some(result),
        };
        let Some(Value::Array(items)) = target else {
            return Err(AppError::new(
                ErrorCategory::ValidationError,
                format!(
                    "result of node {} has no array at '{}'",
                    id,
                    field.unwrap_or("")
                ),
            )
            .with_code("RF-HANDLER-003"));
        };
        elements.extend(items.iter().cloned());
    }
    Ok(elements)
}
