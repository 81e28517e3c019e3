use crate::core::error::AppError;
use crate::core::workflow::handler::ExpansionHandler;
use crate::core::workflow::handlers::{collect_inputs, parse_params, StepTemplate};
use crate::core::workflow::task::{StepSpec, TaskPayload};
use crate::core::workflow::view::WorkflowViewMut;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
struct SingleStepParams {
    #[serde(default)]
    inputs: Vec<String>,
    #[serde(default)]
    step: StepTemplate,
}

/// Adds one step consuming the results of every step selected by `inputs`.
pub struct SingleStepHandler;

impl Default for SingleStepHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl SingleStepHandler {
    pub fn new() -> Self {
        Self
    }
}

impl ExpansionHandler for SingleStepHandler {
    fn name(&self) -> &'static str {
        "single_step"
    }

    fn validate_params(&self, params: &Value) -> Result<(), AppError> {
        parse_params::<SingleStepParams>(self.name(), params).map(|_| ())
    }

    fn expand(
        &self,
        stage: &str,
        params: &Value,
        view: &mut WorkflowViewMut<'_>,
    ) -> Result<(), AppError> {
        let params: SingleStepParams = parse_params(self.name(), params)?;
        let inputs = collect_inputs(&view.as_view(), &params.inputs)?;
        let (ids, results): (Vec<String>, Vec<Value>) = inputs.into_iter().unzip();
        let name = params.step.name_or(stage).to_string();
        let task = TaskPayload::new(
            name.clone(),
            json!({"params": params.step.spec, "inputs": results}),
        );
        view.add_step(StepSpec::new(name, task).with_inputs(ids), stage)?;
        Ok(())
    }
}
