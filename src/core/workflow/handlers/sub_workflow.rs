use crate::core::error::AppError;
use crate::core::workflow::definition::StageDefinition;
use crate::core::workflow::handler::ExpansionHandler;
use crate::core::workflow::handlers::multi_step::scatter_elements;
use crate::core::workflow::handlers::{collect_inputs, parse_params};
use crate::core::workflow::rule::{Rule, INIT_STAGE};
use crate::core::workflow::task::StepSpec;
use crate::core::workflow::view::WorkflowViewMut;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
struct SubWorkflowParams {
    stages: Vec<StageDefinition>,
    #[serde(default)]
    init: Option<Value>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    scatter: Option<String>,
}

/// Nests a workflow built from `stages` under the stage name.
///
/// With a `source`, one sibling sub-workflow is opened per scattered element and each is
/// seeded with `{"input": element}`; the seed step depends on the source nodes so that a
/// reset upstream reaches into the sub-workflow.
pub struct SubWorkflowHandler;

impl Default for SubWorkflowHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl SubWorkflowHandler {
    pub fn new() -> Self {
        Self
    }
}

impl ExpansionHandler for SubWorkflowHandler {
    fn name(&self) -> &'static str {
        "sub_workflow"
    }

    fn validate_params(&self, params: &Value) -> Result<(), AppError> {
        let params: SubWorkflowParams = parse_params(self.name(), params)?;
        for stage in &params.stages {
            stage.validate()?;
        }
        Ok(())
    }

    fn expand(
        &self,
        stage: &str,
        params: &Value,
        view: &mut WorkflowViewMut<'_>,
    ) -> Result<(), AppError> {
        let params: SubWorkflowParams = parse_params(self.name(), params)?;
        let stage_rules: Vec<Rule> = params
            .stages
            .into_iter()
            .map(StageDefinition::into_rule)
            .collect();

        let Some(source) = params.source else {
            let mut rules = Vec::with_capacity(stage_rules.len() + 1);
            if let Some(data) = params.init {
                rules.push(Rule::bootstrap(data));
            }
            rules.extend(stage_rules);
            view.add_workflow(rules, stage)?;
            return Ok(());
        };

        let sources = collect_inputs(&view.as_view(), std::slice::from_ref(&source))?;
        let ids: Vec<String> = sources.iter().map(|(id, _)| id.clone()).collect();
        for element in scatter_elements(&sources, params.scatter.as_deref())? {
            let seed = StepSpec::init(INIT_STAGE, json!({"input": element})).with_inputs(ids.clone());
            let mut rules = Vec::with_capacity(stage_rules.len() + 1);
            rules.push(Rule::bootstrap_step(seed));
            rules.extend(stage_rules.iter().cloned());
            view.add_workflow(rules, stage)?;
        }
        Ok(())
    }
}
