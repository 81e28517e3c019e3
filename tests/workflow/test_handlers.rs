use ruleflow::core::error::AppError;
use ruleflow::core::types::ErrorCategory;
use ruleflow::core::workflow::backend::InProcessBackend;
use ruleflow::core::workflow::controller::{ops, Controller, WorkflowController};
use ruleflow::core::workflow::definition::parse_definition;
use ruleflow::core::workflow::handler::{ExpansionHandler, HandlerRegistry};
use ruleflow::core::workflow::rule::Rule;
use ruleflow::core::workflow::scope::Scope;
use ruleflow::core::workflow::state::WorkflowState;
use ruleflow::core::workflow::steering::{run_workflow, RunOptions};
use ruleflow::core::workflow::task::{StepSpec, TaskPayload};
use ruleflow::core::workflow::view::WorkflowViewMut;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const SPLIT_MERGE: &str = r#"
stages:
  - name: split
    dependencies:
      expressions: ["init"]
    scheduler:
      scheduler_type: sub_workflow
      source: init
      scatter: files
      stages:
        - name: count
          dependencies:
            expressions: ["init"]
          scheduler:
            scheduler_type: single_step
            inputs: ["init"]
            step:
              spec: {op: count}
  - name: merge
    dependencies:
      expressions: ["split"]
    scheduler:
      scheduler_type: single_step
      inputs: ["split[*].count"]
"#;

fn fast() -> RunOptions {
    RunOptions {
        update_interval: Duration::from_millis(1),
        max_iterations: 100,
    }
}

fn controller(state: WorkflowState, registry: HandlerRegistry) -> Controller {
    Controller::new(state, registry, Arc::new(InProcessBackend::default()))
}

#[tokio::test]
async fn single_step_collects_every_selected_result() {
    let mut state = WorkflowState::from_rules(
        vec![Rule::expansion(
            "report",
            vec!["left".into(), "right".into()],
            "single_step",
            json!({"inputs": ["left", "right"], "step": {"name": "summarize", "spec": {"fmt": "md"}}}),
        )],
        None,
    )
    .unwrap();
    let (left, right) = {
        let mut view = state.view_mut(Scope::root());
        (
            view.add_step(StepSpec::init("left", json!("L")), "left").unwrap(),
            view.add_step(StepSpec::init("right", json!("R")), "right").unwrap(),
        )
    };
    let mut ctl = controller(state, HandlerRegistry::with_builtins());
    let ids = ctl.applicable_rules().unwrap();
    ctl.apply_rules(&ids).await.unwrap();

    let root = Scope::root();
    let report = ctl.state().view(&root).steps_for("report").unwrap()[0].clone();
    assert_eq!(report.name, "summarize");
    assert_eq!(report.task.spec["inputs"], json!(["L", "R"]));
    assert_eq!(report.task.spec["params"]["fmt"], "md");
    let upstream: Vec<String> = ctl
        .state()
        .dag
        .predecessors(&report.id)
        .iter()
        .map(|node| node.id.clone())
        .collect();
    assert!(upstream.contains(&left) && upstream.contains(&right));
}

#[tokio::test]
async fn sub_workflow_scatter_and_merge_run_to_completion() {
    let definition = parse_definition(SPLIT_MERGE).unwrap();
    let state =
        WorkflowState::from_definitions(definition, Some(json!({"files": ["a", "b", "c"]}))).unwrap();
    let mut ctl = controller(state, HandlerRegistry::with_builtins());
    let summary = run_workflow(&mut ctl, &fast()).await.unwrap();
    assert!(summary.successful);

    let state = ctl.into_state();
    let root = Scope::root();
    let view = state.view(&root);
    assert_eq!(state.steps_by_stage.stage("split").unwrap().len(), 3);
    assert_eq!(view.steps_for("split[*].count").unwrap().len(), 3);

    let merge = view.steps_for("merge").unwrap()[0];
    let inputs = merge.task.spec["inputs"].as_array().unwrap();
    assert_eq!(inputs.len(), 3);
    assert_eq!(inputs[2]["params"]["op"], "count");
    assert_eq!(inputs[2]["inputs"][0]["input"], "c");

    let inner = Scope::parse("/split/1").unwrap();
    let seed = state.view(&inner).steps_for("init").unwrap()[0];
    assert_eq!(seed.result().unwrap(), &json!({"input": "b"}));
}

#[tokio::test]
async fn sub_workflow_without_source_nests_once() {
    let state = WorkflowState::from_rules(
        vec![Rule::expansion(
            "nested",
            Vec::new(),
            "sub_workflow",
            json!({
                "init": {"seed": 7},
                "stages": [{
                    "name": "echo",
                    "dependencies": {"expressions": ["init"]},
                    "scheduler": {"scheduler_type": "single_step", "inputs": ["init"]}
                }]
            }),
        )],
        None,
    )
    .unwrap();
    let mut ctl = controller(state, HandlerRegistry::with_builtins());
    assert!(run_workflow(&mut ctl, &fast()).await.unwrap().successful);
    let inner = Scope::parse("/nested/0").unwrap();
    let echo = ctl.state().view(&inner).steps_for("echo").unwrap()[0].clone();
    assert_eq!(echo.result().unwrap()["inputs"][0]["seed"], 7);
}

#[tokio::test]
async fn unknown_handler_leaves_state_unchanged() {
    let mut state = WorkflowState::from_rules(
        vec![Rule::expansion("odd", Vec::new(), "teleport", json!({}))],
        None,
    )
    .unwrap();
    let before = state.to_json().unwrap();
    let ids = ops::applicable_rules(&state).unwrap();
    let err = ops::apply_rules(&mut state, &HandlerRegistry::with_builtins(), &ids).unwrap_err();
    assert_eq!(err.code, "RF-HANDLER-001");
    assert_eq!(err.category, ErrorCategory::ConfigurationError);
    assert_eq!(state.to_json().unwrap(), before);
}

#[test]
fn malformed_params_are_rejected_before_expansion() {
    let mut state = WorkflowState::from_rules(
        vec![Rule::expansion("map", Vec::new(), "multi_step", json!({"scatter": 3}))],
        None,
    )
    .unwrap();
    let ids = ops::applicable_rules(&state).unwrap();
    let err = ops::apply_rules(&mut state, &HandlerRegistry::with_builtins(), &ids).unwrap_err();
    assert_eq!(err.code, "RF-HANDLER-002");
    assert!(state.dag.is_empty());
    assert_eq!(state.rules.len(), 1);
}

#[test]
fn scattering_a_non_array_fails_atomically() {
    let mut state = WorkflowState::from_rules(
        vec![Rule::expansion(
            "map",
            vec!["init".into()],
            "multi_step",
            json!({"source": "init", "scatter": "files"}),
        )],
        Some(json!({"files": "not-a-list"})),
    )
    .unwrap();
    let registry = HandlerRegistry::with_builtins();
    let ids = ops::applicable_rules(&state).unwrap();
    ops::apply_rules(&mut state, &registry, &ids).unwrap();
    let ids = ops::applicable_rules(&state).unwrap();
    let before = state.to_json().unwrap();
    let err = ops::apply_rules(&mut state, &registry, &ids).unwrap_err();
    assert_eq!(err.code, "RF-HANDLER-003");
    assert_eq!(state.to_json().unwrap(), before);
}

struct Fanout;

impl ExpansionHandler for Fanout {
    fn name(&self) -> &'static str {
        "fanout"
    }

    fn validate_params(&self, params: &Value) -> Result<(), AppError> {
        if params.get("width").and_then(Value::as_u64).is_some() {
            Ok(())
        } else {
            Err(AppError::new(ErrorCategory::ValidationError, "width must be a number"))
        }
    }

    fn expand(&self, stage: &str, params: &Value, view: &mut WorkflowViewMut<'_>) -> Result<(), AppError> {
        let width = params["width"].as_u64().unwrap_or(0);
        for i in 0..width {
            let name = format!("{}_{}", stage, i);
            view.add_step(StepSpec::new(name.clone(), TaskPayload::new(name, json!({"i": i}))), stage)?;
        }
        Ok(())
    }
}

#[tokio::test]
async fn custom_handlers_plug_into_the_registry() {
    let mut builder = HandlerRegistry::builder();
    builder.register(Fanout);
    let registry = builder.build();
    assert_eq!(registry.names(), vec!["fanout".to_string()]);
    assert!(registry.get("single_step").is_none());

    let state = WorkflowState::from_rules(
        vec![Rule::expansion("wide", Vec::new(), "fanout", json!({"width": 4}))],
        None,
    )
    .unwrap();
    let mut ctl = controller(state, registry);
    assert!(run_workflow(&mut ctl, &fast()).await.unwrap().successful);
    assert_eq!(ctl.state().dag.len(), 4);
}

#[test]
fn builtin_registry_lists_every_handler() {
    assert_eq!(
        HandlerRegistry::with_builtins().names(),
        vec!["multi_step", "single_step", "sub_workflow"]
    );
    assert!(HandlerRegistry::empty().names().is_empty());
}
