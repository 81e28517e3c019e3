use ruleflow::core::workflow::backend::InProcessBackend;
use ruleflow::core::workflow::controller::{Controller, WorkflowController};
use ruleflow::core::workflow::handler::HandlerRegistry;
use ruleflow::core::workflow::rule::{OffsetRule, Rule};
use ruleflow::core::workflow::scope::Scope;
use ruleflow::core::workflow::state::{WorkflowState, WORKFLOW_STATE_FORMAT_VERSION};
use ruleflow::core::workflow::steering::{run_workflow, RunOptions};
use ruleflow::core::workflow::validate::validate;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn nested_definition() -> WorkflowState {
    WorkflowState::from_rules(
        vec![
            Rule::expansion(
                "split",
                vec!["init".into()],
                "sub_workflow",
                json!({
                    "source": "init",
                    "scatter": "parts",
                    "stages": [{
                        "name": "count",
                        "dependencies": {"expressions": ["init"]},
                        "scheduler": {"scheduler_type": "single_step", "inputs": ["init"]}
                    }]
                }),
            ),
            Rule::expansion(
                "merge",
                vec!["split".into()],
                "single_step",
                json!({"inputs": ["split[*].count"]}),
            ),
        ],
        Some(json!({"parts": ["x", "y"]})),
    )
    .unwrap()
}

async fn half_run() -> WorkflowState {
    let mut ctl = Controller::new(
        nested_definition(),
        HandlerRegistry::with_builtins(),
        Arc::new(InProcessBackend::default()),
    );
    for _ in 0..2 {
        let ids = ctl.applicable_rules().unwrap();
        ctl.apply_rules(&ids).await.unwrap();
    }
    ctl.into_state()
}

#[tokio::test]
async fn round_trip_preserves_graph_rules_and_trees() {
    let state = half_run().await;
    let text = state.to_json_string().unwrap();
    let restored = WorkflowState::from_json_str(&text).unwrap();

    assert_eq!(restored.dag.node_ids(), state.dag.node_ids());
    assert_eq!(restored.dag.edges(), state.dag.edges());
    for id in state.dag.node_ids() {
        assert_eq!(restored.node(&id), state.node(&id));
    }
    assert_eq!(restored.rules, state.rules);
    assert_eq!(restored.applied, state.applied);
    assert_eq!(restored.steps_by_stage, state.steps_by_stage);
    assert_eq!(restored.bookkeeping, state.bookkeeping);
    assert!(validate(&restored).is_valid());
}

#[tokio::test]
async fn restored_state_continues_to_completion() {
    let state = half_run().await;
    let restored = WorkflowState::from_json(state.to_json().unwrap()).unwrap();
    let mut ctl = Controller::new(
        restored,
        HandlerRegistry::with_builtins(),
        Arc::new(InProcessBackend::default()),
    );
    let options = RunOptions {
        update_interval: Duration::from_millis(1),
        max_iterations: 100,
    };
    assert!(run_workflow(&mut ctl, &options).await.unwrap().successful);
}

#[tokio::test]
async fn document_layout() {
    let state = half_run().await;
    let doc = state.to_json().unwrap();
    assert_eq!(doc["format_version"], WORKFLOW_STATE_FORMAT_VERSION);
    assert!(doc["dag"].is_object());
    assert_eq!(doc["steps_by_stage"]["split"][1]["_offset"], "/split/1");
    assert!(doc["bookkeeping"]["split"]["1"]["_meta"]["rules"].is_array());

    let rule = &doc["applied"][0];
    assert_eq!(rule["offset"], "");
    assert_eq!(rule["rule"]["type"], "bootstrap");
}

#[test]
fn offset_rules_serialize_with_their_scope() {
    let rule = OffsetRule::new(
        Rule::expansion("count", vec!["init".into()], "single_step", json!({"inputs": ["init"]})),
        Scope::parse("/split/0").unwrap(),
    );
    let doc = rule.to_document().unwrap();
    assert_eq!(doc["offset"], "/split/0");
    assert_eq!(doc["rule"]["type"], "expansion");
    let back: OffsetRule = serde_json::from_value(doc).unwrap();
    assert_eq!(back, rule);
    assert_eq!(back.label(), "/split/0/count");
}

#[test]
fn unknown_format_versions_are_rejected() {
    let mut doc = WorkflowState::new().to_json().unwrap();
    doc["format_version"] = json!("0");
    let err = WorkflowState::from_json(doc).unwrap_err();
    assert_eq!(err.code, "RF-STATE-002");
}

#[test]
fn garbage_documents_fail_to_parse() {
    assert!(WorkflowState::from_json_str("{not json").is_err());
    assert!(WorkflowState::from_json(json!({"dag": 3})).is_err());
}
