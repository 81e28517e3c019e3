use ruleflow::core::workflow::backend::{EchoRunner, InProcessBackend};
use ruleflow::core::workflow::controller::{ops, Controller, WorkflowController};
use ruleflow::core::workflow::graph::NodeState;
use ruleflow::core::workflow::handler::HandlerRegistry;
use ruleflow::core::workflow::rule::Rule;
use ruleflow::core::workflow::scope::Scope;
use ruleflow::core::workflow::state::WorkflowState;
use ruleflow::core::workflow::steering::{run_workflow, RunOptions};
use ruleflow::core::workflow::task::TaskPayload;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

fn map_state() -> WorkflowState {
    WorkflowState::from_rules(
        vec![Rule::expansion(
            "map",
            vec!["init".into()],
            "multi_step",
            json!({"source": "init", "scatter": "files", "step": {"spec": {"tool": "wc"}}}),
        )],
        Some(json!({"files": ["a.txt", "b.txt"]})),
    )
    .unwrap()
}

fn fast() -> RunOptions {
    RunOptions {
        update_interval: Duration::from_millis(1),
        max_iterations: 100,
    }
}

fn controller(state: WorkflowState) -> Controller {
    Controller::new(
        state,
        HandlerRegistry::with_builtins(),
        Arc::new(InProcessBackend::default()),
    )
}

#[tokio::test]
async fn bootstrap_then_expansion() {
    let mut ctl = controller(map_state());
    let bootstrap_id = ctl.state().rules[0].id.clone();
    let expansion_id = ctl.state().rules[1].id.clone();

    assert_eq!(ctl.applicable_rules().unwrap(), vec![bootstrap_id.clone()]);
    ctl.apply_rules(&[bootstrap_id.clone()]).await.unwrap();
    assert!(ctl.state().is_applied(&bootstrap_id));
    // The seed step is complete on creation.
    assert!(ctl.submittable_nodes().is_empty());

    assert_eq!(ctl.applicable_rules().unwrap(), vec![expansion_id.clone()]);
    ctl.apply_rules(&[expansion_id]).await.unwrap();

    let state = ctl.state();
    let map = state.steps_by_stage.stage("map").unwrap();
    assert_eq!(map.len(), 2);
    let submittable = ctl.submittable_nodes();
    assert_eq!(submittable.len(), 2);

    let root = state.bookkeeping.resolve(&Scope::root()).unwrap();
    assert_eq!(root.meta.steps.len(), 3);
    for entry in map {
        assert!(root.meta.steps.contains(&entry.node_id().unwrap().to_string()));
    }
    assert_eq!(root.meta.rules.len(), 2);
    assert!(ctl.validate().is_valid());
}

#[tokio::test]
async fn scattered_payloads_carry_their_element() {
    let mut ctl = controller(map_state());
    let ids = ctl.applicable_rules().unwrap();
    ctl.apply_rules(&ids).await.unwrap();
    let ids = ctl.applicable_rules().unwrap();
    ctl.apply_rules(&ids).await.unwrap();

    let names: Vec<String> = ctl
        .state()
        .view(&Scope::root())
        .steps_for("map")
        .unwrap()
        .iter()
        .map(|node| node.name.clone())
        .collect();
    assert_eq!(names, vec!["map_0", "map_1"]);
    let second = ctl.state().view(&Scope::root()).steps_for("map[1]").unwrap()[0].clone();
    assert_eq!(second.task.spec["input"], "b.txt");
    assert_eq!(second.task.spec["params"]["tool"], "wc");
}

#[tokio::test]
async fn run_to_success_with_echo_backend() {
    let mut ctl = controller(map_state());
    let summary = run_workflow(&mut ctl, &fast()).await.unwrap();
    assert!(summary.finished);
    assert!(summary.successful);
    assert!(ctl.finished().unwrap());
    assert!(ctl.successful().unwrap());

    let state = ctl.into_state();
    assert!(state.rules.is_empty());
    assert_eq!(state.applied.len(), 2);
    for node in state.dag.nodes() {
        assert!(node.has_result(), "node {} has no result", node.name);
    }
    let first = state.view(&Scope::root()).steps_for("map[0]").unwrap()[0].clone();
    assert_eq!(first.result().unwrap()["input"], "a.txt");
}

#[tokio::test]
async fn failing_task_finishes_unsuccessfully() {
    let backend = InProcessBackend::inline(|task: &TaskPayload| -> Result<Value, String> {
        if task.spec["input"] == "b.txt" {
            Err("boom".to_string())
        } else {
            Ok(task.spec.clone())
        }
    });
    let mut ctl = Controller::new(map_state(), HandlerRegistry::with_builtins(), Arc::new(backend));
    let summary = run_workflow(&mut ctl, &fast()).await.unwrap();
    assert!(summary.finished);
    assert!(!summary.successful);
    let failed: Vec<_> = ctl
        .state()
        .dag
        .nodes()
        .filter(|node| node.state == NodeState::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].name, "map_1");
}

#[tokio::test]
async fn threaded_backend_is_polled_until_done() {
    let mut ctl = Controller::new(
        map_state(),
        HandlerRegistry::with_builtins(),
        Arc::new(InProcessBackend::threaded(EchoRunner).unwrap()),
    );
    let summary = run_workflow(&mut ctl, &fast()).await.unwrap();
    assert!(summary.successful);
}

#[tokio::test]
async fn applying_a_rule_that_is_not_pending_changes_nothing() {
    let mut ctl = controller(map_state());
    let before = ctl.state().to_json().unwrap();
    let bootstrap = ctl.state().rules[0].id.clone();
    let err = ctl
        .apply_rules(&[bootstrap, "not-a-rule".to_string()])
        .await
        .unwrap_err();
    assert_eq!(err.code, "RF-RULE-001");
    assert_eq!(ctl.state().to_json().unwrap(), before);
}

#[test]
fn finished_requires_no_pending_work() {
    let state = map_state();
    assert!(!ops::finished(&state).unwrap());
    assert!(ops::finished(&WorkflowState::new()).unwrap());
    assert!(ops::successful(&WorkflowState::new()).unwrap());
}

#[test]
fn submission_skips_nodes_that_are_not_defined() {
    let mut state = map_state();
    let backend = InProcessBackend::default();
    let registry = HandlerRegistry::with_builtins();
    let ids = ops::applicable_rules(&state).unwrap();
    ops::apply_rules(&mut state, &registry, &ids).unwrap();
    let ids = ops::applicable_rules(&state).unwrap();
    ops::apply_rules(&mut state, &registry, &ids).unwrap();

    let ready = ops::submittable_nodes(&state);
    let submitted = ops::submit_nodes(&mut state, &backend, &ready);
    assert_eq!(submitted.len(), 2);
    assert!(ops::submit_nodes(&mut state, &backend, &ready).is_empty());
    assert_eq!(backend.job_count(), 2);
    assert_eq!(ops::sync_backend(&mut state, &backend), 2);
    assert_eq!(backend.job_count(), 0);
    assert_eq!(ops::sync_backend(&mut state, &backend), 0);
    assert!(ops::finished(&state).unwrap());
}

#[tokio::test]
async fn iteration_cap_is_enforced() {
    let mut ctl = controller(map_state());
    let options = RunOptions {
        update_interval: Duration::from_millis(1),
        max_iterations: 1,
    };
    let err = run_workflow(&mut ctl, &options).await.unwrap_err();
    assert_eq!(err.code, "RF-ITER-001");
}

#[tokio::test]
async fn add_workflow_through_the_controller() {
    let mut ctl = controller(WorkflowState::new());
    let scope = ctl
        .add_workflow(vec![Rule::bootstrap(json!({"seed": true}))], &Scope::root(), "extra")
        .await
        .unwrap();
    assert_eq!(scope.to_string(), "/extra/0");
    assert_eq!(ctl.applicable_rules().unwrap().len(), 1);

    let err = ctl
        .add_workflow(Vec::new(), &Scope::parse("/missing/0").unwrap(), "extra")
        .await
        .unwrap_err();
    assert_eq!(err.code, "RF-SCOPE-002");
    let summary = run_workflow(&mut ctl, &fast()).await.unwrap();
    assert!(summary.successful);
}

#[tokio::test]
async fn preview_reports_new_steps_without_applying() {
    let mut ctl = controller(map_state());
    let bootstrap_id = ctl.state().rules[0].id.clone();
    let expansion_id = ctl.state().rules[1].id.clone();
    ctl.apply_rules(&[bootstrap_id.clone()]).await.unwrap();
    let seed = ctl.state().dag.node_ids()[0].clone();
    let before = ctl.state().to_json().unwrap();

    let preview = ctl.preview_rule(&expansion_id).unwrap();
    assert!(preview.applicable);
    assert_eq!(preview.label, "/map");
    assert!(preview.new_rules.is_empty());
    assert!(preview.retired_nodes.is_empty());
    let names: Vec<&str> = preview.new_nodes.iter().map(|node| node.name.as_str()).collect();
    assert_eq!(names, vec!["map_0", "map_1"]);
    assert!(preview.new_nodes.iter().all(|node| node.upstream == vec![seed.clone()]));
    assert_eq!(ctl.state().to_json().unwrap(), before);
    assert!(ctl.state().is_pending(&expansion_id));

    let err = ctl.preview_rule(&bootstrap_id).unwrap_err();
    assert_eq!(err.code, "RF-RULE-001");
}

#[tokio::test]
async fn preview_lists_rules_of_nested_workflows() {
    let mut state = WorkflowState::from_rules(
        vec![Rule::expansion(
            "nest",
            Vec::new(),
            "sub_workflow",
            json!({"init": {"n": 1}, "stages": []}),
        )],
        None,
    )
    .unwrap();
    let id = state.rules[0].id.clone();
    let preview = ops::preview_rule(&state, &HandlerRegistry::with_builtins(), &id).unwrap();
    assert_eq!(preview.new_rules.len(), 1);
    assert_eq!(preview.new_rules[0].label(), "/nest/0/init");
    assert!(preview.new_nodes.is_empty());
    assert!(state.steps_by_stage.stage("nest").is_none());
    // The real firing matches the preview.
    ops::apply_rules(&mut state, &HandlerRegistry::with_builtins(), &[id]).unwrap();
    assert_eq!(state.rules.len(), 1);
}

#[tokio::test]
async fn submit_rule_steps_only_touches_that_rule() {
    let mut state = WorkflowState::from_rules(
        vec![
            Rule::expansion(
                "map",
                vec!["init".into()],
                "multi_step",
                json!({"source": "init", "scatter": "files"}),
            ),
            Rule::expansion("summary", vec!["init".into()], "single_step", json!({"inputs": ["init"]})),
        ],
        Some(json!({"files": ["a.txt", "b.txt"]})),
    )
    .unwrap();
    let registry = HandlerRegistry::with_builtins();
    for _ in 0..2 {
        let ids = ops::applicable_rules(&state).unwrap();
        ops::apply_rules(&mut state, &registry, &ids).unwrap();
    }
    let map_rule = state
        .view(&Scope::root())
        .get_rule("map", &Scope::root())
        .unwrap()
        .id
        .clone();
    assert_eq!(ops::submittable_nodes(&state).len(), 3);

    let mut ctl = controller(state);
    let submitted = ctl.submit_rule_steps(&map_rule).await.unwrap();
    assert_eq!(submitted.len(), 2);
    assert_eq!(ctl.submittable_nodes().len(), 1);
    assert!(ctl.submit_rule_steps(&map_rule).await.unwrap().is_empty());

    let err = ctl.submit_rule_steps("missing").await.unwrap_err();
    assert_eq!(err.code, "RF-RULE-002");
}
