use ruleflow::core::types::ErrorCategory;
use ruleflow::core::workflow::query::{MatchValue, PathExpr};
use ruleflow::core::workflow::rule::Rule;
use ruleflow::core::workflow::scope::Scope;
use ruleflow::core::workflow::state::WorkflowState;
use ruleflow::core::workflow::task::{StepSpec, TaskPayload};
use serde_json::json;

fn step(name: &str) -> StepSpec {
    StepSpec::new(name, TaskPayload::new(name, json!({"tool": name})))
}

fn two_prep_steps() -> (WorkflowState, Vec<String>) {
    let mut state = WorkflowState::new();
    let mut view = state.view_mut(Scope::root());
    let first = view.add_step(step("prep_a"), "prep").unwrap();
    let second = view.add_step(step("prep_b"), "prep").unwrap();
    (state, vec![first, second])
}

#[test]
fn stage_query_returns_whole_list() {
    let (state, ids) = two_prep_steps();
    let root = Scope::root();
    let view = state.view(&root);
    let matches = view.query("prep").unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].path_string(), "prep");
    match &matches[0].value {
        MatchValue::List(entries) => assert_eq!(entries.len(), 2),
        other => panic!("expected a list match, got {:?}", other),
    }
    let nodes: Vec<String> = view
        .steps_for("prep")
        .unwrap()
        .iter()
        .map(|node| node.id.clone())
        .collect();
    assert_eq!(nodes, ids);
}

#[test]
fn index_and_wildcard_queries() {
    let (state, ids) = two_prep_steps();
    let root = Scope::root();
    let view = state.view(&root);

    let second = view.query("prep[1]").unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].path_string(), "prep[1]");
    assert_eq!(view.steps_for("prep[1]").unwrap()[0].id, ids[1]);

    assert_eq!(view.query("prep[*]").unwrap().len(), 2);
    assert_eq!(view.query("$.prep[*]").unwrap().len(), 2);
    assert_eq!(view.query("*").unwrap().len(), 1);
}

#[test]
fn absent_stages_and_indices_match_nothing() {
    let (state, _) = two_prep_steps();
    let root = Scope::root();
    let view = state.view(&root);
    assert!(view.query("missing").unwrap().is_empty());
    assert!(view.query("prep[7]").unwrap().is_empty());
    assert!(view.steps_for("missing").unwrap().is_empty());
}

#[test]
fn malformed_expressions_are_rejected() {
    let (state, _) = two_prep_steps();
    let root = Scope::root();
    let view = state.view(&root);
    for bad in ["", "prep[", "prep[x]", "prep.", "[0]", "$"] {
        let err = view.query(bad).unwrap_err();
        assert_eq!(err.code, "RF-QUERY-001", "expression {:?}", bad);
    }
    assert!(PathExpr::parse("split[*].count").is_ok());
}

#[test]
fn field_on_sub_workflow_selects_inner_stage() {
    let mut state = WorkflowState::new();
    let mut inner_ids = Vec::new();
    for _ in 0..2 {
        let scope = state
            .view_mut(Scope::root())
            .add_workflow(Vec::new(), "split")
            .unwrap();
        inner_ids.push(
            state
                .view_mut(scope)
                .add_step(step("count"), "count")
                .unwrap(),
        );
    }
    let root = Scope::root();
    let view = state.view(&root);
    let matches = view.query("split[*].count").unwrap();
    assert_eq!(matches.len(), 2);
    assert_eq!(matches[1].path_string(), "split[1].count");
    let found: Vec<String> = view
        .steps_for("split[*].count")
        .unwrap()
        .iter()
        .map(|node| node.id.clone())
        .collect();
    assert_eq!(found, inner_ids);
    // Sub-workflow entries themselves contribute no nodes.
    assert!(view.steps_for("split").unwrap().is_empty());
}

#[test]
fn views_are_scoped() {
    let mut state = WorkflowState::new();
    let scope = state
        .view_mut(Scope::root())
        .add_workflow(Vec::new(), "fanout")
        .unwrap();
    state.view_mut(scope.clone()).add_step(step("work"), "work").unwrap();

    let inner = state.view(&scope);
    assert_eq!(inner.query("work").unwrap().len(), 1);
    let root = Scope::root();
    assert!(state.view(&root).query("work").unwrap().is_empty());
    assert_eq!(state.view(&root).query("fanout[0].work").unwrap().len(), 1);
}

#[test]
fn get_rule_resolves_relative_offsets() {
    let mut state = WorkflowState::from_rules(
        vec![Rule::expansion("map", vec!["init".into()], "multi_step", json!({}))],
        None,
    )
    .unwrap();
    let scope = state
        .view_mut(Scope::root())
        .add_workflow(
            vec![Rule::expansion("inner", Vec::new(), "single_step", json!({}))],
            "nested",
        )
        .unwrap();

    let root = Scope::root();
    let view = state.view(&root);
    assert!(view.get_rule("map", &Scope::root()).is_some());
    assert!(view.get_rule("inner", &Scope::root()).is_none());
    let relative = Scope::root().child("nested", 0);
    let found = view.get_rule("inner", &relative).unwrap();
    assert_eq!(found.offset, scope);
    assert!(state.view(&scope).get_rule("inner", &Scope::root()).is_some());
}

#[test]
fn add_step_with_unknown_dependency_leaves_state_untouched() {
    let (mut state, _) = two_prep_steps();
    let before = state.to_json().unwrap();
    let err = state
        .view_mut(Scope::root())
        .add_step(step("late").with_inputs(vec!["no-such-node".into()]), "late")
        .unwrap_err();
    assert_eq!(err.code, "RF-GRAPH-002");
    assert_eq!(state.to_json().unwrap(), before);
}

#[test]
fn add_step_wires_declared_inputs() {
    let (mut state, ids) = two_prep_steps();
    let merged = state
        .view_mut(Scope::root())
        .add_step(step("merge").with_inputs(ids.clone()), "merge")
        .unwrap();
    let upstream: Vec<String> = state
        .dag
        .predecessors(&merged)
        .iter()
        .map(|node| node.id.clone())
        .collect();
    assert_eq!(upstream.len(), 2);
    assert!(ids.iter().all(|id| upstream.contains(id)));
}

#[test]
fn add_rule_at_unknown_scope_fails() {
    let mut state = WorkflowState::new();
    let nowhere = Scope::parse("/ghost/0").unwrap();
    let err = state
        .view_mut(Scope::root())
        .add_rule(Rule::bootstrap(json!({})), &nowhere)
        .unwrap_err();
    assert_eq!(err.code, "RF-SCOPE-002");
    assert_eq!(err.category, ErrorCategory::LookupError);
    assert!(state.rules.is_empty());
    assert!(state.bookkeeping.resolve(&nowhere).is_none());
}

#[test]
fn invalid_stage_names_are_rejected() {
    let mut state = WorkflowState::new();
    for bad in ["", "12", "has space", "a/b", "x.y"] {
        let err = state
            .view_mut(Scope::root())
            .add_step(step("s"), bad)
            .unwrap_err();
        assert_eq!(err.code, "RF-STAGE-001", "stage {:?}", bad);
    }
    let err = state
        .view_mut(Scope::root())
        .add_workflow(Vec::new(), "0")
        .unwrap_err();
    assert_eq!(err.code, "RF-STAGE-001");
    assert!(state.dag.is_empty());
}
