use insta::assert_debug_snapshot;
use ruleflow::core::config::{ConfigLoader, ConfigValidator, EngineConfig};
use ruleflow::core::workflow::controller::ValidationPolicy;
use ruleflow::core::workflow::store::StateSpec;
use serial_test::serial;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

fn clear_ruleflow_env() {
    for v in &[
        "RULEFLOW_STATE",
        "RULEFLOW_WORKFLOW_ID",
        "RULEFLOW_VALIDATION",
        "RULEFLOW_UPDATE_INTERVAL_MS",
        "RULEFLOW_MAX_ITERATIONS",
    ] {
        env::remove_var(v);
    }
}

/// Test loading a complete ruleflow.toml
#[test]
#[serial]
fn test_config_loading_integration() {
    clear_ruleflow_env();
    let temp_dir = TempDir::new().unwrap();
    let workspace_path = temp_dir.path();

    let config_content = r#"
[state]
spec = "sqlite://state.db"
workflow_id = "nightly"

[controller]
validation = "strict"

[steering]
update_interval_ms = 250
max_iterations = 42
"#;
    fs::write(workspace_path.join("ruleflow.toml"), config_content).unwrap();

    let config = ConfigLoader::load_from_workspace(workspace_path).unwrap();
    assert_eq!(config.state.workflow_id, "nightly");
    assert_debug_snapshot!(config.controller.validation, @"Strict");
    assert_eq!(
        config.state_spec().unwrap(),
        StateSpec::Sqlite("sqlite://state.db".to_string())
    );
    let options = config.run_options();
    assert_eq!(options.update_interval, Duration::from_millis(250));
    assert_eq!(options.max_iterations, 42);
}

/// Partial files keep defaults for everything they omit
#[test]
#[serial]
fn test_partial_config_keeps_defaults() {
    clear_ruleflow_env();
    let temp_dir = TempDir::new().unwrap();
    fs::write(
        temp_dir.path().join("ruleflow.toml"),
        "[state]\nspec = \"filebacked:/var/lib/ruleflow/wf.json\"\n",
    )
    .unwrap();

    let config = ConfigLoader::load_from_workspace(temp_dir.path()).unwrap();
    assert_eq!(
        config.state_spec().unwrap(),
        StateSpec::File(PathBuf::from("/var/lib/ruleflow/wf.json"))
    );
    assert_eq!(config.state.workflow_id, "default");
    assert_eq!(config.controller.validation, ValidationPolicy::Lenient);
    assert_eq!(config.steering.update_interval_ms, 1000);
}

/// Environment variables win over the file
#[test]
#[serial]
fn test_env_overrides_file() {
    clear_ruleflow_env();
    let temp_dir = TempDir::new().unwrap();
    fs::write(
        temp_dir.path().join("ruleflow.toml"),
        "[state]\nspec = \"inmem\"\n[steering]\nmax_iterations = 5\n",
    )
    .unwrap();

    env::set_var("RULEFLOW_STATE", "sqlite::memory:");
    env::set_var("RULEFLOW_WORKFLOW_ID", "from-env");
    env::set_var("RULEFLOW_VALIDATION", "strict");
    env::set_var("RULEFLOW_UPDATE_INTERVAL_MS", "10");
    env::set_var("RULEFLOW_MAX_ITERATIONS", "77");

    let config = ConfigLoader::load_from_workspace(temp_dir.path()).unwrap();
    assert_eq!(config.state.spec, "sqlite::memory:");
    assert_eq!(config.state.workflow_id, "from-env");
    assert_eq!(config.controller.validation, ValidationPolicy::Strict);
    assert_eq!(config.steering.update_interval_ms, 10);
    assert_eq!(config.steering.max_iterations, 77);

    clear_ruleflow_env();
}

/// An unknown state spec from the environment is rejected at load time
#[test]
#[serial]
fn test_invalid_state_spec_from_env() {
    clear_ruleflow_env();
    let temp_dir = TempDir::new().unwrap();
    env::set_var("RULEFLOW_STATE", "mongo:workflows");
    let err = ConfigLoader::load_from_workspace(temp_dir.path()).unwrap_err();
    assert_eq!(err.code, "RF-STATE-001");
    clear_ruleflow_env();
}

#[test]
#[serial]
fn test_missing_file_yields_none() {
    clear_ruleflow_env();
    let temp_dir = TempDir::new().unwrap();
    let loaded = ConfigLoader::load_from_file(&temp_dir.path().join("ruleflow.toml")).unwrap();
    assert!(loaded.is_none());
}

#[test]
fn test_validator_rejects_blank_workflow_id() {
    let mut config = EngineConfig::default();
    config.state.workflow_id = "  ".to_string();
    assert!(ConfigValidator::validate(&config).is_err());
}

#[test]
fn test_env_var_documentation_lists_every_override() {
    let docs = ConfigLoader::env_var_documentation();
    for name in [
        "RULEFLOW_STATE",
        "RULEFLOW_WORKFLOW_ID",
        "RULEFLOW_VALIDATION",
        "RULEFLOW_UPDATE_INTERVAL_MS",
        "RULEFLOW_MAX_ITERATIONS",
        "RULEFLOW_LOG_LEVEL",
    ] {
        assert!(docs.iter().any(|line| line.starts_with(name)), "{} undocumented", name);
    }
}
