use crate::core::workflow::controller::ValidationPolicy;
use crate::core::workflow::steering::RunOptions;
use crate::core::workflow::store::StateSpec;
use crate::core::error::AppError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Engine configuration loaded from ruleflow.toml
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    /// Where workflow state is persisted
    #[serde(default)]
    pub state: StateConfig,

    /// Controller behaviour
    #[serde(default)]
    pub controller: ControllerConfig,

    /// Driving loop settings
    #[serde(default)]
    pub steering: SteeringConfig,
}

/// State configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// `inmem`, `filebacked:<path>` or `sqlite:<url>`
    #[serde(default = "default_state_spec")]
    pub spec: String,

    /// Document key used by database stores
    #[serde(default = "default_workflow_id")]
    pub workflow_id: String,
}

/// Controller configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ControllerConfig {
    /// What to do when a transaction produces an inconsistent state
    #[serde(default)]
    pub validation: ValidationPolicy,
}

/// Steering configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SteeringConfig {
    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,

    #[serde(default = "default_max_iterations")]
    pub max_iterations: u64,
}

// Default functions
fn default_state_spec() -> String {
    "inmem".to_string()
}

fn default_workflow_id() -> String {
    "default".to_string()
}

fn default_update_interval_ms() -> u64 {
    1000
}

fn default_max_iterations() -> u64 {
    10_000
}

impl Default for StateConfig {
    fn default() -> Self {
        StateConfig {
            spec: default_state_spec(),
            workflow_id: default_workflow_id(),
        }
    }
}

impl Default for SteeringConfig {
    fn default() -> Self {
        SteeringConfig {
            update_interval_ms: default_update_interval_ms(),
            max_iterations: default_max_iterations(),
        }
    }
}

impl EngineConfig {
    #[allow(clippy::result_large_err)]
    pub fn state_spec(&self) -> Result<StateSpec, AppError> {
        StateSpec::parse(&self.state.spec)
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            update_interval: Duration::from_millis(self.steering.update_interval_ms),
            max_iterations: self.steering.max_iterations,
        }
    }
}


pub mod loader;
pub mod validation;

pub use loader::ConfigLoader;
pub use validation::ConfigValidator;
