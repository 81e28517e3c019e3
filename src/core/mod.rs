pub mod config;
pub mod error;
pub mod types;
pub mod workflow;

pub use config::{ConfigLoader, EngineConfig};
pub use error::AppError;
pub use types::*;
pub use workflow::controller::{
    setup_controller, with_transaction, Controller, PersistentController, ValidationPolicy,
    WorkflowController,
};
pub use workflow::handler::{ExpansionHandler, HandlerRegistry, HandlerRegistryBuilder};
pub use workflow::rule::{OffsetRule, Rule};
pub use workflow::scope::Scope;
pub use workflow::state::WorkflowState;
pub use workflow::steering::{run_workflow, RunOptions, RunSummary};
