#![allow(clippy::result_large_err)]

use super::EngineConfig;
use crate::core::error::AppError;
use crate::core::workflow::store::StateSpec;

pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate configuration rules
    pub fn validate(config: &EngineConfig) -> Result<(), AppError> {
        StateSpec::parse(&config.state.spec)?;

        if config.state.workflow_id.trim().is_empty() {
            return Err(AppError::new(
                crate::core::types::ErrorCategory::ValidationError,
                "state.workflow_id cannot be empty",
            ));
        }

        if config.steering.max_iterations == 0 {
            return Err(AppError::new(
                crate::core::types::ErrorCategory::ValidationError,
                "steering.max_iterations must be greater than zero",
            ));
        }

        Ok(())
    }
}
