#![allow(clippy::result_large_err)]

use super::{ConfigValidator, EngineConfig};
use crate::core::error::AppError;
use std::env;
use std::path::Path;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load config from workspace root (workspace/ruleflow.toml)
    /// Environment variables override config file values
    pub fn load_from_workspace(workspace_path: &Path) -> Result<EngineConfig, AppError> {
        let config_path = workspace_path.join("ruleflow.toml");
        let config_file = Self::load_from_file(&config_path)?;

        let mut config = config_file.unwrap_or_default();

        // Apply environment variable overrides
        Self::apply_env_overrides(&mut config)?;

        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Load config from specific file path
    /// Returns Ok(None) if file doesn't exist
    pub fn load_from_file(path: &Path) -> Result<Option<EngineConfig>, AppError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::new(
                crate::core::types::ErrorCategory::IoError,
                format!("Failed to read config file {}: {}", path.display(), e),
            )
        })?;

        let config: EngineConfig = toml::from_str(&content).map_err(|e| {
            AppError::new(
                crate::core::types::ErrorCategory::ConfigurationError,
                format!("Failed to parse config file {}: {}", path.display(), e),
            )
        })?;

        Ok(Some(config))
    }

    /// Apply environment variable overrides to the configuration
    /// Unparseable numbers are ignored; an unknown validation policy is an error
    fn apply_env_overrides(config: &mut EngineConfig) -> Result<(), AppError> {
        // State overrides
        if let Ok(spec) = env::var("RULEFLOW_STATE") {
            config.state.spec = spec;
        }

        if let Ok(workflow_id) = env::var("RULEFLOW_WORKFLOW_ID") {
            config.state.workflow_id = workflow_id;
        }

        // Controller overrides
        if let Ok(validation) = env::var("RULEFLOW_VALIDATION") {
            config.controller.validation = validation.parse()?;
        }

        // Steering overrides
        if let Ok(interval_str) = env::var("RULEFLOW_UPDATE_INTERVAL_MS") {
            if let Ok(interval) = interval_str.parse::<u64>() {
                config.steering.update_interval_ms = interval;
            }
        }

        if let Ok(max_iterations_str) = env::var("RULEFLOW_MAX_ITERATIONS") {
            if let Ok(max_iterations) = max_iterations_str.parse::<u64>() {
                config.steering.max_iterations = max_iterations;
            }
        }

        Ok(())
    }

    /// Get documentation for supported environment variables
    pub fn env_var_documentation() -> &'static [&'static str] {
        &[
            "RULEFLOW_STATE - Override state spec (inmem, filebacked:<path>, sqlite:<url>; default: inmem)",
            "RULEFLOW_WORKFLOW_ID - Override the document key used by database stores (default: default)",
            "RULEFLOW_VALIDATION - Override commit validation policy (lenient/strict, default: lenient)",
            "RULEFLOW_UPDATE_INTERVAL_MS - Override idle pause of the driving loop (default: 1000)",
            "RULEFLOW_MAX_ITERATIONS - Override the driving loop iteration cap (default: 10000)",
            "RULEFLOW_LOG_LEVEL - Override the default log level",
            "RULEFLOW_LOG_DIR - Override the log file directory",
            "RULEFLOW_EXECUTION_CONTEXT - Select logging defaults (local-dev, batch, embedded)",
        ]
    }
}
