#![allow(clippy::result_large_err)] // Driving loop returns AppError directly for structured diagnostics.

use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use crate::core::workflow::controller::WorkflowController;
use serde::Serialize;
use std::time::Duration;
use tokio::time::sleep;

/// Knobs for [`run_workflow`].
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Pause between iterations that made no progress.
    pub update_interval: Duration,
    pub max_iterations: u64,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_millis(1000),
            max_iterations: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub iterations: u64,
    pub finished: bool,
    pub successful: bool,
}

/// Drive `controller` until the workflow is finished.
///
/// Each iteration applies every applicable rule, submits every submittable node and then
/// syncs the backend.
pub async fn run_workflow(
    controller: &mut dyn WorkflowController,
    options: &RunOptions,
) -> Result<RunSummary, AppError> {
    let mut iterations = 0;
    while !controller.finished()? {
        if iterations >= options.max_iterations {
            return Err(AppError::new(
                ErrorCategory::StateError,
                format!(
                    "workflow did not finish within {} iterations",
                    options.max_iterations
                ),
            )
            .with_code("RF-ITER-001"));
        }
        iterations += 1;

        let rules = controller.applicable_rules()?;
        if !rules.is_empty() {
            controller.apply_rules(&rules).await?;
        }
        let nodes = controller.submittable_nodes();
        let submitted = if nodes.is_empty() {
            Vec::new()
        } else {
            controller.submit_nodes(&nodes).await?
        };
        let synced = controller.sync_backend().await?;
        tracing::info!(
            iteration = iterations,
            applied = rules.len(),
            submitted = submitted.len(),
            synced,
            "workflow iteration"
        );

        if rules.is_empty() && submitted.is_empty() && synced == 0 && !controller.finished()? {
            sleep(options.update_interval).await;
        }
    }
    let successful = controller.successful()?;
    tracing::info!(iterations, successful, "workflow finished");
    Ok(RunSummary {
        iterations,
        finished: true,
        successful,
    })
}
