pub mod config;
pub mod context;
pub mod layers;

pub use context::{detect_context, ExecutionContext};
pub use config::{LogFormat, LogRotation};
pub use layers::console::ConsoleOutput;

use crate::logging::config::LoggingConfig;
use crate::logging::layers::{console, file, BoxedLayer};
use crate::Result;
use anyhow::{anyhow, Context};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::prelude::*;

static LOGGER_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Guards that keep logging sinks active for as long as the host process runs workflows.
pub struct LoggingGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
    console_output: ConsoleOutput,
    log_file_path: PathBuf,
}

impl LoggingGuard {
    /// Returns the console output configuration used during initialization.
    pub fn console_output(&self) -> ConsoleOutput {
        self.console_output
    }

    /// Returns the log file path backed by the file sink.
    pub fn log_file_path(&self) -> &Path {
        &self.log_file_path
    }
}

/// Initialize logging for a workspace, detecting the execution context from the environment.
pub fn init(workspace_root: Option<&Path>) -> Result<LoggingGuard> {
    init_with_context(workspace_root, detect_context(), None)
}

/// Initialize the logging framework.
///
/// Configures the filter, the file sink and the console sink from defaults, the workspace
/// logging config and environment overrides. With a `workflow_id` the file sink writes to a
/// file named after that workflow. It errors when invoked more than once per process unless
/// tests explicitly reset the guard.
pub fn init_with_context(
    workspace_root: Option<&Path>,
    context: ExecutionContext,
    workflow_id: Option<&str>,
) -> Result<LoggingGuard> {
    if LOGGER_INITIALIZED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Err(anyhow!("logging already initialized"));
    }

    let config = LoggingConfig::load(workspace_root)?;

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.default_level))
        .context("failed to configure tracing level")?;
    let log_file_path = file::log_file_path(&config, workspace_root, workflow_id)?;

    let mut sinks: Vec<BoxedLayer> = Vec::new();
    let file_guard = match file::file_layer(&log_file_path, &config)? {
        Some((layer, guard)) => {
            sinks.push(layer);
            Some(guard)
        }
        None => None,
    };
    let console_output = console::select_console_output(context, config.console_output);
    if let Some(layer) = console::console_layer(console_output) {
        sinks.push(layer);
    }

    tracing_subscriber::registry()
        .with(sinks)
        .with(env_filter)
        .try_init()
        .map_err(|err| anyhow!("failed to install tracing subscriber: {}", err))?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
        console_output,
        log_file_path,
    })
}

/// Reset the initialization guard so tests can reconfigure logging multiple times.
#[doc(hidden)]
pub fn reset_for_tests() {
    LOGGER_INITIALIZED.store(false, Ordering::SeqCst);
}
