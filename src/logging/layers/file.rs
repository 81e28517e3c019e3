use crate::logging::config::{LogFormat, LoggingConfig};
use crate::logging::layers::BoxedLayer;
use crate::Result;
use anyhow::{anyhow, Context};
use dirs_next::home_dir;
use std::fs::create_dir_all;
use std::path::{Component, Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::fmt as tracing_fmt;
use tracing_subscriber::Layer;

const DEFAULT_FILE_NAME: &str = "ruleflow.log";

/// Log file for the process, or for one workflow when `workflow_id` is given.
///
/// With rotation enabled the appender adds a date suffix to this path.
pub fn log_file_path(
    config: &LoggingConfig,
    workspace_root: Option<&Path>,
    workflow_id: Option<&str>,
) -> Result<PathBuf> {
    let directory = resolve_log_dir(config, workspace_root)?;
    let file_name = match workflow_id {
        Some(id) => format!("{}.log", sanitize_file_stem(id)),
        None => DEFAULT_FILE_NAME.to_string(),
    };
    Ok(directory.join(file_name))
}

/// Non-blocking file sink in the configured format. `None` when file logging is off.
///
/// The JSON format flattens event fields, so `rule_id`, `node_id` and `handle` become
/// top-level keys that can be filtered per workflow object.
pub fn file_layer(
    log_file: &Path,
    config: &LoggingConfig,
) -> Result<Option<(BoxedLayer, WorkerGuard)>> {
    if !config.enable_file {
        return Ok(None);
    }
    let directory = log_file
        .parent()
        .ok_or_else(|| anyhow!("log file path {} has no parent directory", log_file.display()))?;
    let file_name = log_file
        .file_name()
        .ok_or_else(|| anyhow!("log file path {} has no file name", log_file.display()))?
        .to_string_lossy()
        .into_owned();
    create_dir_all(directory)
        .with_context(|| format!("failed to create log directory {}", directory.display()))?;
    let appender = RollingFileAppender::builder()
        .rotation(config.rotation.to_appender())
        .filename_prefix(file_name)
        .build(directory)
        .with_context(|| format!("failed to open log file {}", log_file.display()))?;

    let (writer, guard) = tracing_appender::non_blocking(appender);
    let layer = match config.format {
        LogFormat::Text => tracing_fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
            .boxed(),
        LogFormat::Json => tracing_fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .with_writer(writer)
            .boxed(),
    };
    Ok(Some((layer, guard)))
}

fn sanitize_file_stem(id: &str) -> String {
    let stem: String = id
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() {
        "workflow".to_string()
    } else {
        stem
    }
}

// Relative directories resolve against the workspace, or the home directory without one,
// and may not climb out of it.
fn resolve_log_dir(config: &LoggingConfig, workspace_root: Option<&Path>) -> Result<PathBuf> {
    let base = match workspace_root {
        Some(workspace) => workspace.to_path_buf(),
        None => home_dir().ok_or_else(|| anyhow!("$HOME directory unavailable"))?,
    };
    match &config.log_dir {
        Some(custom) if custom.is_absolute() => Ok(custom.clone()),
        Some(custom) => {
            if custom
                .components()
                .any(|component| matches!(component, Component::ParentDir))
            {
                return Err(anyhow!(
                    "logging.log_dir {} must stay inside {}",
                    custom.display(),
                    base.display()
                ));
            }
            Ok(base.join(custom))
        }
        None => Ok(base.join(".ruleflow").join("logs")),
    }
}
