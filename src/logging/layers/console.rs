use crate::logging::context::ExecutionContext;
use crate::logging::layers::BoxedLayer;
use serde::Deserialize;
use std::fmt;
use std::io;
use std::str::FromStr;
use tracing_subscriber::fmt::{self as tracing_fmt, writer::BoxMakeWriter};
use tracing_subscriber::Layer;

/// Where console logs should be emitted.
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleOutput {
    Stdout,
    #[default]
    Stderr,
    None,
}

impl fmt::Display for ConsoleOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsoleOutput::Stdout => write!(f, "stdout"),
            ConsoleOutput::Stderr => write!(f, "stderr"),
            ConsoleOutput::None => write!(f, "none"),
        }
    }
}

impl FromStr for ConsoleOutput {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "stdout" => Ok(ConsoleOutput::Stdout),
            "stderr" => Ok(ConsoleOutput::Stderr),
            "none" => Ok(ConsoleOutput::None),
            _ => Err(format!(
                "invalid logging.console_output '{}'; supported values are stdout, stderr, none",
                value
            )),
        }
    }
}

/// Unattended runs never write to the console; a host application gets console output
/// only when it asks for it.
pub fn select_console_output(
    context: ExecutionContext,
    configured: Option<ConsoleOutput>,
) -> ConsoleOutput {
    match context {
        ExecutionContext::Batch => ConsoleOutput::None,
        ExecutionContext::LocalDev => configured.unwrap_or(ConsoleOutput::Stderr),
        ExecutionContext::Embedded => configured.unwrap_or(ConsoleOutput::None),
    }
}

/// One compact line per event, so rule and node fields stay readable while a workflow is
/// being driven from a terminal. `None` when console output is off.
pub fn console_layer(output: ConsoleOutput) -> Option<BoxedLayer> {
    let writer = match output {
        ConsoleOutput::Stdout => BoxMakeWriter::new(io::stdout),
        ConsoleOutput::Stderr => BoxMakeWriter::new(io::stderr),
        ConsoleOutput::None => return None,
    };
    Some(
        tracing_fmt::layer()
            .compact()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(false)
            .boxed(),
    )
}
