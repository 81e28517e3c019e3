use std::env;

/// Execution contexts that influence how logging is routed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionContext {
    /// A developer driving workflows from a terminal.
    LocalDev,
    /// Unattended runs that should be quiet on the console.
    Batch,
    /// The engine linked into a host application that owns the console.
    Embedded,
}

impl ExecutionContext {
    /// Returns `true` when console sinks should be disabled.
    pub fn disables_console(self) -> bool {
        matches!(self, ExecutionContext::Batch | ExecutionContext::Embedded)
    }
}

/// Derive the active execution context from `RULEFLOW_EXECUTION_CONTEXT`, defaulting to local development.
pub fn detect_context() -> ExecutionContext {
    match env::var("RULEFLOW_EXECUTION_CONTEXT")
        .map(|value| value.trim().to_ascii_lowercase())
        .as_deref()
    {
        Ok("batch") => ExecutionContext::Batch,
        Ok("embedded") => ExecutionContext::Embedded,
        _ => ExecutionContext::LocalDev,
    }
}
