#![allow(clippy::result_large_err)] // Handler trait and registry return AppError directly for structured diagnostics without boxing.

use crate::core::error::AppError;
use crate::core::workflow::handlers;
use crate::core::workflow::view::WorkflowViewMut;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Expansion logic named by a rule's directive.
pub trait ExpansionHandler: Send + Sync + 'static {
    /// Handler name used in stage definitions.
    fn name(&self) -> &'static str;

    /// Validate params ahead of expansion.
    fn validate_params(&self, params: &Value) -> Result<(), AppError>;

    /// Add steps, rules or sub-workflows for `stage` through the rule's view.
    fn expand(
        &self,
        stage: &str,
        params: &Value,
        view: &mut WorkflowViewMut<'_>,
    ) -> Result<(), AppError>;
}

/// Builder used to register handlers before a workflow runs.
pub struct HandlerRegistryBuilder {
    handlers: HashMap<String, Arc<dyn ExpansionHandler>>,
}

impl Default for HandlerRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistryBuilder {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register<T: ExpansionHandler>(&mut self, handler: T) -> &mut Self {
        let name = handler.name();
        if self.handlers.contains_key(name) {
            panic!("duplicate expansion handler registered: {}", name);
        }
        self.handlers.insert(name.to_string(), Arc::new(handler));
        self
    }

    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            inner: Arc::new(self.handlers),
        }
    }
}

/// Immutable registry shared by controllers.
#[derive(Clone)]
pub struct HandlerRegistry {
    inner: Arc<HashMap<String, Arc<dyn ExpansionHandler>>>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl HandlerRegistry {
    pub fn empty() -> Self {
        HandlerRegistryBuilder::new().build()
    }

    pub fn with_builtins() -> Self {
        let mut builder = HandlerRegistryBuilder::new();
        handlers::register_builtins(&mut builder);
        builder.build()
    }

    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::new()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ExpansionHandler>> {
        self.inner.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.keys().cloned().collect();
        names.sort();
        names
    }
}
