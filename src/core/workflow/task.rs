use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

fn default_spec() -> Value {
    Value::Object(Map::new())
}

/// Opaque unit of work handed to the execution backend.
///
/// The engine only ever reads `prepublished`: a payload that already carries its result is
/// complete without being executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub name: String,
    #[serde(default = "default_spec")]
    pub spec: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prepublished: Option<Value>,
}

impl TaskPayload {
    pub fn new(name: impl Into<String>, spec: Value) -> Self {
        Self {
            name: name.into(),
            spec,
            prepublished: None,
        }
    }

    pub fn prepublished(name: impl Into<String>, result: Value) -> Self {
        Self {
            name: name.into(),
            spec: default_spec(),
            prepublished: Some(result),
        }
    }
}

/// A step a rule wants to add: its payload plus the node ids it consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    pub name: String,
    pub task: TaskPayload,
    #[serde(default)]
    pub inputs: Vec<String>,
}

impl StepSpec {
    pub fn new(name: impl Into<String>, task: TaskPayload) -> Self {
        Self {
            name: name.into(),
            task,
            inputs: Vec::new(),
        }
    }

    pub fn with_inputs(mut self, inputs: Vec<String>) -> Self {
        self.inputs = inputs;
        self
    }

    /// Step seeded with externally supplied data, complete on creation.
    pub fn init(name: impl Into<String>, data: Value) -> Self {
        let name = name.into();
        Self::new(name.clone(), TaskPayload::prepublished(name, data))
    }
}
