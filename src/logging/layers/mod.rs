pub mod console;
pub mod file;

use tracing_subscriber::registry::Registry;
use tracing_subscriber::Layer;

/// Sink layer installed on the process-wide registry.
pub type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;
