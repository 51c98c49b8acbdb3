pub mod instances;
pub mod loader;
pub mod registry;

pub use instances::{InstanceRegistry, ToolCallable};
pub use registry::ToolRegistry;
