//! Instance registry: the constructed, callable side of a tool.
//!
//! [`ToolRegistry`](crate::registry::ToolRegistry) holds declarative
//! metadata; this holds the actual `Arc<dyn ToolCallable>` the server-side
//! executor (`ao-engine`) invokes for `execution_target = server` tasks.
//! Client-targeted tools have no entry here — they are dispatched to the
//! companion process instead.

use std::collections::HashMap;
use std::sync::Arc;

use ao_domain::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

/// A server-side tool implementation.
#[async_trait]
pub trait ToolCallable: Send + Sync + std::fmt::Debug {
    /// Execute the tool with its resolved inputs, returning the
    /// `{success, data, error}`-shaped output fields.
    async fn call(&self, inputs: HashMap<String, Value>) -> Result<HashMap<String, Value>>;
}

/// Holds constructed tool callables, keyed by tool name.
pub struct InstanceRegistry {
    instances: RwLock<HashMap<String, Arc<dyn ToolCallable>>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self {
            instances: RwLock::new(HashMap::new()),
        }
    }

    /// Register a callable under a tool name, replacing any prior entry.
    pub fn register(&self, tool_name: impl Into<String>, callable: Arc<dyn ToolCallable>) {
        self.instances.write().insert(tool_name.into(), callable);
    }

    pub fn get(&self, tool_name: &str) -> Option<Arc<dyn ToolCallable>> {
        self.instances.read().get(tool_name).cloned()
    }

    pub fn require(&self, tool_name: &str) -> Result<Arc<dyn ToolCallable>> {
        self.get(tool_name)
            .ok_or_else(|| Error::Registry(format!("no server-side callable registered for \"{tool_name}\"")))
    }

    pub fn len(&self) -> usize {
        self.instances.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.read().is_empty()
    }
}

impl Default for InstanceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
