//! Server-side executor (§4.5): looks up a registered tool and invokes it,
//! converting missing-registration, missing-instance, and tool panics into
//! an ordinary `TaskOutput` rather than letting any of them take down the
//! scheduling loop.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use ao_domain::task::TaskOutput;
use ao_registry::{InstanceRegistry, ToolRegistry};
use futures_util::FutureExt;
use serde_json::Value;

pub struct ServerExecutor {
    registry: Arc<ToolRegistry>,
    instances: Arc<InstanceRegistry>,
}

impl ServerExecutor {
    pub fn new(registry: Arc<ToolRegistry>, instances: Arc<InstanceRegistry>) -> Self {
        Self { registry, instances }
    }

    /// Run `tool_name` with `resolved_inputs`. Never returns an `Err` —
    /// every failure mode is folded into `TaskOutput { success: false, .. }`
    /// so the scheduler has one terminal shape to handle.
    pub async fn execute(&self, tool_name: &str, resolved_inputs: HashMap<String, Value>) -> TaskOutput {
        if self.registry.get_tool(tool_name).is_none() {
            return TaskOutput::err("not_in_registry");
        }

        let callable = match self.instances.get(tool_name) {
            Some(c) => c,
            None => return TaskOutput::err("not_implemented"),
        };

        match AssertUnwindSafe(callable.call(resolved_inputs)).catch_unwind().await {
            Ok(Ok(data)) => TaskOutput::ok(data),
            Ok(Err(e)) => TaskOutput::err(e.to_string()),
            Err(_) => TaskOutput::err("tool panicked during execution"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ao_domain::error::{Error, Result};
    use ao_domain::task::{ExecutionTarget, ToolMetadata};
    use ao_registry::ToolCallable;
    use async_trait::async_trait;
    use serde_json::json;

    #[derive(Debug)]
    struct Echo;

    #[async_trait]
    impl ToolCallable for Echo {
        async fn call(&self, inputs: HashMap<String, Value>) -> Result<HashMap<String, Value>> {
            Ok(inputs)
        }
    }

    #[derive(Debug)]
    struct Panicker;

    #[async_trait]
    impl ToolCallable for Panicker {
        async fn call(&self, _inputs: HashMap<String, Value>) -> Result<HashMap<String, Value>> {
            panic!("boom");
        }
    }

    #[derive(Debug)]
    struct Failer;

    #[async_trait]
    impl ToolCallable for Failer {
        async fn call(&self, _inputs: HashMap<String, Value>) -> Result<HashMap<String, Value>> {
            Err(Error::Other("tool-reported failure".into()))
        }
    }

    fn metadata(name: &str) -> ToolMetadata {
        ToolMetadata {
            tool_name: name.into(),
            description: "test".into(),
            execution_target: ExecutionTarget::Server,
            params_schema: Value::Null,
            output_schema: Value::Null,
            category: "test".into(),
        }
    }

    #[tokio::test]
    async fn unregistered_tool_fails_with_not_in_registry() {
        let executor = ServerExecutor::new(Arc::new(ToolRegistry::empty()), Arc::new(InstanceRegistry::new()));
        let out = executor.execute("ghost", HashMap::new()).await;
        assert!(!out.success);
        assert_eq!(out.error.as_deref(), Some("not_in_registry"));
    }

    #[tokio::test]
    async fn registered_without_instance_fails_with_not_implemented() {
        let registry = Arc::new(ToolRegistry::from_tools(vec![metadata("echo")]));
        let executor = ServerExecutor::new(registry, Arc::new(InstanceRegistry::new()));
        let out = executor.execute("echo", HashMap::new()).await;
        assert!(!out.success);
        assert_eq!(out.error.as_deref(), Some("not_implemented"));
    }

    #[tokio::test]
    async fn successful_call_returns_data() {
        let registry = Arc::new(ToolRegistry::from_tools(vec![metadata("echo")]));
        let instances = Arc::new(InstanceRegistry::new());
        instances.register("echo", Arc::new(Echo));
        let executor = ServerExecutor::new(registry, instances);

        let mut inputs = HashMap::new();
        inputs.insert("x".to_string(), json!(1));
        let out = executor.execute("echo", inputs).await;
        assert!(out.success);
        assert_eq!(out.data.get("x"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn tool_error_is_reported_not_raised() {
        let registry = Arc::new(ToolRegistry::from_tools(vec![metadata("fail")]));
        let instances = Arc::new(InstanceRegistry::new());
        instances.register("fail", Arc::new(Failer));
        let executor = ServerExecutor::new(registry, instances);
        let out = executor.execute("fail", HashMap::new()).await;
        assert!(!out.success);
        assert!(out.error.unwrap().contains("tool-reported failure"));
    }

    #[tokio::test]
    async fn tool_panic_is_caught() {
        let registry = Arc::new(ToolRegistry::from_tools(vec![metadata("panicker")]));
        let instances = Arc::new(InstanceRegistry::new());
        instances.register("panicker", Arc::new(Panicker));
        let executor = ServerExecutor::new(registry, instances);
        let out = executor.execute("panicker", HashMap::new()).await;
        assert!(!out.success);
        assert_eq!(out.error.as_deref(), Some("tool panicked during execution"));
    }
}
