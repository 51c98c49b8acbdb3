//! Tool metadata registry.
//!
//! Loaded once at process start, read-only afterward. Partitions tools by
//! `execution_target` and `category` for the lookups the scheduling loop
//! and the CLI's `registry list` need.

use std::collections::HashMap;

use ao_domain::error::{Error, Result};
use ao_domain::task::{ExecutionTarget, ToolMetadata};
use parking_lot::RwLock;

/// Holds every loaded [`ToolMetadata`] entry, keyed by tool name.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, ToolMetadata>>,
}

impl ToolRegistry {
    /// Build an empty registry. Every task referencing a tool then fails
    /// validation at plan admission, per `spec.md` §4.2's boot-without-config
    /// allowance.
    pub fn empty() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
        }
    }

    /// Build a registry from a set of already-loaded tool entries.
    pub fn from_tools(tools: Vec<ToolMetadata>) -> Self {
        let map = tools.into_iter().map(|t| (t.tool_name.clone(), t)).collect();
        Self {
            tools: RwLock::new(map),
        }
    }

    /// Load and validate the registry document at `path`.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let tools = crate::loader::load_from_path(path)?;
        tracing::info!(tool_count = tools.len(), "tool registry loaded");
        Ok(Self::from_tools(tools))
    }

    /// Look up a tool's metadata by name.
    pub fn get_tool(&self, tool_name: &str) -> Option<ToolMetadata> {
        self.tools.read().get(tool_name).cloned()
    }

    /// Check that a tool exists in the registry. Returns `Error::Registry`
    /// naming the unknown tool otherwise — used at plan admission so an
    /// unregistered tool fails fast instead of surfacing as a confusing
    /// dispatch error later.
    pub fn validate_tool(&self, tool_name: &str) -> Result<()> {
        if self.tools.read().contains_key(tool_name) {
            Ok(())
        } else {
            Err(Error::Registry(format!("unknown tool \"{tool_name}\"")))
        }
    }

    /// All tools whose `execution_target` matches.
    pub fn tools_by_target(&self, target: ExecutionTarget) -> Vec<ToolMetadata> {
        self.tools
            .read()
            .values()
            .filter(|t| t.execution_target == target)
            .cloned()
            .collect()
    }

    /// All tools in a given category.
    pub fn tools_by_category(&self, category: &str) -> Vec<ToolMetadata> {
        self.tools
            .read()
            .values()
            .filter(|t| t.category == category)
            .cloned()
            .collect()
    }

    /// All registered tools, for `registry list`.
    pub fn list(&self) -> Vec<ToolMetadata> {
        self.tools.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(name: &str, target: ExecutionTarget, category: &str) -> ToolMetadata {
        ToolMetadata {
            tool_name: name.into(),
            description: "desc".into(),
            execution_target: target,
            params_schema: serde_json::Value::Null,
            output_schema: serde_json::Value::Null,
            category: category.into(),
        }
    }

    #[test]
    fn empty_registry_fails_validation() {
        let reg = ToolRegistry::empty();
        let err = reg.validate_tool("file_create").unwrap_err();
        assert!(matches!(err, Error::Registry(_)));
    }

    #[test]
    fn get_tool_returns_metadata() {
        let reg = ToolRegistry::from_tools(vec![tool("file_create", ExecutionTarget::Client, "fs")]);
        assert!(reg.get_tool("file_create").is_some());
        assert!(reg.get_tool("missing").is_none());
    }

    #[test]
    fn partitions_by_target() {
        let reg = ToolRegistry::from_tools(vec![
            tool("file_create", ExecutionTarget::Client, "fs"),
            tool("web_search", ExecutionTarget::Server, "search"),
        ]);
        let client_tools = reg.tools_by_target(ExecutionTarget::Client);
        assert_eq!(client_tools.len(), 1);
        assert_eq!(client_tools[0].tool_name, "file_create");
    }

    #[test]
    fn partitions_by_category() {
        let reg = ToolRegistry::from_tools(vec![
            tool("file_create", ExecutionTarget::Client, "fs"),
            tool("file_delete", ExecutionTarget::Client, "fs"),
            tool("web_search", ExecutionTarget::Server, "search"),
        ]);
        assert_eq!(reg.tools_by_category("fs").len(), 2);
        assert_eq!(reg.tools_by_category("search").len(), 1);
        assert_eq!(reg.tools_by_category("nonexistent").len(), 0);
    }

    #[test]
    fn validate_known_tool_succeeds() {
        let reg = ToolRegistry::from_tools(vec![tool("file_create", ExecutionTarget::Client, "fs")]);
        assert!(reg.validate_tool("file_create").is_ok());
    }
}
