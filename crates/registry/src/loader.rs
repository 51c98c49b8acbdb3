//! Declarative tool metadata loader.
//!
//! Parses the registry file format from `spec.md` §6: a JSON document
//! grouping tools by category. Parsing is strict — an unknown
//! `execution_target` is a startup error, not a skipped entry.

use std::path::Path;

use ao_domain::error::{Error, Result};
use ao_domain::task::ToolMetadata;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct RegistryDocument {
    #[allow(dead_code)]
    version: String,
    categories: std::collections::HashMap<String, CategoryDocument>,
}

#[derive(Debug, Deserialize)]
struct CategoryDocument {
    tools: Vec<ToolEntry>,
}

/// Mirrors `ToolMetadata` but with `execution_target` left as a raw string
/// so we can produce a precise error on an unknown value instead of letting
/// serde's enum deserialization fail with a generic message.
#[derive(Debug, Deserialize)]
struct ToolEntry {
    tool_name: String,
    description: String,
    execution_target: String,
    #[serde(default)]
    params_schema: serde_json::Value,
    #[serde(default)]
    output_schema: serde_json::Value,
}

/// Load and validate a registry document from a file path.
pub fn load_from_path(path: &Path) -> Result<Vec<ToolMetadata>> {
    let content = std::fs::read_to_string(path)?;
    load_from_str(&content)
}

/// Load and validate a registry document from its JSON text.
pub fn load_from_str(content: &str) -> Result<Vec<ToolMetadata>> {
    let doc: RegistryDocument = serde_json::from_str(content)?;
    let mut tools = Vec::new();

    for (category, cat_doc) in doc.categories {
        for entry in cat_doc.tools {
            let execution_target = match entry.execution_target.as_str() {
                "server" => ao_domain::task::ExecutionTarget::Server,
                "client" => ao_domain::task::ExecutionTarget::Client,
                other => {
                    return Err(Error::Config(format!(
                        "tool \"{}\" has unknown execution_target \"{}\" (expected \"server\" or \"client\")",
                        entry.tool_name, other
                    )));
                }
            };
            tools.push(ToolMetadata {
                tool_name: entry.tool_name,
                description: entry.description,
                execution_target,
                params_schema: entry.params_schema,
                output_schema: entry.output_schema,
                category: category.clone(),
            });
        }
    }

    Ok(tools)
}
