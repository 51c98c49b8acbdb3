//! `$.<task_id>.<field>(.<field>)*` path grammar.
//!
//! A hand-rolled parser rather than a parser-combinator crate — the
//! grammar is four tokens wide and doesn't earn the dependency.

use ao_domain::error::{Error, Result};

/// A compiled binding path: the referenced task id plus the dotted field
/// segments to walk within its output envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingPath {
    pub task_id: String,
    pub segments: Vec<String>,
}

impl BindingPath {
    /// Parse `$.<task_id>.<field>(.<field>)*`. Segment indexing (`[0]`) is
    /// not part of the grammar per `spec.md` §9.
    pub fn parse(expr: &str) -> Result<Self> {
        let rest = expr.strip_prefix("$.").ok_or_else(|| {
            Error::Binding(format!("binding expression must start with \"$.\" (got \"{expr}\")"))
        })?;

        let mut parts = rest.split('.');
        let task_id = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::Binding(format!("binding expression missing task id: \"{expr}\"")))?
            .to_string();

        let segments: Vec<String> = parts.map(|s| s.to_string()).collect();
        if segments.is_empty() || segments.iter().any(|s| s.is_empty()) {
            return Err(Error::Binding(format!(
                "binding expression must reference at least one field: \"{expr}\""
            )));
        }

        Ok(Self { task_id, segments })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_path() {
        let p = BindingPath::parse("$.step_0.data.text").unwrap();
        assert_eq!(p.task_id, "step_0");
        assert_eq!(p.segments, vec!["data".to_string(), "text".to_string()]);
    }

    #[test]
    fn parses_single_field() {
        let p = BindingPath::parse("$.step_0.success").unwrap();
        assert_eq!(p.task_id, "step_0");
        assert_eq!(p.segments, vec!["success".to_string()]);
    }

    #[test]
    fn rejects_missing_dollar_prefix() {
        assert!(BindingPath::parse("step_0.data.text").is_err());
    }

    #[test]
    fn rejects_missing_field() {
        assert!(BindingPath::parse("$.step_0").is_err());
    }

    #[test]
    fn rejects_empty_segment() {
        assert!(BindingPath::parse("$.step_0..text").is_err());
    }

    #[test]
    fn rejects_empty_task_id() {
        assert!(BindingPath::parse("$..text").is_err());
    }
}
