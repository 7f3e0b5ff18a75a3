use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{MathGraphError, Result};

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;

    /// Optionally return a JSON Schema object describing the expected arguments.
    fn parameters(&self) -> Option<Value> {
        None
    }

    async fn call(&self, input: Value) -> Result<Value>;
}

/// Static description of a tool that can be advertised to a model or a protocol peer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDescription {
    pub name: String,
    pub description: String,
    pub parameters: Option<Value>,
}

#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.register_shared(Arc::new(tool));
    }

    pub fn register_shared(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Build a registry holding exactly the named tools.
    ///
    /// Names are matched exactly. A name that does not resolve is a
    /// configuration error for `owner`, and an empty list yields an empty
    /// registry.
    pub fn subset<S: AsRef<str>>(&self, owner: &str, names: &[S]) -> Result<ToolRegistry> {
        let mut selected = ToolRegistry::new();
        for name in names {
            let name = name.as_ref();
            let tool = self
                .tools
                .get(name)
                .ok_or_else(|| MathGraphError::UnknownTool {
                    agent: owner.to_string(),
                    name: name.to_string(),
                    available: self.names().join(", "),
                })?;
            selected.register_shared(Arc::clone(tool));
        }
        Ok(selected)
    }

    pub fn describe(&self) -> Vec<ToolDescription> {
        let mut descriptions: Vec<ToolDescription> = self
            .tools
            .values()
            .map(|tool| ToolDescription {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect();

        descriptions.sort_by(|a, b| a.name.cmp(&b.name));
        descriptions
    }

    pub async fn call(&self, name: &str, input: Value) -> Result<Value> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| MathGraphError::ToolNotFound(name.to_string()))?;
        tool.call(input)
            .await
            .map_err(|source| MathGraphError::ToolInvocation {
                name: name.to_string(),
                source: Box::new(source),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct First;
    struct Second;

    #[async_trait]
    impl Tool for First {
        fn name(&self) -> &str {
            "a_first"
        }

        fn description(&self) -> &str {
            "First tool"
        }

        async fn call(&self, input: Value) -> Result<Value> {
            Ok(input)
        }
    }

    #[async_trait]
    impl Tool for Second {
        fn name(&self) -> &str {
            "second"
        }

        fn description(&self) -> &str {
            "Second tool"
        }

        async fn call(&self, input: Value) -> Result<Value> {
            Ok(input)
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Second);
        registry.register(First);
        registry
    }

    #[tokio::test]
    async fn returns_sorted_descriptions() {
        let names: Vec<String> = registry().describe().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["a_first", "second"]);
    }

    #[test]
    fn subset_keeps_only_named_tools() {
        let subset = registry().subset("solver", &["second"]).unwrap();
        assert_eq!(subset.names(), vec!["second"]);
    }

    #[test]
    fn subset_with_no_names_is_empty() {
        let subset = registry().subset::<&str>("solver", &[]).unwrap();
        assert!(subset.is_empty());
    }

    #[test]
    fn subset_rejects_unknown_names() {
        let err = registry().subset("solver", &["second", "cube"]).err().unwrap();
        match err {
            MathGraphError::UnknownTool {
                agent,
                name,
                available,
            } => {
                assert_eq!(agent, "solver");
                assert_eq!(name, "cube");
                assert_eq!(available, "a_first, second");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn calling_missing_tool_fails() {
        let err = registry().call("nope", Value::Null).await.unwrap_err();
        assert!(matches!(err, MathGraphError::ToolNotFound(name) if name == "nope"));
    }
}
