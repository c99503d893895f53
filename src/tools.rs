// Copyright (c) 2025 Chetan Conikee <conikee@gmail.com>
// Licensed under the MIT License

//! The Tool Registry: a named catalog of callable tools the Generation
//! Driver's tool-use loop invokes on the model's behalf.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};

use crate::error::{ForestError, Result};
use crate::provider::ToolSpec;

/// A callable tool's implementation.
///
/// Execution returns a plain string: the result becomes the `Text` content
/// of the `ToolMessage` the driver appends. Errors are not caught here —
/// they propagate, and the driver wraps them into an `{error: ...}`
/// tool-result payload per §4.4 step 5.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Executes this tool with the given arguments.
    async fn call(&self, args: &Map<String, Value>) -> Result<String>;
}

#[async_trait]
impl<F, Fut> ToolHandler for F
where
    F: Fn(Map<String, Value>) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<String>> + Send,
{
    async fn call(&self, args: &Map<String, Value>) -> Result<String> {
        (self)(args.clone()).await
    }
}

/// A registered tool: its spec plus its handler.
struct Registration {
    description: String,
    parameters_schema: Value,
    group: Option<String>,
    handler: Arc<dyn ToolHandler>,
}

/// A named catalog of callable tools with JSON-Schema parameter specs.
///
/// Names are unique within a registry instance. Registration is
/// write-once-at-init in practice: runtime registration while a generation
/// is in flight is not supported by this core.
pub struct ToolRegistry {
    tools: HashMap<String, Registration>,
}

impl ToolRegistry {
    /// Creates a registry seeded with the built-in `current_date` and
    /// `introspect` tools.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self {
            tools: HashMap::new(),
        };
        registry
            .register(
                "current_date",
                "Returns the current date and time in ISO-8601 format.",
                serde_json::json!({"type": "object", "properties": {}}),
                Arc::new(|_args: Map<String, Value>| async move { Ok(Utc::now().to_rfc3339()) }),
                None,
            )
            .expect("built-in schema is a valid object");
        registry
            .register(
                "introspect",
                "Returns a short description of the host codebase.",
                serde_json::json!({"type": "object", "properties": {}}),
                Arc::new(|_args: Map<String, Value>| async move {
                    Ok("forest-engine: a content-addressable forest of branching LLM conversations".to_string())
                }),
                None,
            )
            .expect("built-in schema is a valid object");
        registry
    }

    /// Registers a tool, replacing any existing registration of the same
    /// name.
    ///
    /// # Errors
    ///
    /// Returns an error if `parameters_schema` is not a JSON object — a
    /// tool's parameter spec must itself describe an object shape.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        parameters_schema: Value,
        handler: Arc<dyn ToolHandler>,
        group: Option<String>,
    ) -> Result<()> {
        let name = name.into();
        if !parameters_schema.is_object() {
            return Err(ForestError::invalid_tool_schema(
                name,
                "parameters_schema must be a JSON object",
            ));
        }
        self.tools.insert(
            name,
            Registration {
                description: description.into(),
                parameters_schema,
                group,
                handler,
            },
        );
        Ok(())
    }

    /// Returns the specs of every registered tool.
    #[must_use]
    pub fn list(&self) -> Vec<ToolSpec> {
        self.tools
            .iter()
            .map(|(name, reg)| ToolSpec {
                name: name.clone(),
                description: reg.description.clone(),
                parameters_schema: reg.parameters_schema.clone(),
            })
            .collect()
    }

    /// Returns the specs of the registered tools named in `names`, in no
    /// particular order, silently skipping unregistered names.
    #[must_use]
    pub fn subset(&self, names: &[String]) -> Vec<ToolSpec> {
        names
            .iter()
            .filter_map(|name| {
                self.tools.get(name).map(|reg| ToolSpec {
                    name: name.clone(),
                    description: reg.description.clone(),
                    parameters_schema: reg.parameters_schema.clone(),
                })
            })
            .collect()
    }

    /// Returns the group a tool was registered under, if any.
    #[must_use]
    pub fn group_of(&self, name: &str) -> Option<&str> {
        self.tools.get(name).and_then(|r| r.group.as_deref())
    }

    /// Executes the named tool, returning its string result.
    ///
    /// # Errors
    ///
    /// Returns an error if no tool is registered under `name`; otherwise
    /// propagates whatever error the handler itself raises.
    pub async fn execute(&self, name: &str, args: &Map<String, Value>) -> Result<String> {
        let registration = self
            .tools
            .get(name)
            .ok_or_else(|| ForestError::tool_not_found(name))?;
        registration.handler.call(args).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
