//! Tool trait: the abstraction over model-callable capabilities.
//!
//! A tool has a unique name, an optional description, a parameter schema and,
//! usually, an executor. Tools without an executor are "client-side": the
//! step loop hands their calls back to the caller instead of running them.

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// A parsed, validated request to execute a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the LLM's tool_call.id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments after defaults were applied and the schema check passed
    pub arguments: serde_json::Value,
}

/// The result of a tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result is for
    pub call_id: String,

    /// The tool that produced it
    pub tool_name: String,

    /// The validated arguments the executor received
    pub arguments: serde_json::Value,

    /// The executor's output
    pub output: serde_json::Value,
}

impl ToolResult {
    /// The output as the text sent back to the model.
    pub fn output_text(&self) -> String {
        match &self.output {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// The core Tool trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "weather").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> Option<&str> {
        None
    }

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Whether calls to this tool run locally. Tools returning `false` are
    /// forwarded to the caller.
    fn has_executor(&self) -> bool {
        true
    }

    /// Execute the tool with already-validated arguments.
    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> std::result::Result<serde_json::Value, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().map(str::to_string),
            parameters: self.parameters_schema(),
        }
    }
}

type HandlerFuture = BoxFuture<'static, std::result::Result<serde_json::Value, ToolError>>;
type Handler = dyn Fn(serde_json::Value) -> HandlerFuture + Send + Sync;

/// A tool backed by an async closure.
///
/// ```ignore
/// let tool = FunctionTool::new("echo", json!({"type": "object"}), |args| async move { Ok(args) })
///     .with_description("Echo the arguments back");
/// ```
pub struct FunctionTool {
    name: String,
    description: Option<String>,
    parameters: serde_json::Value,
    handler: Arc<Handler>,
}

impl FunctionTool {
    pub fn new<F, Fut>(name: impl Into<String>, parameters: serde_json::Value, handler: F) -> Self
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<serde_json::Value, ToolError>> + Send + 'static,
    {
        let handler: Arc<Handler> =
            Arc::new(move |args: serde_json::Value| -> HandlerFuture { Box::pin(handler(args)) });
        Self {
            name: name.into(),
            description: None,
            parameters,
            handler,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[async_trait]
impl Tool for FunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.parameters.clone()
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> std::result::Result<serde_json::Value, ToolError> {
        (self.handler)(arguments).await
    }
}

/// A tool the model can call but that is executed by the caller.
pub struct ClientTool {
    name: String,
    description: Option<String>,
    parameters: serde_json::Value,
}

impl ClientTool {
    pub fn new(name: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            description: None,
            parameters,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[async_trait]
impl Tool for ClientTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.parameters.clone()
    }

    fn has_executor(&self) -> bool {
        false
    }

    async fn execute(
        &self,
        _arguments: serde_json::Value,
    ) -> std::result::Result<serde_json::Value, ToolError> {
        Err(ToolError::NoExecutor(self.name.clone()))
    }
}

/// The catalog of tools available to a run.
///
/// Names are unique; registering a second tool under an existing name fails.
/// Definitions come out sorted by name so requests are deterministic.
#[derive(Clone, Default)]
pub struct ToolCatalog {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Fails if the name is already taken.
    pub fn register(&mut self, tool: impl Tool + 'static) -> std::result::Result<(), ToolError> {
        self.register_arc(Arc::new(tool))
    }

    /// Register a shared tool. Fails if the name is already taken.
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> std::result::Result<(), ToolError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ToolError::DuplicateName(name));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Builder-style registration.
    pub fn with(mut self, tool: impl Tool + 'static) -> std::result::Result<Self, ToolError> {
        self.register(tool)?;
        Ok(self)
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Get all tool definitions (for sending to the LLM).
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.to_definition()).collect()
    }

    /// Definitions restricted to an active subset (all tools when `None`).
    pub fn definitions_for(&self, active: Option<&[String]>) -> Vec<ToolDefinition> {
        match active {
            None => self.definitions(),
            Some(names) => self
                .tools
                .iter()
                .filter(|(name, _)| names.iter().any(|n| n == *name))
                .map(|(_, t)| t.to_definition())
                .collect(),
        }
    }

    /// List all registered tool names (sorted).
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolCatalog")
            .field("tools", &self.names())
            .finish()
    }
}
