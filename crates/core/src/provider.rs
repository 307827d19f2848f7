//! Provider trait: the abstraction over LLM backends.
//!
//! A Provider knows how to send a conversation to an LLM and get a response
//! back, either as a complete message or as a stream of chunks.
//!
//! Implementations: OpenAI-compatible endpoints, scripted replay.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign};
use crate::error::ProviderError;
use crate::message::{Message, MessageToolCall};

/// Configuration for a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "openai/gpt-4o-mini", "gpt-4o")
    pub model: String,

    /// The full accumulated conversation
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Available tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// How the model may use the tools
    #[serde(default)]
    pub tool_choice: ToolChoice,

    /// Whether to stream the response
    #[serde(default)]
    pub stream: bool,

    /// Stop sequences
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

pub fn default_temperature() -> f32 {
    0.7
}

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does (biases tool selection)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// Tool-choice policy for a request.
///
/// Written as a plain string in config and JSON: `"auto"`, `"required"`,
/// `"none"`, or the name of the tool the model is forced to call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ToolChoice {
    /// The model decides whether to call tools
    #[default]
    Auto,
    /// The model must call at least one tool
    Required,
    /// The model must not call tools
    None,
    /// The model must call this specific tool
    Tool { name: String },
}

impl ToolChoice {
    /// The forced tool name, if any.
    pub fn forced_tool(&self) -> Option<&str> {
        match self {
            Self::Tool { name } => Some(name.as_str()),
            _ => None,
        }
    }
}

impl From<String> for ToolChoice {
    fn from(s: String) -> Self {
        match s.trim() {
            "auto" | "" => Self::Auto,
            "required" => Self::Required,
            "none" => Self::None,
            name => Self::Tool {
                name: name.to_string(),
            },
        }
    }
}

impl From<&str> for ToolChoice {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<ToolChoice> for String {
    fn from(choice: ToolChoice) -> Self {
        choice.to_string()
    }
}

impl fmt::Display for ToolChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str("auto"),
            Self::Required => f.write_str("required"),
            Self::None => f.write_str("none"),
            Self::Tool { name } => f.write_str(name),
        }
    }
}

/// Why the model stopped generating for one step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FinishReason {
    /// Natural end of the message
    Stop,
    /// Hit the token limit
    Length,
    /// The model requested tool calls
    ToolCalls,
    /// Output was filtered
    ContentFilter,
    /// The provider reported an error
    Error,
    /// A provider-specific reason we don't model
    Other(String),
    /// No reason was reported
    #[default]
    Unknown,
}

impl FinishReason {
    /// Parse a provider's finish reason string.
    ///
    /// Accepts both OpenAI (`tool_calls`, `content_filter`) and Anthropic
    /// (`tool_use`, `end_turn`, `max_tokens`) spellings.
    pub fn from_provider(raw: &str) -> Self {
        match raw {
            "stop" | "end_turn" | "stop_sequence" => Self::Stop,
            "length" | "max_tokens" => Self::Length,
            "tool_calls" | "tool-calls" | "tool_use" | "function_call" => Self::ToolCalls,
            "content_filter" | "content-filter" => Self::ContentFilter,
            "error" => Self::Error,
            "" | "unknown" => Self::Unknown,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Stop => "stop",
            Self::Length => "length",
            Self::ToolCalls => "tool_calls",
            Self::ContentFilter => "content_filter",
            Self::Error => "error",
            Self::Other(s) => s.as_str(),
            Self::Unknown => "unknown",
        }
    }
}

impl From<String> for FinishReason {
    fn from(s: String) -> Self {
        Self::from_provider(&s)
    }
}

impl From<FinishReason> for String {
    fn from(reason: FinishReason) -> Self {
        reason.as_str().to_string()
    }
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A complete (non-streaming) response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The generated message (text and tool calls)
    pub message: Message,

    /// Why generation stopped
    #[serde(default)]
    pub finish_reason: FinishReason,

    /// Token usage statistics
    #[serde(default)]
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    #[serde(default)]
    pub model: String,

    /// Provider-specific metadata
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

impl Add for Usage {
    type Output = Usage;

    fn add(self, rhs: Usage) -> Usage {
        Usage {
            prompt_tokens: self.prompt_tokens.saturating_add(rhs.prompt_tokens),
            completion_tokens: self.completion_tokens.saturating_add(rhs.completion_tokens),
            total_tokens: self.total_tokens.saturating_add(rhs.total_tokens),
        }
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, rhs: Usage) {
        *self = *self + rhs;
    }
}

impl std::iter::Sum for Usage {
    fn sum<I: Iterator<Item = Usage>>(iter: I) -> Usage {
        iter.fold(Usage::default(), Add::add)
    }
}

/// A single chunk in a streaming response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    /// Partial text content
    TextDelta { text: String },

    /// The model started a tool call
    ToolCallStart { index: u32, id: String, name: String },

    /// A fragment of a tool call's JSON arguments
    ToolCallDelta { index: u32, arguments: String },

    /// Final chunk: the fully assembled tool calls, finish reason and usage
    Finish {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<MessageToolCall>,
        #[serde(default)]
        finish_reason: FinishReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
    },
}

/// Replay a complete response as the chunk sequence a streaming provider
/// would have produced.
pub fn response_to_chunks(response: ProviderResponse) -> Vec<StreamChunk> {
    let mut chunks = Vec::with_capacity(2 + response.message.tool_calls.len() * 2);

    if !response.message.content.is_empty() {
        chunks.push(StreamChunk::TextDelta {
            text: response.message.content,
        });
    }

    for (i, tc) in response.message.tool_calls.iter().enumerate() {
        let index = i as u32;
        chunks.push(StreamChunk::ToolCallStart {
            index,
            id: tc.id.clone(),
            name: tc.name.clone(),
        });
        if !tc.arguments.is_empty() {
            chunks.push(StreamChunk::ToolCallDelta {
                index,
                arguments: tc.arguments.clone(),
            });
        }
    }

    chunks.push(StreamChunk::Finish {
        tool_calls: response.message.tool_calls,
        finish_reason: response.finish_reason,
        usage: response.usage,
        model: Some(response.model),
    });
    chunks
}

/// Receiving half of a provider stream.
pub type ChunkReceiver =
    tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>;

/// The core Provider trait.
///
/// Every LLM backend implements this trait. The step loop calls `complete()`
/// or `stream()` without knowing which provider is being used.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openrouter", "scripted").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError>;

    /// Send a request and get a stream of response chunks.
    ///
    /// Default implementation calls `complete()` and replays the result as chunks.
    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        let response = self.complete(request).await?;
        let chunks = response_to_chunks(response);
        let (tx, rx) = tokio::sync::mpsc::channel(chunks.len().max(1));
        for chunk in chunks {
            let _ = tx.send(Ok(chunk)).await;
        }
        Ok(rx)
    }

    /// List available models for this provider.
    async fn list_models(&self) -> std::result::Result<Vec<String>, ProviderError> {
        Ok(Vec::new())
    }

    /// Health check: can we reach the provider?
    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}
