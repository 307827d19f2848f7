//! # Toolloop Core
//!
//! Domain types, traits, and error definitions for the Toolloop multi-step
//! tool-calling runtime. Every other crate depends inward on this one.
//!
//! - [`provider`]: the `Provider` trait and request/response/stream types
//! - [`tool`]: the `Tool` trait and the name-unique `ToolCatalog`
//! - [`schema`]: argument parsing, defaulting and validation
//! - [`message`]: messages and the append-only `Conversation`
//! - [`event`]: domain events published while a run progresses

pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod schema;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ProviderError, Result, ToolError};
pub use event::{DomainEvent, EventBus};
pub use message::{Conversation, ConversationId, Message, MessageToolCall, Role};
pub use provider::{
    FinishReason, Provider, ProviderRequest, ProviderResponse, StreamChunk, ToolChoice,
    ToolDefinition, Usage,
};
pub use tool::{ClientTool, FunctionTool, Tool, ToolCall, ToolCatalog, ToolResult};
