//! Events emitted by a streaming run.
//!
//! `StreamEvent` lifts provider-level stream chunks into run-level events:
//! text and tool-call fragments as they arrive, validated calls, tool
//! results, and a marker at the end of each step and of the run.

use serde::{Deserialize, Serialize};
use toolloop_core::provider::{FinishReason, Usage};

use crate::step::Termination;

/// Events emitted while a streaming run progresses.
///
/// Serialized with a kebab-case `type` tag:
/// - `text-delta`               : partial text from the model
/// - `tool-call-streaming-start`: the model began a tool call
/// - `tool-call-delta`          : a fragment of that call's argument text
/// - `tool-call`                : a complete, validated tool call
/// - `tool-result`              : a tool finished executing
/// - `step-finish`              : one step is done
/// - `finish`                   : the run is done
/// - `error`                    : the run failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamEvent {
    TextDelta { text_delta: String },

    ToolCallStreamingStart {
        tool_call_id: String,
        tool_name: String,
    },

    ToolCallDelta {
        tool_call_id: String,
        tool_name: String,
        args_text_delta: String,
    },

    ToolCall {
        tool_call_id: String,
        tool_name: String,
        args: serde_json::Value,
    },

    ToolResult {
        tool_call_id: String,
        tool_name: String,
        args: serde_json::Value,
        result: serde_json::Value,
    },

    StepFinish {
        step: usize,
        finish_reason: FinishReason,
        usage: Usage,
        /// Whether another step follows
        is_continued: bool,
    },

    Finish {
        finish_reason: FinishReason,
        /// Summed over all steps
        usage: Usage,
        termination: Termination,
        steps: usize,
    },

    Error { message: String },
}

impl StreamEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TextDelta { .. } => "text-delta",
            Self::ToolCallStreamingStart { .. } => "tool-call-streaming-start",
            Self::ToolCallDelta { .. } => "tool-call-delta",
            Self::ToolCall { .. } => "tool-call",
            Self::ToolResult { .. } => "tool-result",
            Self::StepFinish { .. } => "step-finish",
            Self::Finish { .. } => "finish",
            Self::Error { .. } => "error",
        }
    }
}
