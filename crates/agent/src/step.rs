//! Per-step records and the aggregate result of a run.

use serde::{Deserialize, Serialize};
use std::fmt;
use toolloop_core::message::Message;
use toolloop_core::provider::{FinishReason, Usage};
use toolloop_core::tool::{ToolCall, ToolResult};

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Termination {
    /// The last step requested no tools
    Completed,
    /// The step ceiling was reached while the model still requested tools
    StepLimitReached,
    /// The last step called client-side tools; the caller owes their results
    AwaitingToolResults,
}

impl Termination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::StepLimitReached => "step-limit-reached",
            Self::AwaitingToolResults => "awaiting-tool-results",
        }
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One dispatch/interpret/execute cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    /// Zero-based position in the run
    pub index: usize,

    /// Text generated in this step
    pub text: String,

    /// Every validated call the model issued, in order
    pub tool_calls: Vec<ToolCall>,

    /// Results of the calls that were executed, in call order
    pub tool_results: Vec<ToolResult>,

    /// Calls to tools without an executor
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_tool_calls: Vec<ToolCall>,

    pub finish_reason: FinishReason,

    pub usage: Usage,

    /// Wall-clock time for dispatch plus tool execution
    pub duration_ms: u64,

    /// The model that answered
    pub model: String,
}

/// Everything a run produced, folded across steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResult {
    /// All steps' text, concatenated in order
    pub text: String,

    pub tool_calls: Vec<ToolCall>,

    pub tool_results: Vec<ToolResult>,

    /// Client-side calls of the last step awaiting caller-supplied results
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_tool_calls: Vec<ToolCall>,

    /// The last step's finish reason
    pub finish_reason: FinishReason,

    /// Sum over all steps
    pub usage: Usage,

    pub steps: Vec<StepResult>,

    pub termination: Termination,

    /// Messages appended to the conversation by this run
    pub response_messages: Vec<Message>,
}

impl GenerateResult {
    /// Fold finished steps into the aggregate.
    pub fn from_steps(
        steps: Vec<StepResult>,
        termination: Termination,
        response_messages: Vec<Message>,
    ) -> Self {
        let text = steps.iter().map(|s| s.text.as_str()).collect();
        let tool_calls = steps.iter().flat_map(|s| s.tool_calls.iter().cloned()).collect();
        let tool_results = steps.iter().flat_map(|s| s.tool_results.iter().cloned()).collect();
        let usage = steps.iter().map(|s| s.usage).sum();
        let (finish_reason, pending_tool_calls) = steps
            .last()
            .map(|s| (s.finish_reason.clone(), s.pending_tool_calls.clone()))
            .unwrap_or_default();

        Self {
            text,
            tool_calls,
            tool_results,
            pending_tool_calls,
            finish_reason,
            usage,
            steps,
            termination,
            response_messages,
        }
    }

    /// The last step's text, which is usually the final answer.
    pub fn final_text(&self) -> &str {
        self.steps.last().map(|s| s.text.as_str()).unwrap_or_default()
    }
}
