//! The tool-calling loop: the heart of Toolloop.
//!
//! One run follows a **Dispatch → Interpret → Execute** cycle:
//!
//! 1. **Dispatch** the accumulated conversation to the provider
//! 2. **Interpret** the reply: text, tool calls, finish reason, usage
//! 3. **Execute** every local tool call (bounded concurrency, call order kept)
//! 4. **Append** the assistant message and tool results, loop back to step 1
//!
//! The loop stops when the model answers without calling tools, when a
//! client-side tool is called, or when the step ceiling is reached.
//! Runs are available as a single aggregate ([`ToolLoop::generate`]) or as
//! an incremental event stream ([`ToolLoop::stream`]).

pub mod executor;
pub mod loop_runner;
pub mod request;
pub mod step;
pub mod stream;
pub mod stream_event;

#[cfg(test)]
mod test_helpers;

pub use executor::{Attempt, Execution, ResolvedCall, ToolExecutor, ToolOutcome};
pub use loop_runner::{DEFAULT_TOOL_CONCURRENCY, FinishCallback, StepCallback, ToolLoop};
pub use request::GenerateRequest;
pub use step::{GenerateResult, StepResult, Termination};
pub use stream::TextStream;
pub use stream_event::StreamEvent;
