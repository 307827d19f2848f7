//! The step loop: dispatch → interpret → execute, until the model stops
//! calling tools or the step ceiling is reached.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use toolloop_core::error::ProviderError;
use toolloop_core::event::{DomainEvent, EventBus};
use toolloop_core::message::{Conversation, Message, MessageToolCall};
use toolloop_core::provider::{
    FinishReason, Provider, ProviderRequest, StreamChunk, ToolDefinition, Usage,
};
use toolloop_core::tool::{Tool, ToolCall, ToolCatalog};
use toolloop_core::{Error, Result};
use tracing::{debug, info, warn};

use crate::executor::{Attempt, Execution, ResolvedCall, ToolExecutor};
use crate::request::GenerateRequest;
use crate::step::{GenerateResult, StepResult, Termination};
use crate::stream::TextStream;
use crate::stream_event::StreamEvent;

/// Default number of tool executions in flight within one step.
pub const DEFAULT_TOOL_CONCURRENCY: usize = 8;

pub type StepCallback = Arc<dyn Fn(&StepResult) + Send + Sync>;
pub type FinishCallback = Arc<dyn Fn(&GenerateResult) + Send + Sync>;

/// Orchestrates multi-step tool calling against one provider and catalog.
///
/// Cheap to clone: everything inside is shared.
#[derive(Clone)]
pub struct ToolLoop {
    provider: Arc<dyn Provider>,
    tools: ToolCatalog,
    tool_concurrency: usize,
    event_bus: Option<Arc<EventBus>>,
    on_step_finish: Option<StepCallback>,
    on_finish: Option<FinishCallback>,
}

/// The sending half of a streaming run.
pub(crate) struct EventSink {
    tx: mpsc::Sender<StreamEvent>,
}

impl EventSink {
    pub(crate) fn new(tx: mpsc::Sender<StreamEvent>) -> Self {
        Self { tx }
    }

    /// Deliver an event; a vanished consumer cancels the run.
    pub(crate) async fn emit(&self, event: StreamEvent) -> Result<()> {
        self.tx.send(event).await.map_err(|_| Error::Cancelled)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.tx.is_closed() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// One model turn, however it was delivered.
struct ModelTurn {
    text: String,
    tool_calls: Vec<MessageToolCall>,
    finish_reason: FinishReason,
    usage: Usage,
    model: String,
}

impl ToolLoop {
    pub fn new(provider: Arc<dyn Provider>, tools: ToolCatalog) -> Self {
        Self {
            provider,
            tools,
            tool_concurrency: DEFAULT_TOOL_CONCURRENCY,
            event_bus: None,
            on_step_finish: None,
            on_finish: None,
        }
    }

    /// Publish domain events on this bus.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Bound the number of tool executions running at once (min 1).
    pub fn with_tool_concurrency(mut self, n: usize) -> Self {
        self.tool_concurrency = n.max(1);
        self
    }

    /// Called after every step, before the next dispatch.
    pub fn on_step_finish(
        mut self,
        callback: impl Fn(&StepResult) + Send + Sync + 'static,
    ) -> Self {
        self.on_step_finish = Some(Arc::new(callback));
        self
    }

    /// Called once when a run terminates successfully.
    pub fn on_finish(
        mut self,
        callback: impl Fn(&GenerateResult) + Send + Sync + 'static,
    ) -> Self {
        self.on_finish = Some(Arc::new(callback));
        self
    }

    pub fn tools(&self) -> &ToolCatalog {
        &self.tools
    }

    /// Run a fresh conversation built from the request.
    pub async fn generate(&self, request: GenerateRequest) -> Result<GenerateResult> {
        request.validate(&self.tools)?;
        let mut conversation = request.to_conversation();
        self.drive(&mut conversation, &request, None).await
    }

    /// Continue a caller-owned conversation.
    ///
    /// The request's `system`, `prompt` and `messages` are ignored; the
    /// conversation is dispatched as it stands (for example after the caller
    /// appended results for pending client-side calls).
    pub async fn run(
        &self,
        conversation: &mut Conversation,
        request: &GenerateRequest,
    ) -> Result<GenerateResult> {
        request.validate_settings(&self.tools)?;
        if conversation.is_empty() {
            return Err(Error::InvalidRequest("conversation is empty".into()));
        }
        self.drive(conversation, request, None).await
    }

    /// Stream a fresh conversation built from the request.
    ///
    /// The request is validated now; nothing is dispatched until the
    /// returned stream is first polled.
    pub fn stream(&self, request: GenerateRequest) -> Result<TextStream> {
        request.validate(&self.tools)?;
        let conversation = request.to_conversation();
        Ok(TextStream::new(self.clone(), conversation, request))
    }

    /// Stream the continuation of a caller-owned conversation.
    pub fn stream_conversation(
        &self,
        conversation: Conversation,
        request: GenerateRequest,
    ) -> Result<TextStream> {
        request.validate_settings(&self.tools)?;
        if conversation.is_empty() {
            return Err(Error::InvalidRequest("conversation is empty".into()));
        }
        Ok(TextStream::new(self.clone(), conversation, request))
    }

    /// The loop shared by the batch and streaming entry points.
    pub(crate) async fn drive(
        &self,
        conversation: &mut Conversation,
        request: &GenerateRequest,
        sink: Option<&EventSink>,
    ) -> Result<GenerateResult> {
        let result = self.drive_steps(conversation, request, sink).await;
        if let Err(e) = &result
            && !matches!(e, Error::Cancelled)
        {
            warn!(conversation_id = %conversation.id, error = %e, "Tool loop failed");
            self.publish(|| DomainEvent::ErrorOccurred {
                context: format!("conversation {}", conversation.id),
                error_message: e.to_string(),
                timestamp: Utc::now(),
            });
        }
        result
    }

    async fn drive_steps(
        &self,
        conversation: &mut Conversation,
        request: &GenerateRequest,
        sink: Option<&EventSink>,
    ) -> Result<GenerateResult> {
        let start_len = conversation.len();
        let definitions = self.tools.definitions_for(request.active_tools.as_deref());
        let mut steps: Vec<StepResult> = Vec::new();

        info!(
            conversation_id = %conversation.id,
            model = %request.model,
            max_steps = request.max_steps,
            tools = definitions.len(),
            "Starting tool loop"
        );

        let termination = loop {
            if let Some(sink) = sink {
                sink.ensure_open()?;
            }

            let index = steps.len();
            let step = self
                .run_step(index, conversation, request, &definitions, sink)
                .await?;

            let termination = if !step.pending_tool_calls.is_empty() {
                Some(Termination::AwaitingToolResults)
            } else if step.tool_calls.is_empty() {
                Some(Termination::Completed)
            } else if index + 1 >= request.max_steps {
                Some(Termination::StepLimitReached)
            } else {
                None
            };

            debug!(
                step = index,
                finish_reason = %step.finish_reason,
                tool_calls = step.tool_calls.len(),
                tokens = step.usage.total_tokens,
                duration_ms = step.duration_ms,
                "Step finished"
            );

            self.publish(|| DomainEvent::StepFinished {
                conversation_id: conversation.id.to_string(),
                step: index,
                model: step.model.clone(),
                tool_calls: step.tool_calls.len(),
                finish_reason: step.finish_reason.to_string(),
                tokens_used: step.usage.total_tokens,
                timestamp: Utc::now(),
            });

            if let Some(cb) = &self.on_step_finish {
                cb(&step);
            }

            if let Some(sink) = sink {
                sink.emit(StreamEvent::StepFinish {
                    step: index,
                    finish_reason: step.finish_reason.clone(),
                    usage: step.usage,
                    is_continued: termination.is_none(),
                })
                .await?;
            }

            steps.push(step);

            if let Some(termination) = termination {
                break termination;
            }
        };

        if termination == Termination::StepLimitReached {
            warn!(
                conversation_id = %conversation.id,
                max_steps = request.max_steps,
                "Step limit reached with tool calls outstanding"
            );
        }

        let response_messages = conversation.messages[start_len..].to_vec();
        let result = GenerateResult::from_steps(steps, termination, response_messages);

        info!(
            conversation_id = %conversation.id,
            steps = result.steps.len(),
            termination = %result.termination,
            total_tokens = result.usage.total_tokens,
            "Tool loop finished"
        );

        self.publish(|| DomainEvent::LoopFinished {
            conversation_id: conversation.id.to_string(),
            steps: result.steps.len(),
            termination: result.termination.to_string(),
            total_tokens: result.usage.total_tokens,
            timestamp: Utc::now(),
        });

        if let Some(cb) = &self.on_finish {
            cb(&result);
        }

        Ok(result)
    }

    async fn run_step(
        &self,
        index: usize,
        conversation: &mut Conversation,
        request: &GenerateRequest,
        definitions: &[ToolDefinition],
        sink: Option<&EventSink>,
    ) -> Result<StepResult> {
        let started = Instant::now();

        let provider_request = ProviderRequest {
            model: request.model.clone(),
            messages: conversation.messages.clone(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            tools: definitions.to_vec(),
            tool_choice: request.tool_choice.clone(),
            stream: sink.is_some(),
            stop: vec![],
        };

        debug!(step = index, messages = provider_request.messages.len(), "Dispatching step");

        let mut turn = match sink {
            Some(sink) => {
                self.dispatch_streaming(provider_request, request.tool_call_streaming, sink)
                    .await?
            }
            None => self.dispatch(provider_request).await?,
        };
        if turn.model.is_empty() {
            turn.model = request.model.clone();
        }
        assign_missing_ids(&mut turn.tool_calls);

        // Vet the whole step before anything runs
        let executor =
            ToolExecutor::new(&self.tools).with_active(request.active_tools.as_deref());
        let resolved = executor.resolve_all(&turn.tool_calls)?;

        let mut tool_calls = Vec::with_capacity(resolved.len());
        let mut pending_tool_calls = Vec::new();
        let mut local: Vec<(ToolCall, Arc<dyn Tool>)> = Vec::new();
        for r in resolved {
            tool_calls.push(r.call().clone());
            match r {
                ResolvedCall::Local { call, tool } => local.push((call, tool)),
                ResolvedCall::Deferred(call) => pending_tool_calls.push(call),
            }
        }

        if let Some(sink) = sink {
            for call in &tool_calls {
                sink.emit(StreamEvent::ToolCall {
                    tool_call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    args: call.arguments.clone(),
                })
                .await?;
            }
            if !local.is_empty() {
                sink.ensure_open()?;
            }
        }

        let executions = self.execute_batch(local).await?;

        if let Some(sink) = sink {
            for execution in &executions {
                sink.emit(StreamEvent::ToolResult {
                    tool_call_id: execution.result.call_id.clone(),
                    tool_name: execution.result.tool_name.clone(),
                    args: execution.result.arguments.clone(),
                    result: execution.result.output.clone(),
                })
                .await?;
            }
        }

        // The step only lands in the conversation once every call succeeded
        conversation.push(Message::assistant(turn.text.clone()).with_tool_calls(turn.tool_calls));
        for execution in &executions {
            let mut message =
                Message::tool_result(&execution.result.call_id, execution.result.output_text());
            message.metadata.insert(
                "tool_name".into(),
                serde_json::Value::String(execution.result.tool_name.clone()),
            );
            conversation.push(message);
        }

        Ok(StepResult {
            index,
            text: turn.text,
            tool_calls,
            tool_results: executions.into_iter().map(|e| e.result).collect(),
            pending_tool_calls,
            finish_reason: turn.finish_reason,
            usage: turn.usage,
            duration_ms: started.elapsed().as_millis() as u64,
            model: turn.model,
        })
    }

    /// Execute a step's local calls, publishing one event per attempt.
    async fn execute_batch(
        &self,
        local: Vec<(ToolCall, Arc<dyn Tool>)>,
    ) -> Result<Vec<Execution>> {
        if local.is_empty() {
            return Ok(Vec::new());
        }
        ToolExecutor::run_all(local, self.tool_concurrency, |attempt: &Attempt| {
            if !attempt.success {
                warn!(
                    tool = %attempt.tool_name,
                    call_id = %attempt.call_id,
                    "Tool execution failed"
                );
            }
            self.publish(|| DomainEvent::ToolExecuted {
                tool_name: attempt.tool_name.clone(),
                call_id: attempt.call_id.clone(),
                success: attempt.success,
                duration_ms: attempt.duration_ms,
                timestamp: Utc::now(),
            });
        })
        .await
        .map_err(Error::from)
    }

    /// Batch dispatch: one complete response.
    async fn dispatch(&self, request: ProviderRequest) -> Result<ModelTurn> {
        let response = self.provider.complete(request).await?;
        Ok(ModelTurn {
            text: response.message.content,
            tool_calls: response.message.tool_calls,
            finish_reason: response.finish_reason,
            usage: response.usage.unwrap_or_default(),
            model: response.model,
        })
    }

    /// Streaming dispatch: forward fragments as events, then assemble the turn.
    async fn dispatch_streaming(
        &self,
        request: ProviderRequest,
        tool_call_streaming: bool,
        sink: &EventSink,
    ) -> Result<ModelTurn> {
        let mut rx = self.provider.stream(request).await?;
        let mut text = String::new();
        let mut started: HashMap<u32, (String, String)> = HashMap::new();

        while let Some(chunk) = rx.recv().await {
            match chunk? {
                StreamChunk::TextDelta { text: delta } => {
                    text.push_str(&delta);
                    sink.emit(StreamEvent::TextDelta { text_delta: delta }).await?;
                }
                StreamChunk::ToolCallStart { index, id, name } => {
                    let id = if id.is_empty() { new_call_id() } else { id };
                    if tool_call_streaming {
                        sink.emit(StreamEvent::ToolCallStreamingStart {
                            tool_call_id: id.clone(),
                            tool_name: name.clone(),
                        })
                        .await?;
                    }
                    started.insert(index, (id, name));
                }
                StreamChunk::ToolCallDelta { index, arguments } => {
                    if tool_call_streaming {
                        let (id, name) = started.get(&index).cloned().unwrap_or_default();
                        sink.emit(StreamEvent::ToolCallDelta {
                            tool_call_id: id,
                            tool_name: name,
                            args_text_delta: arguments,
                        })
                        .await?;
                    }
                }
                StreamChunk::Finish {
                    mut tool_calls,
                    finish_reason,
                    usage,
                    model,
                } => {
                    // Finished calls come in index order; reuse the ids
                    // already announced for them
                    let mut indices: Vec<u32> = started.keys().copied().collect();
                    indices.sort_unstable();
                    for (call, index) in tool_calls.iter_mut().zip(indices) {
                        if call.id.is_empty()
                            && let Some((id, _)) = started.get(&index)
                        {
                            call.id = id.clone();
                        }
                    }
                    return Ok(ModelTurn {
                        text,
                        tool_calls,
                        finish_reason,
                        usage: usage.unwrap_or_default(),
                        model: model.unwrap_or_default(),
                    });
                }
            }
        }

        Err(ProviderError::StreamInterrupted("stream ended without a finish chunk".into()).into())
    }

    fn publish(&self, event: impl FnOnce() -> DomainEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event());
        }
    }
}

/// Some local models omit call IDs; tool results need one to refer to.
fn assign_missing_ids(calls: &mut [MessageToolCall]) {
    for call in calls.iter_mut().filter(|c| c.id.is_empty()) {
        call.id = new_call_id();
    }
}

fn new_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use toolloop_core::error::ToolError;
    use toolloop_core::message::Role;
    use toolloop_core::provider::ToolChoice;
    use toolloop_providers::ScriptedProvider;

    fn setup(
        responses: Vec<toolloop_core::provider::ProviderResponse>,
    ) -> (Arc<ScriptedProvider>, Arc<AtomicUsize>, ToolLoop) {
        let provider = Arc::new(ScriptedProvider::new(responses));
        let invocations = Arc::new(AtomicUsize::new(0));
        let tool_loop = ToolLoop::new(provider.clone(), catalog(invocations.clone()));
        (provider, invocations, tool_loop)
    }

    fn weather_call(id: &str, location: &str) -> MessageToolCall {
        tool_call(id, "weather", json!({ "location": location }))
    }

    #[tokio::test]
    async fn text_only_reply_completes_in_one_step() {
        let (provider, invocations, tool_loop) = setup(vec![text_response("Hello!")]);

        let result = tool_loop
            .generate(GenerateRequest::new("mock").with_prompt("Hi").with_max_steps(5))
            .await
            .unwrap();

        assert_eq!(result.text, "Hello!");
        assert_eq!(result.termination, Termination::Completed);
        assert_eq!(result.finish_reason, FinishReason::Stop);
        assert_eq!(result.steps.len(), 1);
        assert!(result.tool_calls.is_empty());
        assert_eq!(provider.call_count(), 1);
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
        assert_eq!(result.response_messages.len(), 1);
    }

    #[tokio::test]
    async fn tool_step_feeds_results_into_next_dispatch() {
        let (provider, invocations, tool_loop) = setup(vec![
            tool_response(vec![weather_call("call_1", "San Francisco")], "Let me check. "),
            text_response("It is 18 degrees in San Francisco."),
        ]);

        let result = tool_loop
            .generate(
                GenerateRequest::new("mock")
                    .with_prompt("What is the weather in San Francisco?")
                    .with_max_steps(3),
            )
            .await
            .unwrap();

        assert_eq!(result.termination, Termination::Completed);
        assert_eq!(result.steps.len(), 2);
        assert_eq!(provider.call_count(), 2);
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        assert_eq!(result.text, "Let me check. It is 18 degrees in San Francisco.");
        assert_eq!(result.final_text(), "It is 18 degrees in San Francisco.");

        // Defaults were applied before the executor saw the arguments
        assert_eq!(result.tool_calls.len(), 1);
        assert_eq!(result.tool_calls[0].arguments["unit"], "celsius");
        assert_eq!(result.tool_results[0].call_id, "call_1");
        assert_eq!(result.tool_results[0].output["temperature"], 18);

        // The second dispatch sees the assistant call and its result
        let second = &provider.requests()[1];
        assert_eq!(second.messages.len(), 3);
        assert_eq!(second.messages[1].role, Role::Assistant);
        assert_eq!(second.messages[1].tool_calls[0].id, "call_1");
        let tool_msg = &second.messages[2];
        assert_eq!(tool_msg.role, Role::Tool);
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(tool_msg.metadata["tool_name"], "weather");

        // assistant + tool result + final assistant
        assert_eq!(result.response_messages.len(), 3);
    }

    #[tokio::test]
    async fn usage_is_the_sum_of_all_steps() {
        let (_, _, tool_loop) = setup(vec![
            tool_response(vec![weather_call("a", "Oslo")], ""),
            tool_response(vec![weather_call("b", "Bergen")], ""),
            text_response("Done"),
        ]);

        let result = tool_loop
            .generate(GenerateRequest::new("mock").with_prompt("Go").with_max_steps(5))
            .await
            .unwrap();

        let summed: Usage = result.steps.iter().map(|s| s.usage).sum();
        assert_eq!(result.usage, summed);
        assert_eq!(result.usage.prompt_tokens, 20 + 20 + 10);
        assert_eq!(result.usage.completion_tokens, 8 + 8 + 5);
        assert_eq!(result.usage.total_tokens, 71);
    }

    #[tokio::test]
    async fn single_step_ceiling_executes_tools_then_stops() {
        let (provider, invocations, tool_loop) = setup(vec![
            tool_response(vec![weather_call("call_1", "Paris")], ""),
            text_response("never dispatched"),
        ]);

        let result = tool_loop
            .generate(GenerateRequest::new("mock").with_prompt("Weather?"))
            .await
            .unwrap();

        assert_eq!(provider.call_count(), 1);
        assert_eq!(result.termination, Termination::StepLimitReached);
        assert_eq!(result.finish_reason, FinishReason::ToolCalls);
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        assert_eq!(result.tool_results.len(), 1);
    }

    #[tokio::test]
    async fn ceiling_bounds_the_number_of_dispatches() {
        let (provider, _, tool_loop) = setup(vec![
            tool_response(vec![weather_call("a", "Rome")], ""),
            tool_response(vec![weather_call("b", "Milan")], ""),
            tool_response(vec![weather_call("c", "Turin")], ""),
            text_response("never dispatched"),
        ]);

        let result = tool_loop
            .generate(GenerateRequest::new("mock").with_prompt("Go").with_max_steps(3))
            .await
            .unwrap();

        assert_eq!(provider.call_count(), 3);
        assert_eq!(result.steps.len(), 3);
        assert_eq!(result.termination, Termination::StepLimitReached);
    }

    #[tokio::test]
    async fn ceiling_is_not_reached_when_model_stops_early() {
        let (provider, _, tool_loop) = setup(vec![
            tool_response(vec![weather_call("a", "Rome")], ""),
            text_response("Sunny"),
        ]);

        let result = tool_loop
            .generate(GenerateRequest::new("mock").with_prompt("Go").with_max_steps(10))
            .await
            .unwrap();

        assert_eq!(provider.call_count(), 2);
        assert_eq!(result.termination, Termination::Completed);
    }

    #[tokio::test]
    async fn parallel_calls_keep_call_order() {
        let (_, invocations, tool_loop) = setup(vec![
            tool_response(
                vec![
                    tool_call("s1", "slow", json!({"n": 1})),
                    weather_call("w1", "Lima"),
                    tool_call("s2", "slow", json!({"n": 2})),
                ],
                "",
            ),
            text_response("All done"),
        ]);

        let result = tool_loop
            .with_tool_concurrency(3)
            .generate(GenerateRequest::new("mock").with_prompt("Go").with_max_steps(2))
            .await
            .unwrap();

        let ids: Vec<_> = result.tool_results.iter().map(|r| r.call_id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "w1", "s2"]);
        assert_eq!(invocations.load(Ordering::SeqCst), 3);

        let tool_ids: Vec<_> = result
            .response_messages
            .iter()
            .filter(|m| m.role == Role::Tool)
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();
        assert_eq!(tool_ids, vec!["s1", "w1", "s2"]);
    }

    #[tokio::test]
    async fn unknown_tool_halts_before_any_execution() {
        let (provider, invocations, tool_loop) = setup(vec![tool_response(
            vec![weather_call("ok", "Quito"), tool_call("bad", "teleport", json!({}))],
            "",
        )]);
        let finished = Arc::new(AtomicUsize::new(0));
        let finished_cb = finished.clone();
        let tool_loop = tool_loop.on_finish(move |_| {
            finished_cb.fetch_add(1, Ordering::SeqCst);
        });

        let mut conversation = Conversation::with_messages([Message::user("Go")]);
        let request = GenerateRequest::new("mock").with_max_steps(3);
        let err = tool_loop.run(&mut conversation, &request).await.unwrap_err();

        assert!(matches!(
            err.as_tool_error(),
            Some(ToolError::UnknownTool(name)) if name == "teleport"
        ));
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
        assert_eq!(provider.call_count(), 1);
        assert_eq!(finished.load(Ordering::SeqCst), 0);
        // Nothing from the failed step reached the conversation
        assert_eq!(conversation.len(), 1);
    }

    #[tokio::test]
    async fn invalid_arguments_halt_the_run() {
        let (_, invocations, tool_loop) = setup(vec![tool_response(
            vec![
                weather_call("ok", "Quito"),
                tool_call("bad", "weather", json!({ "unit": "kelvin" })),
            ],
            "",
        )]);

        let err = tool_loop
            .generate(GenerateRequest::new("mock").with_prompt("Go").with_max_steps(3))
            .await
            .unwrap_err();

        assert!(matches!(
            err.as_tool_error(),
            Some(ToolError::InvalidArguments { tool_name, .. }) if tool_name == "weather"
        ));
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn malformed_argument_json_is_rejected() {
        let (_, _, tool_loop) = setup(vec![tool_response(
            vec![MessageToolCall {
                id: "bad".into(),
                name: "weather".into(),
                arguments: "{\"location\":".into(),
            }],
            "",
        )]);

        let err = tool_loop
            .generate(GenerateRequest::new("mock").with_prompt("Go"))
            .await
            .unwrap_err();
        assert!(matches!(err.as_tool_error(), Some(ToolError::InvalidArguments { .. })));
    }

    #[tokio::test]
    async fn executor_failure_halts_and_skips_on_finish() {
        let (provider, _, tool_loop) = setup(vec![
            tool_response(vec![tool_call("b1", "broken", json!({}))], ""),
            text_response("never dispatched"),
        ]);
        let finished = Arc::new(AtomicUsize::new(0));
        let finished_cb = finished.clone();
        let tool_loop = tool_loop.on_finish(move |_| {
            finished_cb.fetch_add(1, Ordering::SeqCst);
        });

        let err = tool_loop
            .generate(GenerateRequest::new("mock").with_prompt("Go").with_max_steps(3))
            .await
            .unwrap_err();

        assert!(matches!(
            err.as_tool_error(),
            Some(ToolError::ExecutionFailed { tool_name, reason })
                if tool_name == "broken" && reason.contains("upstream unavailable")
        ));
        assert_eq!(provider.call_count(), 1);
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn provider_errors_propagate() {
        let (_, _, tool_loop) = setup(vec![]);
        let err = tool_loop
            .generate(GenerateRequest::new("mock").with_prompt("Go"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Provider(ProviderError::Exhausted { .. })));
    }

    #[tokio::test]
    async fn step_callback_fires_once_per_step() {
        let (_, _, tool_loop) = setup(vec![
            tool_response(vec![weather_call("a", "Kyiv")], ""),
            tool_response(vec![weather_call("b", "Lviv")], ""),
            text_response("Done"),
        ]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = seen.clone();
        let finished = Arc::new(Mutex::new(None));
        let finished_cb = finished.clone();
        let tool_loop = tool_loop
            .on_step_finish(move |step| {
                seen_cb
                    .lock()
                    .unwrap()
                    .push((step.index, step.tool_calls.len()))
            })
            .on_finish(move |result| *finished_cb.lock().unwrap() = Some(result.steps.len()));

        tool_loop
            .generate(GenerateRequest::new("mock").with_prompt("Go").with_max_steps(5))
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![(0, 1), (1, 1), (2, 0)]);
        assert_eq!(*finished.lock().unwrap(), Some(3));
    }

    #[tokio::test]
    async fn client_tool_pauses_for_caller_results() {
        let (provider, invocations, tool_loop) = setup(vec![
            tool_response(
                vec![
                    weather_call("w1", "Madrid"),
                    tool_call("c1", "confirm", json!({ "question": "Book a flight?" })),
                ],
                "",
            ),
            text_response("Booked."),
        ]);

        let request = GenerateRequest::new("mock").with_max_steps(5);
        let mut conversation = Conversation::with_messages([Message::user("Plan my trip")]);

        let paused = tool_loop.run(&mut conversation, &request).await.unwrap();
        assert_eq!(paused.termination, Termination::AwaitingToolResults);
        assert_eq!(paused.pending_tool_calls.len(), 1);
        assert_eq!(paused.pending_tool_calls[0].id, "c1");
        // The local sibling still ran
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        assert_eq!(paused.tool_results.len(), 1);
        assert_eq!(provider.call_count(), 1);
        // user + assistant + one local result
        assert_eq!(conversation.len(), 3);

        conversation.push(Message::tool_result("c1", "yes"));
        let resumed = tool_loop.run(&mut conversation, &request).await.unwrap();
        assert_eq!(resumed.termination, Termination::Completed);
        assert_eq!(resumed.text, "Booked.");
        assert_eq!(provider.call_count(), 2);

        let last_request = &provider.requests()[1];
        assert_eq!(last_request.messages.len(), 4);
        assert_eq!(last_request.messages[3].tool_call_id.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn conversation_grows_by_assistant_plus_results() {
        let (_, _, tool_loop) = setup(vec![
            tool_response(vec![weather_call("a", "Nairobi"), weather_call("b", "Accra")], ""),
            text_response("Both warm"),
        ]);
        let mut conversation =
            Conversation::with_messages([Message::system("Be brief"), Message::user("Go")]);

        let result = tool_loop
            .run(&mut conversation, &GenerateRequest::new("mock").with_max_steps(2))
            .await
            .unwrap();

        // (1 + 2) for the tool step, 1 for the final answer
        assert_eq!(conversation.len(), 2 + 3 + 1);
        assert_eq!(result.response_messages.len(), 4);
    }

    #[tokio::test]
    async fn missing_call_ids_are_generated() {
        let (provider, _, tool_loop) = setup(vec![
            tool_response(vec![weather_call("", "Cairo")], ""),
            text_response("Hot"),
        ]);

        let result = tool_loop
            .generate(GenerateRequest::new("mock").with_prompt("Go").with_max_steps(2))
            .await
            .unwrap();

        let id = &result.tool_calls[0].id;
        assert!(id.starts_with("call_"), "unexpected id: {id}");
        assert_eq!(&result.tool_results[0].call_id, id);
        let second = &provider.requests()[1];
        assert_eq!(&second.messages[1].tool_calls[0].id, id);
        assert_eq!(second.messages[2].tool_call_id.as_ref(), Some(id));
    }

    #[tokio::test]
    async fn request_settings_reach_the_provider() {
        let (provider, _, tool_loop) = setup(vec![text_response("ok")]);

        tool_loop
            .generate(
                GenerateRequest::new("mock-large")
                    .with_system("You are terse.")
                    .with_prompt("Weather?")
                    .with_active_tools(["weather", "confirm"])
                    .with_tool_choice("weather")
                    .with_temperature(0.1)
                    .with_max_tokens(256),
            )
            .await
            .unwrap();

        let sent = &provider.requests()[0];
        assert_eq!(sent.model, "mock-large");
        assert_eq!(sent.messages[0].role, Role::System);
        assert_eq!(sent.messages[1].content, "Weather?");
        let names: Vec<_> = sent.tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["confirm", "weather"]);
        assert_eq!(sent.tool_choice, ToolChoice::Tool { name: "weather".into() });
        assert_eq!(sent.temperature, 0.1);
        assert_eq!(sent.max_tokens, Some(256));
        assert!(!sent.stream);
    }

    #[tokio::test]
    async fn invalid_requests_are_rejected_before_dispatch() {
        let (provider, _, tool_loop) = setup(vec![text_response("ok")]);

        let unknown_forced = GenerateRequest::new("mock")
            .with_prompt("Go")
            .with_tool_choice("teleport");
        assert!(matches!(
            tool_loop.generate(unknown_forced).await,
            Err(Error::InvalidRequest(_))
        ));

        let zero_steps = GenerateRequest::new("mock").with_prompt("Go").with_max_steps(0);
        assert!(matches!(
            tool_loop.generate(zero_steps).await,
            Err(Error::InvalidRequest(_))
        ));

        let mut empty = Conversation::new();
        assert!(matches!(
            tool_loop.run(&mut empty, &GenerateRequest::new("mock")).await,
            Err(Error::InvalidRequest(_))
        ));

        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn inactive_tool_calls_are_rejected() {
        let (_, invocations, tool_loop) = setup(vec![tool_response(
            vec![weather_call("a", "Doha")],
            "",
        )]);

        let err = tool_loop
            .generate(
                GenerateRequest::new("mock")
                    .with_prompt("Go")
                    .with_active_tools(["confirm"]),
            )
            .await
            .unwrap_err();

        assert!(matches!(err.as_tool_error(), Some(ToolError::UnknownTool(_))));
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn domain_events_are_published() {
        let (_, _, tool_loop) = setup(vec![
            tool_response(vec![weather_call("a", "Seoul")], ""),
            text_response("Mild"),
        ]);
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let tool_loop = tool_loop.with_event_bus(bus.clone());

        tool_loop
            .generate(GenerateRequest::new("mock").with_prompt("Go").with_max_steps(2))
            .await
            .unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(match &*event {
                DomainEvent::ToolExecuted { success, .. } => {
                    assert!(*success);
                    "tool"
                }
                DomainEvent::StepFinished { .. } => "step",
                DomainEvent::LoopFinished { steps, termination, .. } => {
                    assert_eq!(*steps, 2);
                    assert_eq!(termination, "completed");
                    "finished"
                }
                DomainEvent::ErrorOccurred { .. } => "error",
            });
        }
        assert_eq!(kinds, vec!["tool", "step", "step", "finished"]);
    }

    #[tokio::test]
    async fn failures_publish_an_error_event() {
        let (_, _, tool_loop) = setup(vec![tool_response(
            vec![tool_call("b", "broken", json!({}))],
            "",
        )]);
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let tool_loop = tool_loop.with_event_bus(bus.clone());

        assert!(
            tool_loop
                .generate(GenerateRequest::new("mock").with_prompt("Go"))
                .await
                .is_err()
        );

        let mut saw_failed_tool = false;
        let mut saw_error = false;
        while let Ok(event) = rx.try_recv() {
            match &*event {
                DomainEvent::ToolExecuted { success: false, .. } => saw_failed_tool = true,
                DomainEvent::ErrorOccurred { error_message, .. } => {
                    assert!(error_message.contains("broken"));
                    saw_error = true;
                }
                DomainEvent::LoopFinished { .. } => panic!("failed run reported as finished"),
                _ => {}
            }
        }
        assert!(saw_failed_tool);
        assert!(saw_error);
    }
}
