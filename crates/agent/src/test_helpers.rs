//! Shared helpers for loop and stream tests.

use serde_json::json;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use toolloop_core::error::{ProviderError, ToolError};
use toolloop_core::message::{Message, MessageToolCall};
use toolloop_core::provider::{
    ChunkReceiver, FinishReason, Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage,
};
use toolloop_core::tool::{ClientTool, FunctionTool, ToolCatalog};

/// A text-only response (no tool calls).
pub fn text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        finish_reason: FinishReason::Stop,
        usage: Some(Usage::new(10, 5)),
        model: "mock-model".into(),
        metadata: serde_json::Map::new(),
    }
}

/// A response requesting tool calls, with optional leading text.
pub fn tool_response(tool_calls: Vec<MessageToolCall>, thought: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(thought).with_tool_calls(tool_calls),
        finish_reason: FinishReason::ToolCalls,
        usage: Some(Usage::new(20, 8)),
        model: "mock-model".into(),
        metadata: serde_json::Map::new(),
    }
}

pub fn tool_call(id: &str, name: &str, args: serde_json::Value) -> MessageToolCall {
    MessageToolCall {
        id: id.into(),
        name: name.into(),
        arguments: args.to_string(),
    }
}

/// Catalog with `weather` (counts invocations, echoes arguments), `broken`
/// (always fails), `slow` (sleeps, then echoes) and client-side `confirm`.
pub fn catalog(invocations: Arc<AtomicUsize>) -> ToolCatalog {
    let weather_count = invocations.clone();
    let slow_count = invocations;
    ToolCatalog::new()
        .with(
            FunctionTool::new(
                "weather",
                json!({
                    "type": "object",
                    "properties": {
                        "location": { "type": "string" },
                        "unit": { "type": "string", "enum": ["celsius", "fahrenheit"], "default": "celsius" }
                    },
                    "required": ["location"]
                }),
                move |args| {
                    let count = weather_count.clone();
                    async move {
                        count.fetch_add(1, Ordering::SeqCst);
                        Ok(json!({ "location": args["location"], "unit": args["unit"], "temperature": 18 }))
                    }
                },
            )
            .with_description("Get the weather in a location"),
        )
        .unwrap()
        .with(FunctionTool::new("broken", json!({"type": "object"}), |_| async {
            Err(ToolError::failed("broken", "upstream unavailable"))
        }))
        .unwrap()
        .with(FunctionTool::new("slow", json!({"type": "object"}), move |args| {
            let count = slow_count.clone();
            async move {
                tokio::time::sleep(std::time::Duration::from_millis(30)).await;
                count.fetch_add(1, Ordering::SeqCst);
                Ok(args)
            }
        }))
        .unwrap()
        .with(ClientTool::new(
            "confirm",
            json!({
                "type": "object",
                "properties": { "question": { "type": "string" } },
                "required": ["question"]
            }),
        ))
        .unwrap()
}

/// A provider that streams hand-written chunk sequences, one per call.
pub struct ChunkedProvider {
    turns: Mutex<Vec<Vec<StreamChunk>>>,
    calls: AtomicUsize,
}

impl ChunkedProvider {
    pub fn new(turns: Vec<Vec<StreamChunk>>) -> Self {
        Self {
            turns: Mutex::new(turns),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Provider for ChunkedProvider {
    fn name(&self) -> &str {
        "chunked"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::NotConfigured("chunked provider only streams".into()))
    }

    async fn stream(&self, _request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let chunks = {
            let mut turns = self.turns.lock().unwrap();
            if turns.is_empty() {
                return Err(ProviderError::Exhausted {
                    call: call + 1,
                    available: call,
                });
            }
            turns.remove(0)
        };
        let (tx, rx) = tokio::sync::mpsc::channel(chunks.len().max(1));
        for chunk in chunks {
            tx.send(Ok(chunk)).await.unwrap();
        }
        Ok(rx)
    }
}
