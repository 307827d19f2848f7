//! Scripted provider: replays a fixed sequence of responses.
//!
//! Used by tests and by the CLI's offline `--script` mode. Every request it
//! receives is recorded so callers can assert on what the loop dispatched.

use serde::Deserialize;
use std::path::Path;
use std::sync::Mutex;
use toolloop_core::error::ProviderError;
use toolloop_core::message::{Message, MessageToolCall};
use toolloop_core::provider::{FinishReason, Provider, ProviderRequest, ProviderResponse, Usage};
use tracing::debug;

/// A provider that returns a sequence of scripted responses.
///
/// Each call to `complete` returns the next response in the queue. Calls
/// beyond the end of the script fail with [`ProviderError::Exhausted`].
pub struct ScriptedProvider {
    responses: Vec<ProviderResponse>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Self {
        Self {
            responses,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Load a script from a JSON file containing an array of turns.
    ///
    /// ```json
    /// [
    ///   { "tool_calls": [{ "name": "weather", "arguments": { "location": "Oslo" } }] },
    ///   { "text": "It is 18°C in Oslo." }
    /// ]
    /// ```
    pub fn from_json_file(path: &Path) -> Result<Self, ProviderError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProviderError::NotConfigured(format!("cannot read script {}: {e}", path.display()))
        })?;
        Self::from_json_str(&content)
    }

    /// Parse a script from JSON text (see [`ScriptedProvider::from_json_file`]).
    pub fn from_json_str(json: &str) -> Result<Self, ProviderError> {
        let turns: Vec<ScriptedTurn> = serde_json::from_str(json)
            .map_err(|e| ProviderError::NotConfigured(format!("invalid script: {e}")))?;
        Ok(Self::new(
            turns
                .into_iter()
                .enumerate()
                .map(|(i, turn)| turn.into_response(i))
                .collect(),
        ))
    }

    /// How many requests have been dispatched so far.
    pub fn call_count(&self) -> usize {
        self.lock_requests().len()
    }

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.lock_requests().clone()
    }

    fn lock_requests(&self) -> std::sync::MutexGuard<'_, Vec<ProviderRequest>> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let mut requests = self.lock_requests();
        let call = requests.len();
        requests.push(request);

        let response = self
            .responses
            .get(call)
            .cloned()
            .ok_or(ProviderError::Exhausted {
                call: call + 1,
                available: self.responses.len(),
            })?;
        debug!(
            call = call + 1,
            tool_calls = response.message.tool_calls.len(),
            "Replaying scripted response"
        );
        Ok(response)
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        Ok(vec!["scripted".into()])
    }
}

/// One model turn in a script file.
#[derive(Debug, Deserialize)]
struct ScriptedTurn {
    #[serde(default)]
    text: String,
    #[serde(default)]
    tool_calls: Vec<ScriptedToolCall>,
    #[serde(default)]
    finish_reason: Option<FinishReason>,
    #[serde(default)]
    usage: Option<ScriptedUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScriptedToolCall {
    #[serde(default)]
    id: Option<String>,
    name: String,
    /// A JSON value, or a raw string passed through untouched
    #[serde(default)]
    arguments: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ScriptedUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

impl ScriptedTurn {
    fn into_response(self, turn: usize) -> ProviderResponse {
        let tool_calls: Vec<MessageToolCall> = self
            .tool_calls
            .into_iter()
            .enumerate()
            .map(|(i, tc)| MessageToolCall {
                id: tc.id.unwrap_or_else(|| format!("call_{turn}_{i}")),
                name: tc.name,
                arguments: match tc.arguments {
                    serde_json::Value::String(raw) => raw,
                    serde_json::Value::Null => String::new(),
                    other => other.to_string(),
                },
            })
            .collect();

        let finish_reason = self.finish_reason.unwrap_or(if tool_calls.is_empty() {
            FinishReason::Stop
        } else {
            FinishReason::ToolCalls
        });

        ProviderResponse {
            message: Message::assistant(self.text).with_tool_calls(tool_calls),
            finish_reason,
            usage: self
                .usage
                .map(|u| Usage::new(u.prompt_tokens, u.completion_tokens)),
            model: self.model.unwrap_or_else(|| "scripted".into()),
            metadata: serde_json::Map::new(),
        }
    }
}
