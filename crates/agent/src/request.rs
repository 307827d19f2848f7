//! Invocation parameters for one run of the step loop.

use serde::{Deserialize, Serialize};
use toolloop_core::message::{Conversation, Message};
use toolloop_core::provider::{ToolChoice, default_temperature};
use toolloop_core::tool::ToolCatalog;
use toolloop_core::{Error, Result};

/// What to generate, and under which limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// Model reference passed to the provider
    pub model: String,

    /// System prompt, placed first in a fresh conversation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    /// User prompt, appended after `messages`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,

    /// Prior messages
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Message>,

    /// Step ceiling (≥ 1). One step is one provider dispatch.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    #[serde(default)]
    pub tool_choice: ToolChoice,

    /// Restrict the catalog to these tools (all tools when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_tools: Option<Vec<String>>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Emit partial tool-call events while streaming
    #[serde(default = "default_true")]
    pub tool_call_streaming: bool,
}

fn default_max_steps() -> usize {
    1
}
fn default_true() -> bool {
    true
}

impl GenerateRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system: None,
            prompt: None,
            messages: Vec::new(),
            max_steps: default_max_steps(),
            tool_choice: ToolChoice::Auto,
            active_tools: None,
            temperature: default_temperature(),
            max_tokens: None,
            tool_call_streaming: true,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_tool_choice(mut self, tool_choice: impl Into<ToolChoice>) -> Self {
        self.tool_choice = tool_choice.into();
        self
    }

    pub fn with_active_tools<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.active_tools = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_tool_call_streaming(mut self, enabled: bool) -> Self {
        self.tool_call_streaming = enabled;
        self
    }

    fn has_prompt(&self) -> bool {
        self.prompt.as_deref().is_some_and(|p| !p.trim().is_empty())
    }

    /// Check the request against a catalog before anything is dispatched.
    pub fn validate(&self, catalog: &ToolCatalog) -> Result<()> {
        if !self.has_prompt() && self.messages.is_empty() {
            return Err(Error::InvalidRequest(
                "either a prompt or at least one message is required".into(),
            ));
        }
        self.validate_settings(catalog)
    }

    /// The checks that do not depend on where the conversation comes from.
    pub(crate) fn validate_settings(&self, catalog: &ToolCatalog) -> Result<()> {
        if self.max_steps == 0 {
            return Err(Error::InvalidRequest("max_steps must be at least 1".into()));
        }

        if let Some(active) = &self.active_tools
            && let Some(missing) = active.iter().find(|name| !catalog.contains(name))
        {
            return Err(Error::InvalidRequest(format!(
                "active tool '{missing}' is not in the catalog"
            )));
        }

        if let Some(forced) = self.tool_choice.forced_tool() {
            let active = self
                .active_tools
                .as_ref()
                .is_none_or(|names| names.iter().any(|n| n == forced));
            if !catalog.contains(forced) || !active {
                return Err(Error::InvalidRequest(format!(
                    "tool_choice names unknown tool '{forced}'"
                )));
            }
        }

        Ok(())
    }

    /// Build the initial conversation: system prompt, prior messages, prompt.
    pub fn to_conversation(&self) -> Conversation {
        let mut conversation = Conversation::new();
        if let Some(system) = &self.system {
            conversation.push(Message::system(system));
        }
        for message in &self.messages {
            conversation.push(message.clone());
        }
        if let Some(prompt) = self.prompt.as_deref().filter(|p| !p.trim().is_empty()) {
            conversation.push(Message::user(prompt));
        }
        conversation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use toolloop_core::message::Role;
    use toolloop_core::tool::{ClientTool, FunctionTool};

    fn catalog() -> ToolCatalog {
        ToolCatalog::new()
            .with(FunctionTool::new("weather", json!({"type": "object"}), |_| async {
                Ok(json!({}))
            }))
            .unwrap()
            .with(ClientTool::new("confirm", json!({"type": "object"})))
            .unwrap()
    }

    #[test]
    fn requires_prompt_or_messages() {
        let err = GenerateRequest::new("m").validate(&catalog()).unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));

        let blank = GenerateRequest::new("m").with_prompt("   ");
        assert!(blank.validate(&catalog()).is_err());

        let ok = GenerateRequest::new("m").with_messages(vec![Message::user("hi")]);
        assert!(ok.validate(&catalog()).is_ok());
    }

    #[test]
    fn zero_steps_rejected() {
        let req = GenerateRequest::new("m").with_prompt("hi").with_max_steps(0);
        let err = req.validate(&catalog()).unwrap_err();
        assert!(err.to_string().contains("max_steps"));
    }

    #[test]
    fn forced_tool_must_exist_and_be_active() {
        let unknown = GenerateRequest::new("m").with_prompt("hi").with_tool_choice("ghost");
        assert!(unknown.validate(&catalog()).is_err());

        let inactive = GenerateRequest::new("m")
            .with_prompt("hi")
            .with_tool_choice("weather")
            .with_active_tools(["confirm"]);
        assert!(inactive.validate(&catalog()).is_err());

        let ok = GenerateRequest::new("m").with_prompt("hi").with_tool_choice("weather");
        assert!(ok.validate(&catalog()).is_ok());
    }

    #[test]
    fn active_tools_must_exist() {
        let req = GenerateRequest::new("m")
            .with_prompt("hi")
            .with_active_tools(["weather", "ghost"]);
        let err = req.validate(&catalog()).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn conversation_order() {
        let req = GenerateRequest::new("m")
            .with_system("be brief")
            .with_messages(vec![Message::user("earlier"), Message::assistant("noted")])
            .with_prompt("now");
        let conv = req.to_conversation();
        let roles: Vec<_> = conv.messages.iter().map(|m| m.role.clone()).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant, Role::User]);
        assert_eq!(conv.messages[3].content, "now");
    }

    #[test]
    fn deserializes_with_defaults() {
        let req: GenerateRequest =
            serde_json::from_str(r#"{"model": "m", "prompt": "hi", "tool_choice": "required"}"#)
                .unwrap();
        assert_eq!(req.max_steps, 1);
        assert_eq!(req.tool_choice, ToolChoice::Required);
        assert!(req.tool_call_streaming);
        assert!((req.temperature - 0.7).abs() < f32::EPSILON);
    }
}
