//! Chat completion client with function calling.
//!
//! [`ChatModel`] is the seam between the kernel loop and the hosted model:
//! the kernel sends the history plus the tools on offer and gets back
//! either text or a batch of [`ToolCall`]s. [`OpenAIChatModel`] speaks the
//! OpenAI `/chat/completions` wire format, which Azure OpenAI deployments
//! and most proxies accept as well.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::config::LlmConfig;
use crate::history::{ChatMessage, Role, ToolCall};
use crate::http::{self, ApiEndpoint, HttpError};

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("chat model is disabled; set [llm] provider = \"openai\" in the config")]
    Disabled,
    #[error("llm.model must be set")]
    MissingModel,
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error("malformed chat completion response: {0}")]
    Malformed(String),
}

/// A function the model may call, described with an OpenAI JSON schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn to_wire(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// Whether the model may call functions on this request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionChoice {
    Auto,
    None,
}

/// One model response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelTurn {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<String>,
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        choice: FunctionChoice,
    ) -> Result<ModelTurn, LlmError>;
}

/// Stand-in used when `[llm]` is disabled; every request fails.
pub struct DisabledChatModel;

#[async_trait]
impl ChatModel for DisabledChatModel {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(
        &self,
        _messages: &[ChatMessage],
        _tools: &[ToolDefinition],
        _choice: FunctionChoice,
    ) -> Result<ModelTurn, LlmError> {
        Err(LlmError::Disabled)
    }
}

pub struct OpenAIChatModel {
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    max_retries: u32,
    endpoint: ApiEndpoint,
    client: reqwest::Client,
}

impl OpenAIChatModel {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let model = config.model.clone().ok_or(LlmError::MissingModel)?;
        let endpoint = ApiEndpoint::from_env(&config.base_url, &config.api_key_env, config.auth)?;
        let client = http::build_client(config.timeout_secs)?;

        Ok(Self {
            model,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            endpoint,
            client,
        })
    }

    fn request_body(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        choice: FunctionChoice,
    ) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": messages.iter().map(message_to_wire).collect::<Vec<_>>(),
        });

        if choice == FunctionChoice::Auto && !tools.is_empty() {
            body["tools"] = Value::Array(tools.iter().map(ToolDefinition::to_wire).collect());
            body["tool_choice"] = json!("auto");
        }
        if let Some(t) = self.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(m) = self.max_tokens {
            body["max_tokens"] = json!(m);
        }
        body
    }
}

#[async_trait]
impl ChatModel for OpenAIChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        choice: FunctionChoice,
    ) -> Result<ModelTurn, LlmError> {
        let body = self.request_body(messages, tools, choice);
        tracing::debug!(
            "chat completion: {} messages, {} tools, choice {:?}",
            messages.len(),
            tools.len(),
            choice
        );

        let response = http::post_json(
            &self.client,
            &self.endpoint,
            "chat/completions",
            &body,
            self.max_retries,
        )
        .await?;

        parse_completion(&response)
    }
}

pub fn create_chat_model(config: &LlmConfig) -> Result<Arc<dyn ChatModel>, LlmError> {
    if !config.is_enabled() {
        return Ok(Arc::new(DisabledChatModel));
    }
    Ok(Arc::new(OpenAIChatModel::new(config)?))
}

fn message_to_wire(message: &ChatMessage) -> Value {
    let mut wire = json!({
        "role": message.role.as_str(),
        "content": message.content,
    });

    match message.role {
        Role::Assistant if !message.tool_calls.is_empty() => {
            wire["tool_calls"] = message
                .tool_calls
                .iter()
                .map(|c| {
                    json!({
                        "id": c.id,
                        "type": "function",
                        "function": { "name": c.name, "arguments": c.arguments },
                    })
                })
                .collect();
        }
        Role::Tool => {
            wire["tool_call_id"] = json!(message.tool_call_id);
        }
        _ => {}
    }
    wire
}

/// Read `choices[0]` of a chat completion.
fn parse_completion(response: &Value) -> Result<ModelTurn, LlmError> {
    let choice = response
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| LlmError::Malformed("missing choices".to_string()))?;
    let message = choice
        .get("message")
        .ok_or_else(|| LlmError::Malformed("missing message".to_string()))?;

    let mut tool_calls = Vec::new();
    if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
        for (i, call) in calls.iter().enumerate() {
            let function = call
                .get("function")
                .ok_or_else(|| LlmError::Malformed(format!("tool call {} has no function", i)))?;
            let name = function
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| LlmError::Malformed(format!("tool call {} has no name", i)))?;
            // Some servers send arguments as an object instead of a JSON string.
            let arguments = match function.get("arguments") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => "{}".to_string(),
                Some(other) => other.to_string(),
            };
            let id = call
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("call_{}", i));

            tool_calls.push(ToolCall {
                id,
                name: name.to_string(),
                arguments,
            });
        }
    }

    Ok(ModelTurn {
        content: message
            .get("content")
            .and_then(Value::as_str)
            .map(str::to_string),
        tool_calls,
        finish_reason: choice
            .get("finish_reason")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

/// Replays canned turns and records what it was asked.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    pub struct Request {
        pub messages: usize,
        pub tools: Vec<String>,
        pub choice: FunctionChoice,
    }

    #[derive(Default)]
    pub struct ScriptedModel {
        turns: Mutex<VecDeque<ModelTurn>>,
        pub requests: Mutex<Vec<Request>>,
    }

    impl ScriptedModel {
        pub fn new(turns: Vec<ModelTurn>) -> Self {
            Self {
                turns: Mutex::new(turns.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn requests(&self) -> Vec<Request> {
            self.requests.lock().unwrap().clone()
        }
    }

    pub fn text(content: &str) -> ModelTurn {
        ModelTurn {
            content: Some(content.to_string()),
            tool_calls: Vec::new(),
            finish_reason: Some("stop".to_string()),
        }
    }

    pub fn call(id: &str, name: &str, arguments: &str) -> ModelTurn {
        ModelTurn {
            content: None,
            tool_calls: vec![ToolCall {
                id: id.to_string(),
                name: name.to_string(),
                arguments: arguments.to_string(),
            }],
            finish_reason: Some("tool_calls".to_string()),
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            messages: &[ChatMessage],
            tools: &[ToolDefinition],
            choice: FunctionChoice,
        ) -> Result<ModelTurn, LlmError> {
            self.requests.lock().unwrap().push(Request {
                messages: messages.len(),
                tools: tools.iter().map(|t| t.name.clone()).collect(),
                choice,
            });
            self.turns
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| LlmError::Malformed("script exhausted".to_string()))
        }
    }
}
