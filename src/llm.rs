//! Chat-completion provider abstraction and the OpenAI-compatible client.
//!
//! The orchestrator talks to the model through [`ChatProvider::chat`]
//! (transcript + tool schemas in, one assistant [`Turn`] out). Tools that
//! need a plain answer (scoring, analysis, synthesis) use
//! [`ChatProvider::complete`].
//!
//! HTTP 429 is surfaced as [`ChatError::Throttled`] so callers can apply the
//! cooldown policy in [`crate::rate_limit`]. Every other failure propagates
//! unchanged.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

use sotaforge_core::transcript::{ToolCallRequest, Turn};

use crate::config::{LlmConfig, OPENAI_API_KEY_ENV};

/// Errors from a chat provider.
#[derive(Debug, Error)]
pub enum ChatError {
    /// HTTP 429 from the provider.
    #[error("rate limited: {message}")]
    Throttled { message: String },

    /// Non-success status other than 429.
    #[error("provider error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Missing API key or unusable client settings. Never retried.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ChatError {
    pub fn is_throttled(&self) -> bool {
        matches!(self, ChatError::Throttled { .. })
    }

    /// A 429 caused by a single request exceeding the token budget. Waiting
    /// does not help; only a smaller request would.
    pub fn is_request_too_large(&self) -> bool {
        match self {
            ChatError::Throttled { message } => {
                message.contains("Request too large") || message.contains("must be reduced")
            }
            _ => false,
        }
    }

    pub fn is_config(&self) -> bool {
        matches!(self, ChatError::Config(_))
    }
}

/// A single-shot completion used by tools.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    /// Ask the provider for a JSON object answer.
    pub json_mode: bool,
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            json_mode: false,
            temperature: None,
        }
    }

    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// One chat round with `tool_choice: "auto"`. Returns the assistant turn.
    async fn chat(&self, turns: &[Turn], tools: &[Value]) -> Result<Turn, ChatError>;

    /// System + user prompt, returns the answer text (empty when the model
    /// returned no content).
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ChatError>;
}

/// Client for any OpenAI-compatible `POST {base_url}/chat/completions`.
pub struct OpenAiChat {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl OpenAiChat {
    /// Build a client using `OPENAI_API_KEY` from the environment.
    pub fn from_env(config: &LlmConfig) -> Result<Self, ChatError> {
        let api_key = std::env::var(OPENAI_API_KEY_ENV)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                ChatError::Config(format!("{} environment variable not set", OPENAI_API_KEY_ENV))
            })?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &LlmConfig, api_key: impl Into<String>) -> Result<Self, ChatError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ChatError::Config(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key: api_key.into(),
        })
    }

    async fn post(&self, body: &Value) -> Result<Value, ChatError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let text = response.text().await.unwrap_or_default();
        let message = error_message(&text);
        if status.as_u16() == 429 {
            Err(ChatError::Throttled { message })
        } else {
            Err(ChatError::Api {
                status: status.as_u16(),
                message,
            })
        }
    }
}

#[async_trait]
impl ChatProvider for OpenAiChat {
    async fn chat(&self, turns: &[Turn], tools: &[Value]) -> Result<Turn, ChatError> {
        let mut body = json!({
            "model": self.model,
            "messages": turns.iter().map(turn_to_message).collect::<Vec<_>>(),
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.to_vec());
            body["tool_choice"] = json!("auto");
        }

        let response = self.post(&body).await?;
        let message = first_message(&response)?;
        message_to_turn(message)
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ChatError> {
        let mut body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user },
            ],
        });
        if let Some(t) = request.temperature {
            body["temperature"] = json!(t);
        }
        if request.json_mode {
            body["response_format"] = json!({ "type": "json_object" });
        }

        let response = self.post(&body).await?;
        let message = first_message(&response)?;
        Ok(message
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }
}

/// Pull `error.message` out of an OpenAI error body, or fall back to the raw
/// text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}

fn first_message(response: &Value) -> Result<&Value, ChatError> {
    response
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| ChatError::InvalidResponse("missing choices[0].message".to_string()))
}

/// Wire form of a turn. Tool-call arguments travel as a JSON string.
pub fn turn_to_message(turn: &Turn) -> Value {
    match turn {
        Turn::System { content } => json!({ "role": "system", "content": content }),
        Turn::User { content } => json!({ "role": "user", "content": content }),
        Turn::Assistant {
            content,
            tool_calls,
        } => {
            let mut msg = json!({ "role": "assistant", "content": content });
            if !tool_calls.is_empty() {
                msg["tool_calls"] = tool_calls
                    .iter()
                    .map(|c| {
                        json!({
                            "id": c.id,
                            "type": "function",
                            "function": {
                                "name": c.name,
                                "arguments": c.arguments.to_string(),
                            }
                        })
                    })
                    .collect();
            }
            msg
        }
        Turn::Tool {
            tool_call_id,
            content,
        } => json!({ "role": "tool", "tool_call_id": tool_call_id, "content": content }),
    }
}

/// Parse an assistant message from the wire.
///
/// Arguments that are not valid JSON are kept as a JSON string so the
/// executor can report them instead of failing the whole round.
pub fn message_to_turn(message: &Value) -> Result<Turn, ChatError> {
    let content = message
        .get("content")
        .and_then(Value::as_str)
        .map(str::to_string);

    let mut tool_calls = Vec::new();
    if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
        for call in calls {
            let id = call
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| ChatError::InvalidResponse("tool call without id".to_string()))?;
            let function = call
                .get("function")
                .ok_or_else(|| {
                    ChatError::InvalidResponse("tool call without function".to_string())
                })?;
            let name = function
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| ChatError::InvalidResponse("tool call without name".to_string()))?;
            let arguments = match function.get("arguments") {
                Some(Value::String(raw)) if raw.trim().is_empty() => json!({}),
                Some(Value::String(raw)) => {
                    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()))
                }
                Some(other) => other.clone(),
                None => json!({}),
            };
            tool_calls.push(ToolCallRequest::new(id, name, arguments));
        }
    }

    Ok(Turn::assistant(content, tool_calls))
}
