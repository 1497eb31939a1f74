//! Model provider contract.
//!
//! The runtime only talks to a [`ModelProvider`]. Concrete vendor clients live
//! outside this crate; [`ScriptedProvider`] is a deterministic stand-in for
//! tests and offline runs.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// A tool invocation proposed by the model. `arguments` is the raw JSON text
/// the model produced and may be malformed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("arguments for tool `{tool_name}` ({tool_call_id}) are invalid: {message}")]
pub struct ToolCallParseError {
    pub tool_call_id: String,
    pub tool_name: String,
    pub message: String,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self { id: id.into(), name: name.into(), arguments: arguments.into() }
    }

    /// Decodes the argument text into a JSON object. Empty text is an empty
    /// object.
    pub fn parse_arguments(&self) -> Result<Map<String, Value>, ToolCallParseError> {
        let fail = |message: String| ToolCallParseError {
            tool_call_id: self.id.clone(),
            tool_name: self.name.clone(),
            message,
        };
        if self.arguments.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&self.arguments) {
            Ok(Value::Object(arguments)) => Ok(arguments),
            Ok(other) => Err(fail(format!("expected a JSON object, got {}", json_kind(&other)))),
            Err(error) => Err(fail(error.to_string())),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmMessage {
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl LlmMessage {
    fn with_role(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self { tool_calls, ..Self::with_role(MessageRole::Assistant, content) }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::with_role(MessageRole::Tool, content)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRequest {
    pub conversation_id: Uuid,
    pub messages: Vec<LlmMessage>,
    pub tools: Vec<ToolDefinition>,
    pub system_prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelResponse {
    pub text: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: StopReason,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

impl ModelResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
            stop_reason: StopReason::EndTurn,
            input_tokens: 0,
            output_tokens: 0,
        }
    }

    pub fn tool_calls(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self { tool_calls, stop_reason: StopReason::ToolUse, ..Self::text(text) }
    }

    pub fn with_usage(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.input_tokens = input_tokens;
        self.output_tokens = output_tokens;
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderErrorKind {
    RateLimited,
    ServerError,
    Timeout,
    Unavailable,
    Authentication,
    InvalidRequest,
    MalformedResponse,
}

impl ProviderErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::Timeout => "timeout",
            Self::Unavailable => "unavailable",
            Self::Authentication => "authentication",
            Self::InvalidRequest => "invalid_request",
            Self::MalformedResponse => "malformed_response",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited | Self::ServerError | Self::Timeout | Self::Unavailable)
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("model provider {kind}: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Pluggable token counting used for rate limiting and context pruning.
pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, text: &str) -> usize;

    fn estimate_messages(&self, messages: &[LlmMessage]) -> usize {
        messages
            .iter()
            .map(|message| {
                let calls: usize = message
                    .tool_calls
                    .iter()
                    .map(|call| self.estimate(&call.name) + self.estimate(&call.arguments))
                    .sum();
                MESSAGE_OVERHEAD_TOKENS + self.estimate(&message.content) + calls
            })
            .sum()
    }
}

const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Rough estimate of one token per `chars_per_token` characters, rounded up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CharRatioEstimator {
    pub chars_per_token: usize,
}

pub const DEFAULT_ESTIMATOR: CharRatioEstimator = CharRatioEstimator { chars_per_token: 4 };

impl Default for CharRatioEstimator {
    fn default() -> Self {
        DEFAULT_ESTIMATOR
    }
}

impl TokenEstimator for CharRatioEstimator {
    fn estimate(&self, text: &str) -> usize {
        let ratio = self.chars_per_token.max(1);
        text.chars().count().div_ceil(ratio)
    }
}

/// Receives text fragments while a streaming response is produced.
pub trait TokenSink: Send + Sync {
    fn on_token(&self, fragment: &str);
}

#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn chat(&self, request: ModelRequest) -> Result<ModelResponse, ProviderError>;

    /// Streams text through `sink` and returns the assembled response.
    /// Providers without native streaming emit the whole text at once.
    async fn chat_streaming(
        &self,
        request: ModelRequest,
        sink: &dyn TokenSink,
    ) -> Result<ModelResponse, ProviderError> {
        let response = self.chat(request).await?;
        if !response.text.is_empty() {
            sink.on_token(&response.text);
        }
        Ok(response)
    }

    fn supports_tool_calling(&self) -> bool {
        true
    }

    fn estimator(&self) -> &dyn TokenEstimator {
        &DEFAULT_ESTIMATOR
    }

    fn estimate_tokens(&self, text: &str) -> usize {
        self.estimator().estimate(text)
    }
}

enum Script {
    Sequence(VecDeque<Result<ModelResponse, ProviderError>>),
    Repeat(ModelResponse),
}

/// Replays canned responses in order, or one response forever.
pub struct ScriptedProvider {
    script: Mutex<Script>,
    requests: Mutex<Vec<ModelRequest>>,
    calls: AtomicUsize,
    delay: Option<std::time::Duration>,
}

impl ScriptedProvider {
    pub fn new<I>(responses: I) -> Self
    where
        I: IntoIterator<Item = Result<ModelResponse, ProviderError>>,
    {
        Self::from_script(Script::Sequence(responses.into_iter().collect()))
    }

    pub fn repeating(response: ModelResponse) -> Self {
        Self::from_script(Script::Repeat(response))
    }

    fn from_script(script: Script) -> Self {
        Self {
            script: Mutex::new(script),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            delay: None,
        }
    }

    /// Sleeps before answering each request.
    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    fn next(&self, request: ModelRequest) -> Result<ModelResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).push(request);
        let mut script = self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match &mut *script {
            Script::Repeat(response) => Ok(response.clone()),
            Script::Sequence(queue) => queue.pop_front().unwrap_or_else(|| {
                Err(ProviderError::new(ProviderErrorKind::InvalidRequest, "script exhausted"))
            }),
        }
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat(&self, request: ModelRequest) -> Result<ModelResponse, ProviderError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.next(request)
    }

    async fn chat_streaming(
        &self,
        request: ModelRequest,
        sink: &dyn TokenSink,
    ) -> Result<ModelResponse, ProviderError> {
        let response = self.chat(request).await?;
        for fragment in response.text.split_inclusive(' ') {
            sink.on_token(fragment);
        }
        Ok(response)
    }
}
