//! Conversation orchestrator.
//!
//! A turn appends the user message, asks the model, and while the model keeps
//! proposing tool calls, executes them through the [`ActionExecutor`] and asks
//! again. The loop is bounded by `max_tool_iterations` follow-up requests.
//! Per-tool failures become tool results the model can read; only provider
//! failures, rate limiting and cancellation end a turn early.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use ignis_core::config::{AppConfig, DEFAULT_SYSTEM_PROMPT};
use ignis_core::{
    ActionError, ActionExecutor, ActionResult, ApplicationError, AuditEvent, AuditEventType,
    AuditSink, AuthContext, CorrelationContext, ErrorCode, InterfaceError, RateLimitDecision,
    RateLimiter,
};

use crate::conversation::{
    Conversation, ConversationError, ConversationStore, DEFAULT_INACTIVITY_TIMEOUT,
};
use crate::guardrails::{GuardrailDecision, GuardrailPolicy};
use crate::llm::{
    LlmMessage, ModelProvider, ModelRequest, ModelResponse, ProviderError, TokenSink, ToolCall,
};
use crate::maintenance::MaintenanceHandle;
use crate::tools::ToolRegistry;

pub const MAX_ITERATIONS_MESSAGE: &str = "I have reached the maximum number of operations for a \
single request. Review the results so far and send a follow-up message to continue.";

#[derive(Clone, Debug, PartialEq)]
pub struct RuntimeConfig {
    pub max_tool_iterations: u32,
    pub context_token_budget: usize,
    pub retained_messages: usize,
    pub provider_timeout: Duration,
    pub system_prompt: String,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub inactivity_timeout: Duration,
    pub sweep_interval: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: 10,
            context_token_budget: 100_000,
            retained_messages: 10,
            provider_timeout: Duration::from_secs(60),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            model: None,
            max_tokens: None,
            temperature: None,
            inactivity_timeout: DEFAULT_INACTIVITY_TIMEOUT,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl RuntimeConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        let conversation = &config.conversation;
        Self {
            max_tool_iterations: conversation.max_tool_iterations,
            context_token_budget: conversation.context_token_budget,
            retained_messages: conversation.retained_messages,
            provider_timeout: Duration::from_secs(config.model.timeout_secs),
            system_prompt: conversation.system_prompt.clone(),
            model: Some(config.model.model.clone()),
            max_tokens: Some(config.model.max_tokens),
            temperature: Some(config.model.temperature),
            inactivity_timeout: Duration::from_secs(conversation.inactivity_timeout_secs),
            sweep_interval: Duration::from_secs(conversation.sweep_interval_secs),
        }
    }
}

/// What one completed turn produced.
#[derive(Clone, Debug, PartialEq)]
pub struct TurnOutcome {
    pub conversation_id: Uuid,
    pub correlation_id: Uuid,
    pub text: String,
    /// Results of every tool call in the order they were executed.
    pub results: Vec<ActionResult>,
    /// Follow-up requests made after tool execution.
    pub iterations: u32,
    pub hit_iteration_limit: bool,
    pub pruned: bool,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum TurnError {
    #[error(transparent)]
    Conversation(#[from] ConversationError),
    #[error("rate limit exceeded: {reason}")]
    RateLimited { reason: &'static str, retry_after: Duration, reset_at: DateTime<Utc> },
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("model provider did not answer within {0:?}")]
    ProviderTimeout(Duration),
    #[error("turn was cancelled")]
    Cancelled,
}

impl TurnError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::ProviderTimeout(_) => true,
            Self::Provider(error) => error.is_retryable(),
            Self::Conversation(_) | Self::Cancelled => false,
        }
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let message = self.to_string();
        match self {
            Self::Conversation(ConversationError::AccessDenied { .. }) => {
                InterfaceError::Forbidden { message, correlation_id }
            }
            Self::Conversation(ConversationError::NotFound(_)) | Self::Cancelled => {
                InterfaceError::BadRequest { message, correlation_id }
            }
            Self::RateLimited { .. } => {
                ApplicationError::RateLimited(message).into_interface(correlation_id)
            }
            Self::ProviderTimeout(_) => {
                ApplicationError::Timeout(message).into_interface(correlation_id)
            }
            Self::Provider(error) if error.is_retryable() => {
                ApplicationError::Integration(message).into_interface(correlation_id)
            }
            Self::Provider(_) => InterfaceError::Internal { message, correlation_id },
        }
    }
}

/// Progress of a streaming turn, in emission order.
#[derive(Clone, Debug, PartialEq)]
pub enum TurnEvent {
    Token(String),
    ToolCallStarted { id: String, name: String },
    ToolCallCompleted { id: String, name: String, result: ActionResult },
    Completed(TurnOutcome),
    Failed { message: String, retryable: bool },
}

struct EventChannel<'a> {
    sender: &'a UnboundedSender<TurnEvent>,
    cancel: &'a CancellationToken,
}

impl EventChannel<'_> {
    fn emit(&self, event: TurnEvent) {
        if self.cancel.is_cancelled() {
            return;
        }
        // A dropped receiver only means nobody is listening any more.
        let _ = self.sender.send(event);
    }
}

impl TokenSink for EventChannel<'_> {
    fn on_token(&self, fragment: &str) {
        self.emit(TurnEvent::Token(fragment.to_string()));
    }
}

pub struct AgentRuntime {
    provider: Arc<dyn ModelProvider>,
    executor: ActionExecutor,
    tools: ToolRegistry,
    guardrails: GuardrailPolicy,
    conversations: Arc<ConversationStore>,
    rate_limiter: RateLimiter,
    audit: Arc<dyn AuditSink>,
    config: RuntimeConfig,
}

impl AgentRuntime {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        executor: ActionExecutor,
        rate_limiter: RateLimiter,
        audit: Arc<dyn AuditSink>,
        config: RuntimeConfig,
    ) -> Self {
        let guardrails = GuardrailPolicy::for_mode(executor.policy().mode());
        let conversations =
            Arc::new(ConversationStore::new(Arc::clone(&audit), config.inactivity_timeout));
        Self {
            provider,
            executor,
            tools: ToolRegistry::standard(),
            guardrails,
            conversations,
            rate_limiter,
            audit,
            config,
        }
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_guardrails(mut self, guardrails: GuardrailPolicy) -> Self {
        self.guardrails = guardrails;
        self
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn conversations(&self) -> &Arc<ConversationStore> {
        &self.conversations
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub async fn start_conversation(&self, auth: &AuthContext) -> Uuid {
        let ctx = CorrelationContext::new(auth.user_id(), "conversation.start");
        self.conversations.open(auth, &ctx).await
    }

    pub async fn end_conversation(
        &self,
        conversation_id: Uuid,
        auth: &AuthContext,
    ) -> Result<(), ConversationError> {
        let ctx = CorrelationContext::new(auth.user_id(), "conversation.end");
        self.conversations.end(conversation_id, auth, &ctx).await
    }

    pub async fn conversation_history(
        &self,
        conversation_id: Uuid,
        auth: &AuthContext,
    ) -> Result<Vec<LlmMessage>, ConversationError> {
        let ctx = CorrelationContext::new(auth.user_id(), "conversation.history");
        self.conversations.history(conversation_id, auth, &ctx).await
    }

    pub async fn active_conversations(&self, auth: &AuthContext) -> Vec<Uuid> {
        self.conversations.active_for(auth).await
    }

    /// Starts the background sweep of expired conversations and idle
    /// rate-limit buckets.
    pub fn start_maintenance(&self) -> MaintenanceHandle {
        MaintenanceHandle::start(
            Arc::clone(&self.conversations),
            self.rate_limiter.clone(),
            self.config.sweep_interval,
        )
    }

    /// Runs one turn. An unknown `conversation_id` starts a conversation
    /// under that id owned by `auth`.
    pub async fn process_message(
        &self,
        conversation_id: Uuid,
        auth: &AuthContext,
        text: impl Into<String>,
    ) -> Result<TurnOutcome, TurnError> {
        self.run_turn(conversation_id, auth, text.into(), None).await
    }

    /// Same as [`Self::process_message`], reporting progress on `events`.
    /// Once `cancel` fires nothing more is emitted and no further model
    /// request is made; tool calls already dispatched finish normally.
    pub async fn process_message_streaming(
        &self,
        conversation_id: Uuid,
        auth: &AuthContext,
        text: impl Into<String>,
        events: UnboundedSender<TurnEvent>,
        cancel: CancellationToken,
    ) -> Result<TurnOutcome, TurnError> {
        let channel = EventChannel { sender: &events, cancel: &cancel };
        let outcome = self.run_turn(conversation_id, auth, text.into(), Some(&channel)).await;
        match &outcome {
            Ok(outcome) => channel.emit(TurnEvent::Completed(outcome.clone())),
            Err(error) => channel.emit(TurnEvent::Failed {
                message: error.to_string(),
                retryable: error.is_retryable(),
            }),
        }
        outcome
    }

    async fn run_turn(
        &self,
        conversation_id: Uuid,
        auth: &AuthContext,
        text: String,
        stream: Option<&EventChannel<'_>>,
    ) -> Result<TurnOutcome, TurnError> {
        let ctx = CorrelationContext::new(auth.user_id(), "conversation.turn");
        let conversation = self.conversations.checkout_or_open(conversation_id, auth, &ctx).await?;
        let _turn = conversation.begin_turn().await;

        let mut pending = vec![LlmMessage::user(text)];
        let outcome = self
            .tool_loop(&conversation, auth, &ctx, &mut pending, stream)
            .instrument(ctx.span())
            .await;

        conversation.complete_turn(pending);
        let pruned = self.prune(&conversation, &ctx);

        match &outcome {
            Ok(outcome) => info!(
                event_name = "conversation.turn_completed",
                correlation_id = %ctx.correlation_id(),
                conversation_id = %conversation_id,
                iterations = outcome.iterations,
                tool_calls = outcome.results.len(),
                hit_iteration_limit = outcome.hit_iteration_limit,
                "turn completed"
            ),
            Err(error) => warn!(
                event_name = "conversation.turn_failed",
                correlation_id = %ctx.correlation_id(),
                conversation_id = %conversation_id,
                error = %error,
                "turn failed"
            ),
        }
        outcome.map(|outcome| TurnOutcome { pruned, ..outcome })
    }

    async fn tool_loop(
        &self,
        conversation: &Conversation,
        auth: &AuthContext,
        ctx: &CorrelationContext,
        pending: &mut Vec<LlmMessage>,
        stream: Option<&EventChannel<'_>>,
    ) -> Result<TurnOutcome, TurnError> {
        let tools = self.tools.definitions_for(self.executor.policy(), auth);
        let system_prompt = self.guardrails.system_prompt(&self.config.system_prompt);
        let mut outcome = TurnOutcome {
            conversation_id: conversation.id(),
            correlation_id: ctx.correlation_id(),
            text: String::new(),
            results: Vec::new(),
            iterations: 0,
            hit_iteration_limit: false,
            pruned: false,
            input_tokens: 0,
            output_tokens: 0,
        };

        loop {
            if stream.is_some_and(|channel| channel.cancel.is_cancelled()) {
                return Err(TurnError::Cancelled);
            }

            let mut messages = conversation.messages();
            messages.extend(pending.iter().cloned());
            let request = ModelRequest {
                conversation_id: conversation.id(),
                messages,
                tools: tools.clone(),
                system_prompt: system_prompt.clone(),
                model: self.config.model.clone(),
                max_tokens: self.config.max_tokens,
                temperature: self.config.temperature,
            };
            let response = self.request_model(request, auth, ctx, stream).await?;
            outcome.input_tokens += response.input_tokens;
            outcome.output_tokens += response.output_tokens;

            if !response.has_tool_calls() {
                pending.push(LlmMessage::assistant(response.text.clone(), Vec::new()));
                outcome.text = response.text;
                return Ok(outcome);
            }

            if outcome.iterations >= self.config.max_tool_iterations {
                warn!(
                    event_name = "conversation.iteration_limit",
                    correlation_id = %ctx.correlation_id(),
                    conversation_id = %conversation.id(),
                    max_tool_iterations = self.config.max_tool_iterations,
                    dropped_tool_calls = response.tool_calls.len(),
                    "tool loop stopped at the iteration limit"
                );
                pending.push(LlmMessage::assistant(MAX_ITERATIONS_MESSAGE, Vec::new()));
                outcome.text = MAX_ITERATIONS_MESSAGE.to_string();
                outcome.hit_iteration_limit = true;
                return Ok(outcome);
            }

            pending.push(LlmMessage::assistant(response.text, response.tool_calls.clone()));
            for call in &response.tool_calls {
                let result = if stream.is_some_and(|channel| channel.cancel.is_cancelled()) {
                    skipped_after_cancel(call, ctx)
                } else {
                    self.execute_tool_call(call, auth, ctx, stream).await
                };
                pending.push(LlmMessage::tool_result(call.id.clone(), render_result(&result)));
                outcome.results.push(result);
            }
            outcome.iterations += 1;
        }
    }

    /// Reserves rate-limit budget, calls the provider, and trues the
    /// reservation up against reported usage.
    async fn request_model(
        &self,
        request: ModelRequest,
        auth: &AuthContext,
        ctx: &CorrelationContext,
        stream: Option<&EventChannel<'_>>,
    ) -> Result<ModelResponse, TurnError> {
        let identity = auth.rate_limit_key();
        let estimator = self.provider.estimator();
        let estimate = (estimator.estimate_messages(&request.messages)
            + estimator.estimate(&request.system_prompt)) as u64
            + u64::from(request.max_tokens.unwrap_or(0));

        if let RateLimitDecision::Denied { reason, retry_after, reset_at } =
            self.rate_limiter.try_consume(identity, estimate).await
        {
            self.audit.emit(
                AuditEvent::for_context(ctx, AuditEventType::RateLimitExceeded)
                    .with_detail("conversationId", request.conversation_id.to_string())
                    .with_detail("reason", reason.as_str())
                    .with_detail("estimatedTokens", estimate)
                    .with_detail("resetAt", reset_at.to_rfc3339()),
            );
            return Err(TurnError::RateLimited { reason: reason.as_str(), retry_after, reset_at });
        }

        let response = self.call_provider(request, stream).await;
        let actual = match &response {
            Ok(response) if response.total_tokens() > 0 => response.total_tokens(),
            Ok(_) => estimate,
            Err(_) => 0,
        };
        self.rate_limiter.adjust_for_actual_usage(identity, estimate, actual).await;
        response
    }

    async fn call_provider(
        &self,
        request: ModelRequest,
        stream: Option<&EventChannel<'_>>,
    ) -> Result<ModelResponse, TurnError> {
        let timeout = self.config.provider_timeout;
        let call = async move {
            match stream {
                Some(channel) => self.provider.chat_streaming(request, channel).await,
                None => self.provider.chat(request).await,
            }
        };
        let timed = tokio::time::timeout(timeout, call);

        let answered = match stream {
            Some(channel) => tokio::select! {
                biased;
                _ = channel.cancel.cancelled() => return Err(TurnError::Cancelled),
                answered = timed => answered,
            },
            None => timed.await,
        };
        match answered {
            Ok(response) => Ok(response?),
            Err(_) => Err(TurnError::ProviderTimeout(timeout)),
        }
    }

    async fn execute_tool_call(
        &self,
        call: &ToolCall,
        auth: &AuthContext,
        ctx: &CorrelationContext,
        stream: Option<&EventChannel<'_>>,
    ) -> ActionResult {
        if let Some(channel) = stream {
            channel.emit(TurnEvent::ToolCallStarted { id: call.id.clone(), name: call.name.clone() });
        }

        let correlation_id = Uuid::new_v4();
        let result = match self.tools.build_action(call, correlation_id) {
            Ok(action) => {
                let (action, decision) = self.guardrails.apply(action);
                let result = self.executor.execute(&action, auth, ctx).await;
                match decision {
                    GuardrailDecision::Allow => result,
                    GuardrailDecision::Degrade { reason_code, user_message } => {
                        info!(
                            event_name = "guardrail.degraded",
                            correlation_id = %correlation_id,
                            reason_code,
                            tool = %call.name,
                            "mutation downgraded to a preview"
                        );
                        result.with_leading_warnings(vec![user_message])
                    }
                }
            }
            Err(error) => {
                self.audit.emit(
                    AuditEvent::new(correlation_id, AuditEventType::ActionFailed, auth.user_id())
                        .with_detail("tool", call.name.clone())
                        .with_detail("toolCallId", call.id.clone())
                        .with_detail("code", error.code().as_str())
                        .with_detail("error", error.to_string()),
                );
                warn!(
                    event_name = "tool_call.rejected",
                    correlation_id = %correlation_id,
                    parent_id = %ctx.correlation_id(),
                    tool = %call.name,
                    code = error.code().as_str(),
                    "tool call rejected before execution"
                );
                ActionResult::failure(
                    format!("tool call `{}` was rejected", call.name),
                    vec![ActionError::new(error.code(), error.to_string())],
                )
                .with_correlation_id(correlation_id)
            }
        };

        if let Some(channel) = stream {
            channel.emit(TurnEvent::ToolCallCompleted {
                id: call.id.clone(),
                name: call.name.clone(),
                result: result.clone(),
            });
        }
        result
    }

    fn prune(&self, conversation: &Conversation, ctx: &CorrelationContext) -> bool {
        let Some(folded) = conversation.prune(
            self.provider.estimator(),
            self.config.context_token_budget,
            self.config.retained_messages,
        ) else {
            return false;
        };
        self.audit.emit(
            AuditEvent::for_context(ctx, AuditEventType::ConversationPruned)
                .with_detail("conversationId", conversation.id().to_string())
                .with_detail("foldedMessages", folded)
                .with_detail("remainingMessages", conversation.message_count()),
        );
        info!(
            event_name = "conversation.pruned",
            correlation_id = %ctx.correlation_id(),
            conversation_id = %conversation.id(),
            folded,
            "conversation history pruned"
        );
        true
    }
}

/// Stands in for a tool call that was never dispatched because the turn was
/// cancelled, so every call in the history still has a result.
fn skipped_after_cancel(call: &ToolCall, ctx: &CorrelationContext) -> ActionResult {
    info!(
        event_name = "tool_call.skipped",
        correlation_id = %ctx.correlation_id(),
        tool = %call.name,
        tool_call_id = %call.id,
        "tool call skipped after cancellation"
    );
    ActionResult::failure(
        format!("tool call `{}` was cancelled before dispatch", call.name),
        vec![ActionError::new(ErrorCode::Cancelled, "the turn was cancelled")],
    )
    .with_correlation_id(Uuid::new_v4())
}

fn render_result(result: &ActionResult) -> String {
    serde_json::to_string(result).unwrap_or_else(|_| result.message.clone())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ignis_core::config::AppConfig;
    use ignis_core::InterfaceError;
    use uuid::Uuid;

    use super::{RuntimeConfig, TurnError};
    use crate::conversation::ConversationError;
    use crate::llm::{ProviderError, ProviderErrorKind};

    #[test]
    fn runtime_config_follows_app_config() {
        let app = AppConfig::default();
        let config = RuntimeConfig::from_app_config(&app);
        assert_eq!(config.max_tool_iterations, app.conversation.max_tool_iterations);
        assert_eq!(config.context_token_budget, app.conversation.context_token_budget);
        assert_eq!(config.max_tokens, Some(app.model.max_tokens));
        assert_eq!(config.provider_timeout, Duration::from_secs(app.model.timeout_secs));
    }

    #[test]
    fn turn_errors_map_to_interface_errors() {
        let denied = TurnError::Conversation(ConversationError::AccessDenied {
            conversation_id: Uuid::nil(),
            user_id: "mallory".to_string(),
        });
        assert!(matches!(denied.into_interface("c-1"), InterfaceError::Forbidden { .. }));

        let upstream = TurnError::Provider(ProviderError::new(ProviderErrorKind::ServerError, "502"));
        assert!(upstream.is_retryable());
        let mapped = upstream.into_interface("c-2");
        assert!(matches!(mapped, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(mapped.correlation_id(), "c-2");

        let auth = TurnError::Provider(ProviderError::new(ProviderErrorKind::Authentication, "401"));
        assert!(!auth.is_retryable());
        assert!(matches!(auth.into_interface("c-3"), InterfaceError::Internal { .. }));

        assert!(TurnError::ProviderTimeout(Duration::from_secs(1)).is_retryable());
        assert!(!TurnError::Cancelled.is_retryable());
    }
}
