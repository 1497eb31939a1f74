//! Conversation runtime for the Ignis action engine.
//!
//! A user message goes to a [`ModelProvider`]; tool calls the model proposes
//! become [`ignis_core::Action`]s that run through the policy-enforcing
//! [`ignis_core::ActionExecutor`], and their results are fed back until the
//! model answers in plain text or the iteration limit is hit.
//!
//! # Modules
//!
//! - `llm`: provider contract, messages, token estimation, scripted provider
//! - `tools`: tool schemas and tool-call to action translation
//! - `guardrails`: environment-dependent caution
//! - `conversation`: ownership, history, pruning, expiry
//! - `runtime`: the bounded tool loop and its streaming variant
//! - `maintenance`: background sweeps
//!
//! The model never decides policy outcomes. Authorization, validation and
//! confirmation are enforced by the executor for every call it proposes.

pub mod conversation;
pub mod guardrails;
pub mod llm;
pub mod maintenance;
pub mod runtime;
pub mod tools;

pub use conversation::{prune_history, Conversation, ConversationError, ConversationStore};
pub use guardrails::{GuardrailDecision, GuardrailPolicy};
pub use llm::{
    CharRatioEstimator, LlmMessage, MessageRole, ModelProvider, ModelRequest, ModelResponse,
    ProviderError, ProviderErrorKind, ScriptedProvider, StopReason, TokenEstimator, TokenSink,
    ToolCall, ToolCallParseError, ToolDefinition,
};
pub use maintenance::{sweep_once, MaintenanceHandle, SweepReport};
pub use runtime::{
    AgentRuntime, RuntimeConfig, TurnError, TurnEvent, TurnOutcome, MAX_ITERATIONS_MESSAGE,
};
pub use tools::{ToolCallError, ToolRegistry, ToolSpec};
