//! Conversation state, ownership and expiry.
//!
//! Each conversation has two locks. The turn gate is an async mutex held for
//! the whole turn so turns on one conversation run one at a time. The
//! message list sits behind a plain mutex that is only held for copies and
//! appends, never across a provider or handler call.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, RwLock};
use tokio::time::Instant;
use uuid::Uuid;

use ignis_core::{AuditEvent, AuditEventType, AuditSink, AuthContext, CorrelationContext};

use crate::llm::{LlmMessage, MessageRole, TokenEstimator};

pub const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(60 * 60);
const SUMMARY_EXCERPT_CHARS: usize = 80;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConversationError {
    #[error("conversation {0} does not exist")]
    NotFound(Uuid),
    #[error("conversation {conversation_id} is not accessible to `{user_id}`")]
    AccessDenied { conversation_id: Uuid, user_id: String },
}

#[derive(Debug)]
struct ConversationState {
    messages: Vec<LlmMessage>,
    last_activity: Instant,
    turns: u64,
}

pub struct Conversation {
    id: Uuid,
    owner: AuthContext,
    created_at: DateTime<Utc>,
    turn_gate: Arc<AsyncMutex<()>>,
    state: Mutex<ConversationState>,
}

impl Conversation {
    fn new(id: Uuid, owner: AuthContext) -> Self {
        Self {
            id,
            owner,
            created_at: Utc::now(),
            turn_gate: Arc::new(AsyncMutex::new(())),
            state: Mutex::new(ConversationState {
                messages: Vec::new(),
                last_activity: Instant::now(),
                turns: 0,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn owner(&self) -> &AuthContext {
        &self.owner
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn state(&self) -> MutexGuard<'_, ConversationState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn messages(&self) -> Vec<LlmMessage> {
        self.state().messages.clone()
    }

    pub fn message_count(&self) -> usize {
        self.state().messages.len()
    }

    pub fn turns(&self) -> u64 {
        self.state().turns
    }

    /// Waits for any running turn on this conversation to finish.
    pub async fn begin_turn(&self) -> OwnedMutexGuard<()> {
        let guard = Arc::clone(&self.turn_gate).lock_owned().await;
        self.touch();
        guard
    }

    pub(crate) fn touch(&self) {
        self.state().last_activity = Instant::now();
    }

    /// Appends the messages produced by one turn.
    pub(crate) fn complete_turn(&self, messages: Vec<LlmMessage>) {
        let mut state = self.state();
        state.messages.extend(messages);
        state.turns += 1;
        state.last_activity = Instant::now();
    }

    /// Replaces the history with its pruned form when it is over `budget`.
    /// Returns how many messages were folded into the summary.
    pub(crate) fn prune(
        &self,
        estimator: &dyn TokenEstimator,
        budget: usize,
        retained: usize,
    ) -> Option<usize> {
        let mut state = self.state();
        let before = state.messages.len();
        let pruned = prune_history(&state.messages, estimator, budget, retained)?;
        let folded = before - (pruned.len() - 1);
        state.messages = pruned;
        Some(folded)
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.state().last_activity)
    }

    fn is_busy(&self) -> bool {
        self.turn_gate.try_lock().is_err()
    }
}

/// Keeps the most recent `retained` messages behind one system summary when
/// the history is estimated above `budget` tokens. Under budget it returns
/// `None` and the history is left alone.
///
/// Tool results whose assistant call falls into the summary are summarized
/// with it, so the retained tail never opens with an orphaned result.
pub fn prune_history(
    messages: &[LlmMessage],
    estimator: &dyn TokenEstimator,
    budget: usize,
    retained: usize,
) -> Option<Vec<LlmMessage>> {
    if estimator.estimate_messages(messages) <= budget {
        return None;
    }
    let mut split = messages.len() - retained.min(messages.len());
    while messages.get(split).is_some_and(|message| message.role == MessageRole::Tool) {
        split += 1;
    }
    let mut pruned = Vec::with_capacity(messages.len() - split + 1);
    pruned.push(LlmMessage::system(summarize(&messages[..split])));
    pruned.extend_from_slice(&messages[split..]);
    Some(pruned)
}

fn summarize(omitted: &[LlmMessage]) -> String {
    let tool_results = omitted.iter().filter(|message| message.role == MessageRole::Tool).count();
    let mut summary = format!(
        "Earlier conversation summarized: {} message(s) omitted, {} of them tool results.",
        omitted.len(),
        tool_results
    );
    let requests: Vec<String> = omitted
        .iter()
        .filter(|message| message.role == MessageRole::User)
        .map(|message| excerpt(&message.content))
        .collect();
    if !requests.is_empty() {
        summary.push_str(" Earlier requests: ");
        summary.push_str(&requests.join(" | "));
    }
    summary
}

fn excerpt(text: &str) -> String {
    let text = text.trim();
    if text.chars().count() <= SUMMARY_EXCERPT_CHARS {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(SUMMARY_EXCERPT_CHARS).collect();
    cut.push_str("...");
    cut
}

pub struct ConversationStore {
    conversations: RwLock<HashMap<Uuid, Arc<Conversation>>>,
    audit: Arc<dyn AuditSink>,
    inactivity_timeout: Duration,
}

impl ConversationStore {
    pub fn new(audit: Arc<dyn AuditSink>, inactivity_timeout: Duration) -> Self {
        Self { conversations: RwLock::new(HashMap::new()), audit, inactivity_timeout }
    }

    pub fn inactivity_timeout(&self) -> Duration {
        self.inactivity_timeout
    }

    pub async fn open(&self, auth: &AuthContext, ctx: &CorrelationContext) -> Uuid {
        let conversation = Arc::new(Conversation::new(Uuid::new_v4(), auth.clone()));
        let id = conversation.id();
        self.conversations.write().await.insert(id, conversation);
        self.record_started(id, auth, ctx);
        id
    }

    /// Like [`Self::checkout`], but an unknown id starts a new conversation
    /// under that id owned by `auth`.
    pub async fn checkout_or_open(
        &self,
        id: Uuid,
        auth: &AuthContext,
        ctx: &CorrelationContext,
    ) -> Result<Arc<Conversation>, ConversationError> {
        let created = {
            let mut conversations = self.conversations.write().await;
            match conversations.entry(id) {
                Entry::Occupied(_) => None,
                Entry::Vacant(slot) => {
                    Some(Arc::clone(slot.insert(Arc::new(Conversation::new(id, auth.clone())))))
                }
            }
        };
        match created {
            Some(conversation) => {
                self.record_started(id, auth, ctx);
                Ok(conversation)
            }
            None => self.checkout(id, auth, ctx).await,
        }
    }

    fn record_started(&self, id: Uuid, auth: &AuthContext, ctx: &CorrelationContext) {
        self.audit.emit(
            AuditEvent::for_context(ctx, AuditEventType::ConversationStarted)
                .with_detail("conversationId", id.to_string()),
        );
        tracing::info!(
            event_name = "conversation.started",
            correlation_id = %ctx.correlation_id(),
            user_id = %auth.user_id(),
            conversation_id = %id,
            "conversation started"
        );
    }

    /// Looks up a conversation for `auth`. Any principal other than the
    /// owner is refused and the attempt is audited.
    pub async fn checkout(
        &self,
        id: Uuid,
        auth: &AuthContext,
        ctx: &CorrelationContext,
    ) -> Result<Arc<Conversation>, ConversationError> {
        let conversation = self
            .conversations
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(ConversationError::NotFound(id))?;

        if !conversation.owner().same_principal(auth) {
            self.audit.emit(
                AuditEvent::for_context(ctx, AuditEventType::ConversationAccessDenied)
                    .with_detail("conversationId", id.to_string())
                    .with_detail("ownerId", conversation.owner().user_id()),
            );
            tracing::warn!(
                event_name = "conversation.access_denied",
                correlation_id = %ctx.correlation_id(),
                user_id = %auth.user_id(),
                conversation_id = %id,
                "conversation access denied"
            );
            return Err(ConversationError::AccessDenied {
                conversation_id: id,
                user_id: auth.user_id().to_string(),
            });
        }
        Ok(conversation)
    }

    pub async fn history(
        &self,
        id: Uuid,
        auth: &AuthContext,
        ctx: &CorrelationContext,
    ) -> Result<Vec<LlmMessage>, ConversationError> {
        Ok(self.checkout(id, auth, ctx).await?.messages())
    }

    pub async fn end(
        &self,
        id: Uuid,
        auth: &AuthContext,
        ctx: &CorrelationContext,
    ) -> Result<(), ConversationError> {
        let conversation = self.checkout(id, auth, ctx).await?;
        self.conversations.write().await.remove(&id);

        self.audit.emit(
            AuditEvent::for_context(ctx, AuditEventType::ConversationEnded)
                .with_detail("conversationId", id.to_string())
                .with_detail("turns", conversation.turns()),
        );
        tracing::info!(
            event_name = "conversation.ended",
            correlation_id = %ctx.correlation_id(),
            conversation_id = %id,
            "conversation ended"
        );
        Ok(())
    }

    pub async fn active_count(&self) -> usize {
        self.conversations.read().await.len()
    }

    /// Conversations owned by `auth`.
    pub async fn active_for(&self, auth: &AuthContext) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self
            .conversations
            .read()
            .await
            .values()
            .filter(|conversation| conversation.owner().same_principal(auth))
            .map(|conversation| conversation.id())
            .collect();
        ids.sort();
        ids
    }

    /// Drops conversations idle for longer than the inactivity timeout.
    /// Conversations with a turn in progress are skipped.
    pub async fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut conversations = self.conversations.write().await;
        let expired: Vec<Uuid> = conversations
            .values()
            .filter(|conversation| {
                !conversation.is_busy() && conversation.idle_for(now) > self.inactivity_timeout
            })
            .map(|conversation| conversation.id())
            .collect();

        for id in &expired {
            if let Some(conversation) = conversations.remove(id) {
                self.audit.emit(
                    AuditEvent::new(
                        Uuid::new_v4(),
                        AuditEventType::ConversationExpired,
                        conversation.owner().user_id(),
                    )
                    .with_detail("conversationId", id.to_string())
                    .with_detail("idleSecs", conversation.idle_for(now).as_secs()),
                );
            }
        }
        if !expired.is_empty() {
            tracing::info!(
                event_name = "conversation.swept",
                expired = expired.len(),
                remaining = conversations.len(),
                "expired conversations removed"
            );
        }
        expired.len()
    }
}
