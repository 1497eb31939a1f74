//! Per-operation identity and timing carrier.
//!
//! A `CorrelationContext` is passed explicitly from the orchestrator down to
//! the executor, handlers and audit sink. Nothing is stored in thread-local or
//! task-local state, so one worker thread can serve many logical requests.

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::Span;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct CorrelationContext {
    correlation_id: Uuid,
    parent_id: Option<Uuid>,
    user_id: String,
    operation: String,
    started_at: Instant,
    started_at_utc: DateTime<Utc>,
}

impl CorrelationContext {
    pub fn new(user_id: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), user_id, operation)
    }

    pub fn with_id(
        correlation_id: Uuid,
        user_id: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        Self {
            correlation_id,
            parent_id: None,
            user_id: user_id.into(),
            operation: operation.into(),
            started_at: Instant::now(),
            started_at_utc: Utc::now(),
        }
    }

    /// Derives a context for a nested operation (one action inside a turn).
    /// The new context keeps the user, links back to this one, and restarts
    /// the clock.
    pub fn scoped(&self, correlation_id: Uuid, operation: impl Into<String>) -> Self {
        if correlation_id == self.correlation_id {
            return Self { operation: operation.into(), ..self.clone() };
        }
        Self {
            correlation_id,
            parent_id: Some(self.correlation_id),
            user_id: self.user_id.clone(),
            operation: operation.into(),
            started_at: Instant::now(),
            started_at_utc: Utc::now(),
        }
    }

    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    pub fn parent_id(&self) -> Option<Uuid> {
        self.parent_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at_utc
    }

    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started_at.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    pub fn span(&self) -> Span {
        tracing::info_span!(
            "operation",
            operation = %self.operation,
            correlation_id = %self.correlation_id,
            parent_id = ?self.parent_id,
            user_id = %self.user_id,
        )
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use uuid::Uuid;

    use super::CorrelationContext;

    #[test]
    fn scoped_context_links_to_parent() {
        let turn = CorrelationContext::new("alice", "conversation.turn");
        let action_id = Uuid::new_v4();
        let action = turn.scoped(action_id, "action.execute");

        assert_eq!(action.correlation_id(), action_id);
        assert_eq!(action.parent_id(), Some(turn.correlation_id()));
        assert_eq!(action.user_id(), "alice");
        assert_eq!(action.operation(), "action.execute");
    }

    #[test]
    fn scoping_to_the_same_id_keeps_lineage() {
        let ctx = CorrelationContext::new("alice", "a");
        let same = ctx.scoped(ctx.correlation_id(), "b");
        assert_eq!(same.parent_id(), None);
        assert_eq!(same.operation(), "b");
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_tracks_the_tokio_clock() {
        let ctx = CorrelationContext::new("alice", "timed");
        tokio::time::advance(Duration::from_millis(250)).await;
        assert!(ctx.elapsed_ms() >= 250);
    }
}
