//! Periodic housekeeping for the runtime.
//!
//! One background task sweeps expired conversations and idle rate-limit
//! buckets on a fixed interval. Ticks missed while a sweep runs are skipped
//! rather than replayed.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ignis_core::RateLimiter;

use crate::conversation::ConversationStore;

const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_conversations: usize,
    pub evicted_buckets: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.expired_conversations == 0 && self.evicted_buckets == 0
    }
}

pub async fn sweep_once(conversations: &ConversationStore, rate_limiter: &RateLimiter) -> SweepReport {
    SweepReport {
        expired_conversations: conversations.sweep_expired().await,
        evicted_buckets: rate_limiter.evict_idle().await,
    }
}

/// Owns the sweep task. Dropping the handle leaves the task running until
/// the runtime shuts down; call [`MaintenanceHandle::shutdown`] to stop it.
pub struct MaintenanceHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    pub fn start(
        conversations: Arc<ConversationStore>,
        rate_limiter: RateLimiter,
        every: Duration,
    ) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            run(conversations, rate_limiter, every.max(MIN_SWEEP_INTERVAL), token).await;
        });
        Self { cancel, task }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(error) = self.task.await {
            warn!(event_name = "maintenance.join_failed", error = %error, "maintenance task ended abnormally");
        }
    }
}

async fn run(
    conversations: Arc<ConversationStore>,
    rate_limiter: RateLimiter,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(event_name = "maintenance.started", interval_secs = every.as_secs(), "maintenance task started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let report = sweep_once(&conversations, &rate_limiter).await;
                if !report.is_empty() {
                    debug!(
                        event_name = "maintenance.swept",
                        expired_conversations = report.expired_conversations,
                        evicted_buckets = report.evicted_buckets,
                        "maintenance sweep removed stale state"
                    );
                }
            }
        }
    }

    info!(event_name = "maintenance.stopped", "maintenance task stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use ignis_core::{
        AuthContext, CorrelationContext, InMemoryAuditSink, RateLimitConfig, RateLimiter,
    };

    use super::{sweep_once, MaintenanceHandle};
    use crate::conversation::ConversationStore;

    fn store() -> Arc<ConversationStore> {
        Arc::new(ConversationStore::new(
            Arc::new(InMemoryAuditSink::default()),
            Duration::from_secs(3600),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_once_clears_conversations_and_buckets() {
        let conversations = store();
        let limiter = RateLimiter::new(RateLimitConfig::default());
        let alice = AuthContext::admin("alice");
        conversations.open(&alice, &CorrelationContext::new("alice", "test")).await;
        assert!(limiter.try_consume("alice", 10).await.is_allowed());

        tokio::time::advance(Duration::from_secs(3601)).await;
        let report = sweep_once(&conversations, &limiter).await;
        assert_eq!(report.expired_conversations, 1);
        assert_eq!(report.evicted_buckets, 1);
        assert!(sweep_once(&conversations, &limiter).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn background_task_sweeps_and_shuts_down() {
        let conversations = store();
        let limiter = RateLimiter::new(RateLimitConfig::default());
        let alice = AuthContext::admin("alice");
        conversations.open(&alice, &CorrelationContext::new("alice", "test")).await;

        let handle = MaintenanceHandle::start(
            Arc::clone(&conversations),
            limiter,
            Duration::from_secs(60),
        );
        assert!(handle.is_running());

        tokio::time::sleep(Duration::from_secs(3700)).await;
        assert_eq!(conversations.active_count().await, 0);

        handle.shutdown().await;
    }
}
