use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::ResponseThresholds;
use crate::error::Result;
use crate::managers::classifier::ResponseVia;
use crate::managers::pending_registry::SharedPendingRegistry;
use crate::managers::reminder_scheduler::SharedReminderScheduler;
use crate::models::ResponseTracking;
use crate::state::SharedEntityStore;

/// A reply or reaction that may answer an open help request
#[derive(Debug, Clone)]
pub struct ResponseAttempt {
    pub original_message_id: String,
    pub responder_id: String,
    /// The reply's message id; ignored for reactions
    pub response_message_id: String,
    pub via: ResponseVia,
    pub responded_at: DateTime<Utc>,
}

impl ResponseAttempt {
    /// Reactions have no message of their own, so they get a synthetic id
    pub fn recorded_response_id(&self) -> String {
        match &self.via {
            ResponseVia::Reply => self.response_message_id.clone(),
            ResponseVia::Reaction { emoji } => format!("reaction_{}", emoji),
        }
    }
}

/// Pairs responses with pending help requests. The registry's atomic remove
/// decides the winner, so at most one response is ever recorded per request.
pub struct ResponseMatcher {
    registry: SharedPendingRegistry,
    scheduler: SharedReminderScheduler,
    store: SharedEntityStore,
    thresholds: ResponseThresholds,
}

impl ResponseMatcher {
    pub fn new(
        registry: SharedPendingRegistry,
        scheduler: SharedReminderScheduler,
        store: SharedEntityStore,
        thresholds: ResponseThresholds,
    ) -> Self {
        Self {
            registry,
            scheduler,
            store,
            thresholds,
        }
    }

    /// Take the pending entry and record the response. `Ok(None)` means the
    /// entry was already gone and the caller should score normally.
    pub async fn try_match(&self, attempt: &ResponseAttempt) -> Result<Option<ResponseTracking>> {
        let Some(request) = self.registry.remove(&attempt.original_message_id) else {
            debug!(
                "No pending help request {} for response from {}",
                attempt.original_message_id, attempt.responder_id
            );
            return Ok(None);
        };

        self.scheduler.cancel(&request.message_id);

        let elapsed = (attempt.responded_at - request.created_at).num_seconds().max(0);
        let record = ResponseTracking {
            id: Uuid::new_v4(),
            actor_id: attempt.responder_id.clone(),
            server_id: request.server_id.clone(),
            mention_timestamp: request.created_at,
            response_timestamp: attempt.responded_at,
            response_time_seconds: elapsed,
            quality: self.thresholds.classify(elapsed),
            mention_message_id: request.message_id.clone(),
            response_message_id: attempt.recorded_response_id(),
            channel_id: request.channel_id.clone(),
            trigger_keywords: request.trigger_keywords.join(","),
        };

        self.store.insert_response_tracking(record.clone()).await?;

        info!(
            "Curator {} answered help request {} in {}s ({:?})",
            record.actor_id, record.mention_message_id, elapsed, record.quality
        );
        Ok(Some(record))
    }
}
