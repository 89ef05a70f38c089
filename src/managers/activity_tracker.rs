//! Entry point for inbound Discord events.
//!
//! Each event is classified, then either scored as ordinary activity, opened
//! as a help request, matched against an open help request, or dropped.
//! Curator totals are recomputed from the stored records after every scored
//! event, never incremented in place.

use std::sync::Arc;
use tracing::{debug, error, info};

use crate::config::TrackerConfig;
use crate::error::{Result, TrackerError};
use crate::managers::classifier::{
    Classification, EventClassifier, EventKind, InboundEvent, ResponseVia,
};
use crate::managers::pending_registry::{
    PendingHelpRequest, PendingRegistry, SharedPendingRegistry,
};
use crate::managers::rating_engine::{RatingEngine, RatingReport, SharedRatingEngine};
use crate::managers::reminder_scheduler::{
    ReminderNotifier, ReminderPolicySource, ReminderScheduler, SharedReminderScheduler,
    StorePolicySource,
};
use crate::managers::response_matcher::{ResponseAttempt, ResponseMatcher};
use crate::models::{
    Activity, ActivityType, Curator, CuratorOrigin, DiscordServer, ResponseTracking,
};
use crate::state::SharedEntityStore;

/// What processing an event did
#[derive(Debug, Clone)]
pub enum EventOutcome {
    /// Bot actor, untracked server, or nothing worth recording
    Ignored,
    Recorded {
        kind: ActivityType,
        points: u32,
    },
    /// The post was scored and opened a help request
    HelpRequestOpened {
        message_id: String,
        reminders_armed: bool,
    },
    ResponseMatched {
        response: ResponseTracking,
        rating: RatingReport,
    },
    /// A deleted message closed its own help request
    PendingRemoved {
        message_id: String,
    },
    Unscored,
}

pub struct ActivityTracker {
    store: SharedEntityStore,
    config: Arc<TrackerConfig>,
    classifier: EventClassifier,
    registry: SharedPendingRegistry,
    scheduler: SharedReminderScheduler,
    matcher: ResponseMatcher,
    ratings: SharedRatingEngine,
}

impl ActivityTracker {
    /// Reminder settings are read from the server records in `store`
    pub fn new(
        store: SharedEntityStore,
        config: Arc<TrackerConfig>,
        notifier: Arc<dyn ReminderNotifier>,
    ) -> Self {
        let policies = Arc::new(StorePolicySource::new(store.clone()));
        Self::with_policy_source(store, config, notifier, policies)
    }

    pub fn with_policy_source(
        store: SharedEntityStore,
        config: Arc<TrackerConfig>,
        notifier: Arc<dyn ReminderNotifier>,
        policies: Arc<dyn ReminderPolicySource>,
    ) -> Self {
        let registry = Arc::new(PendingRegistry::new());
        let scheduler = Arc::new(ReminderScheduler::new(registry.clone(), notifier, policies));
        let matcher = ResponseMatcher::new(
            registry.clone(),
            scheduler.clone(),
            store.clone(),
            config.response_thresholds.clone(),
        );
        let ratings = Arc::new(RatingEngine::new(store.clone(), config.clone()));

        Self {
            store,
            classifier: EventClassifier::new(config.normalized_keywords()),
            config,
            registry,
            scheduler,
            matcher,
            ratings,
        }
    }

    pub fn registry(&self) -> &SharedPendingRegistry {
        &self.registry
    }

    pub fn scheduler(&self) -> &SharedReminderScheduler {
        &self.scheduler
    }

    pub fn ratings(&self) -> &SharedRatingEngine {
        &self.ratings
    }

    pub fn store(&self) -> &SharedEntityStore {
        &self.store
    }

    /// Process an event, logging instead of propagating failures so one bad
    /// event never affects the next
    pub async fn handle_event(&self, event: InboundEvent) {
        let message_id = event.message_id.clone();
        match self.process_event(event).await {
            Ok(outcome) => debug!("Event on {} processed: {:?}", message_id, outcome),
            Err(e) => error!("Error processing event on {}: {}", message_id, e),
        }
    }

    pub async fn process_event(&self, event: InboundEvent) -> Result<EventOutcome> {
        if event.actor_is_bot {
            return Ok(EventOutcome::Ignored);
        }

        // Pending entries outlive a server being deactivated
        if event.kind == EventKind::Delete {
            return Ok(self.close_deleted(event.message_id));
        }

        let Some(server) = self.store.find_server(&event.server_id).await? else {
            return Ok(EventOutcome::Ignored);
        };
        if !server.is_active {
            return Ok(EventOutcome::Ignored);
        }

        let role_mention = server.role_mention();
        let classification = self.classifier.classify(&event, role_mention.as_deref(), |id| {
            self.registry.contains(id)
        });

        match classification {
            Classification::Ignored => Ok(EventOutcome::Ignored),
            Classification::Unscored => Ok(EventOutcome::Unscored),
            Classification::Deleted { message_id } => Ok(self.close_deleted(message_id)),
            Classification::Activity {
                kind,
                help_keywords,
            } => self.record_activity(&event, &server, kind, help_keywords).await,
            Classification::ResponseCandidate {
                original_message_id,
                via,
                help_keywords,
            } => {
                self.handle_response(&event, &server, original_message_id, via, help_keywords)
                    .await
            }
        }
    }

    fn close_deleted(&self, message_id: String) -> EventOutcome {
        match self.registry.remove(&message_id) {
            Some(_) => {
                self.scheduler.cancel(&message_id);
                info!("Help request {} deleted, no longer pending", message_id);
                EventOutcome::PendingRemoved { message_id }
            }
            None => EventOutcome::Unscored,
        }
    }

    async fn record_activity(
        &self,
        event: &InboundEvent,
        server: &DiscordServer,
        kind: ActivityType,
        help_keywords: Option<Vec<String>>,
    ) -> Result<EventOutcome> {
        self.ensure_curator(event).await?;

        let points = self.config.points.for_type(kind);
        let activity = Activity::new(
            &event.actor_id,
            &event.server_id,
            kind,
            &activity_content(event, kind),
            points,
            event.occurred_at,
        )
        .with_origin(&event.message_id, &event.channel_id);
        self.store.insert_activity(activity).await?;
        self.ratings.recompute(&event.actor_id).await?;

        debug!(
            "Recorded {} activity for {} (+{})",
            kind, event.actor_id, points
        );

        match help_keywords {
            Some(keywords) => Ok(self.open_help_request(event, server, keywords)),
            None => Ok(EventOutcome::Recorded { kind, points }),
        }
    }

    fn open_help_request(
        &self,
        event: &InboundEvent,
        server: &DiscordServer,
        keywords: Vec<String>,
    ) -> EventOutcome {
        let request = PendingHelpRequest::new(
            &event.message_id,
            &event.server_id,
            &event.channel_id,
            &event.actor_id,
            keywords,
            event.occurred_at,
        );

        if !self.registry.register(request.clone()) {
            return EventOutcome::HelpRequestOpened {
                message_id: event.message_id.clone(),
                reminders_armed: self.scheduler.is_armed(&event.message_id),
            };
        }

        info!(
            "Help request {} opened by {} in {} ({})",
            request.message_id,
            request.author_id,
            server.name,
            request.trigger_keywords.join(", ")
        );

        let reminders_armed =
            server.notification_role_id.is_some() && self.scheduler.arm(&request).is_some();

        EventOutcome::HelpRequestOpened {
            message_id: request.message_id,
            reminders_armed,
        }
    }

    async fn handle_response(
        &self,
        event: &InboundEvent,
        server: &DiscordServer,
        original_message_id: String,
        via: ResponseVia,
        help_keywords: Option<Vec<String>>,
    ) -> Result<EventOutcome> {
        self.ensure_curator(event).await?;

        let attempt = ResponseAttempt {
            original_message_id,
            responder_id: event.actor_id.clone(),
            response_message_id: event.message_id.clone(),
            via: via.clone(),
            responded_at: event.occurred_at,
        };

        let Some(response) = self.matcher.try_match(&attempt).await? else {
            // Lost the race to another responder or the sweep
            let kind = match via {
                ResponseVia::Reply => ActivityType::Message,
                ResponseVia::Reaction { .. } => ActivityType::Reaction,
            };
            return self.record_activity(event, server, kind, help_keywords).await;
        };

        let points = self.config.points.reply;
        let activity = Activity::new(
            &event.actor_id,
            &event.server_id,
            ActivityType::Reply,
            &activity_content(event, ActivityType::Reply),
            points,
            event.occurred_at,
        )
        .with_origin(&event.message_id, &event.channel_id);
        self.store.insert_activity(activity).await?;
        let rating = self.ratings.recompute(&event.actor_id).await?;

        // A reply can itself ask for help
        if let (ResponseVia::Reply, Some(keywords)) = (&via, help_keywords) {
            self.open_help_request(event, server, keywords);
        }

        Ok(EventOutcome::ResponseMatched { response, rating })
    }

    async fn ensure_curator(&self, event: &InboundEvent) -> Result<()> {
        if self.store.find_curator(&event.actor_id).await?.is_none() {
            self.store
                .create_curator(&event.actor_id, &event.actor_name, CuratorOrigin::AutoProvisioned)
                .await?;
            info!(
                "Auto-provisioned curator {} ({})",
                event.actor_name, event.actor_id
            );
        }
        Ok(())
    }

    /// Enrol a curator explicitly. Returns the record and whether it was new;
    /// a known curator is left untouched.
    pub async fn enroll_curator(&self, actor_id: &str, name: &str) -> Result<(Curator, bool)> {
        if let Some(existing) = self.store.find_curator(actor_id).await? {
            return Ok((existing, false));
        }

        self.store
            .create_curator(actor_id, name, CuratorOrigin::Administrative)
            .await?;
        self.ratings.recompute(actor_id).await?;
        info!("Curator {} ({}) enrolled by an administrator", name, actor_id);

        let curator = self
            .store
            .find_curator(actor_id)
            .await?
            .ok_or_else(|| TrackerError::curator_not_found(actor_id))?;
        Ok((curator, true))
    }

    /// Stop all reminder loops
    pub fn shutdown(&self) {
        let cancelled = self.scheduler.cancel_all();
        if cancelled > 0 {
            info!("Cancelled {} reminder loops", cancelled);
        }
    }
}

fn activity_content(event: &InboundEvent, kind: ActivityType) -> String {
    match (&event.emoji, event.content.as_deref()) {
        (Some(emoji), _) if kind != ActivityType::Message => format!("Reacted with {}", emoji),
        (_, Some(content)) => content.to_string(),
        _ => String::new(),
    }
}

pub type SharedActivityTracker = Arc<ActivityTracker>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managers::reminder_scheduler::tests::{FixedPolicy, RecordingNotifier};
    use crate::managers::reminder_scheduler::ReminderState;
    use crate::models::RatingLevel;
    use crate::state::{EntityStore, JsonEntityStore, RecordScope};
    use chrono::{DateTime, Duration, Utc};

    struct Fixture {
        tracker: ActivityTracker,
        store: Arc<JsonEntityStore>,
        notifier: Arc<RecordingNotifier>,
    }

    async fn fixture(role: Option<&str>, policy: FixedPolicy) -> Fixture {
        let store = Arc::new(JsonEntityStore::in_memory());
        let mut server = DiscordServer::new("1", "Guild", Utc::now());
        server.notification_role_id = role.map(|r| r.to_string());
        store.upsert_server(server).await.unwrap();

        let notifier = Arc::new(RecordingNotifier::default());
        let tracker = ActivityTracker::with_policy_source(
            store.clone(),
            Arc::new(TrackerConfig::default()),
            notifier.clone(),
            Arc::new(policy),
        );
        Fixture {
            tracker,
            store,
            notifier,
        }
    }

    fn slow_policy() -> FixedPolicy {
        FixedPolicy::every(std::time::Duration::from_secs(300), true)
    }

    fn post(actor: &str, message_id: &str, content: &str, at: DateTime<Utc>) -> InboundEvent {
        InboundEvent {
            kind: EventKind::Post,
            actor_id: actor.to_string(),
            actor_name: format!("user{}", actor),
            actor_is_bot: false,
            server_id: "1".to_string(),
            channel_id: "2".to_string(),
            message_id: message_id.to_string(),
            content: Some(content.to_string()),
            reply_to: None,
            emoji: None,
            occurred_at: at,
        }
    }

    fn reply(actor: &str, message_id: &str, parent: &str, at: DateTime<Utc>) -> InboundEvent {
        let mut event = post(actor, message_id, "I can take this", at);
        event.reply_to = Some(parent.to_string());
        event
    }

    fn reaction(actor: &str, target: &str, emoji: &str, at: DateTime<Utc>) -> InboundEvent {
        let mut event = post(actor, target, "", at);
        event.kind = EventKind::ReactionAdd;
        event.content = None;
        event.emoji = Some(emoji.to_string());
        event
    }

    async fn activities_of(store: &JsonEntityStore, actor: &str) -> Vec<Activity> {
        store
            .query_activities(
                &RecordScope::Actor(actor.to_string()),
                Utc::now() - Duration::days(30),
                None,
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_help_request_then_reply() {
        let f = fixture(Some("42"), slow_policy()).await;
        let t0 = Utc::now() - Duration::seconds(150);

        let outcome = f
            .tracker
            .process_event(post("100", "900", "need curator help", t0))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            EventOutcome::HelpRequestOpened { reminders_armed: true, .. }
        ));
        assert!(f.tracker.registry().contains("900"));
        assert!(f.tracker.scheduler().is_armed("900"));

        let outcome = f
            .tracker
            .process_event(reply("200", "901", "900", t0 + Duration::seconds(150)))
            .await
            .unwrap();

        let EventOutcome::ResponseMatched { response, rating } = outcome else {
            panic!("expected a matched response, got {:?}", outcome);
        };
        assert_eq!(response.response_time_seconds, 150);
        assert_eq!(response.trigger_keywords, "curator,help");
        assert!(!f.tracker.registry().contains("900"));
        assert!(!f.tracker.scheduler().is_armed("900"));

        // Reply points, no generic message activity
        let activities = activities_of(&f.store, "200").await;
        assert_eq!(activities.len(), 1);
        assert_eq!(activities[0].kind, ActivityType::Reply);
        assert_eq!(rating.base_points, 2);

        let curator = f.store.find_curator("200").await.unwrap().unwrap();
        assert_eq!(curator.origin, CuratorOrigin::AutoProvisioned);
        assert_eq!(curator.total_points, rating.total_points);
    }

    #[tokio::test]
    async fn test_no_role_means_no_reminders() {
        let f = fixture(None, slow_policy()).await;
        let outcome = f
            .tracker
            .process_event(post("100", "900", "help!", Utc::now()))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            EventOutcome::HelpRequestOpened { reminders_armed: false, .. }
        ));
        assert!(f.tracker.registry().contains("900"));
        assert_eq!(f.tracker.scheduler().active_count(), 0);
    }

    #[tokio::test]
    async fn test_role_mention_opens_request() {
        let f = fixture(Some("42"), slow_policy()).await;
        f.tracker
            .process_event(post("100", "900", "<@&42> anyone?", Utc::now()))
            .await
            .unwrap();
        let request = f.tracker.registry().lookup("900").unwrap();
        assert_eq!(request.trigger_keywords, vec!["@role".to_string()]);
        f.tracker.shutdown();
    }

    #[tokio::test]
    async fn test_reaction_response_from_unknown_actor() {
        let f = fixture(None, slow_policy()).await;
        let t0 = Utc::now();
        f.tracker
            .process_event(post("100", "900", "help", t0))
            .await
            .unwrap();

        let outcome = f
            .tracker
            .process_event(reaction("300", "900", "👀", t0 + Duration::seconds(20)))
            .await
            .unwrap();
        let EventOutcome::ResponseMatched { response, .. } = outcome else {
            panic!("expected a matched response, got {:?}", outcome);
        };
        assert_eq!(response.response_message_id, "reaction_👀");

        assert!(f.store.find_curator("300").await.unwrap().is_some());
        let activities = activities_of(&f.store, "300").await;
        assert_eq!(activities.len(), 1);
        assert_eq!(activities[0].kind, ActivityType::Reply);
        assert!(!activities.iter().any(|a| a.kind == ActivityType::Reaction));
    }

    #[tokio::test]
    async fn test_duplicate_replies_credit_once() {
        let f = Arc::new(fixture(None, slow_policy()).await);
        let t0 = Utc::now();
        f.tracker
            .process_event(post("100", "900", "help", t0))
            .await
            .unwrap();

        let a = {
            let f = f.clone();
            tokio::spawn(async move {
                f.tracker
                    .process_event(reply("200", "901", "900", Utc::now()))
                    .await
                    .unwrap()
            })
        };
        let b = {
            let f = f.clone();
            tokio::spawn(async move {
                f.tracker
                    .process_event(reply("200", "901", "900", Utc::now()))
                    .await
                    .unwrap()
            })
        };
        let outcomes = [a.await.unwrap(), b.await.unwrap()];

        let matched = outcomes
            .iter()
            .filter(|o| matches!(o, EventOutcome::ResponseMatched { .. }))
            .count();
        assert_eq!(matched, 1);
        assert_eq!(f.store.response_count(), 1);

        // The loser falls back to a plain message
        let kinds: Vec<ActivityType> = activities_of(&f.store, "200")
            .await
            .into_iter()
            .map(|a| a.kind)
            .collect();
        assert!(kinds.contains(&ActivityType::Reply));
        assert!(kinds.contains(&ActivityType::Message));
    }

    #[tokio::test]
    async fn test_delete_closes_request() {
        let f = fixture(Some("42"), slow_policy()).await;
        f.tracker
            .process_event(post("100", "900", "help", Utc::now()))
            .await
            .unwrap();

        let mut delete = post("100", "900", "", Utc::now());
        delete.kind = EventKind::Delete;
        delete.content = None;
        let outcome = f.tracker.process_event(delete).await.unwrap();

        assert!(matches!(outcome, EventOutcome::PendingRemoved { .. }));
        assert!(f.tracker.registry().is_empty());
        assert!(!f.tracker.scheduler().is_armed("900"));
    }

    #[tokio::test]
    async fn test_ordinary_activity_and_untracked_server() {
        let f = fixture(None, slow_policy()).await;

        let outcome = f
            .tracker
            .process_event(post("100", "1", "good morning", Utc::now()))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            EventOutcome::Recorded { kind: ActivityType::Message, points: 3 }
        ));

        let outcome = f
            .tracker
            .process_event(reaction("100", "1", "👍", Utc::now()))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            EventOutcome::Recorded { kind: ActivityType::Reaction, points: 1 }
        ));

        let mut elsewhere = post("100", "2", "hello", Utc::now());
        elsewhere.server_id = "999".to_string();
        assert!(matches!(
            f.tracker.process_event(elsewhere).await.unwrap(),
            EventOutcome::Ignored
        ));

        let mut bot = post("555", "3", "help", Utc::now());
        bot.actor_is_bot = true;
        assert!(matches!(
            f.tracker.process_event(bot).await.unwrap(),
            EventOutcome::Ignored
        ));
        assert!(f.store.find_curator("555").await.unwrap().is_none());

        let curator = f.store.find_curator("100").await.unwrap().unwrap();
        assert_eq!(curator.total_points, 4);
        assert_eq!(curator.rating_level, RatingLevel::Terrible);
    }

    #[tokio::test]
    async fn test_unanswered_request_gets_reminders() {
        let f = fixture(
            Some("42"),
            FixedPolicy::every(std::time::Duration::from_millis(20), true),
        )
        .await;
        f.tracker
            .process_event(post("100", "900", "help", Utc::now()))
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(90)).await;
        assert!(f.notifier.sent.lock().len() >= 2);
        assert!(matches!(
            f.tracker.scheduler().state("900"),
            Some(ReminderState::Reminding { .. })
        ));

        f.tracker
            .process_event(reply("200", "901", "900", Utc::now()))
            .await
            .unwrap();
        let sent = f.notifier.sent.lock().len();
        tokio::time::sleep(std::time::Duration::from_millis(60)).await;
        assert_eq!(f.notifier.sent.lock().len(), sent);
    }

    #[tokio::test]
    async fn test_delete_after_server_deactivated() {
        let f = fixture(Some("42"), slow_policy()).await;
        f.tracker
            .process_event(post("100", "900", "help", Utc::now()))
            .await
            .unwrap();

        let mut server = f.store.find_server("1").await.unwrap().unwrap();
        server.is_active = false;
        f.store.upsert_server(server).await.unwrap();

        let mut delete = post("100", "900", "", Utc::now());
        delete.kind = EventKind::Delete;
        delete.content = None;
        let outcome = f.tracker.process_event(delete).await.unwrap();

        assert!(matches!(outcome, EventOutcome::PendingRemoved { .. }));
        assert!(f.tracker.registry().is_empty());
        assert!(!f.tracker.scheduler().is_armed("900"));
    }

    #[tokio::test]
    async fn test_enroll_curator_is_administrative() {
        let f = fixture(None, slow_policy()).await;

        let (curator, created) = f.tracker.enroll_curator("700", "Dana").await.unwrap();
        assert!(created);
        assert_eq!(curator.origin, CuratorOrigin::Administrative);
        assert_eq!(curator.rating_level, RatingLevel::Terrible);

        f.tracker
            .process_event(post("700", "1", "good morning", Utc::now()))
            .await
            .unwrap();
        let (again, created) = f.tracker.enroll_curator("700", "Renamed").await.unwrap();
        assert!(!created);
        assert_eq!(again.name, "Dana");
        assert_eq!(again.origin, CuratorOrigin::Administrative);
        assert_eq!(again.total_points, 3);
    }

    #[tokio::test]
    async fn test_unwritable_state_keeps_response_whole() {
        let dir = std::env::temp_dir().join(format!("curator-missing-{}", uuid::Uuid::new_v4()));
        let path = dir.join("state.json");
        let store = Arc::new(JsonEntityStore::load(path.to_str().unwrap()).await.unwrap());
        store
            .upsert_server(DiscordServer::new("1", "Guild", Utc::now()))
            .await
            .unwrap();

        let tracker = ActivityTracker::with_policy_source(
            store.clone(),
            Arc::new(TrackerConfig::default()),
            Arc::new(RecordingNotifier::default()),
            Arc::new(slow_policy()),
        );
        let t0 = Utc::now() - Duration::seconds(30);
        tracker
            .process_event(post("100", "900", "help", t0))
            .await
            .unwrap();
        let outcome = tracker
            .process_event(reply("200", "901", "900", t0 + Duration::seconds(30)))
            .await
            .unwrap();
        let EventOutcome::ResponseMatched { rating, .. } = outcome else {
            panic!("expected a matched response, got {:?}", outcome);
        };

        // Every piece of the response is recorded even though nothing can be saved
        assert_eq!(store.response_count(), 1);
        let activities = activities_of(&store, "200").await;
        assert_eq!(activities.len(), 1);
        assert_eq!(activities[0].kind, ActivityType::Reply);
        let curator = store.find_curator("200").await.unwrap().unwrap();
        assert_eq!(curator.total_points, rating.total_points);

        assert!(store.flush().await.is_err());
        assert!(store.is_dirty());
    }
}
