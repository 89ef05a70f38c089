use chrono::{DateTime, Utc};

use crate::models::ActivityType;

/// Kind of gateway event after normalisation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Post,
    Edit,
    Delete,
    ReactionAdd,
    ReactionRemove,
}

/// A Discord event reduced to the fields the tracker needs
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub kind: EventKind,
    pub actor_id: String,
    pub actor_name: String,
    pub actor_is_bot: bool,
    pub server_id: String,
    pub channel_id: String,
    /// The posted message, or for reactions the message reacted to
    pub message_id: String,
    pub content: Option<String>,
    /// Parent message when the post is a reply
    pub reply_to: Option<String>,
    pub emoji: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// How a response candidate reached the help request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseVia {
    Reply,
    Reaction { emoji: String },
}

/// Result of classifying an inbound event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Bot actor, empty post, or otherwise nothing to do
    Ignored,
    /// Ordinary scored activity. `help_keywords` is set when the post opens a help request.
    Activity {
        kind: ActivityType,
        help_keywords: Option<Vec<String>>,
    },
    /// Reply or reaction aimed at an open help request
    ResponseCandidate {
        original_message_id: String,
        via: ResponseVia,
        help_keywords: Option<Vec<String>>,
    },
    /// A deleted message; drop any pending entry it owns
    Deleted { message_id: String },
    /// Edits and reaction removals never score
    Unscored,
}

/// Marker recorded when a help request was raised by pinging the role
pub const ROLE_MENTION_TRIGGER: &str = "@role";

/// Classifies normalised events. Holds only configuration; pending state is
/// passed in per call so classification stays side-effect free.
#[derive(Debug, Clone)]
pub struct EventClassifier {
    keywords: Vec<String>,
}

impl EventClassifier {
    /// `keywords` are expected lowercase
    pub fn new(keywords: Vec<String>) -> Self {
        Self { keywords }
    }

    /// Classify `event`. `role_mention` is the server's `<@&id>` string if a
    /// notification role is configured; `is_pending` reports whether a message
    /// id is currently an open help request.
    pub fn classify(
        &self,
        event: &InboundEvent,
        role_mention: Option<&str>,
        is_pending: impl Fn(&str) -> bool,
    ) -> Classification {
        if event.actor_is_bot {
            return Classification::Ignored;
        }

        match event.kind {
            EventKind::Delete => Classification::Deleted {
                message_id: event.message_id.clone(),
            },
            EventKind::Edit | EventKind::ReactionRemove => Classification::Unscored,
            EventKind::ReactionAdd => {
                let emoji = event.emoji.clone().unwrap_or_default();
                if is_pending(&event.message_id) {
                    Classification::ResponseCandidate {
                        original_message_id: event.message_id.clone(),
                        via: ResponseVia::Reaction { emoji },
                        help_keywords: None,
                    }
                } else {
                    Classification::Activity {
                        kind: ActivityType::Reaction,
                        help_keywords: None,
                    }
                }
            }
            EventKind::Post => {
                let content = event.content.as_deref().unwrap_or("");
                let help_keywords = self.help_triggers(content, role_mention);

                if let Some(parent) = event.reply_to.as_deref() {
                    if is_pending(parent) {
                        return Classification::ResponseCandidate {
                            original_message_id: parent.to_string(),
                            via: ResponseVia::Reply,
                            help_keywords,
                        };
                    }
                }

                if content.trim().is_empty() {
                    // Attachment-only posts and the like
                    return Classification::Ignored;
                }

                Classification::Activity {
                    kind: ActivityType::Message,
                    help_keywords,
                }
            }
        }
    }

    /// Keywords found in `content`, in configured order, plus the role marker
    /// when the role is mentioned. `None` if the post is not a help request.
    pub fn help_triggers(&self, content: &str, role_mention: Option<&str>) -> Option<Vec<String>> {
        if content.trim().is_empty() {
            return None;
        }

        let lowered = content.to_lowercase();
        let mut matched: Vec<String> = self
            .keywords
            .iter()
            .filter(|k| lowered.contains(k.as_str()))
            .cloned()
            .collect();

        if let Some(mention) = role_mention {
            if content.contains(mention) {
                matched.push(ROLE_MENTION_TRIGGER.to_string());
            }
        }

        if matched.is_empty() {
            None
        } else {
            Some(matched)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> EventClassifier {
        EventClassifier::new(vec![
            "curator".to_string(),
            "help".to_string(),
            "куратор".to_string(),
            "помощь".to_string(),
        ])
    }

    fn post(content: &str) -> InboundEvent {
        InboundEvent {
            kind: EventKind::Post,
            actor_id: "100".to_string(),
            actor_name: "alice".to_string(),
            actor_is_bot: false,
            server_id: "1".to_string(),
            channel_id: "2".to_string(),
            message_id: "500".to_string(),
            content: Some(content.to_string()),
            reply_to: None,
            emoji: None,
            occurred_at: Utc::now(),
        }
    }

    fn nothing_pending(_: &str) -> bool {
        false
    }

    #[test]
    fn test_bot_events_are_ignored() {
        let mut event = post("need help");
        event.actor_is_bot = true;
        assert_eq!(
            classifier().classify(&event, None, nothing_pending),
            Classification::Ignored
        );
    }

    #[test]
    fn test_keyword_post_is_help_request() {
        let result = classifier().classify(&post("Need CURATOR help please"), None, nothing_pending);
        assert_eq!(
            result,
            Classification::Activity {
                kind: ActivityType::Message,
                help_keywords: Some(vec!["curator".to_string(), "help".to_string()]),
            }
        );
    }

    #[test]
    fn test_localized_keyword() {
        let result = classifier().classify(&post("Нужна помощь"), None, nothing_pending);
        assert!(matches!(
            result,
            Classification::Activity { help_keywords: Some(ref k), .. } if k == &vec!["помощь".to_string()]
        ));
    }

    #[test]
    fn test_role_mention_is_help_request() {
        let result = classifier().classify(&post("<@&42> anyone around?"), Some("<@&42>"), nothing_pending);
        assert_eq!(
            result,
            Classification::Activity {
                kind: ActivityType::Message,
                help_keywords: Some(vec![ROLE_MENTION_TRIGGER.to_string()]),
            }
        );

        // Another role does not count
        let result = classifier().classify(&post("<@&43> anyone?"), Some("<@&42>"), nothing_pending);
        assert_eq!(
            result,
            Classification::Activity {
                kind: ActivityType::Message,
                help_keywords: None,
            }
        );
    }

    #[test]
    fn test_reply_to_pending_is_response_candidate() {
        let mut event = post("on it");
        event.reply_to = Some("900".to_string());

        let result = classifier().classify(&event, None, |id| id == "900");
        assert_eq!(
            result,
            Classification::ResponseCandidate {
                original_message_id: "900".to_string(),
                via: ResponseVia::Reply,
                help_keywords: None,
            }
        );

        // Reply to something that is not pending is an ordinary message
        let result = classifier().classify(&event, None, nothing_pending);
        assert!(matches!(
            result,
            Classification::Activity { kind: ActivityType::Message, .. }
        ));
    }

    #[test]
    fn test_reaction_on_pending_is_response_not_reaction() {
        let mut event = post("");
        event.kind = EventKind::ReactionAdd;
        event.content = None;
        event.emoji = Some("👍".to_string());

        let result = classifier().classify(&event, None, |id| id == "500");
        assert_eq!(
            result,
            Classification::ResponseCandidate {
                original_message_id: "500".to_string(),
                via: ResponseVia::Reaction { emoji: "👍".to_string() },
                help_keywords: None,
            }
        );

        let result = classifier().classify(&event, None, nothing_pending);
        assert_eq!(
            result,
            Classification::Activity {
                kind: ActivityType::Reaction,
                help_keywords: None,
            }
        );
    }

    #[test]
    fn test_non_scoring_kinds() {
        let c = classifier();
        let mut event = post("help");

        event.kind = EventKind::Edit;
        assert_eq!(c.classify(&event, None, nothing_pending), Classification::Unscored);

        event.kind = EventKind::ReactionRemove;
        assert_eq!(c.classify(&event, None, nothing_pending), Classification::Unscored);

        event.kind = EventKind::Delete;
        assert_eq!(
            c.classify(&event, None, nothing_pending),
            Classification::Deleted { message_id: "500".to_string() }
        );
    }

    #[test]
    fn test_empty_post_is_ignored() {
        assert_eq!(
            classifier().classify(&post("   "), None, nothing_pending),
            Classification::Ignored
        );
    }
}
