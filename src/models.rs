// src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Maximum number of characters of message content kept on an activity
pub const MAX_CONTENT_CHARS: usize = 500;

/// Fallback reminder interval when a server has none configured
pub const DEFAULT_REMINDER_INTERVAL_SECS: i64 = 300;

/// Qualitative rating band, ordered from lowest to highest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatingLevel {
    Terrible,
    Poor,
    Normal,
    Good,
    Excellent,
}

impl RatingLevel {
    /// All levels, highest first
    pub const ALL: [RatingLevel; 5] = [
        RatingLevel::Excellent,
        RatingLevel::Good,
        RatingLevel::Normal,
        RatingLevel::Poor,
        RatingLevel::Terrible,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            RatingLevel::Excellent => "Excellent",
            RatingLevel::Good => "Good",
            RatingLevel::Normal => "Normal",
            RatingLevel::Poor => "Poor",
            RatingLevel::Terrible => "Terrible",
        }
    }
}

impl Default for RatingLevel {
    fn default() -> Self {
        RatingLevel::Terrible
    }
}

impl fmt::Display for RatingLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How a curator record came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CuratorOrigin {
    AutoProvisioned,
    Administrative,
}

/// A tracked moderator/helper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Curator {
    /// Discord user ID (snowflake as string)
    pub actor_id: String,
    pub name: String,
    pub total_points: i64,
    pub rating_level: RatingLevel,
    pub origin: CuratorOrigin,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Curator {
    pub fn new(actor_id: &str, name: &str, origin: CuratorOrigin, now: DateTime<Utc>) -> Self {
        Self {
            actor_id: actor_id.to_string(),
            name: name.to_string(),
            total_points: 0,
            rating_level: RatingLevel::Terrible,
            origin,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A tracked Discord guild
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordServer {
    /// Discord guild ID (snowflake as string)
    pub server_id: String,
    pub name: String,
    #[serde(default = "default_active")]
    pub is_active: bool,

    /// Role pinged for help requests and reminders
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_role_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reminder_interval_seconds: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_reminder_enabled: Option<bool>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

impl DiscordServer {
    pub fn new(server_id: &str, name: &str, now: DateTime<Utc>) -> Self {
        Self {
            server_id: server_id.to_string(),
            name: name.to_string(),
            is_active: true,
            notification_role_id: None,
            reminder_interval_seconds: None,
            auto_reminder_enabled: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Reminder interval in seconds, never below one second
    pub fn reminder_interval_secs(&self) -> u64 {
        let secs = self
            .reminder_interval_seconds
            .unwrap_or(DEFAULT_REMINDER_INTERVAL_SECS);
        secs.max(1) as u64
    }

    pub fn auto_reminder(&self) -> bool {
        self.auto_reminder_enabled.unwrap_or(true)
    }

    /// The `<@&id>` mention for the notification role, if one is set
    pub fn role_mention(&self) -> Option<String> {
        self.notification_role_id
            .as_ref()
            .map(|id| format!("<@&{}>", id))
    }
}

/// Activity type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    Message,
    Reaction,
    Reply,
    TaskVerification,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::Message => "message",
            ActivityType::Reaction => "reaction",
            ActivityType::Reply => "reply",
            ActivityType::TaskVerification => "task_verification",
        }
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of a scored event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub id: Uuid,
    pub actor_id: String,
    pub server_id: String,
    #[serde(rename = "type")]
    pub kind: ActivityType,
    pub content: String,
    pub points: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
}

impl Activity {
    pub fn new(
        actor_id: &str,
        server_id: &str,
        kind: ActivityType,
        content: &str,
        points: u32,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            actor_id: actor_id.to_string(),
            server_id: server_id.to_string(),
            kind,
            content: truncate_content(content),
            points,
            timestamp,
            message_id: None,
            channel_id: None,
        }
    }

    pub fn with_origin(mut self, message_id: &str, channel_id: &str) -> Self {
        self.message_id = Some(message_id.to_string());
        self.channel_id = Some(channel_id.to_string());
        self
    }
}

/// Keep at most `MAX_CONTENT_CHARS` characters
pub fn truncate_content(content: &str) -> String {
    content.chars().take(MAX_CONTENT_CHARS).collect()
}

/// Response speed classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseQuality {
    Good,
    #[default]
    Average,
    Poor,
}

/// Immutable record of a resolved help request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseTracking {
    pub id: Uuid,
    /// The responder
    pub actor_id: String,
    pub server_id: String,
    pub mention_timestamp: DateTime<Utc>,
    pub response_timestamp: DateTime<Utc>,
    pub response_time_seconds: i64,
    #[serde(default)]
    pub quality: ResponseQuality,
    pub mention_message_id: String,
    pub response_message_id: String,
    pub channel_id: String,
    /// Comma-joined, in the order they were matched
    pub trigger_keywords: String,
}

impl ResponseTracking {
    pub fn keywords(&self) -> Vec<&str> {
        self.trigger_keywords
            .split(',')
            .filter(|k| !k.is_empty())
            .collect()
    }
}
