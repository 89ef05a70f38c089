use async_trait::async_trait;
use poise::serenity_prelude as serenity;
use std::sync::Arc;

use crate::error::{Result, TrackerError};
use crate::managers::{ReminderNotice, ReminderNotifier};

/// Posts reminders into the help request's channel
pub struct DiscordNotifier {
    http: Arc<serenity::Http>,
}

impl DiscordNotifier {
    pub fn new(http: Arc<serenity::Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ReminderNotifier for DiscordNotifier {
    async fn send_reminder(&self, notice: &ReminderNotice) -> Result<()> {
        let channel_id = notice
            .channel_id
            .parse::<u64>()
            .ok()
            .filter(|id| *id != 0)
            .ok_or_else(|| TrackerError::Notification {
                message: format!("invalid channel id '{}'", notice.channel_id),
            })?;

        serenity::ChannelId::new(channel_id)
            .say(self.http.as_ref(), notice.render())
            .await
            .map_err(|e| TrackerError::Notification {
                message: e.to_string(),
            })?;
        Ok(())
    }
}
