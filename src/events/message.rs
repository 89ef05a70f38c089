use chrono::Utc;
use poise::serenity_prelude as serenity;

use crate::managers::{EventKind, InboundEvent};
use crate::{Data, Error};

/// A new guild message
pub async fn handle_message(
    _ctx: &serenity::Context,
    msg: &serenity::Message,
    data: &Data,
) -> Result<(), Error> {
    // DMs are never tracked
    let Some(guild_id) = msg.guild_id else {
        return Ok(());
    };

    let event = InboundEvent {
        kind: EventKind::Post,
        actor_id: msg.author.id.to_string(),
        actor_name: display_name(&msg.author),
        actor_is_bot: msg.author.bot,
        server_id: guild_id.to_string(),
        channel_id: msg.channel_id.to_string(),
        message_id: msg.id.to_string(),
        content: Some(msg.content.clone()),
        reply_to: msg
            .message_reference
            .as_ref()
            .and_then(|r| r.message_id)
            .map(|id| id.to_string()),
        emoji: None,
        occurred_at: Utc::now(),
    };

    data.tracker.handle_event(event).await;
    Ok(())
}

pub async fn handle_message_update(
    _ctx: &serenity::Context,
    update: &serenity::MessageUpdateEvent,
    data: &Data,
) -> Result<(), Error> {
    let Some(guild_id) = update.guild_id else {
        return Ok(());
    };

    let (actor_id, actor_name, actor_is_bot) = match &update.author {
        Some(author) => (author.id.to_string(), display_name(author), author.bot),
        None => (String::new(), String::new(), false),
    };

    data.tracker
        .handle_event(InboundEvent {
            kind: EventKind::Edit,
            actor_id,
            actor_name,
            actor_is_bot,
            server_id: guild_id.to_string(),
            channel_id: update.channel_id.to_string(),
            message_id: update.id.to_string(),
            content: update.content.clone(),
            reply_to: None,
            emoji: None,
            occurred_at: Utc::now(),
        })
        .await;
    Ok(())
}

/// Deletion closes the help request the message opened, if any
pub async fn handle_message_delete(
    channel_id: serenity::ChannelId,
    message_id: serenity::MessageId,
    guild_id: Option<serenity::GuildId>,
    data: &Data,
) -> Result<(), Error> {
    let Some(guild_id) = guild_id else {
        return Ok(());
    };

    data.tracker
        .handle_event(InboundEvent {
            kind: EventKind::Delete,
            actor_id: String::new(),
            actor_name: String::new(),
            actor_is_bot: false,
            server_id: guild_id.to_string(),
            channel_id: channel_id.to_string(),
            message_id: message_id.to_string(),
            content: None,
            reply_to: None,
            emoji: None,
            occurred_at: Utc::now(),
        })
        .await;
    Ok(())
}

pub(crate) fn display_name(user: &serenity::User) -> String {
    user.global_name.clone().unwrap_or_else(|| user.name.clone())
}
