use chrono::Utc;
use poise::serenity_prelude as serenity;
use tracing::debug;

use super::message::display_name;
use crate::managers::{EventKind, InboundEvent};
use crate::{Data, Error};

pub async fn handle_reaction_add(
    ctx: &serenity::Context,
    reaction: &serenity::Reaction,
    data: &Data,
) -> Result<(), Error> {
    let Some(guild_id) = reaction.guild_id else {
        return Ok(());
    };

    // Guild reactions carry the member; fall back to fetching the user
    let user = match &reaction.member {
        Some(member) => member.user.clone(),
        None => reaction.user(ctx).await?,
    };

    data.tracker
        .handle_event(reaction_event(
            EventKind::ReactionAdd,
            reaction,
            guild_id,
            user.id.to_string(),
            display_name(&user),
            user.bot,
        ))
        .await;
    Ok(())
}

pub async fn handle_reaction_remove(
    _ctx: &serenity::Context,
    reaction: &serenity::Reaction,
    data: &Data,
) -> Result<(), Error> {
    let (Some(guild_id), Some(user_id)) = (reaction.guild_id, reaction.user_id) else {
        debug!("Reaction removal without guild or user, skipping");
        return Ok(());
    };

    data.tracker
        .handle_event(reaction_event(
            EventKind::ReactionRemove,
            reaction,
            guild_id,
            user_id.to_string(),
            String::new(),
            false,
        ))
        .await;
    Ok(())
}

fn reaction_event(
    kind: EventKind,
    reaction: &serenity::Reaction,
    guild_id: serenity::GuildId,
    actor_id: String,
    actor_name: String,
    actor_is_bot: bool,
) -> InboundEvent {
    InboundEvent {
        kind,
        actor_id,
        actor_name,
        actor_is_bot,
        server_id: guild_id.to_string(),
        channel_id: reaction.channel_id.to_string(),
        message_id: reaction.message_id.to_string(),
        content: None,
        reply_to: None,
        emoji: Some(reaction.emoji.to_string()),
        occurred_at: Utc::now(),
    }
}
