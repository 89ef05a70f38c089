use chrono::Utc;
use poise::serenity_prelude as serenity;
use tracing::info;

use crate::models::DiscordServer;
use crate::state::EntityStore;
use crate::{Context, Error};

/// Track this server and set the role pinged for help requests
#[poise::command(
    slash_command,
    guild_only,
    default_member_permissions = "ADMINISTRATOR"
)]
pub async fn track_server(
    ctx: Context<'_>,
    #[description = "Role to ping about help requests"] role: Option<serenity::Role>,
    #[description = "Whether activity here is tracked (default true)"] active: Option<bool>,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("This command must be used in a guild")?;
    let store = ctx.data().tracker.store();
    let server_id = guild_id.to_string();

    let name = match guild_id.to_partial_guild(ctx.http()).await {
        Ok(guild) => guild.name,
        Err(_) => server_id.clone(),
    };

    let mut server = store
        .find_server(&server_id)
        .await?
        .unwrap_or_else(|| DiscordServer::new(&server_id, &name, Utc::now()));
    server.name = name;
    if let Some(role) = &role {
        server.notification_role_id = Some(role.id.to_string());
    }
    if let Some(active) = active {
        server.is_active = active;
    }

    let role_text = server
        .role_mention()
        .unwrap_or_else(|| "none (reminders disabled)".to_string());
    let is_active = server.is_active;
    store.upsert_server(server).await?;

    info!(
        "Server {} tracking updated by {}: active={}, role={}",
        server_id,
        ctx.author().name,
        is_active,
        role_text
    );

    let embed = serenity::CreateEmbed::new()
        .title("Server Tracking Updated")
        .field("Active", is_active.to_string(), true)
        .field("Notification role", role_text, true)
        .color(0x2ecc71);
    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true)).await?;
    Ok(())
}

/// Configure reminders for unanswered help requests
#[poise::command(
    slash_command,
    guild_only,
    default_member_permissions = "ADMINISTRATOR"
)]
pub async fn reminders(
    ctx: Context<'_>,
    #[description = "Seconds between reminders"]
    #[min = 1]
    interval_seconds: Option<i64>,
    #[description = "Keep reminding until answered (false sends a single reminder)"]
    auto: Option<bool>,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("This command must be used in a guild")?;
    let store = ctx.data().tracker.store();

    let server = store
        .update_server_reminder_policy(&guild_id.to_string(), interval_seconds, auto)
        .await
        .map_err(|e| format!("{}. Run /track_server first.", e))?;

    info!(
        "Reminder policy for {} set by {}: every {}s, auto={}",
        server.server_id,
        ctx.author().name,
        server.reminder_interval_secs(),
        server.auto_reminder()
    );

    let embed = serenity::CreateEmbed::new()
        .title("Reminder Settings")
        .field("Interval", format!("{}s", server.reminder_interval_secs()), true)
        .field("Auto reminder", server.auto_reminder().to_string(), true)
        .description("Applies to open help requests from their next reminder.")
        .color(0x3498db);
    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true)).await?;
    Ok(())
}

/// Enrol a member as a curator before their first tracked activity
#[poise::command(
    slash_command,
    guild_only,
    default_member_permissions = "ADMINISTRATOR"
)]
pub async fn add_curator(
    ctx: Context<'_>,
    #[description = "Member to enrol"] user: serenity::User,
) -> Result<(), Error> {
    if user.bot {
        return Err("Bots cannot be curators".into());
    }

    let name = user.global_name.clone().unwrap_or_else(|| user.name.clone());
    let (curator, created) = ctx
        .data()
        .tracker
        .enroll_curator(&user.id.to_string(), &name)
        .await?;

    info!(
        "add_curator by {}: {} ({}) created={}",
        ctx.author().name,
        curator.name,
        curator.actor_id,
        created
    );

    let (title, color) = if created {
        ("Curator Added", 0x2ecc71)
    } else {
        ("Already a Curator", 0xf1c40f)
    };
    let embed = serenity::CreateEmbed::new()
        .title(title)
        .field("Curator", format!("<@{}>", curator.actor_id), true)
        .field("Points", curator.total_points.to_string(), true)
        .field("Level", curator.rating_level.to_string(), true)
        .color(color);
    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true)).await?;
    Ok(())
}
