use chrono::Utc;
use poise::serenity_prelude as serenity;
use tracing::info;

use crate::state::EntityStore;
use crate::{Context, Error};

/// Check if the bot is running
#[poise::command(prefix_command, slash_command)]
pub async fn ping(ctx: Context<'_>) -> Result<(), Error> {
    info!("Ping command called by {}", ctx.author().name);
    ctx.send(poise::CreateReply::default()
        .content("Pong! Tracker is running!")
        .ephemeral(true))
        .await?;
    Ok(())
}

/// Show help information
#[poise::command(prefix_command, slash_command)]
pub async fn help(ctx: Context<'_>) -> Result<(), Error> {
    let embed = serenity::CreateEmbed::new()
        .title("Curator Tracker Commands")
        .description("Available commands:")
        .field("/ping", "Check if the bot is running", false)
        .field("/status", "Tracker status: open help requests, reminders, curators", false)
        .field("/rating [user] [days]", "Show a curator's rating", false)
        .field("/top [limit]", "Curator leaderboard", false)
        .field("/pending", "Open help requests in this server", false)
        .field("/track_server [role] [active]", "Track this server and set the notification role (Admin)", false)
        .field("/reminders [interval_seconds] [auto]", "Configure help-request reminders (Admin)", false)
        .field("/add_curator <user>", "Enrol a member as a curator (Admin)", false)
        .color(0x3498db);

    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true)).await?;
    Ok(())
}

/// Show tracker status
#[poise::command(prefix_command, slash_command)]
pub async fn status(ctx: Context<'_>) -> Result<(), Error> {
    let data = ctx.data();
    let tracker = &data.tracker;

    let curators = tracker.store().list_curators().await?.len();
    let servers = tracker.store().list_servers().await?;
    let active_servers = servers.iter().filter(|s| s.is_active).count();
    let uptime = Utc::now() - data.started_at;

    let embed = serenity::CreateEmbed::new()
        .title("Tracker Status")
        .field("Open help requests", tracker.registry().len().to_string(), true)
        .field("Active reminders", tracker.scheduler().active_count().to_string(), true)
        .field("Curators", curators.to_string(), true)
        .field("Tracked servers", format!("{} ({} active)", servers.len(), active_servers), true)
        .field(
            "Uptime",
            format!("{}h {}m", uptime.num_hours(), uptime.num_minutes() % 60),
            true,
        )
        .color(0x2ecc71);

    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true)).await?;
    Ok(())
}
