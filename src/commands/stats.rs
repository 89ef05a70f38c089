use chrono::Utc;
use poise::serenity_prelude as serenity;
use tracing::info;

use crate::managers::reminder_scheduler::format_elapsed;
use crate::models::RatingLevel;
use crate::{Context, Error};

fn level_color(level: RatingLevel) -> u32 {
    match level {
        RatingLevel::Excellent => 0x2ecc71,
        RatingLevel::Good => 0x3498db,
        RatingLevel::Normal => 0xf1c40f,
        RatingLevel::Poor => 0xe67e22,
        RatingLevel::Terrible => 0xe74c3c,
    }
}

/// Show a curator's rating
#[poise::command(prefix_command, slash_command, guild_only)]
pub async fn rating(
    ctx: Context<'_>,
    #[description = "Curator to look up (defaults to you)"] user: Option<serenity::User>,
    #[description = "Window in days (default 30)"]
    #[min = 1]
    #[max = 365]
    days: Option<i64>,
) -> Result<(), Error> {
    let user = user.as_ref().unwrap_or_else(|| ctx.author());
    let actor_id = user.id.to_string();
    let ratings = ctx.data().tracker.ratings();
    let days = days.unwrap_or_else(|| ratings.window_days());

    info!("Rating requested for {} ({} days) by {}", user.name, days, ctx.author().name);

    let report = ratings.compute_rating(&actor_id, days).await?;
    let ranking = ratings.ranking(&actor_id).await?;
    let stats = &report.response_stats;

    let mut embed = serenity::CreateEmbed::new()
        .title(format!("Rating: {}", user.name))
        .description(format!("Last {} days", report.window_days))
        .field("Level", report.level.label(), true)
        .field("Points", report.total_points.to_string(), true)
        .field(
            "Base / bonus",
            format!("{} / {:+}", report.base_points, report.response_bonus),
            true,
        )
        .field(
            "Breakdown",
            format!(
                "Messages: {}\nReactions: {}\nReplies: {}\nTask verifications: {}\nActivities: {}",
                report.breakdown.messages,
                report.breakdown.reactions,
                report.breakdown.replies,
                report.breakdown.task_verifications,
                report.breakdown.total_activities
            ),
            false,
        )
        .color(level_color(report.level));

    if stats.total > 0 {
        embed = embed.field(
            "Responses",
            format!(
                "Total: {} (good {}, poor {})\nAverage: {}s, fastest {}s, slowest {}s",
                stats.total,
                stats.good,
                stats.poor,
                stats.average_time,
                stats.fastest.unwrap_or_default(),
                stats.slowest.unwrap_or_default()
            ),
            false,
        );
    }

    if let Some(ranking) = ranking {
        embed = embed.field(
            "Rank",
            format!(
                "#{} of {} (top {}%)",
                ranking.rank, ranking.total_curators, ranking.percentile
            ),
            false,
        );
    }

    let weekly = ratings.weekly_improvement(&actor_id).await?;
    embed = embed.field(
        "This week",
        format!(
            "{} points ({:+} vs last week, {:+}%)",
            weekly.current_week_points, weekly.improvement, weekly.improvement_percentage
        ),
        false,
    );

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Curator leaderboard
#[poise::command(prefix_command, slash_command)]
pub async fn top(
    ctx: Context<'_>,
    #[description = "How many curators to show (default 10)"]
    #[min = 1]
    #[max = 25]
    limit: Option<usize>,
) -> Result<(), Error> {
    let curators = ctx.data().tracker.ratings().top(limit.unwrap_or(10)).await?;

    if curators.is_empty() {
        ctx.say("No curators tracked yet.").await?;
        return Ok(());
    }

    let lines = curators
        .iter()
        .enumerate()
        .map(|(i, c)| {
            format!(
                "**{}.** {} - {} points ({})",
                i + 1,
                c.name,
                c.total_points,
                c.rating_level
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let embed = serenity::CreateEmbed::new()
        .title("Top Curators")
        .description(lines)
        .color(0x9b59b6);

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// List open help requests in this server
#[poise::command(prefix_command, slash_command, guild_only)]
pub async fn pending(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("This command must be used in a guild")?;
    let tracker = &ctx.data().tracker;
    let requests = tracker.registry().list_for_server(&guild_id.to_string());

    if requests.is_empty() {
        ctx.send(poise::CreateReply::default()
            .content("No open help requests.")
            .ephemeral(true))
            .await?;
        return Ok(());
    }

    let now = Utc::now();
    let lines = requests
        .iter()
        .map(|r| {
            let reminders = match tracker.scheduler().state(&r.message_id) {
                Some(state) => format!("{} reminder(s) sent", state.sent()),
                None => "no reminders".to_string(),
            };
            format!(
                "• https://discord.com/channels/{}/{}/{} by <@{}>, open {} ({})",
                r.server_id,
                r.channel_id,
                r.message_id,
                r.author_id,
                format_elapsed(r.age(now).num_seconds()),
                reminders
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let embed = serenity::CreateEmbed::new()
        .title(format!("Open Help Requests ({})", requests.len()))
        .description(lines)
        .color(0xe67e22);

    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true)).await?;
    Ok(())
}
