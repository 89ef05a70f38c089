use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use dotenv::dotenv;
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Discord bot tracking curator activity, help-request response times and ratings
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Force re-sync of slash commands to all guilds (use when commands aren't showing up)
    #[arg(long, short = 's')]
    sync_commands: bool,

    /// Register commands per-guild instead of globally (faster for testing)
    #[arg(long)]
    guild_commands: bool,

    /// Specific guild ID to sync commands to (for testing)
    #[arg(long)]
    guild_id: Option<u64>,

    /// Tracker config file (defaults to $DATA_PATH/tracker.json)
    #[arg(long)]
    config: Option<String>,
}

mod commands;
mod config;
mod error;
mod events;
mod logging;
mod managers;
mod models;
mod notifier;
mod scheduler;
mod state;
mod web;

use commands::{
    add_curator, help, pending, ping, rating, reminders, status, top, track_server,
};
use config::TrackerConfig;
use events::{
    handle_message, handle_message_delete, handle_message_update, handle_reaction_add,
    handle_reaction_remove,
};
use managers::{spawn_sweeper, ActivityTracker, SharedActivityTracker};
use notifier::DiscordNotifier;
use state::{spawn_flusher, JsonEntityStore};

type Error = Box<dyn std::error::Error + Send + Sync>;
type Context<'a> = poise::Context<'a, Data, Error>;

/// Shared application state
pub struct Data {
    pub tracker: SharedActivityTracker,
    pub started_at: DateTime<Utc>,
}

async fn event_handler(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    match event {
        serenity::FullEvent::Message { new_message } => {
            if let Err(e) = handle_message(ctx, new_message, data).await {
                error!("Failed to handle message: {}", e);
            }
        }
        serenity::FullEvent::MessageUpdate { event, .. } => {
            if let Err(e) = handle_message_update(ctx, event, data).await {
                error!("Failed to handle message edit: {}", e);
            }
        }
        serenity::FullEvent::MessageDelete {
            channel_id,
            deleted_message_id,
            guild_id,
        } => {
            if let Err(e) =
                handle_message_delete(*channel_id, *deleted_message_id, *guild_id, data).await
            {
                error!("Failed to handle message delete: {}", e);
            }
        }
        serenity::FullEvent::ReactionAdd { add_reaction } => {
            if let Err(e) = handle_reaction_add(ctx, add_reaction, data).await {
                error!("Failed to handle reaction: {}", e);
            }
        }
        serenity::FullEvent::ReactionRemove { removed_reaction } => {
            if let Err(e) = handle_reaction_remove(ctx, removed_reaction, data).await {
                error!("Failed to handle reaction removal: {}", e);
            }
        }
        _ => {}
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let args = Args::parse();

    // Recent log history for the JSON API
    let log_buffer = logging::create_log_buffer(1000);

    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true),
        )
        .with(tracing_subscriber::filter::LevelFilter::INFO)
        .with(logging::LogCaptureLayer::new(log_buffer.clone()))
        .init();

    let token = std::env::var("DISCORD_TOKEN").context("Missing DISCORD_TOKEN environment variable")?;

    // Extract bot/application ID from token (first part before the dot, base64 encoded)
    if let Some(bot_id_b64) = token.split('.').next() {
        use base64::Engine;
        let decoded = base64::engine::general_purpose::STANDARD_NO_PAD
            .decode(bot_id_b64)
            .or_else(|_| base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(bot_id_b64));
        if let Some(id_str) = decoded.ok().and_then(|d| String::from_utf8(d).ok()) {
            info!("Bot ID: {} (configure intents at https://discord.com/developers/applications/{}/bot)", id_str, id_str);
        }
    }

    let data_path = std::env::var("DATA_PATH").unwrap_or_else(|_| "data".to_string());
    let state_path = std::env::var("STATE_PATH").unwrap_or_else(|_| "state".to_string());

    tokio::fs::create_dir_all(&state_path).await.ok();

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| format!("{}/tracker.json", data_path));
    info!("Loading tracker config from {}...", config_path);
    let tracker_config = Arc::new(TrackerConfig::load_from_file(&config_path)?);

    let store_path = format!("{}/tracker_state.json", state_path);
    info!("Loading tracker state from {}...", store_path);
    let store = Arc::new(
        JsonEntityStore::load(&store_path)
            .await
            .with_context(|| format!("Could not load tracker state from {}", store_path))?
            .with_retention_days(tracker_config.retention_days),
    );

    // Reminders go out over REST, independent of the gateway session
    let http = Arc::new(serenity::Http::new(&token));
    let tracker: SharedActivityTracker = Arc::new(ActivityTracker::new(
        store.clone(),
        tracker_config,
        Arc::new(DiscordNotifier::new(http)),
    ));

    // Background jobs
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let sweeper = spawn_sweeper(tracker.registry().clone(), shutdown_rx.clone());
    let rating_batch =
        scheduler::spawn_rating_batch(tracker.ratings().clone(), shutdown_rx.clone());
    let flusher = spawn_flusher(store, shutdown_rx);

    if let Some(api_config) = web::ApiServerConfig::from_env() {
        let api_state = web::ApiState {
            tracker: tracker.clone(),
            log_buffer: log_buffer.clone(),
        };
        tokio::spawn(async move {
            if let Err(e) = web::start_api_server(api_config, api_state).await {
                error!("JSON API error: {}", e);
            }
        });
    } else {
        info!("JSON API disabled: API_PORT not set");
    }

    let sync_commands = args.sync_commands;
    let guild_commands = args.guild_commands;
    let target_guild_id = args.guild_id;

    if sync_commands {
        info!("--sync-commands: Will force re-register slash commands");
    }
    if guild_commands {
        info!("--guild-commands: Will register commands per-guild (faster for testing)");
    } else {
        info!("Registering commands globally by default (takes up to 1 hour to propagate)");
    }
    if let Some(gid) = target_guild_id {
        info!("--guild-id: Targeting specific guild {}", gid);
    }

    let framework_tracker = tracker.clone();
    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![
                ping(),
                help(),
                status(),
                rating(),
                top(),
                pending(),
                track_server(),
                reminders(),
                add_curator(),
            ],
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handler(ctx, event, framework, data))
            },
            pre_command: |ctx| {
                Box::pin(async move {
                    info!(
                        "Command '{}' invoked by {} (ID: {}) in {}",
                        ctx.command().qualified_name,
                        ctx.author().name,
                        ctx.author().id,
                        ctx.guild_id().map(|g| g.to_string()).unwrap_or_else(|| "DM".to_string())
                    );
                })
            },
            on_error: |error| {
                Box::pin(async move {
                    match error {
                        poise::FrameworkError::Command { error, ctx, .. } => {
                            error!("Error in command '{}': {}", ctx.command().qualified_name, error);
                            let _ = ctx.say(format!("An error occurred: {}", error)).await;
                        }
                        poise::FrameworkError::ArgumentParse { error, input, ctx, .. } => {
                            error!("Argument parse error in '{}': {} (input: {:?})", ctx.command().qualified_name, error, input);
                        }
                        poise::FrameworkError::MissingUserPermissions { missing_permissions, ctx, .. } => {
                            error!("User {} missing permissions for '{}': {:?}", ctx.author().name, ctx.command().qualified_name, missing_permissions);
                        }
                        poise::FrameworkError::GuildOnly { ctx, .. } => {
                            error!("Command '{}' is guild-only, used in DM by {}", ctx.command().qualified_name, ctx.author().name);
                        }
                        other => {
                            error!("Other framework error: {}", other);
                        }
                    }
                })
            },
            ..Default::default()
        })
        .setup(move |ctx, ready, framework| {
            let tracker = framework_tracker.clone();

            Box::pin(async move {
                info!("Bot logged in as: {}", ready.user.name);
                if ready.guilds.is_empty() {
                    warn!("Bot is not in any guilds yet");
                }

                let guilds_to_register: Vec<serenity::GuildId> = if let Some(gid) = target_guild_id {
                    vec![serenity::GuildId::new(gid)]
                } else {
                    ready.guilds.iter().map(|g| g.id).collect()
                };

                if guild_commands || sync_commands {
                    for guild_id in &guilds_to_register {
                        info!("Registering commands to guild: {}", guild_id);
                        if let Err(e) = poise::builtins::register_in_guild(
                            ctx,
                            &framework.options().commands,
                            *guild_id,
                        ).await {
                            error!("Failed to register commands for guild {}: {}", guild_id, e);
                        } else {
                            info!("Successfully registered {} commands for guild {}",
                                  framework.options().commands.len(), guild_id);
                        }
                    }
                } else {
                    info!("Registering commands globally...");
                    if let Err(e) = poise::builtins::register_globally(
                        ctx,
                        &framework.options().commands,
                    ).await {
                        error!("Failed to register commands globally: {}", e);
                    } else {
                        info!("Successfully registered {} commands globally (may take up to 1 hour to propagate)",
                              framework.options().commands.len());
                    }
                }

                Ok(Data {
                    tracker,
                    started_at: Utc::now(),
                })
            })
        })
        .build();

    // Reactions are non-privileged; message text needs MESSAGE_CONTENT
    let intents = serenity::GatewayIntents::non_privileged()
        | serenity::GatewayIntents::MESSAGE_CONTENT;

    let mut client = serenity::ClientBuilder::new(&token, intents)
        .framework(framework)
        .await?;

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            shard_manager.shutdown_all().await;
        }
    });

    info!("Starting bot...");
    let result = client.start().await;

    let _ = shutdown_tx.send(true);
    tracker.shutdown();
    let _ = tokio::join!(sweeper, rating_batch, flusher);

    if let Err(e) = result {
        let err_str = e.to_string();
        if err_str.contains("Disallowed") || err_str.contains("intents") {
            error!("Failed to start bot: {}", e);
            error!("Enable the MESSAGE_CONTENT privileged intent in the Discord Developer Portal:");
            error!("Go to https://discord.com/developers/applications -> Your App -> Bot -> Privileged Gateway Intents");
            return Err(anyhow::anyhow!(
                "Disallowed gateway intents. Enable MESSAGE_CONTENT in the Discord Developer Portal"
            ));
        }
        return Err(e.into());
    }
    warn!("Bot ended.");

    Ok(())
}
