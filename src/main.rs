// This is the entry point of the Discord bot.
//
// **Architecture Overview:**
// - `core/` = Business logic (platform-agnostic)
// - `infra/` = Implementations of core traits (databases)
// - `discord/` = Discord-specific adapters (commands, events, delivery)
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Set up the Discord framework
// 4. Register commands, subscribers, and the scheduler workers

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "discord/discord_layer.rs"]
mod discord;
#[path = "infra/infra_layer.rs"]
mod infra;

use crate::core::modlog::ModlogService;
use crate::core::reminders::ReminderService;
use crate::core::schedule::{Clock, EventBus, SystemClock, Tunables};
use crate::discord::notify::{CaseExpiryActions, ModlogNotifier, ReminderNotifier};
use crate::discord::{events, Data};
use crate::infra::modlog::SqliteCaseStore;
use crate::infra::reminders::SqliteReminderStore;
use poise::serenity_prelude as serenity;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn env_i64(name: &str) -> Option<i64> {
    std::env::var(name).ok().and_then(|v| v.parse::<i64>().ok())
}

/// Engine knobs, overridable from the environment.
fn tunables_from_env() -> Tunables {
    let mut tunables = Tunables::default();
    if let Some(secs) = env_i64("SCHEDULE_SHORT_THRESHOLD_SECS") {
        tunables.short_threshold = chrono::Duration::seconds(secs);
    }
    if let Some(days) = env_i64("SCHEDULE_HORIZON_DAYS") {
        tunables.horizon = chrono::Duration::days(days);
    }
    if let Some(secs) = env_i64("SCHEDULE_BACKOFF_MAX_SECS") {
        tunables.backoff_max = std::time::Duration::from_secs(secs.max(1) as u64);
    }
    tunables
}

#[tokio::main]
async fn main() {
    // Initialize logging so we can see what's happening
    tracing_subscriber::fmt::init();

    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    // Get Discord bot token from environment
    let token = std::env::var("DISCORD_TOKEN").expect(
        "Missing DISCORD_TOKEN environment variable! Create a .env file with your bot token.",
    );

    // Keep runtime databases in a dedicated folder so the repo root stays tidy.
    let data_dir = "data";
    std::fs::create_dir_all(data_dir).expect("Failed to create data directory for SQLite files");

    let tunables = tunables_from_env();

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================
    // Create our services with their dependencies.
    // This is the "composition root" where we wire everything together.

    // One shutdown token for the whole process. Workers exit without
    // marking their in-flight item, so it fires again after a restart.
    let shutdown = CancellationToken::new();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let reminder_pool = SqlitePoolOptions::new()
        .connect(&format!("sqlite://{data_dir}/reminders.db?mode=rwc"))
        .await
        .expect("Failed to connect to reminders DB");
    let reminder_store = Arc::new(SqliteReminderStore::new(reminder_pool));
    reminder_store
        .migrate()
        .await
        .expect("Failed to migrate reminders DB");
    let reminder_bus = Arc::new(EventBus::new());
    let reminders = Arc::new(ReminderService::new(
        reminder_store,
        Arc::clone(&clock),
        Arc::clone(&reminder_bus),
        shutdown.clone(),
        tunables,
    ));

    let modlog_pool = SqlitePoolOptions::new()
        .connect(&format!("sqlite://{data_dir}/modlog.db?mode=rwc"))
        .await
        .expect("Failed to connect to modlog DB");
    let case_store = Arc::new(SqliteCaseStore::new(modlog_pool));
    case_store
        .migrate()
        .await
        .expect("Failed to migrate modlog DB");
    let modlog_bus = Arc::new(EventBus::new());
    let modlog = Arc::new(ModlogService::new(
        Arc::clone(&case_store),
        case_store,
        Arc::clone(&clock),
        Arc::clone(&modlog_bus),
        shutdown.clone(),
        tunables,
    ));

    // Create the data structure that will be shared across all commands
    let data = Data {
        reminders: Arc::clone(&reminders),
        modlog: Arc::clone(&modlog),
    };

    // Cancel the shutdown token on Ctrl-C so workers stop cleanly.
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received");
                shutdown.cancel();
            }
        });
    }

    // ========================================================================
    // DISCORD FRAMEWORK SETUP
    // ========================================================================
    // Configure the poise framework with our commands and settings.

    let intents = serenity::GatewayIntents::GUILDS
        | serenity::GatewayIntents::GUILD_MODERATION
        | serenity::GatewayIntents::GUILD_MESSAGES;

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            // Register all our commands here
            commands: vec![
                discord::commands::remind::remind(),
                discord::commands::remind::reminders(),
                discord::commands::moderation::ban(),
                discord::commands::moderation::unban(),
                discord::commands::moderation::kick(),
                discord::commands::moderation::mute(),
                discord::commands::moderation::unmute(),
                discord::commands::moderation::purge(),
                discord::commands::moderation::expire(),
                discord::commands::moderation::reason(),
                discord::commands::modlog::modlog(),
            ],
            // Event handler for bans lifted outside our commands
            event_handler: |ctx, event, framework, data| {
                Box::pin(events::event_handler(ctx, event, framework, data))
            },
            ..Default::default()
        })
        .setup(move |ctx, _ready, framework| {
            Box::pin(async move {
                tracing::info!("registering commands");
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;

                // Delivery subscribers need the gateway's HTTP client, so
                // they are registered here; the workers start only after
                // that, or early fires would go nowhere.
                let http = ctx.http.clone();
                reminder_bus.subscribe(Arc::new(ReminderNotifier::new(Arc::clone(&http))));
                modlog_bus.subscribe(Arc::new(ModlogNotifier::new(
                    Arc::clone(&http),
                    Arc::clone(&modlog),
                )));
                modlog_bus.subscribe(Arc::new(CaseExpiryActions::new(http)));

                reminders.spawn_worker();
                modlog.spawn_worker();

                tracing::info!("bot is ready");
                Ok(data)
            })
        })
        .build();

    let mut client = serenity::ClientBuilder::new(token, intents)
        .framework(framework)
        .await
        .expect("Error creating client");

    client.start().await.expect("Error running bot");
}
