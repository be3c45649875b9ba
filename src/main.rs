use anyhow::Result;
use clap::Parser;
use dotenv::dotenv;
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tracing::{error, info, warn};

/// Discord bot that verifies donations and whitelists donors on the game servers
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// The Discord bot token (falls back to DISCORD_TOKEN)
    #[arg(long = "auth", short = 'a')]
    auth: Option<String>,

    /// URL which hosts the donation API
    #[arg(long = "ltapi")]
    lt_api: String,

    /// Authorization token to access the donation API
    #[arg(long = "ltkey")]
    lt_key: String,

    /// Minimum donation to be whitelisted
    #[arg(long = "mindonation", default_value_t = 25)]
    min_donation: u32,

    /// Deployment config (guild, channel, roles, whitelist commands)
    #[arg(long, default_value = "data/verifier.json")]
    config: String,

    /// Directory for the persisted workflow state (falls back to STATE_PATH, then "state")
    #[arg(long)]
    state_dir: Option<String>,
}

mod commands;
mod config;
mod error;
mod events;
mod gateway;
mod messages;
mod services;
mod state;
mod workflow;

use commands::{help, ping, verification_stats};
use config::VerifierConfig;
use events::{handle_message, handle_reaction_add};
use gateway::DiscordGateway;
use services::{CommandWhitelist, HttpDonationLedger, MojangAccountLookup};
use state::create_shared_snapshot_store;
use workflow::{create_shared_workflow, Collaborators, SharedWorkflow, VerificationWorkflow};

type Error = Box<dyn std::error::Error + Send + Sync>;
type Context<'a> = poise::Context<'a, Data, Error>;

/// Timeout for ledger and account lookups
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for a whitelist command
const WHITELIST_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared application state
pub struct Data {
    pub workflow: SharedWorkflow,
    pub config: Arc<VerifierConfig>,
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
        serenity::FullEvent::ReactionAdd { add_reaction } => {
            if let Err(e) = handle_reaction_add(ctx, add_reaction, data).await {
                error!("Failed to handle reaction: {}", e);
            }
        }
        _ => {}
    }
    Ok(())
}

fn load_config(path: &str) -> Result<VerifierConfig> {
    if !std::path::Path::new(path).exists() {
        warn!("Config file {} not found, using built-in defaults", path);
        return Ok(VerifierConfig::default());
    }

    let config = VerifierConfig::load_from_file(path)?;
    info!("Loaded config from {}", path);
    Ok(config)
}

/// Resolves on Ctrl-C or when "stop" is typed on the console
async fn shutdown_requested() {
    let console = async {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim() == "stop" {
                return;
            }
        }
        // Stdin closed (e.g. running as a service): only Ctrl-C can stop us
        std::future::pending::<()>().await
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        }
        _ = console => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let args = Args::parse();

    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true),
        )
        .with(tracing_subscriber::filter::LevelFilter::INFO)
        .init();

    let token = match args.auth.clone().or_else(|| std::env::var("DISCORD_TOKEN").ok()) {
        Some(token) => token,
        None => {
            return Err(anyhow::anyhow!(
                "Missing Discord token: pass --auth or set DISCORD_TOKEN"
            ))
        }
    };

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

    let config = Arc::new(load_config(&args.config)?);

    let state_path = args
        .state_dir
        .clone()
        .or_else(|| std::env::var("STATE_PATH").ok())
        .unwrap_or_else(|| "state".to_string());
    tokio::fs::create_dir_all(&state_path).await.ok();

    // Load state
    info!("Loading verification state...");
    let store = create_shared_snapshot_store(format!("{}/verifier_state.json", state_path));
    // An unreadable state file would be overwritten by the first save, so refuse to start
    let snapshot = store.load().await.map_err(|e| {
        error!("Could not load verification state: {}", e);
        e
    })?;
    info!(
        "Loaded {} user records (active prompt: {:?})",
        snapshot.records.len(),
        snapshot.prompt_message_id
    );

    let http_client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
    let discord_http = Arc::new(serenity::Http::new(&token));

    let collaborators = Collaborators {
        chat: Arc::new(DiscordGateway::new(discord_http, &config)),
        ledger: Arc::new(HttpDonationLedger::new(
            http_client.clone(),
            &args.lt_api,
            &args.lt_key,
        )),
        accounts: Arc::new(MojangAccountLookup::new(http_client, &config.account_api)),
        whitelist: Arc::new(CommandWhitelist::new(
            config.primary_server.clone(),
            config.secondary_server.clone(),
            WHITELIST_TIMEOUT,
        )),
    };

    let workflow = create_shared_workflow(VerificationWorkflow::from_snapshot(
        snapshot,
        store,
        collaborators,
        f64::from(args.min_donation),
    ));
    info!("Minimum donation for server access: ${}", args.min_donation);

    let framework_workflow = workflow.clone();
    let framework_config = config.clone();

    // Build framework
    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![ping(), help(), verification_stats()],
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
                        poise::FrameworkError::CommandCheckFailed { ctx, .. } => {
                            warn!("User {} failed the check for '{}'", ctx.author().name, ctx.command().qualified_name);
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
            Box::pin(async move {
                info!("Bot logged in as: {}", ready.user.name);

                if !ready.guilds.iter().any(|g| g.id.get() == framework_config.guild_id) {
                    warn!(
                        "Bot is not in the configured guild {} - role grants will fail",
                        framework_config.guild_id
                    );
                }

                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                info!("Registered {} commands globally", framework.options().commands.len());

                Ok(Data {
                    workflow: framework_workflow,
                    config: framework_config,
                })
            })
        })
        .build();

    let intents = serenity::GatewayIntents::GUILD_MESSAGES
        | serenity::GatewayIntents::GUILD_MESSAGE_REACTIONS
        | serenity::GatewayIntents::DIRECT_MESSAGES
        | serenity::GatewayIntents::DIRECT_MESSAGE_REACTIONS
        | serenity::GatewayIntents::MESSAGE_CONTENT;

    let mut client = serenity::ClientBuilder::new(&token, intents)
        .framework(framework)
        .await?;

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        shutdown_requested().await;
        info!("Shutting down, closing gateway connections...");
        shard_manager.shutdown_all().await;
    });

    info!("Starting bot...");
    let run = client.start().await;

    // Event handlers run in their own tasks and outlive the shards, so wait for
    // them before the runtime goes away
    info!("Waiting for in-flight verification steps...");
    if let Err(e) = workflow.drain().await {
        error!("Failed to save verification state: {}", e);
    }

    if let Err(e) = run {
        let err_str = e.to_string();
        if err_str.contains("Disallowed") || err_str.contains("intents") {
            error!("Failed to start bot: {}", e);
            error!("The MESSAGE_CONTENT privileged intent needs to be enabled in the Discord Developer Portal");
            error!("Go to https://discord.com/developers/applications -> Your App -> Bot -> Privileged Gateway Intents");
        }
        return Err(e.into());
    }
    warn!("Bot ended.");

    Ok(())
}
