use futures::StreamExt;
use poise::serenity_prelude as serenity;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::BotError;
use crate::messages;
use crate::{Data, Error};

/// Bound on loading the verify channel's history during a refresh
const HISTORY_TIMEOUT: Duration = Duration::from_secs(30);

/// Admin command that replaces the verification prompt
const REFRESH_COMMAND: &str = "refresh";

/// Handle incoming messages
pub async fn handle_message(
    ctx: &serenity::Context,
    msg: &serenity::Message,
    data: &Data,
) -> Result<(), Error> {
    // Ignore bot messages
    if msg.author.bot {
        return Ok(());
    }

    // Check if this is a DM
    if msg.guild_id.is_none() {
        return handle_dm_message(ctx, msg, data).await;
    }

    if msg.channel_id.get() == data.config.verify_channel_id && msg.content == REFRESH_COMMAND {
        return handle_refresh(ctx, msg, data).await;
    }

    Ok(())
}

/// Handle DM messages (the verification conversation)
async fn handle_dm_message(
    ctx: &serenity::Context,
    msg: &serenity::Message,
    data: &Data,
) -> Result<(), Error> {
    debug!("Processing DM from: {}", msg.author.name);

    if let Err(e) = data
        .workflow
        .handle_direct_message(msg.author.id, &msg.content)
        .await
    {
        error!("Donation verification failed for {}: {}", msg.author.id, e);
        msg.channel_id.say(&ctx.http, report_error(&e)).await?;
    }

    Ok(())
}

/// User-facing text for a failure while processing a DM. Details stay in the log.
fn report_error(error: &BotError) -> &'static str {
    if error.is_discord() {
        messages::DISCORD_ERROR
    } else {
        messages::UNEXPECTED_ERROR
    }
}

/// Post a fresh prompt in the verify channel and make it the active one
async fn handle_refresh(
    ctx: &serenity::Context,
    msg: &serenity::Message,
    data: &Data,
) -> Result<(), Error> {
    if !is_admin(ctx, msg, data).await {
        // Non-admin typing "refresh" in the verify channel - ignore silently
        debug!("Non-admin {} tried to refresh the prompt", msg.author.name);
        return Ok(());
    }

    info!("Refreshing verification prompt on request of {}", msg.author.name);

    let channel_id = msg.channel_id;
    let history = tokio::time::timeout(
        HISTORY_TIMEOUT,
        channel_id
            .messages_iter(&ctx.http)
            .collect::<Vec<_>>(),
    )
    .await;

    let history = match history {
        Ok(history) => history,
        Err(_) => {
            warn!("Loading history of channel {} timed out", channel_id);
            channel_id.say(&ctx.http, messages::HISTORY_TIMEOUT).await?;
            return Ok(());
        }
    };

    let mut deleted = 0;
    for message in history {
        let message = message?;
        if let Err(e) = channel_id.delete_message(&ctx.http, message.id).await {
            warn!("Failed to delete message {}: {}", message.id, e);
        } else {
            deleted += 1;
        }
    }
    debug!("Deleted {} messages from channel {}", deleted, channel_id);

    let prompt = channel_id.say(&ctx.http, messages::PROMPT_MESSAGE).await?;
    data.workflow.set_prompt_message(prompt.id).await;

    prompt
        .react(
            &ctx.http,
            serenity::ReactionType::Unicode(data.config.prompt_emoji.clone()),
        )
        .await?;

    Ok(())
}

/// Whether the author holds the configured admin role
async fn is_admin(ctx: &serenity::Context, msg: &serenity::Message, data: &Data) -> bool {
    let admin_role = serenity::RoleId::new(data.config.admin_role_id);

    if let Some(member) = &msg.member {
        return member.roles.contains(&admin_role);
    }

    let Some(guild_id) = msg.guild_id else {
        return false;
    };

    match guild_id.member(ctx, msg.author.id).await {
        Ok(member) => member.roles.contains(&admin_role),
        Err(e) => {
            warn!("Could not fetch member {}: {}", msg.author.id, e);
            false
        }
    }
}
