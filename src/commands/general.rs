use poise::serenity_prelude as serenity;
use tracing::info;

use crate::{Context, Error};

/// Check if the bot is running
#[poise::command(prefix_command, slash_command)]
pub async fn ping(ctx: Context<'_>) -> Result<(), Error> {
    info!("Ping command called by {}", ctx.author().name);
    ctx.send(poise::CreateReply::default()
        .content("Pong! Bot is working!")
        .ephemeral(true))
        .await?;
    Ok(())
}

/// Show help information
#[poise::command(prefix_command, slash_command)]
pub async fn help(ctx: Context<'_>) -> Result<(), Error> {
    let embed = serenity::CreateEmbed::new()
        .title("Donation Verification")
        .description("React to the message in the verify channel to start, then follow the DMs.")
        .field("Step 1", "Reply with the email you donated with", false)
        .field("Step 2", "Reply with your Java edition name, or \"none\"", false)
        .field("Step 3", "Reply with your Bedrock edition name", false)
        .field("/verification_stats", "Show how many users are in each step (Admin)", false)
        .field("refresh", "Type in the verify channel to post a new prompt (Admin)", false)
        .color(0x3498db);

    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true)).await?;
    Ok(())
}
