use poise::serenity_prelude as serenity;

use crate::state::VerificationState;
use crate::{Context, Error};

/// Only members holding the configured admin role pass
async fn is_admin(ctx: Context<'_>) -> Result<bool, Error> {
    let admin_role = serenity::RoleId::new(ctx.data().config.admin_role_id);
    let Some(member) = ctx.author_member().await else {
        return Ok(false);
    };
    Ok(member.roles.contains(&admin_role))
}

/// Show how many users are at each verification step
#[poise::command(slash_command, guild_only, check = "is_admin")]
pub async fn verification_stats(ctx: Context<'_>) -> Result<(), Error> {
    let workflow = &ctx.data().workflow;
    let counts = workflow.state_counts();

    let mut embed = serenity::CreateEmbed::new()
        .title("Donation Verification")
        .color(0x2ecc71);

    for state in [
        VerificationState::Pending,
        VerificationState::Verified,
        VerificationState::Accepted,
        VerificationState::WhitelistedPrimary,
        VerificationState::WhitelistedSecondary,
        VerificationState::Rejected,
    ] {
        let count = counts.get(&state).copied().unwrap_or(0);
        embed = embed.field(state.label(), count.to_string(), true);
    }

    let prompt = workflow
        .prompt_message()
        .map(|id| id.to_string())
        .unwrap_or_else(|| "none (type `refresh` in the verify channel)".to_string());
    embed = embed.field("Active prompt", prompt, false);

    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true)).await?;
    Ok(())
}
