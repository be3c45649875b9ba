use poise::serenity_prelude as serenity;
use tracing::debug;

use crate::{Data, Error};

/// Handle a reaction being added anywhere the bot can see
pub async fn handle_reaction_add(
    ctx: &serenity::Context,
    reaction: &serenity::Reaction,
    data: &Data,
) -> Result<(), Error> {
    let Some(user_id) = reaction.user_id else {
        return Ok(());
    };

    let self_id = ctx.cache.current_user().id;
    debug!(
        "Reaction by {} on message {} in channel {}",
        user_id, reaction.message_id, reaction.channel_id
    );

    data.workflow
        .handle_reaction(user_id, reaction.message_id, self_id)
        .await?;

    Ok(())
}
