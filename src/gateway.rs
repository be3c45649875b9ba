use async_trait::async_trait;
use poise::serenity_prelude::{GuildId, Http, RoleId, UserId};
use std::sync::Arc;
use tracing::info;

use crate::config::VerifierConfig;
use crate::error::Result;
use crate::workflow::Role;

/// What the workflow needs from the chat platform
#[async_trait]
pub trait ChatGateway: Send + Sync {
    /// Send a direct message to a user
    async fn send_dm(&self, user_id: UserId, content: &str) -> Result<()>;

    /// Grant a role. Granting a role the user already holds is a no-op.
    async fn grant_role(&self, user_id: UserId, role: Role) -> Result<()>;
}

/// Chat gateway backed by serenity's REST client
pub struct DiscordGateway {
    http: Arc<Http>,
    guild_id: GuildId,
    donor_role: RoleId,
    whitelist_role: RoleId,
}

impl DiscordGateway {
    pub fn new(http: Arc<Http>, config: &VerifierConfig) -> Self {
        Self {
            http,
            guild_id: GuildId::new(config.guild_id),
            donor_role: RoleId::new(config.donor_role_id),
            whitelist_role: RoleId::new(config.whitelist_role_id),
        }
    }

    fn role_id(&self, role: Role) -> RoleId {
        match role {
            Role::Donor => self.donor_role,
            Role::Whitelisted => self.whitelist_role,
        }
    }
}

#[async_trait]
impl ChatGateway for DiscordGateway {
    async fn send_dm(&self, user_id: UserId, content: &str) -> Result<()> {
        let dm_channel = user_id.create_dm_channel(self.http.as_ref()).await?;
        dm_channel.say(self.http.as_ref(), content).await?;
        Ok(())
    }

    async fn grant_role(&self, user_id: UserId, role: Role) -> Result<()> {
        let role_id = self.role_id(role);
        self.http
            .add_member_role(
                self.guild_id,
                user_id,
                role_id,
                Some("Donation verification"),
            )
            .await?;

        info!("Granted {:?} role ({}) to user {}", role, role_id, user_id);
        Ok(())
    }
}
