use serde::{Deserialize, Serialize};

use crate::error::{BotError, Result};

/// Deployment settings for the donation verifier
/// Loaded from data/verifier.json
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct VerifierConfig {
    /// Guild whose roles are granted
    pub guild_id: u64,

    /// Channel holding the "react to verify" prompt
    pub verify_channel_id: u64,

    /// Role allowed to issue `refresh` in the verify channel
    pub admin_role_id: u64,

    /// Granted once any donation is confirmed
    pub donor_role_id: u64,

    /// Granted once the donor is whitelisted on a server
    pub whitelist_role_id: u64,

    /// Unicode emoji attached to the prompt message
    pub prompt_emoji: String,

    /// Base URL of the game account profile service
    pub account_api: String,

    /// Java edition server
    pub primary_server: WhitelistTarget,

    /// Bedrock edition server
    pub secondary_server: WhitelistTarget,
}

/// A game server and the shell command that whitelists an account on it.
///
/// The command runs under `bash -c` with the account name as `$1` and the
/// server tag as `$2`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct WhitelistTarget {
    pub tag: String,
    pub command: String,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            guild_id: 444746940761243652,
            verify_channel_id: 642421786247430194,
            admin_role_id: 473430258347933707,
            donor_role_id: 641706857706160128,
            whitelist_role_id: 642422058973659147,
            prompt_emoji: "\u{1F4B8}".to_string(),
            account_api: "https://api.mojang.com".to_string(),
            primary_server: WhitelistTarget {
                tag: "java".to_string(),
                command: r#"tmux send-keys -t "0:Java Server" Enter "whitelist add $1" Enter"#
                    .to_string(),
            },
            secondary_server: WhitelistTarget {
                tag: "bedrock".to_string(),
                command: r#"tmux send-keys -t "0:Bedrock Server" Enter "whitelist add $1" Enter "whitelist reload" Enter"#
                    .to_string(),
            },
        }
    }
}

impl VerifierConfig {
    /// Load from a JSON file
    pub fn load_from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| BotError::ConfigLoad {
            path: path.to_string(),
            source: e,
        })?;

        let config: Self = serde_json::from_str(&content).map_err(|e| BotError::ConfigParse {
            path: path.to_string(),
            source: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the workflow unusable
    pub fn validate(&self) -> Result<()> {
        let ids = [
            ("guild_id", self.guild_id),
            ("verify_channel_id", self.verify_channel_id),
            ("admin_role_id", self.admin_role_id),
            ("donor_role_id", self.donor_role_id),
            ("whitelist_role_id", self.whitelist_role_id),
        ];
        // Discord snowflakes are never 0
        if let Some((field, _)) = ids.iter().find(|(_, id)| *id == 0) {
            return Err(BotError::ConfigValidation {
                message: format!("{} must be a Discord id, got 0", field),
            });
        }

        if self.prompt_emoji.trim().is_empty() {
            return Err(BotError::ConfigValidation {
                message: "prompt_emoji must not be empty".to_string(),
            });
        }

        if !self.account_api.starts_with("http://") && !self.account_api.starts_with("https://") {
            return Err(BotError::ConfigValidation {
                message: format!("account_api '{}' is not an http(s) URL", self.account_api),
            });
        }

        for target in [&self.primary_server, &self.secondary_server] {
            if target.tag.trim().is_empty() || target.command.trim().is_empty() {
                return Err(BotError::ConfigValidation {
                    message: "whitelist servers need both a tag and a command".to_string(),
                });
            }
        }

        if self.primary_server.tag == self.secondary_server.tag {
            return Err(BotError::ConfigValidation {
                message: format!(
                    "primary and secondary servers share the tag '{}'",
                    self.primary_server.tag
                ),
            });
        }

        Ok(())
    }
}
