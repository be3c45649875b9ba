//! Whitelisting accounts on the game servers through external commands.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::WhitelistTarget;
use crate::error::{BotError, Result};

/// The two independently administered game servers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameServer {
    /// Java edition
    Primary,
    /// Bedrock edition
    Secondary,
}

/// Authorizes an account name on a game server
#[async_trait]
pub trait WhitelistDispatcher: Send + Sync {
    /// Completes only once the external action has finished. A non-zero exit is an error.
    async fn apply(&self, server: GameServer, account_name: &str) -> Result<()>;
}

/// Runs each server's configured command under `bash -c`
pub struct CommandWhitelist {
    primary: WhitelistTarget,
    secondary: WhitelistTarget,
    timeout: Duration,
}

impl CommandWhitelist {
    pub fn new(primary: WhitelistTarget, secondary: WhitelistTarget, timeout: Duration) -> Self {
        Self {
            primary,
            secondary,
            timeout,
        }
    }

    fn target(&self, server: GameServer) -> &WhitelistTarget {
        match server {
            GameServer::Primary => &self.primary,
            GameServer::Secondary => &self.secondary,
        }
    }
}

#[async_trait]
impl WhitelistDispatcher for CommandWhitelist {
    async fn apply(&self, server: GameServer, account_name: &str) -> Result<()> {
        let target = self.target(server);

        // The name is handed over as a positional parameter, never spliced into the script
        let mut command = tokio::process::Command::new("bash");
        command
            .arg("-c")
            .arg(&target.command)
            .arg("whitelist")
            .arg(account_name)
            .arg(&target.tag)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| BotError::Timeout {
                action: format!("whitelisting on '{}'", target.tag),
                seconds: self.timeout.as_secs(),
            })?
            .map_err(|e| BotError::WhitelistSpawn {
                server: target.tag.clone(),
                message: e.to_string(),
            })?;

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            info!("[whitelist {}] {}", target.tag, line);
        }
        for line in String::from_utf8_lossy(&output.stderr).lines() {
            warn!("[whitelist {}] {}", target.tag, line);
        }

        if !output.status.success() {
            // Killed by a signal has no code
            let code = output.status.code().unwrap_or(-1);
            return Err(BotError::WhitelistExit {
                server: target.tag.clone(),
                code,
            });
        }

        info!("Whitelisted '{}' on {}", account_name, target.tag);
        Ok(())
    }
}
