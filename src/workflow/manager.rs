use dashmap::DashMap;
use poise::serenity_prelude::{MessageId, UserId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::{debug, error, info, warn};

use crate::error::{BotError, Result};
use crate::gateway::ChatGateway;
use crate::services::{AccountLookup, DonationLedger, GameServer, WhitelistDispatcher};
use crate::state::{SharedSnapshotStore, UserRecord, VerificationState, WorkflowSnapshot};
use crate::workflow::transitions::{self, Effect, Step, Transition};

/// External services the workflow talks to
pub struct Collaborators {
    pub chat: Arc<dyn ChatGateway>,
    pub ledger: Arc<dyn DonationLedger>,
    pub accounts: Arc<dyn AccountLookup>,
    pub whitelist: Arc<dyn WhitelistDispatcher>,
}

/// Drives each user through the donation verification steps.
///
/// Records live in a concurrent map. Every user also gets an async mutex that
/// is held for the whole read, lookup and write cycle, so two messages from
/// the same user never race while different users proceed in parallel.
///
/// Every public operation also holds a read guard on `in_flight`; `drain`
/// takes the write side to wait for them before the final save.
pub struct VerificationWorkflow {
    records: DashMap<UserId, UserRecord>,
    user_locks: DashMap<UserId, Arc<tokio::sync::Mutex<()>>>,
    prompt_message: parking_lot::RwLock<Option<MessageId>>,
    store: SharedSnapshotStore,
    collaborators: Collaborators,
    min_donation: f64,
    in_flight: RwLock<()>,
    draining: AtomicBool,
}

impl VerificationWorkflow {
    /// Rebuild the workflow from a persisted snapshot
    pub fn from_snapshot(
        snapshot: WorkflowSnapshot,
        store: SharedSnapshotStore,
        collaborators: Collaborators,
        min_donation: f64,
    ) -> Self {
        let records = DashMap::new();
        for (key, record) in snapshot.records {
            match key.parse::<u64>() {
                Ok(id) if id != 0 => {
                    records.insert(UserId::new(id), record);
                }
                _ => warn!("Skipping record with invalid user id '{}'", key),
            }
        }

        let prompt_message = snapshot
            .prompt_message_id
            .and_then(|id| id.parse::<u64>().ok())
            .filter(|id| *id != 0)
            .map(MessageId::new);

        Self {
            records,
            user_locks: DashMap::new(),
            prompt_message: parking_lot::RwLock::new(prompt_message),
            store,
            collaborators,
            min_donation,
            in_flight: RwLock::new(()),
            draining: AtomicBool::new(false),
        }
    }

    /// The message users currently react to
    pub fn prompt_message(&self) -> Option<MessageId> {
        *self.prompt_message.read()
    }

    /// Make `message_id` the active prompt; reactions on older prompts stop counting
    pub async fn set_prompt_message(&self, message_id: MessageId) {
        let Some(_running) = self.enter().await else {
            warn!("Shutting down, not switching the prompt to {}", message_id);
            return;
        };

        *self.prompt_message.write() = Some(message_id);
        info!("Active verification prompt is now message {}", message_id);
        self.persist().await;
    }

    /// Current record of a user, if they ever entered the workflow
    pub fn record(&self, user_id: UserId) -> Option<UserRecord> {
        self.records.get(&user_id).map(|r| r.clone())
    }

    /// Point-in-time copy of everything that gets persisted
    pub fn snapshot(&self) -> WorkflowSnapshot {
        let mut snapshot = WorkflowSnapshot::new();
        snapshot.prompt_message_id = self.prompt_message().map(|id| id.to_string());
        snapshot.records = self
            .records
            .iter()
            .map(|entry| (entry.key().to_string(), entry.value().clone()))
            .collect();
        snapshot
    }

    /// Number of users in each state
    pub fn state_counts(&self) -> HashMap<VerificationState, usize> {
        self.snapshot().state_counts()
    }

    /// A reaction was added to some message
    pub async fn handle_reaction(
        &self,
        user_id: UserId,
        message_id: MessageId,
        self_id: UserId,
    ) -> Result<()> {
        if self.prompt_message() != Some(message_id) || user_id == self_id {
            return Ok(());
        }

        let Some(_running) = self.enter().await else {
            debug!("Shutting down, ignoring reaction from {}", user_id);
            return Ok(());
        };

        let lock = self.user_lock(user_id);
        let guard = lock.lock().await;

        let existing = self.record(user_id);
        let Some(transition) = transitions::on_reaction(existing.as_ref()) else {
            debug!("User {} reacted again, already has a record", user_id);
            return Ok(());
        };

        let result = self.commit(user_id, existing.as_ref(), transition).await;
        if !self.records.contains_key(&user_id) {
            self.release_lock(user_id, &lock);
        }
        drop(guard);
        result
    }

    /// A direct message from a user
    pub async fn handle_direct_message(&self, user_id: UserId, content: &str) -> Result<()> {
        // Records are never removed, so strangers can be turned away without a lock
        if !self.records.contains_key(&user_id) {
            return Ok(());
        }

        let Some(_running) = self.enter().await else {
            debug!("Shutting down, ignoring message from {}", user_id);
            return Ok(());
        };

        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        let Some(record) = self.record(user_id) else {
            return Ok(());
        };

        let transition = match transitions::on_message(&record, content) {
            Step::Ignore => return Ok(()),
            Step::Respond(transition) => transition,
            Step::CheckDonations { email } => {
                let total = self.collaborators.ledger.total_for(&email).await?;
                debug!("Ledger total for user {}: {}", user_id, total);
                transitions::on_donation_total(&record, &email, total, self.min_donation)
            }
            Step::ResolveAccount { name } => {
                match self.collaborators.accounts.resolve(&name).await? {
                    None => transitions::on_account_not_found(&record),
                    Some(account_id) => {
                        debug!("Resolved '{}' to account {}", name, account_id);
                        self.whitelist(&record, GameServer::Primary, &name).await?
                    }
                }
            }
            Step::WhitelistSecondary { name } => {
                self.whitelist(&record, GameServer::Secondary, &name).await?
            }
        };

        self.commit(user_id, Some(&record), transition).await
    }

    /// Flush the current state to disk, reporting failure to the caller
    pub async fn flush(&self) -> Result<()> {
        self.store.save_with(|| self.snapshot()).await
    }

    /// Stop accepting events, wait for the ones already running, then save
    pub async fn drain(&self) -> Result<()> {
        self.draining.store(true, Ordering::SeqCst);
        let _quiet = self.in_flight.write().await;
        info!("All in-flight verification steps finished");
        self.flush().await
    }

    /// Guard for one operation, or `None` once draining started
    async fn enter(&self) -> Option<RwLockReadGuard<'_, ()>> {
        if self.draining.load(Ordering::SeqCst) {
            return None;
        }
        let guard = self.in_flight.read().await;
        // A drain may have started while we waited behind it
        if self.draining.load(Ordering::SeqCst) {
            return None;
        }
        Some(guard)
    }

    async fn whitelist(
        &self,
        record: &UserRecord,
        server: GameServer,
        name: &str,
    ) -> Result<Transition> {
        match self.collaborators.whitelist.apply(server, name).await {
            Ok(()) => Ok(match server {
                GameServer::Primary => transitions::on_primary_whitelisted(record, name),
                GameServer::Secondary => transitions::on_secondary_whitelisted(record, name),
            }),
            Err(e @ (BotError::WhitelistExit { .. }
            | BotError::WhitelistSpawn { .. }
            | BotError::Timeout { .. })) => {
                error!("Failed to whitelist '{}' on {:?}: {}", name, server, e);
                let label = match server {
                    GameServer::Primary => "Java edition",
                    GameServer::Secondary => "Bedrock edition",
                };
                Ok(transitions::on_whitelist_failed(record, label))
            }
            Err(e) => Err(e),
        }
    }

    /// Deliver a transition's effects, then store the new record and persist it.
    /// If any effect fails the record is left as it was.
    async fn commit(
        &self,
        user_id: UserId,
        previous: Option<&UserRecord>,
        transition: Transition,
    ) -> Result<()> {
        for effect in &transition.effects {
            match effect {
                Effect::Reply(content) => self.collaborators.chat.send_dm(user_id, content).await?,
                Effect::GrantRole(role) => self.collaborators.chat.grant_role(user_id, *role).await?,
            }
        }

        if previous == Some(&transition.record) {
            return Ok(());
        }

        match previous {
            Some(old) if old.state != transition.record.state => info!(
                "User {} moved from {} to {}",
                user_id, old.state, transition.record.state
            ),
            None => info!(
                "User {} entered verification as {}",
                user_id, transition.record.state
            ),
            _ => {}
        }

        self.records.insert(user_id, transition.record);
        self.persist().await;
        Ok(())
    }

    /// Save, logging instead of failing: losing a save must not take the event down
    async fn persist(&self) {
        if let Err(e) = self.flush().await {
            error!(
                "Failed to save verification state to {}: {}",
                self.store.path().display(),
                e
            );
        }
    }

    fn user_lock(&self, user_id: UserId) -> Arc<tokio::sync::Mutex<()>> {
        self.user_locks
            .entry(user_id)
            .or_insert_with(Default::default)
            .value()
            .clone()
    }

    /// Drop the lock of a user who ended up without a record, unless another
    /// task is already waiting on it
    fn release_lock(&self, user_id: UserId, lock: &Arc<tokio::sync::Mutex<()>>) {
        self.user_locks
            .remove_if(&user_id, |_, held| Arc::ptr_eq(held, lock) && Arc::strong_count(lock) == 2);
    }
}

/// Shared workflow type
pub type SharedWorkflow = Arc<VerificationWorkflow>;

pub fn create_shared_workflow(workflow: VerificationWorkflow) -> SharedWorkflow {
    Arc::new(workflow)
}
