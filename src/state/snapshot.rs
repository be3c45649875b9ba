use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::error::{BotError, Result};

/// Current schema version of the state file
pub const SNAPSHOT_VERSION: u32 = 1;

/// Where a user is in the donation verification process.
///
/// Having no record at all is the implicit "none" state, so it has no variant here.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VerificationState {
    Rejected,
    Pending,
    Verified,
    Accepted,
    WhitelistedPrimary,
    WhitelistedSecondary,
}

impl VerificationState {
    /// States that ignore every further message
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            VerificationState::Rejected | VerificationState::WhitelistedSecondary
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            VerificationState::Rejected => "rejected",
            VerificationState::Pending => "pending",
            VerificationState::Verified => "verified",
            VerificationState::Accepted => "accepted",
            VerificationState::WhitelistedPrimary => "whitelisted_primary",
            VerificationState::WhitelistedSecondary => "whitelisted_secondary",
        }
    }
}

impl std::fmt::Display for VerificationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Everything remembered about one user who entered the workflow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserRecord {
    pub state: VerificationState,

    /// Email whose donations were confirmed
    pub verified_email: Option<String>,

    /// Emails tried while pending, kept for audit afterwards
    #[serde(default)]
    pub attempted_emails: BTreeSet<String>,

    /// Distinct failed email attempts
    #[serde(default)]
    pub reset_count: u32,
}

impl UserRecord {
    /// Fresh record for a user who just reacted to the prompt
    pub fn pending() -> Self {
        Self {
            state: VerificationState::Pending,
            verified_email: None,
            attempted_emails: BTreeSet::new(),
            reset_count: 0,
        }
    }
}

/// Durable state of the whole workflow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowSnapshot {
    /// Schema version for migrations
    #[serde(default = "default_version")]
    pub version: u32,

    /// Message users react to in order to start verification
    pub prompt_message_id: Option<String>,

    /// Discord user ID (as string) -> record
    pub records: HashMap<String, UserRecord>,
}

fn default_version() -> u32 {
    SNAPSHOT_VERSION
}

impl Default for WorkflowSnapshot {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            prompt_message_id: None,
            records: HashMap::new(),
        }
    }
}

impl WorkflowSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count records per state
    pub fn state_counts(&self) -> HashMap<VerificationState, usize> {
        let mut counts = HashMap::new();
        for record in self.records.values() {
            *counts.entry(record.state).or_insert(0) += 1;
        }
        counts
    }
}

/// Persists the workflow snapshot as a single JSON file.
///
/// Saves go through one async mutex so concurrent writers never interleave
/// their temp-file-and-rename sequences.
pub struct SnapshotStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load from the JSON file, or an empty snapshot if none exists yet
    pub async fn load(&self) -> Result<WorkflowSnapshot> {
        let path_str = self.path.display().to_string();
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => {
                serde_json::from_str(&content).map_err(|e| BotError::ConfigParse {
                    path: path_str,
                    source: e,
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(WorkflowSnapshot::new()),
            Err(e) => Err(BotError::StateLoad {
                path: path_str,
                source: e,
            }),
        }
    }

    /// Save atomically. `capture` runs under the write lock so the snapshot
    /// written is never older than one already on disk.
    pub async fn save_with<F>(&self, capture: F) -> Result<()>
    where
        F: FnOnce() -> WorkflowSnapshot,
    {
        let _guard = self.write_lock.lock().await;
        let snapshot = capture();
        self.write(&snapshot).await
    }

    async fn write(&self, snapshot: &WorkflowSnapshot) -> Result<()> {
        let content = serde_json::to_string_pretty(snapshot)?;
        let path_str = self.path.display().to_string();

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| BotError::StateSave {
                        path: path_str.clone(),
                        source: e,
                    })?;
            }
        }

        // Write to temp file first, then rename for atomicity
        let temp_path = format!("{}.tmp", path_str);
        tokio::fs::write(&temp_path, &content)
            .await
            .map_err(|e| BotError::StateSave {
                path: path_str.clone(),
                source: e,
            })?;

        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| BotError::StateSave {
                path: path_str.clone(),
                source: e,
            })?;

        debug!(
            "Saved {} records to {}",
            snapshot.records.len(),
            path_str
        );
        Ok(())
    }
}

/// Shared snapshot store type
pub type SharedSnapshotStore = Arc<SnapshotStore>;

pub fn create_shared_snapshot_store(path: impl Into<PathBuf>) -> SharedSnapshotStore {
    Arc::new(SnapshotStore::new(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_snapshot() -> WorkflowSnapshot {
        let mut snapshot = WorkflowSnapshot::new();
        snapshot.prompt_message_id = Some("642500000000000000".to_string());

        let mut pending = UserRecord::pending();
        pending.attempted_emails.insert("wrong@example.com".to_string());
        pending.reset_count = 1;
        snapshot.records.insert("100".to_string(), pending);

        let mut accepted = UserRecord::pending();
        accepted.state = VerificationState::Accepted;
        accepted.verified_email = Some("donor@example.com".to_string());
        snapshot.records.insert("200".to_string(), accepted);

        snapshot
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&VerificationState::WhitelistedPrimary).unwrap();
        assert_eq!(json, "\"whitelisted_primary\"");

        let state: VerificationState = serde_json::from_str("\"rejected\"").unwrap();
        assert_eq!(state, VerificationState::Rejected);
    }

    #[test]
    fn test_terminal_states() {
        assert!(VerificationState::Rejected.is_terminal());
        assert!(VerificationState::WhitelistedSecondary.is_terminal());
        assert!(!VerificationState::Pending.is_terminal());
        assert!(!VerificationState::WhitelistedPrimary.is_terminal());
    }

    #[test]
    fn test_state_counts() {
        let counts = sample_snapshot().state_counts();
        assert_eq!(counts.get(&VerificationState::Pending), Some(&1));
        assert_eq!(counts.get(&VerificationState::Accepted), Some(&1));
        assert_eq!(counts.get(&VerificationState::Rejected), None);
    }

    #[test]
    fn test_record_without_optional_fields() {
        let json = r#"{ "state": "verified", "verified_email": "a@b.com" }"#;
        let record: UserRecord = serde_json::from_str(json).unwrap();

        assert_eq!(record.state, VerificationState::Verified);
        assert!(record.attempted_emails.is_empty());
        assert_eq!(record.reset_count, 0);
    }

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("verifier_state.json"));

        let snapshot = store.load().await.unwrap();
        assert_eq!(snapshot, WorkflowSnapshot::new());
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("nested").join("verifier_state.json"));
        let snapshot = sample_snapshot();

        store.save_with(|| snapshot.clone()).await.unwrap();
        let reloaded = store.load().await.unwrap();

        assert_eq!(reloaded, snapshot);
        assert!(!dir.path().join("nested").join("verifier_state.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_last_save_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("verifier_state.json"));

        store.save_with(sample_snapshot).await.unwrap();
        store.save_with(WorkflowSnapshot::new).await.unwrap();

        let reloaded = store.load().await.unwrap();
        assert!(reloaded.records.is_empty());
        assert_eq!(reloaded.prompt_message_id, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_saves_leave_one_complete_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("verifier_state.json");
        let store = create_shared_snapshot_store(path.clone());

        let snapshot_for = |i: usize| {
            let mut snapshot = WorkflowSnapshot::new();
            snapshot.prompt_message_id = Some(i.to_string());
            for user in 0..=i {
                snapshot
                    .records
                    .insert((1000 + user).to_string(), UserRecord::pending());
            }
            snapshot
        };

        let mut handles = Vec::new();
        for i in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.save_with(|| snapshot_for(i)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let content = std::fs::read_to_string(&path).unwrap();
        let saved: WorkflowSnapshot = serde_json::from_str(&content).unwrap();
        assert!((0..32).any(|i| saved == snapshot_for(i)));
        assert!(!dir.path().join("verifier_state.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("verifier_state.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = SnapshotStore::new(path);
        assert!(matches!(
            store.load().await,
            Err(BotError::ConfigParse { .. })
        ));
    }
}
