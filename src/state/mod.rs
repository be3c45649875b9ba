pub mod snapshot;

pub use snapshot::{
    create_shared_snapshot_store, SharedSnapshotStore, SnapshotStore, UserRecord,
    VerificationState, WorkflowSnapshot,
};
