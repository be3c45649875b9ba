pub mod manager;
pub mod transitions;

pub use manager::{create_shared_workflow, Collaborators, SharedWorkflow, VerificationWorkflow};
pub use transitions::Role;
