pub mod verifier;

pub use verifier::{VerifierConfig, WhitelistTarget};
