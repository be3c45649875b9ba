pub mod general;
pub mod stats;

pub use general::{help, ping};
pub use stats::verification_stats;
