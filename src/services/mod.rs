pub mod accounts;
pub mod donations;
pub mod whitelist;

pub use accounts::{AccountLookup, MojangAccountLookup};
pub use donations::{DonationLedger, HttpDonationLedger};
pub use whitelist::{CommandWhitelist, GameServer, WhitelistDispatcher};
