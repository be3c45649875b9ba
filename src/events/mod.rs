pub mod message;
pub mod reaction;

pub use message::handle_message;
pub use reaction::handle_reaction_add;
