pub mod message;
pub mod reaction;

pub use message::{handle_message, handle_message_delete, handle_message_update};
pub use reaction::{handle_reaction_add, handle_reaction_remove};
