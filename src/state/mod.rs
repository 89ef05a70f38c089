pub mod store;

pub use store::{spawn_flusher, EntityStore, JsonEntityStore, RecordScope, SharedEntityStore};
