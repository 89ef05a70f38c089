pub mod admin;
pub mod general;
pub mod stats;

pub use admin::{add_curator, reminders, track_server};
pub use general::{help, ping, status};
pub use stats::{pending, rating, top};
