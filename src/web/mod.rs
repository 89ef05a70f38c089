//! Operational JSON API served alongside the Discord bot

mod api;
mod server;

pub use api::{api_router, ApiState};
pub use server::{start_api_server, ApiServerConfig};
