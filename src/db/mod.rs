mod connection;
pub mod helpers;
mod migrations;
pub mod models;
mod repositories;

pub use connection::Database;
pub use models::{CachedSnapshot, InteractionCounts, SpotInteraction};
