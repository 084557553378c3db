pub mod cached_snapshot;
pub mod interaction;

pub use cached_snapshot::CachedSnapshot;
pub use interaction::{InteractionCounts, SpotInteraction};
