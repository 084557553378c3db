pub mod clock;
pub mod controller;
pub mod fallback;
pub mod mutation;
pub mod schedule;
pub mod snapshot;
pub mod spots;
pub mod state;

pub use clock::{Clock, ManualClock, SystemClock};
pub use controller::{CleanOutcome, DirtEngine, EngineParts, ReconcileOutcome};
pub use mutation::{CleanMutation, MutationStatus};
pub use schedule::{IntervalTask, ManualTask, ScheduledTask};
pub use snapshot::{CleanlinessStatus, DecaySnapshot};
pub use spots::{Spot, SpotCategory, SpotConfig, SpotGenerator};
pub use state::{EngineSnapshot, SyncState, SyncStrategy};
