//! Cached copy of the last authoritative snapshot for one aquarium.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::dirt::snapshot::DecaySnapshot;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedSnapshot {
    pub aquarium_id: String,
    pub snapshot: DecaySnapshot,
    pub cached_at: DateTime<Utc>,
}

impl CachedSnapshot {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.cached_at
    }

    /// Entries older than `window` are not trusted to seed the engine.
    pub fn is_fresh(&self, window: Duration, now: DateTime<Utc>) -> bool {
        let age = self.age(now);
        age >= Duration::zero() && age <= window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freshness_window_is_inclusive() {
        let now = Utc::now();
        let entry = CachedSnapshot {
            aquarium_id: "7".into(),
            snapshot: DecaySnapshot::default(),
            cached_at: now - Duration::hours(6),
        };
        assert!(entry.is_fresh(Duration::hours(6), now));
        assert!(!entry.is_fresh(Duration::hours(5), now));
    }

    #[test]
    fn entries_from_the_future_are_not_fresh() {
        let now = Utc::now();
        let entry = CachedSnapshot {
            aquarium_id: "7".into(),
            snapshot: DecaySnapshot::default(),
            cached_at: now + Duration::minutes(10),
        };
        assert!(!entry.is_fresh(Duration::hours(6), now));
    }
}
