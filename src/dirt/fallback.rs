//! Local estimation used when the server cannot be trusted: either the last
//! fetch failed or the engine runs without polling at all.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::snapshot::{clamp_level, DecaySnapshot, MAX_LEVEL};
use super::spots::{hours_since_cleaning, Spot, SpotConfig, SpotGenerator};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DegradedEstimate {
    pub spots: Vec<Spot>,
    pub level: f64,
    pub expected_spot_count: usize,
    pub hours_since_cleaning: f64,
    /// Always false: nothing here has been seen by the server.
    pub confirmed: bool,
}

/// Level implied by elapsed time alone: linear from the end of the grace
/// period up to `MAX_LEVEL` once every spot slot would be filled.
pub fn estimate_level(config: &SpotConfig, hours_since_cleaning: f64) -> f64 {
    let dirty_hours = hours_since_cleaning - config.grace_period_hours;
    if dirty_hours <= 0.0 {
        return 0.0;
    }
    let full_after = config.hours_per_spot * config.max_spots as f64;
    if full_after <= 0.0 {
        return MAX_LEVEL;
    }
    clamp_level(dirty_hours / full_after * MAX_LEVEL)
}

/// Grows the spot set from wall-clock time since the last known cleaning.
///
/// `cleaned_since_reset` spots were removed locally since the snapshot's
/// cleaning time and are not handed back. `confirmed_floor` is the count a
/// previous successful fetch vouched for; the estimate never goes below it.
pub fn estimate(
    generator: &mut SpotGenerator,
    snapshot: &DecaySnapshot,
    existing: &[Spot],
    cleaned_since_reset: usize,
    confirmed_floor: usize,
    estimate_from_time: bool,
    now: DateTime<Utc>,
) -> DegradedEstimate {
    let hours = hours_since_cleaning(snapshot.last_cleaning_time, now);
    let expected = generator.config().expected_spot_count(hours);
    let target = expected
        .saturating_sub(cleaned_since_reset)
        .max(confirmed_floor);

    // Estimation only raises the level; cleanings lower it elsewhere.
    let level = if estimate_from_time && snapshot.last_cleaning_time.is_some() {
        snapshot.level.max(estimate_level(generator.config(), hours))
    } else {
        snapshot.level
    };

    DegradedEstimate {
        spots: generator.generate_with_budget(existing, level, target, now),
        level,
        expected_spot_count: expected,
        hours_since_cleaning: hours,
        confirmed: false,
    }
}
