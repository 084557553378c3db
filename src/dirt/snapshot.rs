//! Last-known authoritative dirt facts and the pure derivations built on them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MIN_LEVEL: f64 = 0.0;
pub const MAX_LEVEL: f64 = 100.0;

/// Level at or above which an aquarium counts as dirty.
pub const DIRTY_THRESHOLD: f64 = 40.0;
/// Level at or above which an aquarium needs cleaning.
pub const NEEDS_CLEANING_THRESHOLD: f64 = 60.0;

pub fn clamp_level(level: f64) -> f64 {
    if level.is_nan() {
        return MIN_LEVEL;
    }
    level.clamp(MIN_LEVEL, MAX_LEVEL)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanlinessStatus {
    pub level: String,
    pub label: String,
    pub color: String,
}

impl CleanlinessStatus {
    pub fn from_level(level: f64) -> Self {
        let (key, label, color) = status_bucket(clamp_level(level));
        Self {
            level: key.to_string(),
            label: label.to_string(),
            color: color.to_string(),
        }
    }

    /// Resolves a bare bucket key as sent by some server builds.
    pub fn from_key(key: &str, level: f64) -> Self {
        match BUCKETS.iter().find(|(_, k, _, _)| *k == key) {
            Some((_, key, label, color)) => Self {
                level: key.to_string(),
                label: label.to_string(),
                color: color.to_string(),
            },
            None => Self::from_level(level),
        }
    }
}

// (exclusive upper bound, key, label, color)
const BUCKETS: [(f64, &str, &str, &str); 5] = [
    (20.0, "sparkling", "Sparkling", "#22c55e"),
    (40.0, "clean", "Clean", "#84cc16"),
    (60.0, "slightly_dirty", "Slightly Dirty", "#eab308"),
    (80.0, "dirty", "Dirty", "#f97316"),
    (f64::INFINITY, "very_dirty", "Very Dirty", "#ef4444"),
];

fn status_bucket(level: f64) -> (&'static str, &'static str, &'static str) {
    for (upper, key, label, color) in BUCKETS {
        if level < upper {
            return (key, label, color);
        }
    }
    let (_, key, label, color) = BUCKETS[BUCKETS.len() - 1];
    (key, label, color)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecaySnapshot {
    pub level: f64,
    pub last_cleaning_time: Option<DateTime<Utc>>,
    pub cleaning_streak: u32,
    pub total_cleanings: u32,
    pub is_dirty: bool,
    pub needs_cleaning: bool,
    pub status: CleanlinessStatus,
    pub hours_since_cleaning: Option<f64>,
}

impl Default for DecaySnapshot {
    fn default() -> Self {
        Self::from_level(MIN_LEVEL, None)
    }
}

impl DecaySnapshot {
    /// Builds a snapshot whose flags and status are derived locally from `level`.
    pub fn from_level(level: f64, last_cleaning_time: Option<DateTime<Utc>>) -> Self {
        let level = clamp_level(level);
        Self {
            level,
            last_cleaning_time,
            cleaning_streak: 0,
            total_cleanings: 0,
            is_dirty: level >= DIRTY_THRESHOLD,
            needs_cleaning: level >= NEEDS_CLEANING_THRESHOLD,
            status: CleanlinessStatus::from_level(level),
            hours_since_cleaning: None,
        }
    }

    pub fn is_clean_floor(&self) -> bool {
        self.level <= MIN_LEVEL
    }

    /// Copy of this snapshot with a new level and re-derived flags.
    pub fn with_level(&self, level: f64) -> Self {
        let level = clamp_level(level);
        Self {
            level,
            is_dirty: level >= DIRTY_THRESHOLD,
            needs_cleaning: level >= NEEDS_CLEANING_THRESHOLD,
            status: CleanlinessStatus::from_level(level),
            ..self.clone()
        }
    }

    /// Optimistic placeholder write used while a clean request is in flight.
    pub fn decremented(&self, amount: f64) -> Self {
        self.with_level(self.level - amount.max(0.0))
    }

    /// Snapshot after a full local cleaning at `now`.
    pub fn cleaned_at(&self, now: DateTime<Utc>) -> Self {
        Self {
            last_cleaning_time: Some(now),
            cleaning_streak: self.cleaning_streak.saturating_add(1),
            total_cleanings: self.total_cleanings.saturating_add(1),
            hours_since_cleaning: Some(0.0),
            ..self.with_level(MIN_LEVEL)
        }
    }
}
