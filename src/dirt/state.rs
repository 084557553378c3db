use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::fallback::{self, DegradedEstimate};
use super::mutation::{CleanMutation, MutationLog};
use super::snapshot::DecaySnapshot;
use super::spots::{Spot, SpotGenerator};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SyncState {
    Uninitialized,
    Synced,
    Stale,
}

impl Default for SyncState {
    fn default() -> Self {
        SyncState::Uninitialized
    }
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Uninitialized => "UNINITIALIZED",
            SyncState::Synced => "SYNCED",
            SyncState::Stale => "STALE",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SyncStrategy {
    /// Poll the server and treat its snapshot as the truth.
    Authoritative,
    /// Never poll; estimate everything from local time.
    LocalFallback,
}

impl Default for SyncStrategy {
    fn default() -> Self {
        SyncStrategy::Authoritative
    }
}

impl SyncStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStrategy::Authoritative => "authoritative",
            SyncStrategy::LocalFallback => "localFallback",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "authoritative" | "server" => Some(SyncStrategy::Authoritative),
            "localfallback" | "local-fallback" | "local_fallback" | "local" => {
                Some(SyncStrategy::LocalFallback)
            }
            _ => None,
        }
    }
}

/// Outcome of offering a fetched snapshot to the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied { reset: bool },
    Superseded,
}

/// Everything the engine mutates, guarded by one lock.
pub struct EngineState {
    pub aquarium_id: String,
    pub strategy: SyncStrategy,
    pub sync: SyncState,
    pub snapshot: DecaySnapshot,
    pub spots: Vec<Spot>,
    /// Spot count vouched for by the last successful fetch, minus local cleanings since.
    pub confirmed_spot_count: usize,
    /// Spots cleaned locally since the snapshot's last cleaning time.
    pub cleaned_since_reset: usize,
    pub interaction_count: u64,
    pub mutations: MutationLog,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub pending_reconcile: bool,
    pub reconcile_in_flight: bool,
    pub torn_down: bool,
    next_epoch: u64,
    applied_epoch: u64,
    generator: SpotGenerator,
}

impl EngineState {
    pub fn new(aquarium_id: String, strategy: SyncStrategy, generator: SpotGenerator) -> Self {
        Self {
            aquarium_id,
            strategy,
            sync: SyncState::Uninitialized,
            snapshot: DecaySnapshot::default(),
            spots: Vec::new(),
            confirmed_spot_count: 0,
            cleaned_since_reset: 0,
            interaction_count: 0,
            mutations: MutationLog::default(),
            last_synced_at: None,
            last_error: None,
            pending_reconcile: false,
            reconcile_in_flight: false,
            torn_down: false,
            next_epoch: 1,
            applied_epoch: 0,
            generator,
        }
    }

    /// Tags a snapshot-writing request at the moment it is issued.
    pub fn issue_epoch(&mut self) -> u64 {
        let epoch = self.next_epoch;
        self.next_epoch += 1;
        epoch
    }

    pub fn applied_epoch(&self) -> u64 {
        self.applied_epoch
    }

    /// Whether a write tagged `epoch` would still be the latest one.
    pub fn accepts(&self, epoch: u64) -> bool {
        epoch > self.applied_epoch
    }

    pub fn expected_spot_count(&self, now: DateTime<Utc>) -> usize {
        self.generator
            .config()
            .expected_at(self.snapshot.last_cleaning_time, now)
    }

    pub fn generator(&self) -> &SpotGenerator {
        &self.generator
    }

    /// Seeds state from a cached snapshot without claiming it was confirmed.
    pub fn hydrate(&mut self, snapshot: DecaySnapshot, now: DateTime<Utc>) {
        self.snapshot = snapshot;
        self.cleaned_since_reset = 0;
        self.regrow(now);
    }

    /// Replaces the snapshot wholesale if `epoch` is not superseded, then
    /// brings the spot set in line with it.
    pub fn apply_authoritative(
        &mut self,
        snapshot: DecaySnapshot,
        epoch: u64,
        now: DateTime<Utc>,
    ) -> ApplyOutcome {
        if !self.accepts(epoch) {
            return ApplyOutcome::Superseded;
        }

        // None orders before Some, so a first known cleaning counts as newer.
        let reset = snapshot.last_cleaning_time > self.snapshot.last_cleaning_time;
        if reset {
            let keep = self
                .generator
                .config()
                .expected_at(snapshot.last_cleaning_time, now)
                .min(self.spots.len());
            self.spots = self.spots[..keep].to_vec();
            self.cleaned_since_reset = 0;
        }

        self.snapshot = snapshot;
        self.applied_epoch = epoch;
        self.sync = SyncState::Synced;
        self.last_synced_at = Some(now);
        self.last_error = None;
        self.regrow(now);
        self.confirmed_spot_count = self.spots.len();

        ApplyOutcome::Applied { reset }
    }

    /// Adopts a server-reported level without a refetch. The streak is only
    /// replaced when the server reported one.
    pub fn apply_level(&mut self, level: f64, cleaning_streak: Option<u32>, epoch: u64) -> bool {
        if !self.accepts(epoch) {
            return false;
        }
        let mut snapshot = self.snapshot.with_level(level);
        if let Some(streak) = cleaning_streak {
            snapshot.cleaning_streak = streak;
        }
        self.snapshot = snapshot;
        self.applied_epoch = epoch;
        true
    }

    /// Tops the spot set up from the current snapshot at `now`.
    pub fn regrow(&mut self, now: DateTime<Utc>) {
        let budget = self
            .expected_spot_count(now)
            .saturating_sub(self.cleaned_since_reset);
        self.spots =
            self.generator
                .generate_with_budget(&self.spots, self.snapshot.level, budget, now);
    }

    /// Degraded-mode growth from local time; marks the state stale.
    pub fn degrade(&mut self, estimate_level: bool, now: DateTime<Utc>) -> DegradedEstimate {
        let estimate = fallback::estimate(
            &mut self.generator,
            &self.snapshot,
            &self.spots,
            self.cleaned_since_reset,
            self.confirmed_spot_count,
            estimate_level,
            now,
        );
        if estimate.level != self.snapshot.level {
            self.snapshot = self.snapshot.with_level(estimate.level);
        }
        self.spots = estimate.spots.clone();
        self.sync = SyncState::Stale;
        estimate
    }

    /// Optimistically removes a spot. Returns the removed spot.
    pub fn remove_spot(&mut self, spot_id: &str) -> Option<Spot> {
        let index = self.spots.iter().position(|spot| spot.id == spot_id)?;
        let mut spots = self.spots.clone();
        let removed = spots.remove(index);
        self.spots = spots;
        self.cleaned_since_reset += 1;
        self.confirmed_spot_count = self.confirmed_spot_count.saturating_sub(1);
        Some(removed)
    }

    /// Local-only full cleaning: everything resets to the clean floor.
    pub fn clean_locally(&mut self, now: DateTime<Utc>) {
        self.snapshot = self.snapshot.cleaned_at(now);
        self.spots = Vec::new();
        self.cleaned_since_reset = 0;
        self.confirmed_spot_count = 0;
    }

    pub fn mark_stale(&mut self, error: String) {
        self.sync = SyncState::Stale;
        self.last_error = Some(error);
    }

    pub fn is_cleaning(&self) -> bool {
        !self.mutations.pending().is_empty()
    }

    pub fn to_snapshot(&self, now: DateTime<Utc>) -> EngineSnapshot {
        EngineSnapshot {
            aquarium_id: self.aquarium_id.clone(),
            strategy: self.strategy,
            sync: self.sync,
            stale: self.sync != SyncState::Synced,
            cleaning: self.is_cleaning(),
            snapshot: self.snapshot.clone(),
            spots: self.spots.clone(),
            expected_spot_count: self.expected_spot_count(now),
            confirmed_spot_count: self.confirmed_spot_count,
            cleaned_since_reset: self.cleaned_since_reset,
            interaction_count: self.interaction_count,
            pending_mutations: self.mutations.pending().to_vec(),
            recent_mutations: self.mutations.resolved().to_vec(),
            last_synced_at: self.last_synced_at,
            last_error: self.last_error.clone(),
            pending_reconcile: self.pending_reconcile,
            taken_at: now,
        }
    }
}

/// Read-only copy of the engine state handed to callers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSnapshot {
    pub aquarium_id: String,
    pub strategy: SyncStrategy,
    pub sync: SyncState,
    pub stale: bool,
    pub cleaning: bool,
    pub snapshot: DecaySnapshot,
    pub spots: Vec<Spot>,
    pub expected_spot_count: usize,
    pub confirmed_spot_count: usize,
    pub cleaned_since_reset: usize,
    pub interaction_count: u64,
    pub pending_mutations: Vec<CleanMutation>,
    pub recent_mutations: Vec<CleanMutation>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub pending_reconcile: bool,
    pub taken_at: DateTime<Utc>,
}
