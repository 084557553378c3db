use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex as StdMutex},
};

use chrono::{DateTime, Utc};
use rand::{rngs::StdRng, SeedableRng};
use serde::Serialize;
use tokio::sync::{watch, Mutex};

use crate::{
    api::{CleanError, DirtApi, DirtError},
    db::{Database, SpotInteraction},
    settings::EngineSettings,
};

use super::{
    clock::{Clock, SystemClock},
    mutation::{CleanMutation, MutationStatus},
    schedule::{IntervalTask, ScheduledTask, TickFn, TickFuture},
    snapshot::DecaySnapshot,
    spots::{SafeArea, Spot, SpotGenerator, SpotSequence},
    state::{ApplyOutcome, EngineSnapshot, EngineState, SyncState, SyncStrategy},
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

type CleanVerdict = Option<Result<CleanOutcome, CleanError>>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanOutcome {
    pub spot_id: String,
    pub status: MutationStatus,
    pub new_level: f64,
    pub is_complete_cleaning: bool,
    pub cleaning_streak: u32,
    pub remaining_spots: usize,
    pub reconcile_scheduled: bool,
    /// False when resolved locally without a server round trip.
    pub server_confirmed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    Synced { reset: bool, spots: usize },
    /// A newer snapshot write landed while this fetch was in flight.
    Superseded,
    /// Another reconciliation was already in flight.
    Skipped,
    /// No authoritative data; spots were estimated locally.
    Degraded { error: Option<DirtError>, spots: usize },
    /// The engine was torn down before the fetch resolved.
    Discarded,
}

/// Everything the engine needs from its host. `DirtEngine::new` fills this
/// with production defaults; tests swap in manual clocks and tasks.
pub struct EngineParts {
    pub settings: EngineSettings,
    pub api: Arc<dyn DirtApi>,
    pub cache: Option<Database>,
    pub clock: Arc<dyn Clock>,
    pub reconcile_task: Box<dyn ScheduledTask>,
    pub growth_task: Box<dyn ScheduledTask>,
    pub rng_seed: Option<u64>,
}

impl EngineParts {
    pub fn new(settings: EngineSettings, api: Arc<dyn DirtApi>) -> Self {
        let reconcile_task = Box::new(IntervalTask::new("reconcile", settings.poll_interval()));
        let growth_task = Box::new(IntervalTask::new("local-growth", settings.growth_interval()));
        Self {
            settings,
            api,
            cache: None,
            clock: Arc::new(SystemClock),
            reconcile_task,
            growth_task,
            rng_seed: None,
        }
    }
}

struct EngineInner {
    state: Mutex<EngineState>,
    in_flight: StdMutex<HashMap<String, watch::Receiver<CleanVerdict>>>,
    updates: watch::Sender<EngineSnapshot>,
    settings: EngineSettings,
    api: Arc<dyn DirtApi>,
    cache: Option<Database>,
    clock: Arc<dyn Clock>,
    reconcile_task: Box<dyn ScheduledTask>,
    growth_task: Box<dyn ScheduledTask>,
}

/// Keeps the local spot set for one aquarium in step with the dirt service.
#[derive(Clone)]
pub struct DirtEngine {
    inner: Arc<EngineInner>,
}

impl DirtEngine {
    pub fn new(settings: EngineSettings, api: Arc<dyn DirtApi>, cache: Option<Database>) -> Self {
        let mut parts = EngineParts::new(settings, api);
        parts.cache = cache;
        Self::from_parts(parts)
    }

    pub fn from_parts(parts: EngineParts) -> Self {
        let settings = parts.settings;
        let sequence = SpotSequence::new(&settings.aquarium_id);
        let area = SafeArea::from_viewport(&settings.viewport);
        let rng = match parts.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let generator = SpotGenerator::with_rng(settings.spot_config(), area, sequence, rng);
        let state = EngineState::new(settings.aquarium_id.clone(), settings.strategy, generator);
        let (updates, _) = watch::channel(state.to_snapshot(parts.clock.now()));

        Self {
            inner: Arc::new(EngineInner {
                state: Mutex::new(state),
                in_flight: StdMutex::new(HashMap::new()),
                updates,
                settings,
                api: parts.api,
                cache: parts.cache,
                clock: parts.clock,
                reconcile_task: parts.reconcile_task,
                growth_task: parts.growth_task,
            }),
        }
    }

    pub fn aquarium_id(&self) -> &str {
        &self.inner.settings.aquarium_id
    }

    pub fn strategy(&self) -> SyncStrategy {
        self.inner.settings.strategy
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.inner.settings
    }

    /// Seeds from the cache, then starts the periodic tasks. The first
    /// reconciliation runs right away.
    pub async fn start(&self) {
        self.hydrate().await;

        if self.strategy() == SyncStrategy::Authoritative {
            self.inner
                .reconcile_task
                .start(self.tick_fn(|engine| async move {
                    engine.reconcile_once().await;
                }));
        }
        self.inner.growth_task.start(self.tick_fn(|engine| async move {
            engine.grow_once().await;
        }));

        log_info!(
            "Dirt engine started for aquarium {} ({})",
            self.aquarium_id(),
            self.strategy().as_str()
        );
    }

    /// Stops every timer. Results still in flight are dropped on arrival.
    pub async fn shutdown(&self) {
        {
            let mut state = self.inner.state.lock().await;
            if state.torn_down {
                return;
            }
            state.torn_down = true;
        }
        self.inner.reconcile_task.stop();
        self.inner.growth_task.stop();
        log_info!("Dirt engine for aquarium {} shut down", self.aquarium_id());
    }

    pub async fn get_snapshot(&self) -> EngineSnapshot {
        let state = self.inner.state.lock().await;
        state.to_snapshot(self.inner.clock.now())
    }

    pub async fn spots(&self) -> Vec<Spot> {
        self.inner.state.lock().await.spots.clone()
    }

    pub async fn sync_state(&self) -> SyncState {
        self.inner.state.lock().await.sync
    }

    /// Receives a fresh [`EngineSnapshot`] after every state change.
    pub fn subscribe(&self) -> watch::Receiver<EngineSnapshot> {
        self.inner.updates.subscribe()
    }

    /// Asks for a full reconciliation as soon as possible.
    pub async fn request_reconcile(&self) {
        {
            let mut state = self.inner.state.lock().await;
            if state.torn_down {
                return;
            }
            state.pending_reconcile = true;
            self.publish(&state);
        }
        match self.strategy() {
            SyncStrategy::Authoritative => self.inner.reconcile_task.tick_now(),
            // No poller runs in local mode.
            SyncStrategy::LocalFallback => {
                self.reconcile_once().await;
            }
        }
    }

    /// One reconciliation pass: fetch, replace the snapshot, regrow spots.
    /// On failure the last snapshot stays and spots are estimated locally.
    pub async fn reconcile_once(&self) -> ReconcileOutcome {
        let epoch = {
            let mut state = self.inner.state.lock().await;
            if state.torn_down {
                return ReconcileOutcome::Discarded;
            }
            if state.reconcile_in_flight {
                log_debug!("Reconciliation already in flight; skipping tick");
                return ReconcileOutcome::Skipped;
            }
            state.pending_reconcile = false;

            if state.strategy == SyncStrategy::LocalFallback {
                let now = self.inner.clock.now();
                let estimate = state.degrade(true, now);
                let snapshot = state.snapshot.clone();
                self.publish(&state);
                drop(state);
                self.cache_snapshot(&snapshot, now).await;
                return ReconcileOutcome::Degraded {
                    error: None,
                    spots: estimate.spots.len(),
                };
            }

            state.reconcile_in_flight = true;
            state.issue_epoch()
        };

        let result = self.inner.api.fetch_dirt(self.aquarium_id()).await;
        let now = self.inner.clock.now();

        let (outcome, fetched) = {
            let mut state = self.inner.state.lock().await;
            state.reconcile_in_flight = false;
            if state.torn_down {
                log_debug!("Discarding fetch result for torn-down engine");
                return ReconcileOutcome::Discarded;
            }

            let resolved = match result {
                Ok(snapshot) => {
                    let snapshot = self.apply_level_floor(snapshot);
                    match state.apply_authoritative(snapshot.clone(), epoch, now) {
                        ApplyOutcome::Applied { reset } => {
                            if reset {
                                log_info!(
                                    "Aquarium {} was cleaned; spot set reset to {}",
                                    state.aquarium_id,
                                    state.spots.len()
                                );
                            }
                            (
                                ReconcileOutcome::Synced {
                                    reset,
                                    spots: state.spots.len(),
                                },
                                Some(snapshot),
                            )
                        }
                        ApplyOutcome::Superseded => {
                            log_debug!("Fetch epoch {epoch} superseded; result dropped");
                            (ReconcileOutcome::Superseded, None)
                        }
                    }
                }
                Err(err) => {
                    log_warn!(
                        "Dirt fetch for aquarium {} failed ({}): {err}",
                        state.aquarium_id,
                        err.kind()
                    );
                    state.mark_stale(err.to_string());
                    let estimate = state.degrade(false, now);
                    (
                        ReconcileOutcome::Degraded {
                            error: Some(err),
                            spots: estimate.spots.len(),
                        },
                        None,
                    )
                }
            };
            self.publish(&state);
            resolved
        };

        if let Some(snapshot) = fetched {
            self.cache_snapshot(&snapshot, now).await;
        }
        outcome
    }

    /// Hourly growth check from local time. Authoritative engines only
    /// estimate while stale; local engines always do.
    pub async fn grow_once(&self) -> usize {
        let now = self.inner.clock.now();
        let mut state = self.inner.state.lock().await;
        if state.torn_down {
            return state.spots.len();
        }

        let before = state.spots.len();
        let persist = match (state.strategy, state.sync) {
            (SyncStrategy::LocalFallback, _) => {
                state.degrade(true, now);
                Some(state.snapshot.clone())
            }
            (SyncStrategy::Authoritative, SyncState::Stale) => {
                state.degrade(false, now);
                None
            }
            (SyncStrategy::Authoritative, _) => {
                state.regrow(now);
                None
            }
        };

        let after = state.spots.len();
        if after != before {
            log_debug!("Local growth: {before} -> {after} spots");
        }
        self.publish(&state);
        drop(state);

        if let Some(snapshot) = persist {
            self.cache_snapshot(&snapshot, now).await;
        }
        after
    }

    /// Cleans one spot: removed locally at once, then confirmed with the
    /// server. A second call for a spot already being cleaned waits for the
    /// first call's verdict instead of sending another request.
    pub async fn clean(&self, spot_id: &str) -> Result<CleanOutcome, CleanError> {
        let now = self.inner.clock.now();

        let (mutation, verdict_tx, verdict_rx) = {
            let mut state = self.inner.state.lock().await;
            if state.torn_down {
                return Err(CleanError::Shutdown);
            }

            let in_flight = self.in_flight_receiver(spot_id);
            if let Some(rx) = in_flight {
                drop(state);
                log_debug!("Spot {spot_id} already being cleaned; joining in-flight request");
                return wait_for_verdict(rx).await;
            }

            if state.remove_spot(spot_id).is_none() {
                return Err(CleanError::UnknownSpot(spot_id.to_string()));
            }

            let level_before = state.snapshot.level;
            state.snapshot = state.snapshot.decremented(self.inner.settings.clean_decrement);
            state.interaction_count += 1;

            let epoch = state.issue_epoch();
            let mutation =
                CleanMutation::begin(spot_id, epoch, level_before, state.snapshot.level, now);
            state.mutations.push(mutation.clone());

            let (verdict_tx, verdict_rx) = watch::channel::<CleanVerdict>(None);
            self.track_in_flight(spot_id, verdict_rx.clone());
            self.publish(&state);
            (mutation, verdict_tx, verdict_rx)
        };

        // Everything after the removal runs detached, so a caller that stops
        // waiting cannot strand the mutation in `Pending`.
        let engine = self.clone();
        tokio::spawn(async move {
            engine.record_interaction(&mutation).await;
            let verdict = engine.resolve_clean(&mutation).await;
            engine.forget_in_flight(&mutation.spot_id);
            let _ = verdict_tx.send(Some(verdict));
        });

        wait_for_verdict(verdict_rx).await
    }

    /// `POST initialize`, followed by an immediate reconciliation.
    pub async fn initialize(
        &self,
        config: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, DirtError> {
        let data = self.inner.api.initialize(self.aquarium_id(), config).await?;
        log_info!("Aquarium {} initialized on the server", self.aquarium_id());
        self.request_reconcile().await;
        Ok(data)
    }

    async fn resolve_clean(&self, mutation: &CleanMutation) -> Result<CleanOutcome, CleanError> {
        let outcome = match self.strategy() {
            SyncStrategy::Authoritative => self.confirm_with_server(mutation).await,
            SyncStrategy::LocalFallback => self.confirm_locally(mutation).await,
        };

        let settled = {
            let state = self.inner.state.lock().await;
            state
                .mutations
                .resolved()
                .iter()
                .rev()
                .find(|m| m.id == mutation.id)
                .cloned()
        };
        if let Some(settled) = settled {
            self.record_interaction(&settled).await;
        }
        outcome
    }

    async fn confirm_with_server(
        &self,
        mutation: &CleanMutation,
    ) -> Result<CleanOutcome, CleanError> {
        let response = self
            .inner
            .api
            .clean_spot(self.aquarium_id(), &mutation.spot_id)
            .await;
        let now = self.inner.clock.now();

        let mut state = self.inner.state.lock().await;
        if state.torn_down {
            state.mutations.abandon_pending();
            return Err(CleanError::Shutdown);
        }

        match response {
            Ok(response) => {
                state.mutations.settle(&mutation.id, |m| m.confirm(now));

                let reconcile_scheduled = response.is_complete_cleaning;
                if response.is_complete_cleaning {
                    state.apply_level(response.new_dirt_level, response.cleaning_streak, mutation.epoch);
                    // Streak follows the server even if a newer level already landed.
                    if let Some(streak) = response.cleaning_streak {
                        state.snapshot.cleaning_streak = streak;
                    }
                    state.pending_reconcile = true;
                } else if !state.apply_level(
                    response.new_dirt_level,
                    response.cleaning_streak,
                    mutation.epoch,
                ) {
                    log_debug!(
                        "Clean result for {} superseded by a newer snapshot",
                        mutation.spot_id
                    );
                }

                let outcome = CleanOutcome {
                    spot_id: mutation.spot_id.clone(),
                    status: MutationStatus::Confirmed,
                    new_level: state.snapshot.level,
                    is_complete_cleaning: response.is_complete_cleaning,
                    cleaning_streak: state.snapshot.cleaning_streak,
                    remaining_spots: state.spots.len(),
                    reconcile_scheduled,
                    server_confirmed: true,
                };
                self.publish(&state);
                drop(state);

                if reconcile_scheduled {
                    log_info!(
                        "Aquarium {} fully cleaned; scheduling reconciliation",
                        self.aquarium_id()
                    );
                    self.inner.reconcile_task.tick_now();
                }
                Ok(outcome)
            }
            Err(err) => {
                log_error!(
                    "Clean request for spot {} failed: {err}",
                    mutation.spot_id
                );
                state
                    .mutations
                    .settle(&mutation.id, |m| m.reject(now, err.to_string()));
                state.mark_stale(err.to_string());
                self.publish(&state);
                Err(CleanError::Request {
                    spot_id: mutation.spot_id.clone(),
                    source: err,
                })
            }
        }
    }

    async fn confirm_locally(&self, mutation: &CleanMutation) -> Result<CleanOutcome, CleanError> {
        let now = self.inner.clock.now();
        let mut state = self.inner.state.lock().await;
        if state.torn_down {
            state.mutations.abandon_pending();
            return Err(CleanError::Shutdown);
        }

        state.mutations.settle(&mutation.id, |m| m.confirm(now));
        let complete = state.spots.is_empty();
        if complete {
            state.clean_locally(now);
        }

        let outcome = CleanOutcome {
            spot_id: mutation.spot_id.clone(),
            status: MutationStatus::Confirmed,
            new_level: state.snapshot.level,
            is_complete_cleaning: complete,
            cleaning_streak: state.snapshot.cleaning_streak,
            remaining_spots: state.spots.len(),
            reconcile_scheduled: false,
            server_confirmed: false,
        };
        let snapshot = state.snapshot.clone();
        self.publish(&state);
        drop(state);

        self.cache_snapshot(&snapshot, now).await;
        Ok(outcome)
    }

    async fn hydrate(&self) {
        let now = self.inner.clock.now();
        let cached = match &self.inner.cache {
            Some(cache) => match cache.load_snapshot(self.aquarium_id()).await {
                Ok(entry) => entry,
                Err(err) => {
                    log_warn!("Failed to read cached snapshot: {err:#}");
                    None
                }
            },
            None => None,
        };

        let mut state = self.inner.state.lock().await;
        if state.sync != SyncState::Uninitialized || state.applied_epoch() > 0 {
            return;
        }

        let local = state.strategy == SyncStrategy::LocalFallback;
        let mut seeded = None;
        match cached {
            // Local engines have nothing else to go on, so any age will do.
            Some(entry) if local || entry.is_fresh(self.inner.settings.cache_freshness(), now) => {
                log_info!(
                    "Seeding aquarium {} from cache ({}s old)",
                    state.aquarium_id,
                    entry.age(now).num_seconds()
                );
                state.hydrate(entry.snapshot, now);
            }
            Some(entry) => {
                log_debug!(
                    "Ignoring cached snapshot for {} ({}s old)",
                    state.aquarium_id,
                    entry.age(now).num_seconds()
                );
            }
            None if local => {
                // First local run: the tank counts as freshly cleaned.
                let fresh = DecaySnapshot::from_level(0.0, Some(now));
                state.hydrate(fresh.clone(), now);
                seeded = Some(fresh);
            }
            None => {}
        }
        self.publish(&state);
        drop(state);

        if let Some(snapshot) = seeded {
            self.cache_snapshot(&snapshot, now).await;
        }
    }

    fn apply_level_floor(&self, snapshot: DecaySnapshot) -> DecaySnapshot {
        match self.inner.settings.min_level_override {
            Some(floor) if snapshot.level < floor => snapshot.with_level(floor),
            _ => snapshot,
        }
    }

    fn publish(&self, state: &EngineState) {
        self.inner
            .updates
            .send_replace(state.to_snapshot(self.inner.clock.now()));
    }

    async fn cache_snapshot(&self, snapshot: &DecaySnapshot, now: DateTime<Utc>) {
        if let Some(cache) = &self.inner.cache {
            if let Err(err) = cache.upsert_snapshot(self.aquarium_id(), snapshot, now).await {
                log_warn!("Failed to cache snapshot: {err:#}");
            }
        }
    }

    async fn record_interaction(&self, mutation: &CleanMutation) {
        if let Some(cache) = &self.inner.cache {
            let interaction = SpotInteraction::from_mutation(self.aquarium_id(), mutation);
            if let Err(err) = cache.record_interaction(&interaction).await {
                log_warn!("Failed to record spot interaction: {err:#}");
            }
        }
    }

    fn in_flight_receiver(&self, spot_id: &str) -> Option<watch::Receiver<CleanVerdict>> {
        let guard = match self.inner.in_flight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.get(spot_id).cloned()
    }

    fn track_in_flight(&self, spot_id: &str, rx: watch::Receiver<CleanVerdict>) {
        let mut guard = match self.inner.in_flight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.insert(spot_id.to_string(), rx);
    }

    fn forget_in_flight(&self, spot_id: &str) {
        let mut guard = match self.inner.in_flight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.remove(spot_id);
    }

    fn tick_fn<F, Fut>(&self, job: F) -> TickFn
    where
        F: Fn(DirtEngine) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        // Tasks live inside the engine, so they only hold a weak handle back.
        let weak = Arc::downgrade(&self.inner);
        let job = Arc::new(job);
        Arc::new(move || -> TickFuture {
            let weak = weak.clone();
            let job = Arc::clone(&job);
            Box::pin(async move {
                if let Some(inner) = weak.upgrade() {
                    (*job)(DirtEngine { inner }).await;
                }
            })
        })
    }
}

async fn wait_for_verdict(
    mut rx: watch::Receiver<CleanVerdict>,
) -> Result<CleanOutcome, CleanError> {
    match rx.wait_for(|verdict| verdict.is_some()).await {
        Ok(verdict) => verdict.clone().unwrap_or(Err(CleanError::Shutdown)),
        Err(_) => Err(CleanError::Shutdown),
    }
}
