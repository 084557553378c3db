#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use aquadirt_lib::{
    api::{CleanSpotResponse, DirtApi, DirtError},
    db::Database,
    dirt::{
        Clock, DecaySnapshot, DirtEngine, EngineParts, ManualClock, ManualTask, ScheduledTask,
    },
    settings::EngineSettings,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::sync::Semaphore;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

pub fn snapshot(level: f64, cleaned_hours_ago: f64) -> DecaySnapshot {
    let minutes = (cleaned_hours_ago * 60.0).round() as i64;
    DecaySnapshot::from_level(level, Some(t0() - Duration::minutes(minutes)))
}

pub fn partial(level: f64) -> CleanSpotResponse {
    CleanSpotResponse {
        new_dirt_level: level,
        is_complete_cleaning: false,
        cleaning_streak: None,
    }
}

pub fn complete(streak: u32) -> CleanSpotResponse {
    CleanSpotResponse {
        new_dirt_level: 0.0,
        is_complete_cleaning: true,
        cleaning_streak: Some(streak),
    }
}

/// Scripted dirt service. Queued replies are used first, then the default.
pub struct MockApi {
    fetches: Mutex<VecDeque<Result<DecaySnapshot, DirtError>>>,
    default_fetch: Mutex<Result<DecaySnapshot, DirtError>>,
    cleans: Mutex<VecDeque<Result<CleanSpotResponse, DirtError>>>,
    fetch_gate: Semaphore,
    clean_gate: Semaphore,
    fetch_calls: AtomicUsize,
    clean_calls: AtomicUsize,
    cleaned_spots: Mutex<Vec<String>>,
}

impl MockApi {
    pub fn new(default_fetch: Result<DecaySnapshot, DirtError>) -> Self {
        Self {
            fetches: Mutex::new(VecDeque::new()),
            default_fetch: Mutex::new(default_fetch),
            cleans: Mutex::new(VecDeque::new()),
            fetch_gate: Semaphore::new(Semaphore::MAX_PERMITS),
            clean_gate: Semaphore::new(Semaphore::MAX_PERMITS),
            fetch_calls: AtomicUsize::new(0),
            clean_calls: AtomicUsize::new(0),
            cleaned_spots: Mutex::new(Vec::new()),
        }
    }

    pub fn unreachable() -> Self {
        Self::new(Err(DirtError::network("connection refused")))
    }

    /// Fetches block until [`MockApi::release_fetches`] is called.
    pub fn hold_fetches(mut self) -> Self {
        self.fetch_gate = Semaphore::new(0);
        self
    }

    /// Clean requests block until [`MockApi::release_cleans`] is called.
    pub fn hold_cleans(mut self) -> Self {
        self.clean_gate = Semaphore::new(0);
        self
    }

    pub fn release_fetches(&self, n: usize) {
        self.fetch_gate.add_permits(n);
    }

    pub fn release_cleans(&self, n: usize) {
        self.clean_gate.add_permits(n);
    }

    pub fn queue_fetch(&self, reply: Result<DecaySnapshot, DirtError>) {
        self.fetches.lock().unwrap().push_back(reply);
    }

    pub fn set_default_fetch(&self, reply: Result<DecaySnapshot, DirtError>) {
        *self.default_fetch.lock().unwrap() = reply;
    }

    pub fn queue_clean(&self, reply: Result<CleanSpotResponse, DirtError>) {
        self.cleans.lock().unwrap().push_back(reply);
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn clean_calls(&self) -> usize {
        self.clean_calls.load(Ordering::SeqCst)
    }

    pub fn cleaned_spots(&self) -> Vec<String> {
        self.cleaned_spots.lock().unwrap().clone()
    }
}

#[async_trait]
impl DirtApi for MockApi {
    async fn fetch_dirt(&self, _aquarium_id: &str) -> Result<DecaySnapshot, DirtError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.fetch_gate.acquire().await.unwrap().forget();
        let queued = self.fetches.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| self.default_fetch.lock().unwrap().clone())
    }

    async fn clean_spot(
        &self,
        _aquarium_id: &str,
        spot_id: &str,
    ) -> Result<CleanSpotResponse, DirtError> {
        self.clean_calls.fetch_add(1, Ordering::SeqCst);
        self.clean_gate.acquire().await.unwrap().forget();
        self.cleaned_spots.lock().unwrap().push(spot_id.to_string());
        let queued = self.cleans.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| Ok(partial(50.0)))
    }

    async fn initialize(
        &self,
        aquarium_id: &str,
        config: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, DirtError> {
        Ok(serde_json::json!({ "aquarium_id": aquarium_id, "config": config }))
    }
}

/// An engine wired to manual timers, a manual clock and a seeded rng.
pub struct Harness {
    pub engine: DirtEngine,
    pub api: Arc<MockApi>,
    pub clock: Arc<ManualClock>,
    pub reconcile: Arc<ManualTask>,
    pub growth: Arc<ManualTask>,
}

impl Harness {
    pub fn new(api: MockApi) -> Self {
        Self::with(api, EngineSettings::default(), None)
    }

    pub fn with(api: MockApi, settings: EngineSettings, cache: Option<Database>) -> Self {
        Self::at(api, settings, cache, t0())
    }

    pub fn at(
        api: MockApi,
        settings: EngineSettings,
        cache: Option<Database>,
        now: DateTime<Utc>,
    ) -> Self {
        let api = Arc::new(api);
        let clock = Arc::new(ManualClock::new(now));
        let reconcile = Arc::new(ManualTask::new());
        let growth = Arc::new(ManualTask::new());

        let mut parts = EngineParts::new(settings, api.clone());
        parts.cache = cache;
        parts.clock = clock.clone() as Arc<dyn Clock>;
        parts.reconcile_task = Box::new(reconcile.clone()) as Box<dyn ScheduledTask>;
        parts.growth_task = Box::new(growth.clone()) as Box<dyn ScheduledTask>;
        parts.rng_seed = Some(7);

        Self {
            engine: DirtEngine::from_parts(parts),
            api,
            clock,
            reconcile,
            growth,
        }
    }

    /// Starts the engine and runs the first reconciliation tick.
    pub async fn start_and_sync(&self) {
        self.engine.start().await;
        assert!(self.reconcile.fire().await, "reconcile task should be started");
    }
}

/// Yields to the runtime until `condition` holds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition never became true");
}
