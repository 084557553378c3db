//! Timer seam for the engine's periodic work.
//!
//! The engine never touches `tokio::time` directly; it hands a tick closure to
//! a [`ScheduledTask`]. [`IntervalTask`] drives it from a tokio interval, and
//! [`ManualTask`] lets a host (or a test) decide exactly when ticks happen.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use tokio::{
    sync::Notify,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

const ENABLE_LOGS: bool = true;

use crate::log_debug;

pub type TickFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
pub type TickFn = Arc<dyn Fn() -> TickFuture + Send + Sync + 'static>;

pub trait ScheduledTask: Send + Sync {
    /// Starts ticking. The first tick runs immediately. Restarting replaces
    /// the previous job.
    fn start(&self, tick: TickFn);

    /// Stops ticking. A tick already running finishes but no new one starts.
    fn stop(&self);

    /// Requests an extra tick as soon as possible.
    fn tick_now(&self);

    fn is_running(&self) -> bool;
}

struct Running {
    handle: JoinHandle<()>,
    cancel_token: CancellationToken,
}

pub struct IntervalTask {
    name: &'static str,
    period: Duration,
    wake: Arc<Notify>,
    running: Mutex<Option<Running>>,
}

impl IntervalTask {
    pub fn new(name: &'static str, period: Duration) -> Self {
        Self {
            name,
            period,
            wake: Arc::new(Notify::new()),
            running: Mutex::new(None),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    fn take_running(&self) -> Option<Running> {
        match self.running.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

impl ScheduledTask for IntervalTask {
    fn start(&self, tick: TickFn) {
        if let Some(previous) = self.take_running() {
            previous.cancel_token.cancel();
        }

        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();
        let wake = self.wake.clone();
        let period = self.period;
        let name = self.name;

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                    _ = wake.notified() => {
                        log_debug!("{name} woken early");
                    }
                }

                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tick() => {}
                }
            }

            log_debug!("{name} task stopped");
        });

        let mut guard = match self.running.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(Running {
            handle,
            cancel_token,
        });
    }

    fn stop(&self) {
        if let Some(running) = self.take_running() {
            running.cancel_token.cancel();
            // The loop exits at its next await point; aborting covers a tick
            // that never yields back.
            running.handle.abort();
        }
    }

    fn tick_now(&self) {
        self.wake.notify_one();
    }

    fn is_running(&self) -> bool {
        match self.running.lock() {
            Ok(guard) => guard.is_some(),
            Err(poisoned) => poisoned.into_inner().is_some(),
        }
    }
}

impl Drop for IntervalTask {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A task that only ticks when told to. `tick_now` records the request;
/// `fire` runs the job inline.
#[derive(Default)]
pub struct ManualTask {
    job: Mutex<Option<TickFn>>,
    requested: AtomicU64,
    fired: AtomicU64,
}

impl ManualTask {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the started job once. Returns false when stopped.
    pub async fn fire(&self) -> bool {
        let job = match self.job.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        match job {
            Some(job) => {
                self.fired.fetch_add(1, Ordering::SeqCst);
                job().await;
                true
            }
            None => false,
        }
    }

    /// Number of `tick_now` requests seen so far.
    pub fn requested(&self) -> u64 {
        self.requested.load(Ordering::SeqCst)
    }

    pub fn fired(&self) -> u64 {
        self.fired.load(Ordering::SeqCst)
    }
}

impl ScheduledTask for ManualTask {
    fn start(&self, tick: TickFn) {
        let mut guard = match self.job.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(tick);
    }

    fn stop(&self) {
        let mut guard = match self.job.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = None;
    }

    fn tick_now(&self) {
        self.requested.fetch_add(1, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        match self.job.lock() {
            Ok(guard) => guard.is_some(),
            Err(poisoned) => poisoned.into_inner().is_some(),
        }
    }
}

impl<T: ScheduledTask + ?Sized> ScheduledTask for Arc<T> {
    fn start(&self, tick: TickFn) {
        (**self).start(tick)
    }

    fn stop(&self) {
        (**self).stop()
    }

    fn tick_now(&self) {
        (**self).tick_now()
    }

    fn is_running(&self) -> bool {
        (**self).is_running()
    }
}
