use std::{
    path::PathBuf,
    sync::{mpsc, Arc},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use log::{error, info};
use rusqlite::Connection;
use tokio::sync::oneshot;

use super::migrations::run_migrations;

type CacheJob = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum Location {
    File(PathBuf),
    Memory,
}

impl Location {
    fn open(&self) -> Result<Connection> {
        let mut conn = match self {
            Location::File(path) => Connection::open(path),
            Location::Memory => Connection::open_in_memory(),
        }
        .context("failed to open SQLite cache")?;

        if let Location::File(_) = self {
            if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                error!("Failed to enable WAL mode: {err}");
            }
        }

        run_migrations(&mut conn).context("failed to run cache migrations")?;
        Ok(conn)
    }

    fn describe(&self) -> String {
        match self {
            Location::File(path) => path.display().to_string(),
            Location::Memory => "memory".to_string(),
        }
    }
}

/// The thread that owns the connection. Closing the job queue ends its loop.
struct CacheWorker {
    jobs: Option<mpsc::Sender<CacheJob>>,
    thread: Option<JoinHandle<()>>,
}

impl CacheWorker {
    fn start(location: Location) -> Result<Self> {
        let (jobs_tx, jobs_rx) = mpsc::channel::<CacheJob>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let label = location.describe();

        let thread = thread::Builder::new()
            .name("aquadirt-cache".into())
            .spawn(move || {
                let mut conn = match location.open() {
                    Ok(conn) => conn,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                if ready_tx.send(Ok(())).is_err() {
                    return;
                }

                for job in jobs_rx {
                    job(&mut conn);
                }
                info!("Cache thread shutting down");
            })
            .context("failed to spawn cache worker thread")?;

        ready_rx
            .recv()
            .context("cache worker exited before signaling readiness")??;
        info!("Snapshot cache ready ({label})");

        Ok(Self {
            jobs: Some(jobs_tx),
            thread: Some(thread),
        })
    }

    fn submit(&self, job: CacheJob) -> Result<()> {
        self.jobs
            .as_ref()
            .ok_or_else(|| anyhow!("cache worker already stopped"))?
            .send(job)
            .map_err(|_| anyhow!("cache thread is no longer accepting work"))
    }
}

impl Drop for CacheWorker {
    fn drop(&mut self) {
        drop(self.jobs.take());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Cache thread panicked");
            }
        }
    }
}

/// Local SQLite cache, owned by a dedicated thread. Callers submit closures
/// and await their result.
#[derive(Clone)]
pub struct Database {
    worker: Arc<CacheWorker>,
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create cache directory {}", parent.display())
            })?;
        }
        Ok(Self {
            worker: Arc::new(CacheWorker::start(Location::File(db_path))?),
        })
    }

    /// Cache that lives only as long as this handle; handy for hosts
    /// without a writable data directory.
    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            worker: Arc::new(CacheWorker::start(Location::Memory)?),
        })
    }

    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.worker.submit(Box::new(move |conn| {
            // The caller may have stopped waiting; the write still lands.
            let _ = reply_tx.send(task(conn));
        }))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("cache thread terminated unexpectedly"))?
    }
}
