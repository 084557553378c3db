pub mod api;
mod console;
pub mod db;
pub mod dirt;
pub mod inspector;
pub mod settings;
mod utils;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use log::{info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};

use api::HttpDirtApi;
use console::{Command, Console};
use db::Database;
use dirt::DirtEngine;
use inspector::InspectorReport;
use settings::{SettingsStore, SETTINGS_PATH_ENV};

pub use utils::init_logging;

const DEFAULT_DATA_DIR: &str = "aquadirt-data";

fn settings_path() -> PathBuf {
    std::env::var_os(SETTINGS_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR).join("settings.json"))
}

pub fn run() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("aquadirt")
        .build()
        .context("failed to build tokio runtime")?;
    runtime.block_on(run_console())
}

async fn run_console() -> Result<()> {
    let path = settings_path();
    let store = SettingsStore::new(path.clone())?;
    let settings = store.engine().with_env_overrides();
    init_logging(settings.debug);

    info!("Aquadirt starting up (settings at {})", store.path().display());
    if !path.exists() {
        if let Err(err) = store.update_engine(store.engine()) {
            warn!("Could not write default settings: {err:#}");
        }
    }

    let cache_path = settings.cache_path.clone().unwrap_or_else(|| {
        path.parent()
            .map(|dir| dir.join("aquadirt.sqlite3"))
            .unwrap_or_else(|| PathBuf::from("aquadirt.sqlite3"))
    });
    let cache = match Database::new(cache_path) {
        Ok(cache) => Some(cache),
        Err(err) => {
            warn!("Snapshot cache unavailable, falling back to memory: {err:#}");
            match Database::in_memory() {
                Ok(cache) => Some(cache),
                Err(err) => {
                    warn!("Running without a snapshot cache: {err:#}");
                    None
                }
            }
        }
    };

    let api = HttpDirtApi::new(&settings.base_url, settings.request_timeout())?;
    let debug = settings.debug;
    let engine = DirtEngine::new(settings, Arc::new(api), cache.clone());
    engine.start().await;

    if debug {
        spawn_inspector_feed(&engine);
    }

    let console = Console::new(engine.clone(), cache);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            line = lines.next_line() => {
                let line = match line.context("failed to read stdin")? {
                    Some(line) => line,
                    None => break,
                };
                if line.trim().is_empty() {
                    continue;
                }

                match Command::parse(&line) {
                    Ok(Command::Quit) => break,
                    Ok(command) => match console.handle(command).await {
                        Ok(output) => output.iter().for_each(|line| println!("{line}")),
                        Err(err) => println!("error: {err}"),
                    },
                    Err(err) => println!("{err}"),
                }
            }
        }
    }

    console.engine().shutdown().await;
    Ok(())
}

/// Logs an inspector summary every time the engine publishes.
fn spawn_inspector_feed(engine: &DirtEngine) {
    let mut updates = engine.subscribe();
    tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let snapshot = updates.borrow_and_update().clone();
            let report = InspectorReport::capture(&snapshot, snapshot.taken_at);
            for line in report.render() {
                log::debug!("{line}");
            }
        }
    });
}
