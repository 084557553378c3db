use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, sync::RwLock, time::Duration};

use crate::dirt::{
    spots::{SpotConfig, Viewport},
    state::SyncStrategy,
};

pub const SETTINGS_PATH_ENV: &str = "AQUADIRT_SETTINGS";
const BASE_URL_ENV: &str = "AQUADIRT_BASE_URL";
const AQUARIUM_ID_ENV: &str = "AQUADIRT_AQUARIUM_ID";
const STRATEGY_ENV: &str = "AQUADIRT_STRATEGY";
const DEBUG_ENV: &str = "AQUADIRT_DEBUG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    pub base_url: String,
    pub aquarium_id: String,
    pub strategy: SyncStrategy,
    pub poll_interval_secs: u64,
    pub growth_interval_secs: u64,
    pub grace_period_hours: f64,
    pub hours_per_spot: f64,
    pub max_spots: usize,
    /// Placeholder level drop applied the moment a spot is cleaned.
    pub clean_decrement: f64,
    pub cache_freshness_secs: u64,
    pub request_timeout_secs: u64,
    pub cache_path: Option<PathBuf>,
    pub viewport: Viewport,
    /// Floor applied to fetched levels. Unset in production.
    pub min_level_override: Option<f64>,
    pub debug: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3001/api".into(),
            aquarium_id: "1".into(),
            strategy: SyncStrategy::Authoritative,
            poll_interval_secs: 30,
            growth_interval_secs: 60 * 60,
            grace_period_hours: 4.0,
            hours_per_spot: 1.0,
            max_spots: 8,
            clean_decrement: 5.0,
            cache_freshness_secs: 6 * 60 * 60,
            request_timeout_secs: 10,
            cache_path: None,
            viewport: Viewport::default(),
            min_level_override: None,
            debug: false,
        }
    }
}

impl EngineSettings {
    pub fn spot_config(&self) -> SpotConfig {
        SpotConfig {
            grace_period_hours: self.grace_period_hours.max(0.0),
            hours_per_spot: self.hours_per_spot,
            max_spots: self.max_spots,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn growth_interval(&self) -> Duration {
        Duration::from_secs(self.growth_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn cache_freshness(&self) -> chrono::Duration {
        // chrono stores milliseconds in an i64; larger windows saturate.
        let secs = i64::try_from(self.cache_freshness_secs)
            .unwrap_or(i64::MAX)
            .min(i64::MAX / 1000);
        chrono::Duration::seconds(secs)
    }

    /// Applies `AQUADIRT_*` environment overrides on top of the file values.
    pub fn with_env_overrides(mut self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok());
        self
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(base_url) = lookup(BASE_URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.base_url = base_url;
        }
        if let Some(aquarium_id) = lookup(AQUARIUM_ID_ENV).filter(|v| !v.trim().is_empty()) {
            self.aquarium_id = aquarium_id;
        }
        if let Some(strategy) = lookup(STRATEGY_ENV) {
            match SyncStrategy::parse(&strategy) {
                Some(parsed) => self.strategy = parsed,
                None => log::warn!("Ignoring unknown {STRATEGY_ENV} value '{strategy}'"),
            }
        }
        if let Some(debug) = lookup(DEBUG_ENV) {
            self.debug = debug == "1" || debug.eq_ignore_ascii_case("true");
        }
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<EngineSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            match serde_json::from_str(&contents) {
                Ok(settings) => settings,
                Err(err) => {
                    log::warn!(
                        "Settings at {} are invalid ({err}); using defaults",
                        path.display()
                    );
                    EngineSettings::default()
                }
            }
        } else {
            EngineSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    pub fn engine(&self) -> EngineSettings {
        match self.data.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn update_engine(&self, settings: EngineSettings) -> Result<()> {
        let mut guard = match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = settings;
        self.persist(&guard)
    }

    fn persist(&self, data: &EngineSettings) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)?;
        let data: EngineSettings = serde_json::from_str(&contents)?;
        let mut guard = match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = data;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn oversized_freshness_window_saturates() {
        let settings = EngineSettings {
            cache_freshness_secs: u64::MAX,
            ..EngineSettings::default()
        };
        let window = settings.cache_freshness();
        assert_eq!(window, chrono::Duration::seconds(i64::MAX / 1000));
        assert!(window > chrono::Duration::days(365 * 1000));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SettingsStore::new(dir.path().join("settings.json")).expect("store");
        let settings = store.engine();
        assert_eq!(settings, EngineSettings::default());
        assert_eq!(settings.spot_config(), SpotConfig::default());
    }

    #[test]
    fn partial_files_fill_in_defaults_and_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{ "aquariumId": "reef-9", "strategy": "localFallback", "maxSpots": 12 }"#)
            .expect("write settings");

        let store = SettingsStore::new(path.clone()).expect("store");
        let mut settings = store.engine();
        assert_eq!(settings.aquarium_id, "reef-9");
        assert_eq!(settings.strategy, SyncStrategy::LocalFallback);
        assert_eq!(settings.max_spots, 12);
        assert_eq!(settings.poll_interval_secs, 30);

        settings.clean_decrement = 2.5;
        store.update_engine(settings.clone()).expect("persist");
        let reopened = SettingsStore::new(path).expect("reopen");
        assert_eq!(reopened.engine(), settings);
    }

    #[test]
    fn corrupt_files_fall_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").expect("write settings");
        let store = SettingsStore::new(path).expect("store");
        assert_eq!(store.engine(), EngineSettings::default());
    }

    #[test]
    fn environment_overrides_win() {
        let env: HashMap<&str, &str> = HashMap::from([
            (BASE_URL_ENV, "https://dirt.example.test"),
            (AQUARIUM_ID_ENV, "44"),
            (STRATEGY_ENV, "local"),
            (DEBUG_ENV, "true"),
        ]);
        let mut settings = EngineSettings::default();
        settings.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(settings.base_url, "https://dirt.example.test");
        assert_eq!(settings.aquarium_id, "44");
        assert_eq!(settings.strategy, SyncStrategy::LocalFallback);
        assert!(settings.debug);
    }
}
