//! Persisted device settings
//!
//! A single settings record guarded by a mutex, shared between the command
//! API and the device sync handler. Every mutation is written back to disk
//! after the lock is released, so a restart resumes the same mode. Saves are
//! numbered; a save never overwrites a newer one already on disk.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use utoipa::ToSchema;

use crate::store::write_atomic;

/// Default daytime poll interval in minutes
pub const DEFAULT_DAYTIME_MINUTES: u32 = 30;

/// Exclusive content mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Serve whatever image was last uploaded
    #[default]
    Normal,
    /// Render a new quote card on every poll
    Quote,
    /// Serve a new webcomic on every poll
    Comic,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Normal => write!(f, "normal"),
            Mode::Quote => write!(f, "quote"),
            Mode::Comic => write!(f, "comic"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub mode: Mode,
    #[serde(rename = "update_duration_minutes", default = "default_daytime_minutes")]
    pub daytime_minutes: u32,
    #[serde(default)]
    pub battery_percent: u8,
}

fn default_daytime_minutes() -> u32 {
    DEFAULT_DAYTIME_MINUTES
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mode: Mode::Normal,
            daytime_minutes: DEFAULT_DAYTIME_MINUTES,
            battery_percent: 0,
        }
    }
}

impl Settings {
    fn is_valid(&self) -> bool {
        self.daytime_minutes > 0 && self.battery_percent <= 100
    }
}

pub struct SettingsStore {
    path: PathBuf,
    settings: Mutex<Settings>,
    /// Number of the latest mutation
    generation: AtomicU64,
    /// Number of the mutation last written to disk
    persisted: Mutex<u64>,
}

impl SettingsStore {
    /// Load settings from `path`, falling back to defaults when absent or corrupt
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let settings = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<Settings>(&contents) {
                Ok(settings) if settings.is_valid() => {
                    tracing::info!(
                        "Loaded settings: mode={}, update_duration_minutes={}, battery={}%",
                        settings.mode,
                        settings.daytime_minutes,
                        settings.battery_percent
                    );
                    settings
                }
                Ok(settings) => {
                    tracing::warn!("Ignoring out-of-range settings {:?}; using defaults", settings);
                    Settings::default()
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}. Using defaults", path.display(), e);
                    Settings::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No {} found; using defaults", path.display());
                Settings::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read {}: {}. Using defaults", path.display(), e);
                Settings::default()
            }
        };

        Self {
            path,
            settings: Mutex::new(settings),
            generation: AtomicU64::new(0),
            persisted: Mutex::new(0),
        }
    }

    pub async fn snapshot(&self) -> Settings {
        *self.settings.lock().await
    }

    /// Apply a mutation, then persist the resulting snapshot
    pub async fn update<F>(&self, mutate: F) -> Settings
    where
        F: FnOnce(&mut Settings),
    {
        let (settings, generation) = {
            let mut settings = self.settings.lock().await;
            mutate(&mut settings);
            let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
            (*settings, generation)
        };

        self.save(settings, generation).await;
        settings
    }

    pub async fn set_mode(&self, mode: Mode) -> Settings {
        self.update(|s| s.mode = mode).await
    }

    pub async fn set_daytime_minutes(&self, minutes: u32) -> Settings {
        self.update(|s| s.daytime_minutes = minutes).await
    }

    pub async fn record_battery(&self, percent: u8) -> Settings {
        self.update(|s| s.battery_percent = percent).await
    }

    /// Persistence failures are logged and otherwise ignored
    async fn save(&self, settings: Settings, generation: u64) {
        let mut persisted = self.persisted.lock().await;
        if *persisted >= generation {
            tracing::debug!("Skipping stale settings save #{}", generation);
            return;
        }

        let json = match serde_json::to_vec_pretty(&settings) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!("Failed to serialize settings: {}", e);
                return;
            }
        };

        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        match write_atomic(&dir, &self.path, json).await {
            Ok(()) => {
                *persisted = generation;
                tracing::debug!("Saved settings #{}: {:?}", generation, settings);
            }
            Err(e) => tracing::error!("Failed to save settings: {}", e),
        }
    }
}
