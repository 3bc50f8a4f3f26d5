use anyhow::{Context, Result};
use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::warn;

use crate::event::DaemonEvent;

pub const DEFAULT_PRESSURE_DEVICE: &str = "/dev/lowmem";
pub const MIN_QUIESCENT_SECS: u64 = 1;
pub const MAX_QUIESCENT_SECS: u64 = 600;
pub const DEFAULT_QUIESCENT_SECS: u64 = 2;
pub const MAX_STAGGER_LIMIT_MS: u64 = 10_000;
pub const DEFAULT_MAX_STAGGER_MS: u64 = 1_000;

/// Default registration/notification signal numbers. These land in the
/// real-time range on the platforms the daemon targets and can be renumbered
/// per deployment without a rebuild.
pub const DEFAULT_SIGNAL_NOTIFY: i32 = 44;
pub const DEFAULT_SIGNAL_SEVERE: i32 = 45;
pub const DEFAULT_SIGNAL_MIN_FREE: i32 = 46;
pub const DEFAULT_SIGNAL_PAGES_NEEDED: i32 = 47;

/// Root configuration structure. Deserialized from <data dir>/config.toml.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub signals: SignalConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            global: GlobalConfig::default(),
            signals: SignalConfig::default(),
        }
    }
}

/// Daemon-wide tunables.
#[derive(Debug, Deserialize, Clone)]
pub struct GlobalConfig {
    /// Kernel low-memory device node the pressure watcher blocks on.
    /// Changing it requires a restart.
    #[serde(default = "default_pressure_device")]
    pub pressure_device: String,
    /// Seconds to hold off after handing a pressure event to the dispatcher
    /// before re-arming the kernel wait. Clamped to [1, 600].
    #[serde(default = "default_quiescent_secs")]
    pub quiescent_secs: u64,
    /// Upper bound of the randomized delay between notification sends and
    /// between fleet resumes, in milliseconds. Clamped to [0, 10000].
    #[serde(default = "default_max_stagger_ms")]
    pub max_stagger_ms: u64,
    /// Whether the dispatcher inserts the randomized delay between
    /// notifications (self-throttling). Fleet resume always staggers.
    #[serde(default = "default_dispatch_stagger")]
    pub dispatch_stagger: bool,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            pressure_device: DEFAULT_PRESSURE_DEVICE.to_string(),
            quiescent_secs: DEFAULT_QUIESCENT_SECS,
            max_stagger_ms: DEFAULT_MAX_STAGGER_MS,
            dispatch_stagger: true,
        }
    }
}

impl GlobalConfig {
    /// Returns the quiescent interval clamped to its allowed range.
    pub fn effective_quiescent_secs(&self) -> u64 {
        self.quiescent_secs.clamp(MIN_QUIESCENT_SECS, MAX_QUIESCENT_SECS)
    }

    /// Returns the stagger bound clamped to its allowed range.
    pub fn effective_max_stagger_ms(&self) -> u64 {
        self.max_stagger_ms.min(MAX_STAGGER_LIMIT_MS)
    }
}

/// OS signal numbers of the registration protocol, one per supported pressure
/// condition, plus the distinct notification value the daemon sends back.
/// Validated (distinct, in range) by `signals::SignalMap::from_config`.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct SignalConfig {
    #[serde(default = "default_signal_severe")]
    pub severe: i32,
    #[serde(default = "default_signal_min_free")]
    pub min_free: i32,
    #[serde(default = "default_signal_pages_needed")]
    pub pages_needed: i32,
    #[serde(default = "default_signal_notify")]
    pub notify: i32,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            severe: DEFAULT_SIGNAL_SEVERE,
            min_free: DEFAULT_SIGNAL_MIN_FREE,
            pages_needed: DEFAULT_SIGNAL_PAGES_NEEDED,
            notify: DEFAULT_SIGNAL_NOTIFY,
        }
    }
}

/// Loads the config file at `path`, returning `Config::default()` if the file does not exist.
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Spawns a file watcher on the parent directory of `path`.  Whenever the config
/// file is created or modified, reloads it and sends a `ConfigReloaded` event.
pub async fn watch_config(path: PathBuf, tx: mpsc::Sender<DaemonEvent>) {
    let (watch_tx, mut watch_rx) = mpsc::channel::<notify::Event>(16);

    let mut watcher = match RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = watch_tx.blocking_send(event);
            }
        },
        NotifyConfig::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            warn!("failed to create config watcher: {e}");
            return;
        }
    };

    // Watch the parent directory rather than the file directly so we catch
    // editor-style atomic saves (write-new + rename).
    let watch_dir = match path.parent() {
        Some(d) => d.to_path_buf(),
        None => {
            warn!("config path has no parent directory");
            return;
        }
    };

    if let Err(e) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
        warn!("failed to watch config directory: {e}");
        return;
    }

    while let Some(event) = watch_rx.recv().await {
        let affects_config = event.paths.iter().any(|p| p == path.as_path());
        let is_write = matches!(
            event.kind,
            notify::EventKind::Create(_) | notify::EventKind::Modify(_)
        );

        if affects_config && is_write {
            match load_or_default(&path) {
                Ok(config) => {
                    if tx.send(DaemonEvent::ConfigReloaded(config)).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("failed to reload config: {e:#}"),
            }
        }
    }
}

fn default_pressure_device() -> String {
    DEFAULT_PRESSURE_DEVICE.to_string()
}

fn default_quiescent_secs() -> u64 {
    DEFAULT_QUIESCENT_SECS
}

fn default_max_stagger_ms() -> u64 {
    DEFAULT_MAX_STAGGER_MS
}

fn default_dispatch_stagger() -> bool {
    true
}

fn default_signal_severe() -> i32 {
    DEFAULT_SIGNAL_SEVERE
}

fn default_signal_min_free() -> i32 {
    DEFAULT_SIGNAL_MIN_FREE
}

fn default_signal_pages_needed() -> i32 {
    DEFAULT_SIGNAL_PAGES_NEEDED
}

fn default_signal_notify() -> i32 {
    DEFAULT_SIGNAL_NOTIFY
}
