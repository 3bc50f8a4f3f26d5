use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

/// Current operational state of the daemon.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "lowercase")]
pub enum DaemonState {
    /// Parked on the kernel pressure channel; nothing in flight.
    Idle,
    /// A pressure event is being matched against the registry and
    /// notifications are going out.
    Dispatching,
    /// A fleet suspend/resume cycle is in progress.
    Throttling,
}

/// Runtime status written by the daemon to <data dir>/status.toml.
/// External tooling reads this file (read-only) to observe daemon state.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DaemonStatus {
    /// Daemon binary version (set from Cargo.toml at compile time).
    pub version: String,
    /// Current operational state.
    pub state: DaemonState,
    /// Number of applications currently tracked in the registry.
    pub tracked: usize,
    /// Human-readable rendering of the most recent pressure bitmask, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event: Option<String>,
    /// RFC 3339 timestamp of the most recent completed dispatch pass, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_dispatch: Option<String>,
    /// Human-readable failure description, recorded when the daemon exits
    /// because a runtime resource (the pressure channel) was lost.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonStatus {
    /// Constructs the initial idle status on daemon startup.
    pub fn new() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            state: DaemonState::Idle,
            tracked: 0,
            last_event: None,
            last_dispatch: None,
            error: None,
        }
    }
}

/// Serializes `status` to TOML and writes it to `path`.
/// Creates the parent directory if it does not exist.
/// Logs errors rather than panicking; a status write failure should never
/// crash the daemon.
pub fn write_status(path: &Path, status: &DaemonStatus) {
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!("failed to create directory {}: {e}", parent.display());
            return;
        }
    }
    match toml::to_string_pretty(status) {
        Ok(content) => {
            if let Err(e) = std::fs::write(path, content) {
                warn!("failed to write status file: {e}");
            }
        }
        Err(e) => warn!("failed to serialize status: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── DaemonStatus::new ─────────────────────────────────────────────────────

    #[test]
    fn new_starts_idle() {
        let s = DaemonStatus::new();
        assert_eq!(s.state, DaemonState::Idle);
        assert_eq!(s.tracked, 0);
    }

    #[test]
    fn new_has_no_optional_fields() {
        let s = DaemonStatus::new();
        assert!(s.last_event.is_none());
        assert!(s.last_dispatch.is_none());
        assert!(s.error.is_none());
    }

    #[test]
    fn new_version_matches_cargo_pkg() {
        let s = DaemonStatus::new();
        assert_eq!(s.version, env!("CARGO_PKG_VERSION"));
    }

    // ── DaemonState serialization ─────────────────────────────────────────────

    #[test]
    fn state_serializes_to_lowercase() {
        // TOML requires a root table, so verify the value via DaemonStatus.
        let mut s = DaemonStatus::new();
        let idle = toml::to_string_pretty(&s).unwrap();
        assert!(idle.contains("state = \"idle\""));

        s.state = DaemonState::Dispatching;
        let dispatching = toml::to_string_pretty(&s).unwrap();
        assert!(dispatching.contains("state = \"dispatching\""));

        s.state = DaemonState::Throttling;
        let throttling = toml::to_string_pretty(&s).unwrap();
        assert!(throttling.contains("state = \"throttling\""));
    }

    #[test]
    fn state_round_trips_through_toml() {
        for state in [
            DaemonState::Idle,
            DaemonState::Dispatching,
            DaemonState::Throttling,
        ] {
            let mut status = DaemonStatus::new();
            status.state = state.clone();
            let serialized = toml::to_string_pretty(&status).unwrap();
            let deserialized: DaemonStatus = toml::from_str(&serialized).unwrap();
            assert_eq!(deserialized.state, state);
        }
    }

    // ── write_status ──────────────────────────────────────────────────────────

    #[test]
    fn write_status_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.toml");
        let status = DaemonStatus::new();
        write_status(&path, &status);
        assert!(path.exists());
    }

    #[test]
    fn write_status_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("dir").join("status.toml");
        let status = DaemonStatus::new();
        write_status(&path, &status);
        assert!(path.exists());
    }

    #[test]
    fn write_status_content_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.toml");

        let mut original = DaemonStatus::new();
        original.state = DaemonState::Dispatching;
        original.tracked = 3;
        original.last_event = Some("severe (0x8)".to_string());

        write_status(&path, &original);

        let content = std::fs::read_to_string(&path).unwrap();
        let parsed: DaemonStatus = toml::from_str(&content).unwrap();

        assert_eq!(parsed.state, DaemonState::Dispatching);
        assert_eq!(parsed.tracked, 3);
        assert_eq!(parsed.last_event.as_deref(), Some("severe (0x8)"));
    }

    #[test]
    fn write_status_includes_error_when_set() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.toml");

        let mut status = DaemonStatus::new();
        status.error = Some("pressure channel failed: device detached".to_string());
        write_status(&path, &status);

        let content = std::fs::read_to_string(&path).unwrap();
        let parsed: DaemonStatus = toml::from_str(&content).unwrap();
        assert_eq!(
            parsed.error.as_deref(),
            Some("pressure channel failed: device detached")
        );
    }

    #[test]
    fn write_status_omits_none_optional_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.toml");
        let status = DaemonStatus::new();
        write_status(&path, &status);

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains("last_event"));
        assert!(!content.contains("last_dispatch"));
        assert!(!content.contains("error"));
    }
}
