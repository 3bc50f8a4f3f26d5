use std::fmt;

use sysinfo::System;
use tokio::time::{interval, Duration};
use tracing::info;

const POLL_INTERVAL_SECS: u64 = 60;

/// Point-in-time swap and physical-memory figures, in bytes.
///
/// Diagnostic only: nothing in the registration or dispatch path depends on
/// these numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySnapshot {
    pub swap_total: u64,
    pub swap_used: u64,
    pub mem_total: u64,
    pub mem_available: u64,
}

impl MemorySnapshot {
    pub fn read(sys: &mut System) -> Self {
        sys.refresh_memory();
        Self {
            swap_total: sys.total_swap(),
            swap_used: sys.used_swap(),
            mem_total: sys.total_memory(),
            mem_available: sys.available_memory(),
        }
    }

    pub fn swap_percent_used(&self) -> f64 {
        if self.swap_total == 0 {
            0.0
        } else {
            self.swap_used as f64 * 100.0 / self.swap_total as f64
        }
    }
}

impl fmt::Display for MemorySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "swap {}/{} ({:.0}%), mem {} available of {}",
            format_size(self.swap_used),
            format_size(self.swap_total),
            self.swap_percent_used(),
            format_size(self.mem_available),
            format_size(self.mem_total),
        )
    }
}

/// Formats a byte count with a binary-unit suffix, e.g. "512B", "3.2MiB".
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes}B")
    } else {
        format!("{value:.1}{}", UNITS[unit])
    }
}

/// Logs a memory snapshot every [`POLL_INTERVAL_SECS`] seconds.
/// Informational background task; never feeds back into dispatch.
pub async fn run() {
    let mut sys = System::new();
    let mut ticker = interval(Duration::from_secs(POLL_INTERVAL_SECS));
    loop {
        ticker.tick().await;
        let snapshot = MemorySnapshot::read(&mut sys);
        info!("{snapshot}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── format_size ───────────────────────────────────────────────────────────

    #[test]
    fn format_size_bytes() {
        assert_eq!(format_size(0), "0B");
        assert_eq!(format_size(512), "512B");
        assert_eq!(format_size(1023), "1023B");
    }

    #[test]
    fn format_size_binary_units() {
        assert_eq!(format_size(1024), "1.0KiB");
        assert_eq!(format_size(1536), "1.5KiB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0MiB");
        assert_eq!(format_size(5 * 1024 * 1024 * 1024), "5.0GiB");
    }

    #[test]
    fn format_size_caps_at_tib() {
        let two_pib = 2u64 * 1024 * 1024 * 1024 * 1024 * 1024;
        assert_eq!(format_size(two_pib), "2048.0TiB");
    }

    // ── snapshot ──────────────────────────────────────────────────────────────

    #[test]
    fn swap_percent_handles_zero_total() {
        let snap = MemorySnapshot {
            swap_total: 0,
            swap_used: 0,
            mem_total: 0,
            mem_available: 0,
        };
        assert_eq!(snap.swap_percent_used(), 0.0);
    }

    #[test]
    fn display_mentions_swap_and_mem() {
        let snap = MemorySnapshot {
            swap_total: 8 * 1024 * 1024 * 1024,
            swap_used: 1024 * 1024 * 1024,
            mem_total: 16 * 1024 * 1024 * 1024,
            mem_available: 4 * 1024 * 1024 * 1024,
        };
        let text = snap.to_string();
        assert!(text.contains("swap 1.0GiB/8.0GiB (12%)"), "got: {text}");
        assert!(text.contains("mem 4.0GiB available of 16.0GiB"), "got: {text}");
    }

    #[test]
    fn read_from_live_system_does_not_panic() {
        let mut sys = System::new();
        let snap = MemorySnapshot::read(&mut sys);
        assert!(snap.mem_total >= snap.mem_available || snap.mem_total == 0);
    }
}
