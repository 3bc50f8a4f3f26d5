use std::fmt;
use std::fs::File;
use std::io::Read;
use std::os::fd::AsFd;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tokio::sync::mpsc;
use tracing::info;

use crate::event::DaemonEvent;
use crate::signals::PressureCondition;

/// Decoded kernel memory-pressure bitmask.
///
/// Constructed once at the kernel-interface boundary; never passed around as
/// a raw integer past this module. Unknown bits are preserved for logging but
/// match nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PressureFlags(u64);

impl PressureFlags {
    /// Below the minimum free-page threshold.
    pub const MIN_FREE: u64 = 0x2;
    /// Not enough free pages to satisfy current demand.
    pub const PAGES_NEEDED: u64 = 0x4;
    /// Severe low-memory condition.
    pub const SEVERE: u64 = 0x8;
    /// Severe or global shortage. Triggers the fleet cycle like SEVERE but
    /// matches no per-application condition.
    pub const SEVERE_OR_GLOBAL: u64 = 0x10;

    pub fn from_bits(raw: u64) -> Self {
        Self(raw)
    }

    pub fn bits(self) -> u64 {
        self.0
    }

    pub fn contains(self, bit: u64) -> bool {
        self.0 & bit != 0
    }

    /// Conditions whose subscribers should be notified for this event.
    pub fn active_conditions(self) -> Vec<PressureCondition> {
        let mut active = Vec::new();
        if self.contains(Self::SEVERE) {
            active.push(PressureCondition::Severe);
        }
        if self.contains(Self::MIN_FREE) {
            active.push(PressureCondition::MinFreePages);
        }
        if self.contains(Self::PAGES_NEEDED) {
            active.push(PressureCondition::PagesNeeded);
        }
        active
    }

    /// Either severe-type bit warrants a fleet suspend/resume cycle.
    pub fn triggers_fleet_cycle(self) -> bool {
        self.contains(Self::SEVERE) || self.contains(Self::SEVERE_OR_GLOBAL)
    }
}

impl fmt::Display for PressureFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(Self::MIN_FREE) {
            names.push("min_free");
        }
        if self.contains(Self::PAGES_NEEDED) {
            names.push("pages_needed");
        }
        if self.contains(Self::SEVERE) {
            names.push("severe");
        }
        if self.contains(Self::SEVERE_OR_GLOBAL) {
            names.push("severe_or_global");
        }
        if names.is_empty() {
            write!(f, "none (0x{:x})", self.0)
        } else {
            write!(f, "{} (0x{:x})", names.join("|"), self.0)
        }
    }
}

/// Blocking source of pressure events. Implemented by the kernel low-memory
/// device; tests substitute scripted flags.
pub trait PressureSource: Send {
    /// Blocks until the kernel reports pressure and returns the decoded
    /// bitmask. An error here means the channel itself failed.
    fn wait(&mut self) -> Result<PressureFlags>;
}

/// The kernel's virtual low-memory resource node, watched for
/// read-readiness. The event payload is the pressure bitmask.
pub struct LowMemDevice {
    device: File,
}

impl LowMemDevice {
    /// Opens the pressure node read-write and non-blocking. Failure here is
    /// fatal: the daemon cannot perform its primary function without it.
    pub fn open(path: &Path) -> Result<Self> {
        use std::os::unix::fs::OpenOptionsExt;
        let device = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .with_context(|| format!("Failed to open pressure device {}", path.display()))?;
        Ok(Self { device })
    }
}

impl PressureSource for LowMemDevice {
    fn wait(&mut self) -> Result<PressureFlags> {
        loop {
            let readable = {
                let mut fds = [PollFd::new(self.device.as_fd(), PollFlags::POLLIN)];
                match poll(&mut fds, PollTimeout::NONE) {
                    Ok(_) => {}
                    Err(nix::errno::Errno::EINTR) => continue,
                    Err(e) => return Err(e).context("poll on pressure device failed"),
                }
                fds[0]
                    .revents()
                    .map_or(false, |r| r.intersects(PollFlags::POLLIN))
            };
            if !readable {
                continue;
            }

            let mut buf = [0u8; 8];
            let n = self
                .device
                .read(&mut buf)
                .context("read from pressure device failed")?;
            if n == 0 {
                // Spurious wakeup; re-arm.
                continue;
            }
            let mut raw = [0u8; 8];
            raw[..n].copy_from_slice(&buf[..n]);
            return Ok(PressureFlags::from_bits(u64::from_le_bytes(raw)));
        }
    }
}

/// Watcher loop, run on a dedicated OS thread: block on the kernel channel,
/// hand the decoded event to the main loop, then hold off for the quiescent
/// interval so repeated kernel wake-ups cannot re-trigger dispatch faster
/// than once per interval.
///
/// A channel failure after startup is unrecoverable; the loop reports it to
/// the main loop and exits.
pub fn run(
    mut source: impl PressureSource,
    tx: mpsc::Sender<DaemonEvent>,
    quiescent_secs: Arc<AtomicU64>,
) {
    loop {
        let flags = match source.wait() {
            Ok(flags) => flags,
            Err(e) => {
                let _ = tx.blocking_send(DaemonEvent::ChannelFailed(format!("{e:#}")));
                return;
            }
        };
        info!("pressure event: {flags}");
        if tx.blocking_send(DaemonEvent::Pressure(flags)).is_err() {
            return;
        }
        std::thread::sleep(Duration::from_secs(quiescent_secs.load(Ordering::Relaxed)));
    }
}
