use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::process::{self, ProcessControl};
use crate::registry::Registry;

/// Outcome of one suspend/resume cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleSummary {
    pub suspended: usize,
    pub resumed: usize,
}

/// Stops and later resumes all tracked applications as a unit under severe
/// pressure.
pub struct FleetController {
    control: Arc<dyn ProcessControl>,
    max_stagger_ms: u64,
}

impl FleetController {
    pub fn new(control: Arc<dyn ProcessControl>, max_stagger_ms: u64) -> Self {
        Self {
            control,
            max_stagger_ms,
        }
    }

    /// Applies hot-reloaded tunables.
    pub fn set_max_stagger_ms(&mut self, max_ms: u64) {
        self.max_stagger_ms = max_ms;
    }

    /// Suspend-then-resume, always back-to-back: the pid set is captured once
    /// so resume covers exactly what suspend covered, minus pids that died in
    /// between (skipped).
    pub async fn run_cycle(&self, registry: &Registry) -> CycleSummary {
        let pids = registry.pids();
        info!("fleet cycle: suspending {} applications", pids.len());
        let suspended = self.suspend_all(&pids);
        let resumed = self.resume_all(&pids).await;
        CycleSummary { suspended, resumed }
    }

    /// Best-effort stop of every pid; one failure never prevents attempting
    /// the rest.
    fn suspend_all(&self, pids: &[i32]) -> usize {
        let mut suspended = 0;
        for &pid in pids {
            match self.control.suspend(pid) {
                Ok(()) => suspended += 1,
                Err(e) if process::is_gone(&e) => debug!("pid {pid} gone before suspend"),
                Err(e) => warn!("failed to suspend pid {pid}: {e}"),
            }
        }
        suspended
    }

    /// Resumes with a randomized pause between pids, so memory-hungry
    /// applications do not wake in lockstep and immediately re-trigger the
    /// pressure that suspended them.
    async fn resume_all(&self, pids: &[i32]) -> usize {
        let mut resumed = 0;
        for &pid in pids {
            match self.control.resume(pid) {
                Ok(()) => resumed += 1,
                Err(e) if process::is_gone(&e) => debug!("pid {pid} gone before resume"),
                Err(e) => warn!("failed to resume pid {pid}: {e}"),
            }
            if self.max_stagger_ms > 0 {
                let ms = rand::thread_rng().gen_range(0..=self.max_stagger_ms);
                sleep(Duration::from_millis(ms)).await;
            }
        }
        resumed
    }
}
