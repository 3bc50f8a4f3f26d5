use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::pressure::PressureFlags;
use crate::process::{self, ProcessControl};
use crate::registry::Registry;

/// Outcome of one dispatch pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Notification signals delivered.
    pub notified: usize,
    /// Stale entries evicted because the process was gone at send time.
    pub evicted: usize,
}

/// Matches active pressure bits against the registry and pokes each
/// subscribed application with the notify signal.
pub struct Dispatcher {
    control: Arc<dyn ProcessControl>,
    notify_signo: i32,
    max_stagger_ms: u64,
    stagger: bool,
}

impl Dispatcher {
    pub fn new(
        control: Arc<dyn ProcessControl>,
        notify_signo: i32,
        max_stagger_ms: u64,
        stagger: bool,
    ) -> Self {
        Self {
            control,
            notify_signo,
            max_stagger_ms,
            stagger,
        }
    }

    /// Applies hot-reloaded tunables.
    pub fn set_stagger(&mut self, enabled: bool, max_ms: u64) {
        self.stagger = enabled;
        self.max_stagger_ms = max_ms;
    }

    /// One dispatch pass: every application subscribed to an active condition
    /// is notified exactly once, in snapshot order. A send failure never
    /// aborts the pass; a pid that exited since the snapshot is evicted from
    /// the registry.
    pub async fn dispatch(&self, registry: &mut Registry, flags: PressureFlags) -> DispatchSummary {
        let mut summary = DispatchSummary::default();
        for condition in flags.active_conditions() {
            for pid in registry.snapshot_matching(condition) {
                match self.control.notify(pid, self.notify_signo) {
                    Ok(()) => {
                        debug!("notified pid {pid} ({condition})");
                        summary.notified += 1;
                    }
                    Err(e) if process::is_gone(&e) => {
                        registry.deregister(pid);
                        summary.evicted += 1;
                        debug!("pid {pid} exited; entry evicted");
                    }
                    Err(e) => warn!("failed to notify pid {pid}: {e}"),
                }
                self.throttle().await;
            }
        }
        summary
    }

    /// Randomized self-throttling pause between sends, so notifying a large
    /// fleet does not itself create a burst of signal-induced work.
    async fn throttle(&self) {
        if !self.stagger || self.max_stagger_ms == 0 {
            return;
        }
        let ms = rand::thread_rng().gen_range(0..=self.max_stagger_ms);
        sleep(Duration::from_millis(ms)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::FakeControl;
    use crate::signals::PressureCondition::{MinFreePages, PagesNeeded, Severe};

    const NOTIFY: i32 = 44;

    fn dispatcher(control: &Arc<FakeControl>) -> Dispatcher {
        Dispatcher::new(Arc::clone(control) as Arc<dyn ProcessControl>, NOTIFY, 0, false)
    }

    fn sorted(mut v: Vec<i32>) -> Vec<i32> {
        v.sort_unstable();
        v
    }

    // ── condition matching ────────────────────────────────────────────────────

    #[tokio::test]
    async fn severe_event_notifies_only_severe_subscribers() {
        let mut reg = Registry::new();
        reg.register(10, Severe);
        reg.register(11, MinFreePages);
        reg.register(12, PagesNeeded);
        let control = Arc::new(FakeControl::new());

        let summary = dispatcher(&control)
            .dispatch(&mut reg, PressureFlags::from_bits(0x8))
            .await;

        assert_eq!(summary, DispatchSummary { notified: 1, evicted: 0 });
        assert_eq!(control.notified_pids(), vec![10]);
        assert!(PressureFlags::from_bits(0x8).triggers_fleet_cycle());
    }

    #[tokio::test]
    async fn min_free_event_notifies_without_fleet_trigger() {
        let mut reg = Registry::new();
        reg.register(20, MinFreePages);
        let control = Arc::new(FakeControl::new());

        let summary = dispatcher(&control)
            .dispatch(&mut reg, PressureFlags::from_bits(0x2))
            .await;

        assert_eq!(summary.notified, 1);
        assert_eq!(control.notified_pids(), vec![20]);
        assert!(!PressureFlags::from_bits(0x2).triggers_fleet_cycle());
    }

    #[tokio::test]
    async fn each_subscriber_notified_exactly_once_per_pass() {
        let mut reg = Registry::new();
        reg.register(1, Severe);
        reg.register(2, Severe);
        reg.register(3, MinFreePages);
        let control = Arc::new(FakeControl::new());

        let summary = dispatcher(&control)
            .dispatch(&mut reg, PressureFlags::from_bits(0x8 | 0x2))
            .await;

        assert_eq!(summary.notified, 3);
        assert_eq!(sorted(control.notified_pids()), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn notify_carries_configured_signal_number() {
        let mut reg = Registry::new();
        reg.register(5, Severe);
        let control = Arc::new(FakeControl::new());

        dispatcher(&control)
            .dispatch(&mut reg, PressureFlags::from_bits(0x8))
            .await;

        assert_eq!(*control.notified.lock().unwrap(), vec![(5, NOTIFY)]);
    }

    // ── failure isolation ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn send_failure_does_not_stop_the_pass() {
        let mut reg = Registry::new();
        reg.register(1, Severe);
        reg.register(2, Severe);
        reg.register(3, Severe);
        let control = Arc::new(FakeControl::with_deny(&[2]));

        let summary = dispatcher(&control)
            .dispatch(&mut reg, PressureFlags::from_bits(0x8))
            .await;

        assert_eq!(summary.notified, 2);
        assert_eq!(summary.evicted, 0);
        assert_eq!(sorted(control.notified_pids()), vec![1, 3]);
        // A permission failure is not staleness; the entry stays.
        assert!(reg.contains(2));
    }

    #[tokio::test]
    async fn gone_pid_is_evicted_and_pass_continues() {
        let mut reg = Registry::new();
        reg.register(1, Severe);
        reg.register(2, Severe);
        reg.register(3, Severe);
        let control = Arc::new(FakeControl::with_dead(&[2]));

        let summary = dispatcher(&control)
            .dispatch(&mut reg, PressureFlags::from_bits(0x8))
            .await;

        assert_eq!(summary.notified, 2);
        assert_eq!(summary.evicted, 1);
        assert!(!reg.contains(2));
        assert!(reg.contains(1));
        assert!(reg.contains(3));
    }

    // ── stagger ───────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn staggered_dispatch_still_notifies_everyone() {
        let mut reg = Registry::new();
        reg.register(1, Severe);
        reg.register(2, Severe);
        let control = Arc::new(FakeControl::new());
        let dispatcher =
            Dispatcher::new(Arc::clone(&control) as Arc<dyn ProcessControl>, NOTIFY, 1_000, true);

        let summary = dispatcher
            .dispatch(&mut reg, PressureFlags::from_bits(0x8))
            .await;

        assert_eq!(summary.notified, 2);
        assert_eq!(sorted(control.notified_pids()), vec![1, 2]);
    }

    #[tokio::test]
    async fn empty_flags_touch_nothing() {
        let mut reg = Registry::new();
        reg.register(1, Severe);
        let control = Arc::new(FakeControl::new());

        let summary = dispatcher(&control)
            .dispatch(&mut reg, PressureFlags::from_bits(0))
            .await;

        assert_eq!(summary, DispatchSummary::default());
        assert!(control.notified_pids().is_empty());
    }
}
