use std::collections::HashMap;

use crate::process::ProcessControl;
use crate::signals::{PressureCondition, SignalRequest};

/// A tracked application: its pid and the pressure condition it asked to be
/// told about. Liveness is probed on demand, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagedApplication {
    pub pid: i32,
    pub condition: PressureCondition,
}

/// Outcome of applying a registration signal to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryChange {
    /// Fresh entry inserted.
    Registered,
    /// The pid was already tracked under a different condition; the old entry
    /// (carried here) was replaced wholesale.
    Replaced(PressureCondition),
    /// The pid repeated the condition it was tracked under: stop tracking it.
    Deregistered,
}

/// Live mapping of tracked pids to their subscribed pressure condition.
/// At most one entry per pid.
///
/// Owned exclusively by the main event-loop task. The asynchronous signal
/// context never touches it (it only feeds the descriptor queue in
/// `signals`), so every mutation here runs on one thread with ordinary
/// single-owner semantics.
#[derive(Debug, Default)]
pub struct Registry {
    apps: HashMap<i32, ManagedApplication>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    pub fn contains(&self, pid: i32) -> bool {
        self.apps.contains_key(&pid)
    }

    pub fn condition_of(&self, pid: i32) -> Option<PressureCondition> {
        self.apps.get(&pid).map(|app| app.condition)
    }

    /// Inserts or replaces the entry for `pid` (last-write-wins).
    pub fn register(&mut self, pid: i32, condition: PressureCondition) {
        self.apps.insert(pid, ManagedApplication { pid, condition });
    }

    /// Removes the entry for `pid`. Returns false if absent, a no-op for the
    /// caller to report rather than an error.
    pub fn deregister(&mut self, pid: i32) -> bool {
        self.apps.remove(&pid).is_some()
    }

    /// The registration protocol: a repeat signal for the condition a pid is
    /// already tracked under means "stop tracking me"; any other signal from
    /// that pid replaces its entry; an unknown pid is a fresh registration.
    pub fn apply(&mut self, req: SignalRequest) -> RegistryChange {
        match self.condition_of(req.pid) {
            Some(existing) if existing == req.condition => {
                self.deregister(req.pid);
                RegistryChange::Deregistered
            }
            Some(existing) => {
                self.register(req.pid, req.condition);
                RegistryChange::Replaced(existing)
            }
            None => {
                self.register(req.pid, req.condition);
                RegistryChange::Registered
            }
        }
    }

    /// Probes every entry with the zero-effort existence check and removes
    /// those whose process is gone. Returns the count removed.
    pub fn sweep_dead(&mut self, control: &dyn ProcessControl) -> usize {
        let before = self.apps.len();
        self.apps.retain(|_, app| control.alive(app.pid));
        before - self.apps.len()
    }

    /// Point-in-time list of pids registered for `condition`. The dispatcher
    /// iterates this snapshot so no registry borrow is held across
    /// signal-sending.
    pub fn snapshot_matching(&self, condition: PressureCondition) -> Vec<i32> {
        self.apps
            .values()
            .filter(|app| app.condition == condition)
            .map(|app| app.pid)
            .collect()
    }

    /// All tracked pids at this instant (the fleet-cycle working set).
    pub fn pids(&self) -> Vec<i32> {
        self.apps.keys().copied().collect()
    }
}
