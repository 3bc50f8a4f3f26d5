/// Registration transport boundary.
///
/// Applications opt in by sending one of three configured signals; the daemon
/// reads the sender pid out of `siginfo`. The handler runs in the
/// asynchronous signal context, where only a constrained subset of operations
/// is safe, so it does exactly two things: push a fixed-size descriptor into
/// the pre-allocated lock-free queue and write one byte to a non-blocking
/// self-pipe. A dedicated drain thread turns descriptors into
/// [`DaemonEvent::Registration`] for the main loop, which owns the registry.
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::OnceLock;
use std::thread;

use anyhow::{bail, Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::SignalConfig;
use crate::event::DaemonEvent;
use crate::queue::{RawSignal, SignalQueue};

/// Memory-scarcity severity an application can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PressureCondition {
    Severe,
    MinFreePages,
    PagesNeeded,
}

impl fmt::Display for PressureCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PressureCondition::Severe => "severe",
            PressureCondition::MinFreePages => "min_free",
            PressureCondition::PagesNeeded => "pages_needed",
        };
        f.write_str(name)
    }
}

/// A decoded registration/deregistration request: the sending pid and the
/// condition its signal mapped to. What it means for the registry is decided
/// by `Registry::apply`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalRequest {
    pub pid: i32,
    pub condition: PressureCondition,
}

/// Translation table between OS signal numbers and the condition/command
/// codes of the protocol. The only place raw signal numbers appear outside
/// the config.
#[derive(Debug, Clone, Copy)]
pub struct SignalMap {
    severe: i32,
    min_free: i32,
    pages_needed: i32,
    notify: i32,
}

impl SignalMap {
    /// Builds the table from config, rejecting out-of-range or duplicate
    /// numbers. Fatal at startup: a bad table means the protocol is unusable.
    pub fn from_config(cfg: &SignalConfig) -> Result<Self> {
        let all = [cfg.severe, cfg.min_free, cfg.pages_needed, cfg.notify];
        for signo in all {
            if !(1..=64).contains(&signo) {
                bail!("signal number {signo} out of range (expected 1..=64)");
            }
        }
        for (i, a) in all.iter().enumerate() {
            if all[i + 1..].contains(a) {
                bail!("duplicate signal number {a} in [signals] config");
            }
        }
        Ok(Self {
            severe: cfg.severe,
            min_free: cfg.min_free,
            pages_needed: cfg.pages_needed,
            notify: cfg.notify,
        })
    }

    /// Maps a received signal number to its condition; `None` for anything
    /// outside the registration set (ignored upstream, no registry mutation).
    pub fn condition_for(&self, signo: i32) -> Option<PressureCondition> {
        if signo == self.severe {
            Some(PressureCondition::Severe)
        } else if signo == self.min_free {
            Some(PressureCondition::MinFreePages)
        } else if signo == self.pages_needed {
            Some(PressureCondition::PagesNeeded)
        } else {
            None
        }
    }

    /// The three signal numbers the handler is installed for.
    pub fn registration_signals(&self) -> [i32; 3] {
        [self.severe, self.min_free, self.pages_needed]
    }

    /// The distinct value sent back to matched applications as the
    /// "your condition is active now" poke.
    pub fn notify_signal(&self) -> i32 {
        self.notify
    }
}

/// Sized well above any realistic burst of concurrent registrations; a full
/// queue drops the signal.
const QUEUE_CAPACITY: usize = 64;

/// Descriptor queue shared with the signal handler. Set once by [`start`].
static PENDING: OnceLock<SignalQueue> = OnceLock::new();

/// Write end of the self-pipe (-1 until [`start`] runs).
/// Written by the handler to wake the drain thread.
static WAKE_FD: AtomicI32 = AtomicI32::new(-1);

/// A handle to the running registration listener.
pub struct SignalHandle {
    ids: Vec<signal_hook_registry::SigId>,
    write_fd: Option<OwnedFd>,
    thread: Option<thread::JoinHandle<()>>,
}

impl SignalHandle {
    /// Uninstalls the signal handlers, closes the self-pipe, and blocks until
    /// the drain thread exits. The caller must drop the main event receiver
    /// first; a drain-side send parked on a full channel only returns once
    /// the receiver is gone.
    pub fn stop(mut self) {
        for id in self.ids.drain(..) {
            signal_hook_registry::unregister(id);
        }
        WAKE_FD.store(-1, Ordering::Release);
        // Closing the write end makes the drain thread's read return 0.
        drop(self.write_fd.take());
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

/// Installs the registration signal handlers and spawns the drain thread.
///
/// Decoded requests are forwarded to `tx`; unknown signal numbers (possible
/// when handlers race a config change) are ignored with a warning. Failure to
/// install any handler is a startup error.
pub fn start(map: SignalMap, tx: mpsc::Sender<DaemonEvent>) -> Result<SignalHandle> {
    // Silently ignore if called more than once (e.g. in test binaries).
    let _ = PENDING.set(SignalQueue::new(QUEUE_CAPACITY));

    let (read_fd, write_fd) = nix::unistd::pipe().context("Failed to create signal self-pipe")?;
    // Non-blocking write end: a full pipe must never stall the handler.
    let flags = unsafe { libc::fcntl(write_fd.as_raw_fd(), libc::F_GETFL) };
    if flags < 0
        || unsafe { libc::fcntl(write_fd.as_raw_fd(), libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0
    {
        bail!(
            "Failed to set self-pipe non-blocking: {}",
            std::io::Error::last_os_error()
        );
    }
    WAKE_FD.store(write_fd.as_raw_fd(), Ordering::Release);

    let mut ids = Vec::with_capacity(3);
    for signo in map.registration_signals() {
        // Safety: `handle_signal` performs only async-signal-safe work,
        // an atomic queue push and a write(2) on the self-pipe.
        let id = unsafe { signal_hook_registry::register_sigaction(signo, handle_signal) }
            .with_context(|| format!("Failed to install handler for signal {signo}"))?;
        ids.push(id);
    }

    let thread = thread::Builder::new()
        .name("signal-drain".into())
        .spawn(move || drain_loop(read_fd, map, tx))
        .context("Failed to spawn signal drain thread")?;

    Ok(SignalHandle {
        ids,
        write_fd: Some(write_fd),
        thread: Some(thread),
    })
}

/// Runs in the asynchronous signal context. Queue push + pipe write only.
fn handle_signal(info: &libc::siginfo_t) {
    let pid = unsafe { info.si_pid() };
    if let Some(queue) = PENDING.get() {
        let _ = queue.push(RawSignal {
            signo: info.si_signo,
            pid,
        });
    }
    let fd = WAKE_FD.load(Ordering::Acquire);
    if fd >= 0 {
        let byte = [0u8; 1];
        unsafe { libc::write(fd, byte.as_ptr() as *const libc::c_void, 1) };
    }
}

/// Blocks on the self-pipe, drains the descriptor queue, and forwards decoded
/// requests to the main loop. Exits when the write end closes (shutdown) or
/// the main channel is gone.
fn drain_loop(read_fd: OwnedFd, map: SignalMap, tx: mpsc::Sender<DaemonEvent>) {
    let mut pipe = File::from(read_fd);
    let mut buf = [0u8; 16];
    loop {
        match pipe.read(&mut buf) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("signal drain pipe read failed: {e}");
                break;
            }
        }
        let Some(queue) = PENDING.get() else { continue };
        while let Some(raw) = queue.pop() {
            match map.condition_for(raw.signo) {
                Some(condition) => {
                    let req = SignalRequest {
                        pid: raw.pid,
                        condition,
                    };
                    if tx.blocking_send(DaemonEvent::Registration(req)).is_err() {
                        return;
                    }
                }
                None => warn!("ignoring unexpected signal {} from pid {}", raw.signo, raw.pid),
            }
        }
    }
    debug!("signal drain thread exited");
}
