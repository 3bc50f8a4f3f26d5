use std::io;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

/// Seam between the registry/dispatch/fleet logic and real process signaling,
/// so tests can substitute a recording double.
pub trait ProcessControl: Send + Sync {
    /// Zero-effort existence probe (`kill(pid, 0)`).
    fn alive(&self, pid: i32) -> bool;
    /// Sends the raw-numbered notification signal.
    fn notify(&self, pid: i32, signo: i32) -> io::Result<()>;
    /// Sends SIGSTOP.
    fn suspend(&self, pid: i32) -> io::Result<()>;
    /// Sends SIGCONT.
    fn resume(&self, pid: i32) -> io::Result<()>;
}

/// Real implementation backed by kill(2).
pub struct SystemControl;

impl ProcessControl for SystemControl {
    fn alive(&self, pid: i32) -> bool {
        signal::kill(Pid::from_raw(pid), None::<Signal>).is_ok()
    }

    fn notify(&self, pid: i32, signo: i32) -> io::Result<()> {
        // Real-time signal numbers sit outside nix's Signal enum, so this one
        // goes through libc directly.
        nix::errno::Errno::result(unsafe { libc::kill(pid, signo) })
            .map(drop)
            .map_err(io::Error::from)
    }

    fn suspend(&self, pid: i32) -> io::Result<()> {
        signal::kill(Pid::from_raw(pid), Signal::SIGSTOP).map_err(io::Error::from)
    }

    fn resume(&self, pid: i32) -> io::Result<()> {
        signal::kill(Pid::from_raw(pid), Signal::SIGCONT).map_err(io::Error::from)
    }
}

/// True when `err` means "no such process": the pid exited between the
/// registry snapshot and the send. Callers treat this as stale-entry
/// discovery, never as a loop-level failure.
pub fn is_gone(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::ESRCH)
}


#[cfg(test)]
mod tests {
    use super::*;

    // ── is_gone ───────────────────────────────────────────────────────────────

    #[test]
    fn is_gone_matches_esrch_only() {
        assert!(is_gone(&io::Error::from_raw_os_error(libc::ESRCH)));
        assert!(!is_gone(&io::Error::from_raw_os_error(libc::EPERM)));
        assert!(!is_gone(&io::Error::new(io::ErrorKind::Other, "no errno")));
    }

    // ── SystemControl ─────────────────────────────────────────────────────────

    #[test]
    fn alive_reports_own_process() {
        let control = SystemControl;
        assert!(control.alive(std::process::id() as i32));
    }

    #[test]
    fn notify_to_dead_pid_is_gone() {
        let control = SystemControl;
        // pid_max on Linux defaults to 2^22 at most without tuning; this pid
        // cannot exist.
        let err = control.notify(i32::MAX - 1, 0).unwrap_err();
        assert!(is_gone(&err));
    }
}
