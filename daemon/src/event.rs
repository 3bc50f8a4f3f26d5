use crate::config::Config;
use crate::pressure::PressureFlags;
use crate::signals::SignalRequest;

pub enum DaemonEvent {
    /// A registration or deregistration signal was drained from the
    /// handler-side descriptor queue.
    Registration(SignalRequest),
    /// The kernel reported memory pressure; payload is the decoded bitmask.
    Pressure(PressureFlags),
    /// The config file changed on disk and was successfully re-parsed.
    ConfigReloaded(Config),
    /// The kernel pressure channel failed after startup; payload is the
    /// rendered error. Recorded in the status file before exit.
    ChannelFailed(String),
    /// SIGINT/SIGTERM received; the daemon should write final status and exit.
    Shutdown,
}
