//! Process-control signals for a running archiver.
//!
//! Pause and resume suspend the whole process (SIGSTOP / SIGCONT) rather than
//! asking the archiver to throttle itself. Cancellation sends SIGTERM, which
//! 7-Zip intercepts to clean up and report `Break signaled`.

use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Stop,
    Continue,
    Terminate,
}

/// Deliver `signal` to `pid`.
///
/// A process that has already gone away is not an error. Returns whether the
/// signal was delivered.
#[cfg(unix)]
pub fn send_signal(pid: u32, signal: ControlSignal) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let sig = match signal {
        ControlSignal::Stop => Signal::SIGSTOP,
        ControlSignal::Continue => Signal::SIGCONT,
        ControlSignal::Terminate => Signal::SIGTERM,
    };

    // pid 0 would address our own process group
    let raw = match i32::try_from(pid) {
        Ok(raw) if raw > 0 => raw,
        _ => {
            debug!(pid, "no live process to signal");
            return false;
        }
    };

    match kill(Pid::from_raw(raw), sig) {
        Ok(()) => {
            debug!(pid, ?sig, "signal sent");
            true
        }
        Err(Errno::ESRCH) => {
            debug!(pid, ?sig, "process already exited");
            false
        }
        Err(e) => {
            warn!(pid, ?sig, error = %e, "failed to signal archiver");
            false
        }
    }
}

/// Signals are not available; the worker kills the child on cancellation.
#[cfg(not(unix))]
pub fn send_signal(pid: u32, signal: ControlSignal) -> bool {
    if signal != ControlSignal::Terminate {
        warn!(pid, ?signal, "pause/resume is not supported on this platform");
    }
    false
}

/// Whether [`send_signal`] can suspend and resume processes here.
pub fn supports_suspend() -> bool {
    cfg!(unix)
}
