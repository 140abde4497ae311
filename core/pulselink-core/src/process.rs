//! Process liveness probing.
//!
//! The validator and the lifecycle controller depend on the
//! [`ProcessProbe`] capability rather than a specific OS mechanism, so
//! tests can substitute fakes and the platform probe stays in one place.

use std::cell::RefCell;

/// Capability for asking whether a process id is alive.
pub trait ProcessProbe {
    fn is_alive(&self, pid: u32) -> bool;

    /// Process start time (epoch seconds), when the platform can report
    /// it. Used to detect PID reuse; `None` disables that check.
    fn start_time(&self, pid: u32) -> Option<u64> {
        let _ = pid;
        None
    }
}

/// Platform probe: signal-0 liveness plus sysinfo start-time lookup.
#[derive(Debug, Default)]
pub struct SignalProbe;

impl ProcessProbe for SignalProbe {
    fn is_alive(&self, pid: u32) -> bool {
        is_pid_alive(pid)
    }

    fn start_time(&self, pid: u32) -> Option<u64> {
        get_process_start_time(pid)
    }
}

pub fn is_pid_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    #[cfg(unix)]
    {
        unsafe { libc::kill(pid as i32, 0) == 0 }
    }
    #[cfg(not(unix))]
    {
        false
    }
}

// Thread-local sysinfo cache with per-PID refresh; probing happens on every
// validated read and must stay O(1).
thread_local! {
    static SYSTEM_CACHE: RefCell<Option<sysinfo::System>> = const { RefCell::new(None) };
}

/// Start time of a process (epoch seconds), or `None` if it does not exist
/// or cannot be queried.
pub fn get_process_start_time(pid: u32) -> Option<u64> {
    use sysinfo::{Pid, ProcessRefreshKind, System};

    SYSTEM_CACHE.with(|cache| {
        let mut cache = cache.borrow_mut();
        let sys = cache.get_or_insert_with(System::new);

        let sysinfo_pid = Pid::from(pid as usize);
        sys.refresh_process_specifics(sysinfo_pid, ProcessRefreshKind::new());
        sys.process(sysinfo_pid).map(|process| process.start_time())
    })
}

/// Verifies liveness against an expected start time (±2s tolerance) when
/// one is known, guarding against the OS recycling the pid.
pub fn is_pid_alive_verified(probe: &dyn ProcessProbe, pid: u32, expected_start: Option<u64>) -> bool {
    if !probe.is_alive(pid) {
        return false;
    }
    match (expected_start, probe.start_time(pid)) {
        (Some(expected), Some(actual)) => actual.abs_diff(expected) <= 2,
        _ => true,
    }
}
