//! Supervision of the out-of-process producer.
//!
//! The producer daemon is treated as an opaque subprocess tracked through
//! a PID marker file in the state directory. The marker carries the
//! process start time so a recycled PID is never mistaken for the
//! producer.

use std::io::ErrorKind;
use std::os::unix::net::UnixStream;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use pulselink_protocol::now_ms;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::BridgePaths;
use crate::error::{PulselinkError, Result};
use crate::process::{is_pid_alive_verified, ProcessProbe};

const HEALTH_PROBE_ATTEMPTS: u32 = 10;
const HEALTH_PROBE_INTERVAL: Duration = Duration::from_millis(300);
const STOP_POLL_ATTEMPTS: u32 = 20;
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);
const KILL_GRACE_ATTEMPTS: u32 = 10;

/// PID marker file contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PidMarker {
    pub pid: u32,
    /// Process start time (epoch seconds) for PID-reuse detection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proc_started: Option<u64>,
    /// Marker creation time, epoch milliseconds.
    pub created: i64,
}

/// Outcome of a start request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started { pid: u32, healthy: bool },
    /// A tracked producer is already alive; starting again is a no-op.
    AlreadyRunning { pid: u32 },
}

/// Outcome of a stop request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped { pid: u32, forced: bool },
    /// No tracked producer was running. Still clears the marker.
    NotRunning,
}

/// Supervises the producer daemon: start, stop, liveness.
pub struct LifecycleController<'a> {
    paths: &'a BridgePaths,
    probe: &'a dyn ProcessProbe,
    health_attempts: u32,
    health_interval: Duration,
}

impl<'a> LifecycleController<'a> {
    pub fn new(paths: &'a BridgePaths, probe: &'a dyn ProcessProbe) -> Self {
        LifecycleController {
            paths,
            probe,
            health_attempts: HEALTH_PROBE_ATTEMPTS,
            health_interval: HEALTH_PROBE_INTERVAL,
        }
    }

    /// Shortens the post-launch health probe (tests).
    pub fn with_health_probe(mut self, attempts: u32, interval: Duration) -> Self {
        self.health_attempts = attempts;
        self.health_interval = interval;
        self
    }

    /// The tracked producer pid, if the marker file is present and
    /// parsable.
    pub fn tracked(&self) -> Option<PidMarker> {
        read_pid_marker(self.paths)
    }

    /// Whether the tracked producer is alive (signal probe plus
    /// start-time verification, not a socket probe).
    pub fn is_running(&self) -> bool {
        self.tracked()
            .map(|marker| is_pid_alive_verified(self.probe, marker.pid, marker.proc_started))
            .unwrap_or(false)
    }

    /// Launches the producer detached from this process.
    ///
    /// Refuses (as a warning no-op, not an error) when a tracked producer
    /// is already alive. A health-probe failure is reported in the outcome
    /// but does not roll back the launch; the process may still be coming
    /// up.
    pub fn start(&self, command: &mut Command) -> Result<StartOutcome> {
        if let Some(marker) = self.tracked() {
            if is_pid_alive_verified(self.probe, marker.pid, marker.proc_started) {
                warn!(pid = marker.pid, "Producer already running; start is a no-op");
                return Ok(StartOutcome::AlreadyRunning { pid: marker.pid });
            }
        }

        self.paths.ensure_base_dir()?;

        let child = command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| PulselinkError::LaunchFailed {
                command: format!("{:?}", command.get_program()),
                details: err.to_string(),
            })?;
        let pid = child.id();

        write_pid_marker(self.paths, pid, self.probe.start_time(pid))?;
        info!(pid, "Producer launched");

        let healthy = self.probe_socket();
        if !healthy {
            warn!(
                socket = %self.paths.socket_path.display(),
                "Producer socket did not come up within the probe window; it may still be starting"
            );
        }

        Ok(StartOutcome::Started { pid, healthy })
    }

    /// Stops the tracked producer: graceful signal, bounded wait, forceful
    /// escalation. The marker is cleared on every path.
    pub fn stop(&self) -> Result<StopOutcome> {
        let marker = match self.tracked() {
            Some(marker) => marker,
            None => {
                clear_pid_marker(self.paths);
                return Ok(StopOutcome::NotRunning);
            }
        };

        if !is_pid_alive_verified(self.probe, marker.pid, marker.proc_started) {
            clear_pid_marker(self.paths);
            return Ok(StopOutcome::NotRunning);
        }

        send_signal(marker.pid, libc::SIGTERM);
        if self.wait_for_exit(marker.pid, STOP_POLL_ATTEMPTS) {
            clear_pid_marker(self.paths);
            info!(pid = marker.pid, "Producer stopped");
            return Ok(StopOutcome::Stopped {
                pid: marker.pid,
                forced: false,
            });
        }

        warn!(pid = marker.pid, "Producer ignored SIGTERM, escalating to SIGKILL");
        send_signal(marker.pid, libc::SIGKILL);
        let exited = self.wait_for_exit(marker.pid, KILL_GRACE_ATTEMPTS);
        clear_pid_marker(self.paths);

        if exited {
            Ok(StopOutcome::Stopped {
                pid: marker.pid,
                forced: true,
            })
        } else {
            Err(PulselinkError::TerminateTimeout {
                pid: marker.pid,
                waited_ms: (STOP_POLL_ATTEMPTS + KILL_GRACE_ATTEMPTS) as u64
                    * STOP_POLL_INTERVAL.as_millis() as u64,
                log_hint: self.paths.log_file.clone(),
            })
        }
    }

    fn wait_for_exit(&self, pid: u32, attempts: u32) -> bool {
        for _ in 0..attempts {
            if !self.probe.is_alive(pid) {
                return true;
            }
            thread::sleep(STOP_POLL_INTERVAL);
        }
        !self.probe.is_alive(pid)
    }

    fn probe_socket(&self) -> bool {
        for attempt in 0..self.health_attempts {
            if attempt > 0 {
                thread::sleep(self.health_interval);
            }
            if UnixStream::connect(&self.paths.socket_path).is_ok() {
                return true;
            }
        }
        false
    }
}

/// Writes the PID marker atomically enough for its single-writer use.
pub fn write_pid_marker(paths: &BridgePaths, pid: u32, proc_started: Option<u64>) -> Result<()> {
    paths.ensure_base_dir()?;
    let marker = PidMarker {
        pid,
        proc_started,
        created: now_ms(),
    };
    let content = serde_json::to_string_pretty(&marker)
        .map_err(|err| PulselinkError::json("serialize pid marker", err))?;
    std::fs::write(&paths.pid_file, content)
        .map_err(|err| PulselinkError::io("write pid marker", err))
}

/// Reads the PID marker. Tolerates the bare-integer form older producers
/// wrote.
pub fn read_pid_marker(paths: &BridgePaths) -> Option<PidMarker> {
    let content = std::fs::read_to_string(&paths.pid_file).ok()?;
    if let Ok(marker) = serde_json::from_str::<PidMarker>(&content) {
        return Some(marker);
    }
    let pid: u32 = content.trim().parse().ok()?;
    Some(PidMarker {
        pid,
        proc_started: None,
        created: 0,
    })
}

/// Removes the PID marker; a missing marker is not an error.
pub fn clear_pid_marker(paths: &BridgePaths) {
    if let Err(err) = std::fs::remove_file(&paths.pid_file) {
        if err.kind() != ErrorKind::NotFound {
            warn!(error = %err, "Failed to remove pid marker");
        }
    }
}

fn send_signal(pid: u32, signal: i32) {
    unsafe {
        libc::kill(pid as i32, signal);
    }
}
