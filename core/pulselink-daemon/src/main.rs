//! Pulselink producer daemon.
//!
//! Owns the socket channel: binds the unix socket under the bridge
//! directory, announces the current state record to every client, and
//! accepts publish/ingest updates. The state file is kept in sync so
//! consumers survive the daemon going away.

mod server;

use std::os::unix::net::UnixListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pulselink_core::lifecycle::{clear_pid_marker, write_pid_marker};
use pulselink_core::process::get_process_start_time;
use pulselink_core::{transport, BridgePaths, PulselinkError};
use server::SharedState;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

const ACCEPT_POLL: Duration = Duration::from_millis(50);

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn request_shutdown(_signal: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

fn main() {
    let paths = match BridgePaths::resolve() {
        Ok(paths) => paths,
        Err(err) => {
            eprintln!("pulselink-daemon: {}", err);
            std::process::exit(1);
        }
    };
    if let Err(err) = paths.ensure_base_dir() {
        eprintln!("pulselink-daemon: {}", err);
        std::process::exit(1);
    }

    let _log_guard = init_logging(&paths);

    if let Err(err) = run(paths) {
        error!(error = %err, "Daemon exited with error");
        std::process::exit(1);
    }
}

fn run(paths: BridgePaths) -> Result<(), PulselinkError> {
    let pid = std::process::id();
    write_pid_marker(&paths, pid, get_process_start_time(pid))?;

    let initial = server::initial_record();
    transport::write_state_file(&paths, &initial)?;

    // A leftover socket from a crashed daemon would make the bind fail.
    if paths.socket_path.exists() {
        fs_err::remove_file(&paths.socket_path)
            .map_err(|e| PulselinkError::io("removing stale socket", e))?;
    }
    let listener = UnixListener::bind(&paths.socket_path)
        .map_err(|e| PulselinkError::io("binding unix socket", e))?;
    listener
        .set_nonblocking(true)
        .map_err(|e| PulselinkError::io("configuring listener", e))?;

    let handler = request_shutdown as extern "C" fn(libc::c_int) as libc::sighandler_t;
    unsafe {
        libc::signal(libc::SIGTERM, handler);
        libc::signal(libc::SIGINT, handler);
    }

    info!(pid, socket = %paths.socket_path.display(), "Pulselink daemon listening");

    let state = Arc::new(SharedState::new(paths.clone(), initial));

    while !SHUTDOWN.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _addr)) => {
                if let Err(err) = stream.set_nonblocking(false) {
                    debug!(error = %err, "Failed to configure connection");
                    continue;
                }
                let state = Arc::clone(&state);
                std::thread::spawn(move || server::handle_connection(stream, &state));
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
            }
            Err(err) => {
                warn!(error = %err, "Accept failed");
                std::thread::sleep(ACCEPT_POLL);
            }
        }
    }

    info!("Shutdown requested, cleaning up");
    if let Err(err) = fs_err::remove_file(&paths.socket_path) {
        debug!(error = %err, "Failed to remove socket");
    }
    // Without a live producer the state file would only go stale.
    if let Err(err) = fs_err::remove_file(&paths.state_file) {
        debug!(error = %err, "Failed to remove state file");
    }
    clear_pid_marker(&paths);
    Ok(())
}

/// Logs go to the bridge log file; PULSELINK_DEBUG_LOG tunes verbosity.
fn init_logging(paths: &BridgePaths) -> tracing_appender::non_blocking::WorkerGuard {
    let file_appender = tracing_appender::rolling::never(
        &paths.base_dir,
        paths
            .log_file
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "pulselink.log".into()),
    );
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_env("PULSELINK_DEBUG_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();

    guard
}
