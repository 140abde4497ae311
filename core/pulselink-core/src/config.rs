//! Well-known locations for the state channel.
//!
//! Everything shared between the producer and its consumers lives under one
//! directory (default `~/.pulselink`). The bundle is constructed once and
//! passed explicitly into each component, so tests can point the whole
//! layer at a temporary directory.

use std::env;
use std::path::{Path, PathBuf};

use crate::error::{PulselinkError, Result};

/// Environment override for the base directory.
pub const DIR_ENV: &str = "PULSELINK_DIR";
/// Environment override for the socket endpoint alone.
pub const SOCKET_ENV: &str = "PULSELINK_SOCKET";

const STATE_FILE: &str = "state.json";
const SOCKET_NAME: &str = "state.sock";
const PID_FILE: &str = "daemon.pid";
const LOG_FILE: &str = "pulselink.log";

/// Fixed, well-known locations of the shared resources: the state file,
/// the socket endpoint, the producer PID marker, and the daemon log.
#[derive(Debug, Clone)]
pub struct BridgePaths {
    pub base_dir: PathBuf,
    pub state_file: PathBuf,
    pub socket_path: PathBuf,
    pub pid_file: PathBuf,
    pub log_file: PathBuf,
}

impl BridgePaths {
    /// Resolves the per-user locations, honoring `PULSELINK_DIR` and
    /// `PULSELINK_SOCKET` overrides.
    pub fn resolve() -> Result<Self> {
        let base_dir = match env::var(DIR_ENV) {
            Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
            _ => dirs::home_dir()
                .ok_or(PulselinkError::HomeDirNotFound)?
                .join(".pulselink"),
        };
        let mut paths = Self::under(&base_dir);
        if let Ok(socket) = env::var(SOCKET_ENV) {
            if !socket.trim().is_empty() {
                paths.socket_path = PathBuf::from(socket);
            }
        }
        Ok(paths)
    }

    /// Builds the bundle rooted at an explicit directory (tests point this
    /// at a tempdir).
    pub fn under(base_dir: &Path) -> Self {
        BridgePaths {
            base_dir: base_dir.to_path_buf(),
            state_file: base_dir.join(STATE_FILE),
            socket_path: base_dir.join(SOCKET_NAME),
            pid_file: base_dir.join(PID_FILE),
            log_file: base_dir.join(LOG_FILE),
        }
    }

    /// Creates the base directory if missing.
    pub fn ensure_base_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.base_dir)
            .map_err(|err| PulselinkError::io("create state directory", err))
    }
}
