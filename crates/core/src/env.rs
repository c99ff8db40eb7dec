//! Centralized environment variable access, modeled on the daemon's own
//! `env` module: one function per variable, each with a documented default.

use std::path::PathBuf;
use std::time::Duration;

/// Default socket filename suffix (`<name>.<slot>.<suffix>`, spec.md §4.6.1).
pub const DEFAULT_SOCKET_SUFFIX: &str = "sock";

/// Base directory for driver sockets: `ODD_BASE_DIR`, default `.`.
pub fn base_dir() -> PathBuf {
    std::env::var("ODD_BASE_DIR").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("."))
}

/// Protocol suffix for socket filenames: `ODD_SOCKET_SUFFIX`, default `sock`.
pub fn socket_suffix() -> String {
    std::env::var("ODD_SOCKET_SUFFIX").unwrap_or_else(|_| DEFAULT_SOCKET_SUFFIX.to_string())
}

/// How long `list` waits for a freshly discovered driver's `DRV_INFO`
/// before reporting it as still connecting. Not a protocol timeout — no
/// socket operation is aborted because of it (spec.md §5: no user-visible
/// timeouts in the core).
pub fn info_wait() -> Duration {
    std::env::var("ODD_IPC_TIMEOUT_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_millis(500))
}

/// Resolved startup configuration, gathered once in `main` and threaded
/// through explicitly rather than re-read from the environment ad hoc.
#[derive(Debug, Clone)]
pub struct Config {
    pub base_dir: PathBuf,
    pub socket_suffix: String,
    pub info_wait: Duration,
}

impl Config {
    pub fn load() -> Self {
        Self { base_dir: base_dir(), socket_suffix: socket_suffix(), info_wait: info_wait() }
    }

    pub fn with_base_dir(mut self, base_dir: PathBuf) -> Self {
        self.base_dir = base_dir;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::load()
    }
}
