//! Logging bootstrap shared by both binaries (`oddsh`, `odd-driverd`).

use tracing_subscriber::EnvFilter;

/// Install a `tracing` subscriber reading `RUST_LOG` (default `info`).
///
/// Idempotent against being called twice in the same process (tests may
/// call it per-binary-under-test); a second call is a no-op rather than a
/// panic.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
