//! Project-wide constants.

use std::path::PathBuf;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Workers started per pipeline run when none is configured.
pub const DEFAULT_WORKER_POOL_SIZE: usize = 4;

/// Per-check deadline when none is configured.
pub const DEFAULT_CHECK_TIMEOUT_SECS: u64 = 30;

/// Whole-request deadline enforced by the HTTP ingress.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

pub const DEFAULT_SERVER_ADDR: &str = "0.0.0.0:8080";

pub const DEFAULT_EXTERNAL_API_URL: &str = "https://google.com";

/// Default database path: `~/.guardian/guardian.db`, or `guardian.db` in the
/// working directory when there is no home directory.
pub fn default_db_path() -> PathBuf {
    match dirs::home_dir() {
        Some(home) => home.join(".guardian").join("guardian.db"),
        None => PathBuf::from("guardian.db"),
    }
}
