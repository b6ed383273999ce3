//! Where the notification database lives.
//!
//! The path is picked in order from an explicit `--db` argument, the
//! `MAYA_DB_PATH` environment variable, and finally
//! `data/maya_notifications.duckdb` under the workspace root.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Environment variable overriding the notification database path.
pub const DB_PATH_ENV: &str = "MAYA_DB_PATH";

/// File name of the default database under `data/`.
pub const DB_FILE_NAME: &str = "maya_notifications.duckdb";

/// Returns the workspace root directory.
///
/// Resolved at compile time from `CARGO_MANIFEST_DIR`.
///
/// # Panics
///
/// Panics if the project root cannot be resolved.
#[must_use]
pub fn project_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .expect("Failed to find project root from CARGO_MANIFEST_DIR")
        .to_path_buf()
}

/// Returns the default database path, `data/maya_notifications.duckdb`.
#[must_use]
pub fn default_db_path() -> PathBuf {
    project_root().join("data").join(DB_FILE_NAME)
}

/// Picks the database path from `explicit`, then `env_value`, then the
/// default. Empty values are ignored.
#[must_use]
pub fn pick_db_path(explicit: Option<PathBuf>, env_value: Option<OsString>) -> PathBuf {
    explicit
        .filter(|p| !p.as_os_str().is_empty())
        .or_else(|| env_value.filter(|v| !v.is_empty()).map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

/// Resolves the database path for a run, reading [`DB_PATH_ENV`].
#[must_use]
pub fn resolve_db_path(explicit: Option<PathBuf>) -> PathBuf {
    pick_db_path(explicit, std::env::var_os(DB_PATH_ENV))
}

/// Creates the directory that will hold the database file at `db_path`.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be created.
pub fn ensure_parent_dir(db_path: &Path) -> std::io::Result<()> {
    match db_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !parent.exists() => {
            log::debug!("Creating {}", parent.display());
            std::fs::create_dir_all(parent)
        }
        _ => Ok(()),
    }
}
