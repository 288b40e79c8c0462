//! Resolved daemon configuration.
//!
//! - **Snapshot** (`~/.hourtab`): the durable session state.
//! - **Locks**: `<snapshot>.master-lock` guards against a second daemon,
//!   `<snapshot>.lock` guards snapshot reads and writes.
//! - **Socket** (`$TMPDIR/hourtab.sock`): the domain socket endpoint.

use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Snapshot file name under the home directory.
pub const DB_NAME: &str = ".hourtab";
/// Socket file name under the temp directory.
pub const SOCKET_NAME: &str = "hourtab.sock";

const DEFAULT_DB_MODE: u32 = 0o600;
const DEFAULT_SYNC_FREQUENCY: Duration = Duration::from_secs(10);
const DEFAULT_TIMEOUT_AFTER: u32 = 2;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Settings consumed by the daemon and its clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Snapshot file path.
    pub db_path: PathBuf,
    /// Permission bits applied to the snapshot file.
    pub db_mode: u32,
    /// How often projects are swept and the session is saved.
    pub sync_frequency: Duration,
    /// Number of sync ticks without activity before a project goes inactive.
    pub timeout_after: u32,
    /// Domain socket path, where the platform supports one.
    pub socket_path: PathBuf,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            db_mode: DEFAULT_DB_MODE,
            sync_frequency: DEFAULT_SYNC_FREQUENCY,
            timeout_after: DEFAULT_TIMEOUT_AFTER,
            socket_path: default_socket_path(),
        }
    }
}

impl Options {
    /// Options rooted in `dir`, used by tests and sandboxed runs.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            db_path: dir.join(DB_NAME),
            socket_path: dir.join(SOCKET_NAME),
            ..Self::default()
        }
    }

    /// Idle duration after which a project stops accruing time.
    pub fn timeout(&self) -> Duration {
        self.sync_frequency.saturating_mul(self.timeout_after)
    }

    /// Path of the single-instance lock.
    pub fn master_lock_path(&self) -> PathBuf {
        sibling_with_suffix(&self.db_path, ".master-lock")
    }

    /// Path of the lock held while the snapshot is read or written.
    pub fn save_lock_path(&self) -> PathBuf {
        sibling_with_suffix(&self.db_path, ".lock")
    }
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

fn default_db_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(DB_NAME)
}

fn default_socket_path() -> PathBuf {
    std::env::temp_dir().join(SOCKET_NAME)
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_default_values() {
        let options = Options::default();
        assert_eq!(options.db_mode, 0o600);
        assert_eq!(options.sync_frequency, Duration::from_secs(10));
        assert_eq!(options.timeout_after, 2);
        assert!(options.db_path.ends_with(DB_NAME));
        assert!(options.socket_path.ends_with(SOCKET_NAME));
    }

    #[test]
    fn timeout_is_frequency_times_ticks() {
        let options = Options {
            sync_frequency: Duration::from_secs(10),
            timeout_after: 2,
            ..Options::default()
        };
        assert_eq!(options.timeout(), Duration::from_secs(20));
    }

    #[test]
    fn lock_paths_are_distinct_siblings() {
        let options = Options::in_dir(Path::new("/data"));
        assert_eq!(options.master_lock_path(), PathBuf::from("/data/.hourtab.master-lock"));
        assert_eq!(options.save_lock_path(), PathBuf::from("/data/.hourtab.lock"));
        assert_ne!(options.master_lock_path(), options.save_lock_path());
    }

    #[test]
    fn options_missing_fields_use_defaults() {
        let options: Options = serde_json::from_str(r#"{"timeout_after":5}"#).unwrap();
        assert_eq!(options.timeout_after, 5);
        assert_eq!(options.sync_frequency, DEFAULT_SYNC_FREQUENCY);
    }

    #[test]
    fn options_extra_fields_ignored() {
        let options: Options =
            serde_json::from_str(r#"{"db_mode":420,"unknown_field":42}"#).unwrap();
        assert_eq!(options.db_mode, 0o644);
    }
}
