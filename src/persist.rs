//! Snapshot persistence and the periodic save loop.
//!
//! The snapshot is JSON, written atomically (temp file + rename) while holding
//! an exclusive lock on `<snapshot>.lock`. Readers take the same lock shared.
//! In-memory session locks are released before the file lock is taken.

use crate::config::Options;
use crate::error::SnapshotError;
use crate::ipc::IpcDescriptor;
use crate::project::now_nanos;
use crate::session::{Session, SessionSnapshot};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

/// `tokio::time::interval` rejects a zero period.
const MIN_SYNC_FREQUENCY: Duration = Duration::from_millis(1);

// ---------------------------------------------------------------------------
// File lock
// ---------------------------------------------------------------------------

/// Advisory lock held for the lifetime of the guard.
#[derive(Debug)]
pub(crate) struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    pub(crate) fn exclusive(path: &Path) -> std::io::Result<Self> {
        let file = open_lock_file(path)?;
        FileExt::lock_exclusive(&file)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub(crate) fn shared(path: &Path) -> std::io::Result<Self> {
        let file = open_lock_file(path)?;
        FileExt::lock_shared(&file)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Exclusive lock without waiting; `WouldBlock`-style errors mean it is held elsewhere.
    pub(crate) fn try_exclusive(path: &Path) -> std::io::Result<Self> {
        let file = open_lock_file(path)?;
        FileExt::try_lock_exclusive(&file)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!(path = %self.path.display(), error = %e, "failed to release file lock");
        }
    }
}

fn open_lock_file(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    // Never truncate: another process may hold this lock.
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// Load the session snapshot.
///
/// A missing file yields an empty session. An unreadable or corrupt file is an
/// error; existing data is never silently replaced.
pub fn load(options: &Options) -> Result<SessionSnapshot, SnapshotError> {
    let path = &options.db_path;
    let lock_path = options.save_lock_path();
    let _lock = FileLock::shared(&lock_path).map_err(|source| SnapshotError::Lock {
        path: lock_path.clone(),
        source,
    })?;

    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "no snapshot found, starting with empty session");
            return Ok(SessionSnapshot::default());
        }
        Err(source) => {
            return Err(SnapshotError::Read {
                path: path.clone(),
                source,
            });
        }
    };

    decode(path, &bytes)
}

/// Descriptor published by the running daemon.
///
/// Without a snapshot no daemon has published anything; the empty descriptor
/// is returned and nothing is created on disk.
pub fn read_descriptor(options: &Options) -> Result<IpcDescriptor, SnapshotError> {
    if !options.db_path.exists() {
        return Ok(IpcDescriptor::default());
    }
    Ok(load(options)?.ipc)
}

/// Write `snapshot` to the configured path under the save lock.
pub fn save(snapshot: &SessionSnapshot, options: &Options) -> Result<(), SnapshotError> {
    let bytes = serde_json::to_vec(snapshot).map_err(SnapshotError::Encode)?;

    let lock_path = options.save_lock_path();
    let _lock = FileLock::exclusive(&lock_path).map_err(|source| SnapshotError::Lock {
        path: lock_path.clone(),
        source,
    })?;

    atomic_write(&options.db_path, &bytes, options.db_mode).map_err(|source| {
        SnapshotError::Write {
            path: options.db_path.clone(),
            source,
        }
    })
}

fn decode(path: &Path, bytes: &[u8]) -> Result<SessionSnapshot, SnapshotError> {
    serde_json::from_slice(bytes).map_err(|source| SnapshotError::Decode {
        path: path.to_path_buf(),
        source,
    })
}

/// Write bytes to a file atomically: write to a temp file in the same
/// directory, then rename over the target. Prevents a partial snapshot on crash.
fn atomic_write(path: &Path, data: &[u8], mode: u32) -> Result<(), std::io::Error> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    set_mode(tmp.as_file(), mode)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(unix)]
fn set_mode(file: &File, mode: u32) -> Result<(), std::io::Error> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_file: &File, _mode: u32) -> Result<(), std::io::Error> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Save loop
// ---------------------------------------------------------------------------

/// Sweep timeouts and persist once per `sync_frequency` until `stop` fires.
///
/// The first tick runs immediately. A tick in progress when `stop` fires is
/// finished; no extra save is forced.
pub async fn run_save_loop(session: Arc<Session>, mut stop: watch::Receiver<bool>) {
    let period = session.options().sync_frequency.max(MIN_SYNC_FREQUENCY);
    let mut tick = tokio::time::interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            _ = tick.tick() => {}
        }
        save_tick(&session).await;
    }

    debug!("save loop stopped");
}

/// One save-loop iteration: sweep every project, then persist.
pub async fn save_tick(session: &Arc<Session>) {
    let swept = session.store().sweep_all(session.timeout(), now_nanos());
    if swept > 0 {
        debug!(swept, "projects went inactive");
    }

    let snapshot = session.snapshot();
    let options = session.options().clone();
    match tokio::task::spawn_blocking(move || save(&snapshot, &options)).await {
        Ok(Ok(())) => trace!("session saved"),
        Ok(Err(e)) => warn!("Failed to save session: {}", e),
        Err(e) => warn!("Save task failed: {}", e),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
