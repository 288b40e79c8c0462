//! Error types for each concern of the daemon.

use std::path::PathBuf;
use thiserror::Error;

/// Fatal startup and lifecycle failures.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("hourtab is already running (lock held at {0})")]
    AlreadyRunning(PathBuf),

    #[error("Failed to acquire lock at {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to bind IPC transport: {0}")]
    Transport(#[from] IpcError),

    #[error("Failed to load snapshot: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Failed to start file watcher: {0}")]
    Watch(#[from] WatchError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Snapshot read/write failures.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to lock {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt snapshot at {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode session: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Watch subscription failures.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("watcher is closed")]
    Closed,
}

/// Project collection failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("project root {} is not an absolute path", .0.display())]
    RelativePath(PathBuf),

    #[error("{} is already tracked", .0.display())]
    AlreadyTracked(PathBuf),

    #[error("Failed to watch {}: {source}", path.display())]
    Subscribe {
        path: PathBuf,
        #[source]
        source: WatchError,
    },
}

/// Transport, dial and remote call failures.
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("descriptor has neither a socket path nor a port")]
    EmptyDescriptor,

    #[error("no available port in range {start}..={end}")]
    NoAvailablePort { start: u16, end: u16 },

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed message: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("{0}")]
    Remote(String),

    #[error("connection closed by daemon")]
    Disconnected,
}

/// Repository origin lookup failures.
#[derive(Debug, Error)]
pub enum OriginError {
    #[error("Failed to read git config: {0}")]
    Git(#[from] git2::Error),

    #[error("origin url does not exist")]
    NoOrigin,
}
