//! Daemon lifecycle: startup, the running tasks, and shutdown.

use crate::config::Options;
use crate::error::DaemonError;
use crate::ipc::IpcDescriptor;
use crate::ipc::server::{self, BindStrategy};
use crate::persist::{self, FileLock};
use crate::session::{Session, SessionSnapshot};
use crate::store::WatchSource;
use crate::watch::{self, FsWatcher};
use std::sync::Arc;
use tokio::sync::watch as signal;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A running daemon. Holds the single-instance lock until shut down.
#[derive(Debug)]
pub struct Daemon {
    session: Arc<Session>,
    watcher: Arc<FsWatcher>,
    stop: signal::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    _master_lock: FileLock,
}

impl Daemon {
    /// Start the daemon.
    ///
    /// Steps run in order and any failure aborts startup, releasing whatever
    /// was already acquired:
    /// 1. take the single-instance lock
    /// 2. bind the IPC endpoint
    /// 3. load the snapshot (or start empty)
    /// 4. publish the fresh descriptor in the session
    /// 5. spawn the RPC server, the save loop and the watch loop
    pub async fn start(options: Options) -> Result<Self, DaemonError> {
        let lock_path = options.master_lock_path();
        let master_lock = FileLock::try_exclusive(&lock_path).map_err(|source| {
            if source.kind() == fs2::lock_contended_error().kind() {
                DaemonError::AlreadyRunning(lock_path.clone())
            } else {
                DaemonError::Lock {
                    path: lock_path.clone(),
                    source,
                }
            }
        })?;
        info!(path = %lock_path.display(), "single-instance lock acquired");

        let listener = BindStrategy::platform_default(&options.socket_path)
            .bind()
            .await?;
        let descriptor = listener.descriptor();
        info!(endpoint = %descriptor, "IPC endpoint bound");

        let snapshot = match load_snapshot(&options).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                listener.cleanup();
                return Err(e);
            }
        };
        info!(
            path = %options.db_path.display(),
            projects = snapshot.projects.len(),
            "snapshot loaded"
        );

        let (watcher, events) = match FsWatcher::new() {
            Ok(pair) => pair,
            Err(e) => {
                listener.cleanup();
                return Err(e.into());
            }
        };
        let watcher = Arc::new(watcher);
        let watch_source: Arc<dyn WatchSource> = watcher.clone();

        let session = Arc::new(Session::from_snapshot(
            snapshot,
            descriptor,
            options,
            watch_source,
        ));

        let (stop, stop_rx) = signal::channel(false);
        let tasks = vec![
            tokio::spawn(server::serve(
                listener,
                Arc::clone(&session),
                stop_rx.clone(),
            )),
            tokio::spawn(persist::run_save_loop(Arc::clone(&session), stop_rx.clone())),
            tokio::spawn(watch::run_watch_loop(Arc::clone(&session), events, stop_rx)),
        ];

        Ok(Self {
            session,
            watcher,
            stop,
            tasks,
            _master_lock: master_lock,
        })
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn descriptor(&self) -> &IpcDescriptor {
        self.session.descriptor()
    }

    /// Stop every task and release the single-instance lock.
    ///
    /// No save is forced; the last completed tick is what stays on disk.
    pub async fn shutdown(self) {
        info!("shutting down");
        let _ = self.stop.send(true);
        self.watcher.close();

        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("Daemon task failed: {}", e);
            }
        }
        debug!("daemon tasks finished");
        // The master lock is released when `self` is dropped here.
    }
}

async fn load_snapshot(options: &Options) -> Result<SessionSnapshot, DaemonError> {
    let options = options.clone();
    tokio::task::spawn_blocking(move || persist::load(&options))
        .await
        .map_err(|e| DaemonError::Io(std::io::Error::other(e)))?
        .map_err(DaemonError::from)
}
