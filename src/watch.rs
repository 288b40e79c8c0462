//! Filesystem watching for tracked project roots.
//!
//! [`FsWatcher`] wraps a notify watcher and forwards its events, reduced to
//! "something changed here" or "something was created here", over a channel.
//! [`run_watch_loop`] drains that channel and applies each event to the
//! project owning the path.

use crate::error::WatchError;
use crate::project::now_nanos;
use crate::session::Session;
use crate::store::WatchSource;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

/// A filesystem event reduced to what the tracker cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A path was modified, removed, renamed or otherwise touched.
    Activity(PathBuf),
    /// A new path appeared.
    Created(PathBuf),
}

impl WatchEvent {
    pub fn path(&self) -> &Path {
        match self {
            Self::Activity(path) | Self::Created(path) => path,
        }
    }

    fn from_notify(event: notify::Event) -> impl Iterator<Item = WatchEvent> {
        let created = matches!(event.kind, EventKind::Create(_));
        event.paths.into_iter().map(move |path| {
            if created {
                Self::Created(path)
            } else {
                Self::Activity(path)
            }
        })
    }
}

/// notify-backed [`WatchSource`].
///
/// Closing drops the underlying watcher, which ends the event stream.
pub struct FsWatcher {
    inner: Mutex<Option<RecommendedWatcher>>,
}

impl std::fmt::Debug for FsWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsWatcher")
            .field("open", &self.lock().is_some())
            .finish()
    }
}

impl FsWatcher {
    /// Start a watcher and return it with its event stream.
    pub fn new() -> Result<(Self, mpsc::UnboundedReceiver<WatchEvent>), WatchError> {
        let (tx, rx) = mpsc::unbounded_channel();

        let watcher = notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
            let event = match res {
                Ok(e) => e,
                Err(err) => {
                    debug!(error = %err, "file watcher error");
                    return;
                }
            };
            for event in WatchEvent::from_notify(event) {
                // The receiver is gone once the watch loop exits.
                if tx.send(event).is_err() {
                    return;
                }
            }
        })?;

        Ok((
            Self {
                inner: Mutex::new(Some(watcher)),
            },
            rx,
        ))
    }

    /// Stop watching everything. Further subscriptions fail with [`WatchError::Closed`].
    pub fn close(&self) {
        if self.lock().take().is_some() {
            debug!("file watcher closed");
        }
    }

    fn watch(&self, path: &Path, mode: RecursiveMode) -> Result<(), WatchError> {
        let mut inner = self.lock();
        let watcher = inner.as_mut().ok_or(WatchError::Closed)?;
        watcher.watch(path, mode)?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Option<RecommendedWatcher>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl WatchSource for FsWatcher {
    fn watch_recursive(&self, path: &Path) -> Result<(), WatchError> {
        self.watch(path, RecursiveMode::Recursive)
    }

    fn watch_path(&self, path: &Path) -> Result<(), WatchError> {
        self.watch(path, RecursiveMode::NonRecursive)
    }

    fn unwatch(&self, path: &Path) -> Result<(), WatchError> {
        let mut inner = self.lock();
        let watcher = inner.as_mut().ok_or(WatchError::Closed)?;
        watcher.unwatch(path)?;
        Ok(())
    }
}

/// Subscribe every project restored from the snapshot.
fn subscribe_restored(session: &Session) {
    for project in session.store().handles() {
        if let Err(e) = session.store().watch_source().watch_recursive(project.path()) {
            warn!(path = %project.path().display(), error = %e, "failed to watch project");
        }
    }
}

/// Apply one event to the project owning its path.
pub fn handle_event(session: &Session, event: WatchEvent) {
    let Some(project) = session.store().get_by_prefix(event.path()) else {
        trace!(path = %event.path().display(), "event outside tracked projects");
        return;
    };

    match event {
        WatchEvent::Created(path) => {
            if let Err(e) = session.store().watch_source().watch_path(&path) {
                warn!(
                    path = %path.display(),
                    project = %project.path().display(),
                    error = %e,
                    "failed to watch new path"
                );
            }
        }
        WatchEvent::Activity(path) => {
            trace!(path = %path.display(), "activity");
            project.bump(session.timeout(), now_nanos());
        }
    }
}

/// Drain `events` until the stream ends or `stop` fires.
pub async fn run_watch_loop(
    session: Arc<Session>,
    mut events: mpsc::UnboundedReceiver<WatchEvent>,
    mut stop: watch::Receiver<bool>,
) {
    let restored = Arc::clone(&session);
    if let Err(e) = tokio::task::spawn_blocking(move || subscribe_restored(&restored)).await {
        warn!("Failed to subscribe restored projects: {}", e);
    }
    info!(projects = session.store().len(), "watching projects");

    loop {
        let event = tokio::select! {
            biased;
            _ = stop.changed() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        handle_event(&session, event);
    }

    debug!("watch loop stopped");
}
