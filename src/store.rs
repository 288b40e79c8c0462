//! Project registry - the set of tracked projects shared by every task
//!
//! Two lock tiers: the collection mutex guards list/get/add/remove, and each
//! [`TrackedProject`] has its own mutex for bump/sweep. Neither is ever held
//! while a file lock is acquired.

use crate::error::{StoreError, WatchError};
use crate::project::Project;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Source of filesystem subscriptions for project roots.
pub trait WatchSource: Send + Sync {
    /// Watch `path` and everything below it.
    fn watch_recursive(&self, path: &Path) -> Result<(), WatchError>;

    /// Watch a single newly created path.
    fn watch_path(&self, path: &Path) -> Result<(), WatchError>;

    /// Stop watching `path`.
    fn unwatch(&self, path: &Path) -> Result<(), WatchError>;
}

/// A project plus the lock guarding its counters.
#[derive(Debug)]
pub struct TrackedProject {
    path: PathBuf,
    inner: Mutex<Project>,
}

impl TrackedProject {
    pub fn new(project: Project) -> Self {
        Self {
            path: project.path.clone(),
            inner: Mutex::new(project),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy of the current project state.
    pub fn snapshot(&self) -> Project {
        self.lock().clone()
    }

    pub fn bump(&self, timeout: Duration, now: u64) {
        self.lock().bump(timeout, now);
    }

    pub fn sweep(&self, timeout: Duration, now: u64) -> bool {
        self.lock().sweep(timeout, now)
    }

    fn lock(&self) -> MutexGuard<'_, Project> {
        // Project updates cannot leave the struct half-written, so a poisoned
        // lock still holds consistent data.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// In-memory collection of tracked projects.
pub struct SessionStore {
    projects: Mutex<Vec<Arc<TrackedProject>>>,
    watch: Arc<dyn WatchSource>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("projects", &self.len())
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    pub fn new(watch: Arc<dyn WatchSource>) -> Self {
        Self {
            projects: Mutex::new(Vec::new()),
            watch,
        }
    }

    /// Populate from persisted projects without subscribing; the watch loop
    /// subscribes restored roots when it starts.
    pub fn restore(&self, projects: Vec<Project>) {
        let mut list = self.lock();
        list.extend(projects.into_iter().map(|p| Arc::new(TrackedProject::new(p))));
        debug!("{} project(s) restored", list.len());
    }

    /// Snapshot of every project.
    pub fn list(&self) -> Vec<Project> {
        self.handles().iter().map(|p| p.snapshot()).collect()
    }

    /// Shared handles to every project, taken under the collection lock.
    pub fn handles(&self) -> Vec<Arc<TrackedProject>> {
        self.lock().clone()
    }

    /// First project whose root contains `path`.
    pub fn get_by_prefix(&self, path: &Path) -> Option<Arc<TrackedProject>> {
        self.lock()
            .iter()
            .find(|p| path.starts_with(p.path()))
            .cloned()
    }

    /// Register `project` and subscribe to its root.
    ///
    /// The root must be absolute; watch events always carry absolute paths.
    /// When the root is already tracked or the subscription fails the project
    /// is not added.
    pub fn add(&self, project: Project) -> Result<(), StoreError> {
        if !project.path.is_absolute() {
            return Err(StoreError::RelativePath(project.path));
        }

        let mut list = self.lock();

        if list.iter().any(|p| p.path() == project.path) {
            return Err(StoreError::AlreadyTracked(project.path));
        }

        if let Err(source) = self.watch.watch_recursive(&project.path) {
            return Err(StoreError::Subscribe {
                path: project.path,
                source,
            });
        }

        info!(path = %project.path.display(), origin = %project.origin, "project added");
        list.push(Arc::new(TrackedProject::new(project)));
        Ok(())
    }

    /// Remove the project rooted exactly at `path`. Returns whether one was removed.
    pub fn remove_exact(&self, path: &Path) -> bool {
        let mut list = self.lock();

        let Some(pos) = list.iter().position(|p| p.path() == path) else {
            return false;
        };
        list.swap_remove(pos);

        if let Err(e) = self.watch.unwatch(path) {
            warn!(path = %path.display(), error = %e, "failed to unwatch removed project");
        }
        info!(path = %path.display(), "project removed");
        true
    }

    /// Sweep every project's timeout against `now`. Returns how many went inactive.
    pub fn sweep_all(&self, timeout: Duration, now: u64) -> usize {
        self.handles()
            .iter()
            .filter(|p| p.sweep(timeout, now))
            .count()
    }

    pub fn watch_source(&self) -> &Arc<dyn WatchSource> {
        &self.watch
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<TrackedProject>>> {
        self.projects.lock().unwrap_or_else(|e| e.into_inner())
    }
}
