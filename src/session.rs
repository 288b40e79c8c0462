//! The daemon's complete state and its persisted form

use crate::config::Options;
use crate::ipc::IpcDescriptor;
use crate::project::Project;
use crate::store::{SessionStore, WatchSource};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Serialized session: projects, the published endpoint, and the options in
/// effect when it was written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSnapshot {
    pub projects: Vec<Project>,
    pub ipc: IpcDescriptor,
    pub options: Options,
}

/// Live session shared by the RPC handlers, the save loop and the watch loop.
#[derive(Debug)]
pub struct Session {
    store: SessionStore,
    descriptor: IpcDescriptor,
    options: Options,
    timeout: Duration,
}

impl Session {
    /// Build a live session from a loaded snapshot.
    ///
    /// The persisted descriptor and options are replaced by the current ones.
    pub fn from_snapshot(
        snapshot: SessionSnapshot,
        descriptor: IpcDescriptor,
        options: Options,
        watch: Arc<dyn WatchSource>,
    ) -> Self {
        let store = SessionStore::new(watch);
        store.restore(snapshot.projects);
        let timeout = options.timeout();

        Self {
            store,
            descriptor,
            options,
            timeout,
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn descriptor(&self) -> &IpcDescriptor {
        &self.descriptor
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Idle duration after which projects stop accruing time.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Capture the whole session for persistence.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            projects: self.store.list(),
            ipc: self.descriptor.clone(),
            options: self.options.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::ProjectState;
    use crate::store::tests::RecordingWatch;
    use std::path::{Path, PathBuf};

    fn sample_snapshot() -> SessionSnapshot {
        let mut active = Project::new("/src/a", "owner/a");
        active.bump(Duration::from_secs(20), 5);
        SessionSnapshot {
            projects: vec![active, Project::new("/src/b", "owner/b")],
            ipc: IpcDescriptor::unix(PathBuf::from("/tmp/old.sock")),
            options: Options::in_dir(Path::new("/old")),
        }
    }

    #[test]
    fn from_snapshot_replaces_descriptor_and_options() {
        let options = Options::in_dir(Path::new("/new"));
        let descriptor = IpcDescriptor::tcp(49152);
        let session = Session::from_snapshot(
            sample_snapshot(),
            descriptor.clone(),
            options.clone(),
            Arc::new(RecordingWatch::default()),
        );

        assert_eq!(session.descriptor(), &descriptor);
        assert_eq!(session.options(), &options);
        assert_eq!(session.timeout(), options.timeout());
        assert_eq!(session.store().len(), 2);
    }

    #[test]
    fn snapshot_roundtrips_through_json() {
        let session = Session::from_snapshot(
            sample_snapshot(),
            IpcDescriptor::tcp(50000),
            Options::in_dir(Path::new("/data")),
            Arc::new(RecordingWatch::default()),
        );
        let snapshot = session.snapshot();

        let json = serde_json::to_vec(&snapshot).unwrap();
        let decoded: SessionSnapshot = serde_json::from_slice(&json).unwrap();

        assert_eq!(decoded, snapshot);
        let a = decoded
            .projects
            .iter()
            .find(|p| p.path == Path::new("/src/a"))
            .unwrap();
        assert_eq!(a.state, ProjectState::Active);
        assert_eq!(a.last_tick, 5);
    }

    #[test]
    fn empty_snapshot_roundtrips() {
        let snapshot = SessionSnapshot::default();
        let json = serde_json::to_string(&snapshot).unwrap();
        let decoded: SessionSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, snapshot);
    }

    #[test]
    fn snapshot_tolerates_unknown_and_missing_fields() {
        let json = r#"{"projects":[{"path":"/src/a","total_time":42,"future":true}],"added_later":1}"#;
        let decoded: SessionSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(decoded.projects.len(), 1);
        assert_eq!(decoded.projects[0].total_time, 42);
        assert!(decoded.ipc.is_empty());
    }
}
