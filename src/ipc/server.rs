//! IPC server: endpoint binding, accept loop and call dispatch
//!
//! Accepted connections are served concurrently; each carries any number of
//! newline-delimited [`Request`]s answered in order.

use super::protocol::{Method, Request, Response, serialize_message};
use super::{Connection, IpcDescriptor};
use crate::error::IpcError;
use crate::project::Project;
use crate::session::Session;
use crate::store::SessionStore;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

/// TCP ports tried in order when no domain socket is available.
pub const PORT_RANGE: RangeInclusive<u16> = 49152..=65535;

/// How the daemon obtains its endpoint. Chosen once at bind time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindStrategy {
    /// Domain socket at a well-known path.
    UnixSocket(PathBuf),
    /// First bindable loopback port in the range.
    PortScan(RangeInclusive<u16>),
}

impl BindStrategy {
    /// Domain socket where supported, otherwise a port scan.
    #[cfg(unix)]
    pub fn platform_default(socket_path: &Path) -> Self {
        Self::UnixSocket(socket_path.to_path_buf())
    }

    #[cfg(not(unix))]
    pub fn platform_default(_socket_path: &Path) -> Self {
        Self::PortScan(PORT_RANGE)
    }

    pub async fn bind(&self) -> Result<Listener, IpcError> {
        match self {
            Self::UnixSocket(path) => bind_unix(path),
            Self::PortScan(range) => bind_port_scan(range.clone()).await,
        }
    }
}

#[cfg(unix)]
fn bind_unix(path: &Path) -> Result<Listener, IpcError> {
    // The socket path is shared across data paths, so a socket left here may
    // still belong to a live daemon. Only an unanswered socket is removed.
    match std::os::unix::net::UnixStream::connect(path) {
        Ok(_) => {
            return Err(IpcError::Bind {
                addr: path.display().to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::AddrInUse,
                    "another daemon is listening on this socket",
                ),
            });
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
            if let Err(e) = std::fs::remove_file(path) {
                warn!(path = %path.display(), error = %e, "failed to remove stale socket");
            }
        }
        Err(source) => {
            return Err(IpcError::Bind {
                addr: path.display().to_string(),
                source,
            });
        }
    }

    let listener = UnixListener::bind(path).map_err(|source| IpcError::Bind {
        addr: path.display().to_string(),
        source,
    })?;

    Ok(Listener::Unix {
        listener,
        path: path.to_path_buf(),
    })
}

#[cfg(not(unix))]
fn bind_unix(path: &Path) -> Result<Listener, IpcError> {
    Err(IpcError::Bind {
        addr: path.display().to_string(),
        source: std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "domain sockets are not supported on this platform",
        ),
    })
}

async fn bind_port_scan(range: RangeInclusive<u16>) -> Result<Listener, IpcError> {
    let (start, end) = (*range.start(), *range.end());
    for port in range {
        match TcpListener::bind(("127.0.0.1", port)).await {
            Ok(listener) => return Ok(Listener::Tcp { listener, port }),
            Err(e) => trace!(port, error = %e, "port unavailable"),
        }
    }
    Err(IpcError::NoAvailablePort { start, end })
}

/// A bound endpoint.
#[derive(Debug)]
pub enum Listener {
    #[cfg(unix)]
    Unix { listener: UnixListener, path: PathBuf },
    Tcp { listener: TcpListener, port: u16 },
}

impl Listener {
    /// Descriptor clients use to reach this endpoint.
    pub fn descriptor(&self) -> IpcDescriptor {
        match self {
            #[cfg(unix)]
            Self::Unix { path, .. } => IpcDescriptor::unix(path.clone()),
            Self::Tcp { port, .. } => IpcDescriptor::tcp(*port),
        }
    }

    async fn accept(&self) -> std::io::Result<Box<dyn Connection>> {
        match self {
            #[cfg(unix)]
            Self::Unix { listener, .. } => {
                let (stream, _addr) = listener.accept().await?;
                Ok(Box::new(stream))
            }
            Self::Tcp { listener, .. } => {
                let (stream, _addr) = listener.accept().await?;
                Ok(Box::new(stream))
            }
        }
    }

    #[cfg(unix)]
    pub(crate) fn cleanup(&self) {
        if let Self::Unix { path, .. } = self
            && let Err(e) = std::fs::remove_file(path)
        {
            debug!(path = %path.display(), error = %e, "failed to remove socket");
        }
    }

    #[cfg(not(unix))]
    fn cleanup(&self) {}
}

/// Accept connections until `stop` fires, serving each on its own task.
pub async fn serve(listener: Listener, session: Arc<Session>, mut stop: watch::Receiver<bool>) {
    info!(endpoint = %listener.descriptor(), "IPC server listening");

    loop {
        tokio::select! {
            _ = stop.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok(stream) => {
                    let session = Arc::clone(&session);
                    tokio::spawn(handle_connection(stream, session));
                }
                Err(e) => {
                    warn!("Failed to accept IPC connection: {}", e);
                }
            },
        }
    }

    listener.cleanup();
    debug!("IPC server stopped");
}

async fn handle_connection(stream: Box<dyn Connection>, session: Arc<Session>) {
    let (reader, mut writer) = tokio::io::split(stream);
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "IPC connection read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => {
                // Adding a project walks its tree to install watches.
                let session = Arc::clone(&session);
                match tokio::task::spawn_blocking(move || dispatch(session.store(), request)).await
                {
                    Ok(response) => response,
                    Err(e) => Response::error(0, format!("handler failed: {e}")),
                }
            }
            Err(e) => {
                trace!("Failed to parse IPC request: {} (line: {})", e, line);
                Response::error(0, format!("malformed request: {e}"))
            }
        };

        let bytes = match serialize_message(&response) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "failed to encode IPC response");
                break;
            }
        };
        if let Err(e) = writer.write_all(&bytes).await {
            debug!(error = %e, "IPC connection write failed");
            break;
        }
    }
}

/// Map one call onto the project collection.
pub fn dispatch(store: &SessionStore, request: Request) -> Response {
    let Request { id, method, arg } = request;
    debug!(?method, id, "IPC call");

    match method {
        Method::ListProjects => reply(id, &store.list()),
        Method::GetProject => {
            let path: PathBuf = match argument(id, arg) {
                Ok(path) => path,
                Err(response) => return response,
            };
            match store.get_by_prefix(&path) {
                Some(project) => reply(id, &project.snapshot()),
                None => Response::error(id, format!("{} not found", path.display())),
            }
        }
        Method::AddProject => {
            let project: Project = match argument(id, arg) {
                Ok(project) => project,
                Err(response) => return response,
            };
            match store.add(project) {
                Ok(()) => Response::ok(id, Value::Null),
                Err(e) => Response::error(id, e.to_string()),
            }
        }
        Method::RemoveProject => {
            let path: PathBuf = match argument(id, arg) {
                Ok(path) => path,
                Err(response) => return response,
            };
            reply(id, &store.remove_exact(&path))
        }
    }
}

fn argument<T: DeserializeOwned>(id: u64, arg: Value) -> Result<T, Response> {
    serde_json::from_value(arg).map_err(|e| Response::error(id, format!("invalid argument: {e}")))
}

fn reply<T: Serialize>(id: u64, value: &T) -> Response {
    match serde_json::to_value(value) {
        Ok(value) => Response::ok(id, value),
        Err(e) => Response::error(id, format!("failed to encode reply: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::RecordingWatch;
    use serde_json::json;

    fn store() -> SessionStore {
        SessionStore::new(Arc::new(RecordingWatch::default()))
    }

    fn call(store: &SessionStore, method: Method, arg: Value) -> Response {
        dispatch(store, Request { id: 7, method, arg })
    }

    #[test]
    fn dispatch_add_then_get_by_nested_path() {
        let store = store();
        let project = Project::new("/src/app", "owner/app");

        let added = call(&store, Method::AddProject, serde_json::to_value(&project).unwrap());
        assert!(added.error.is_none());
        assert_eq!(added.id, 7);

        let got = call(&store, Method::GetProject, json!("/src/app/lib/mod.rs"));
        let got: Project = serde_json::from_value(got.reply.unwrap()).unwrap();
        assert_eq!(got, project);
    }

    #[test]
    fn dispatch_get_missing_is_not_found_error() {
        let response = call(&store(), Method::GetProject, json!("/nowhere"));
        assert_eq!(response.error.as_deref(), Some("/nowhere not found"));
        assert!(response.reply.is_none());
    }

    #[test]
    fn dispatch_remove_missing_is_false() {
        let response = call(&store(), Method::RemoveProject, json!("/nowhere"));
        assert!(response.error.is_none());
        assert_eq!(response.reply, Some(Value::Bool(false)));
    }

    #[test]
    fn dispatch_list_returns_all() {
        let store = store();
        store.add(Project::new("/src/a", "owner/a")).unwrap();
        store.add(Project::new("/src/b", "owner/b")).unwrap();

        let response = call(&store, Method::ListProjects, Value::Null);
        let projects: Vec<Project> = serde_json::from_value(response.reply.unwrap()).unwrap();
        assert_eq!(projects.len(), 2);
    }

    #[test]
    fn dispatch_add_surfaces_subscription_failure() {
        let store = SessionStore::new(Arc::new(RecordingWatch {
            fail: true,
            ..Default::default()
        }));
        let project = Project::new("/src/app", "owner/app");

        let response = call(&store, Method::AddProject, serde_json::to_value(&project).unwrap());
        let message = response.error.unwrap();
        assert!(message.contains("/src/app"), "{message}");
        assert!(store.is_empty());
    }

    #[test]
    fn dispatch_rejects_bad_argument() {
        let response = call(&store(), Method::AddProject, json!(42));
        assert!(response.error.unwrap().starts_with("invalid argument"));
    }

    #[tokio::test]
    async fn port_scan_skips_taken_ports() {
        let taken = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = taken.local_addr().unwrap().port();
        let end = port.saturating_add(50);

        let listener = BindStrategy::PortScan(port..=end).bind().await.unwrap();
        let descriptor = listener.descriptor();
        assert!(descriptor.socket_path.is_none());
        let bound = descriptor.port.unwrap();
        assert!(bound > port && bound <= end);
    }

    #[tokio::test]
    async fn port_scan_exhausted_range_errors() {
        let taken = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let err = BindStrategy::PortScan(port..=port).bind().await.unwrap_err();
        assert!(matches!(err, IpcError::NoAvailablePort { start, end } if start == port && end == port));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unix_bind_replaces_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hourtab.sock");
        // A socket file whose listener is gone.
        drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
        assert!(path.exists());

        let listener = BindStrategy::UnixSocket(path.clone()).bind().await.unwrap();
        assert_eq!(listener.descriptor(), IpcDescriptor::unix(path.clone()));
        listener.cleanup();
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unix_bind_refuses_live_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hourtab.sock");
        let first = BindStrategy::UnixSocket(path.clone()).bind().await.unwrap();

        let err = BindStrategy::UnixSocket(path.clone()).bind().await.unwrap_err();
        assert!(
            matches!(err, IpcError::Bind { ref source, .. } if source.kind() == std::io::ErrorKind::AddrInUse),
            "{err}"
        );

        // The first endpoint is untouched and still reachable.
        assert!(path.exists());
        assert!(tokio::net::UnixStream::connect(&path).await.is_ok());
        first.cleanup();
    }

    #[test]
    fn dispatch_rejects_relative_root() {
        let store = store();
        let project = Project::new("src/app", "owner/app");

        let response = call(&store, Method::AddProject, serde_json::to_value(&project).unwrap());
        let message = response.error.unwrap();
        assert!(message.contains("absolute"), "{message}");
        assert!(store.is_empty());
    }
}
