//! IPC client used by the CLI commands.

use super::protocol::{Method, Request, Response, deserialize_message, serialize_message};
use super::{Connection, IpcDescriptor};
use crate::error::IpcError;
use crate::project::Project;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tracing::trace;

/// Open a connection to the endpoint named by `descriptor`.
///
/// A descriptor with neither field set fails before any I/O.
pub async fn dial(descriptor: &IpcDescriptor) -> Result<Box<dyn Connection>, IpcError> {
    if let Some(path) = &descriptor.socket_path {
        return dial_unix(path).await;
    }

    if let Some(port) = descriptor.port {
        let stream = TcpStream::connect(("127.0.0.1", port))
            .await
            .map_err(|source| IpcError::Connect {
                addr: descriptor.to_string(),
                source,
            })?;
        return Ok(Box::new(stream));
    }

    Err(IpcError::EmptyDescriptor)
}

#[cfg(unix)]
async fn dial_unix(path: &Path) -> Result<Box<dyn Connection>, IpcError> {
    let stream = UnixStream::connect(path)
        .await
        .map_err(|source| IpcError::Connect {
            addr: path.display().to_string(),
            source,
        })?;
    Ok(Box::new(stream))
}

#[cfg(not(unix))]
async fn dial_unix(path: &Path) -> Result<Box<dyn Connection>, IpcError> {
    Err(IpcError::Connect {
        addr: path.display().to_string(),
        source: std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "domain sockets are not supported on this platform",
        ),
    })
}

/// Connection to a running daemon.
pub struct Client {
    descriptor: IpcDescriptor,
    stream: BufReader<Box<dyn Connection>>,
    next_id: u64,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("descriptor", &self.descriptor)
            .field("next_id", &self.next_id)
            .finish_non_exhaustive()
    }
}

impl Client {
    pub async fn connect(descriptor: &IpcDescriptor) -> Result<Self, IpcError> {
        let stream = dial(descriptor).await?;
        Ok(Self {
            descriptor: descriptor.clone(),
            stream: BufReader::new(stream),
            next_id: 1,
        })
    }

    pub fn descriptor(&self) -> &IpcDescriptor {
        &self.descriptor
    }

    pub async fn list_projects(&mut self) -> Result<Vec<Project>, IpcError> {
        self.call(Method::ListProjects, &()).await
    }

    /// Project owning `path`; a missing project is a [`IpcError::Remote`] error.
    pub async fn get_project(&mut self, path: &Path) -> Result<Project, IpcError> {
        self.call(Method::GetProject, &path).await
    }

    pub async fn add_project(&mut self, project: &Project) -> Result<(), IpcError> {
        self.call(Method::AddProject, project).await
    }

    /// Returns whether a project rooted exactly at `path` was removed.
    pub async fn remove_project(&mut self, path: &Path) -> Result<bool, IpcError> {
        self.call(Method::RemoveProject, &path).await
    }

    async fn call<A, R>(&mut self, method: Method, arg: &A) -> Result<R, IpcError>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let id = self.next_id;
        self.next_id += 1;

        let request = Request {
            id,
            method,
            arg: serde_json::to_value(arg)?,
        };
        trace!(?method, id, "IPC call");
        let bytes = serialize_message(&request)?;
        self.stream.get_mut().write_all(&bytes).await?;

        let mut line = Vec::new();
        if self.stream.read_until(b'\n', &mut line).await? == 0 {
            return Err(IpcError::Disconnected);
        }
        let response: Response = deserialize_message(&line)?;

        if response.id != id {
            return Err(IpcError::Remote(format!(
                "unexpected response id {} (expected {id})",
                response.id
            )));
        }
        if let Some(message) = response.error {
            return Err(IpcError::Remote(message));
        }
        Ok(serde_json::from_value(response.reply.unwrap_or(Value::Null))?)
    }
}
