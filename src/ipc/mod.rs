//! Local IPC between the daemon and short-lived clients
//!
//! The daemon listens on a domain socket where the platform has one, and
//! otherwise on the first free TCP port in [`server::PORT_RANGE`]. The chosen
//! endpoint is published as an [`IpcDescriptor`] inside the snapshot file.

pub mod client;
pub mod protocol;
pub mod server;

pub use client::Client;
pub use protocol::{Method, Request, Response};
pub use server::{BindStrategy, Listener};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncWrite};

/// Byte stream carrying calls, over either transport.
pub trait Connection: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Connection for T {}

/// Published endpoint. Exactly one field is set by a successful bind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IpcDescriptor {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl IpcDescriptor {
    pub fn unix(path: PathBuf) -> Self {
        Self {
            socket_path: Some(path),
            port: None,
        }
    }

    pub fn tcp(port: u16) -> Self {
        Self {
            socket_path: None,
            port: Some(port),
        }
    }

    pub fn is_unix_socket(&self) -> bool {
        self.socket_path.is_some()
    }

    pub fn is_tcp(&self) -> bool {
        self.port.is_some()
    }

    pub fn is_empty(&self) -> bool {
        !self.is_unix_socket() && !self.is_tcp()
    }
}

impl std::fmt::Display for IpcDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.socket_path, self.port) {
            (Some(path), _) => write!(f, "unix:{}", path.display()),
            (None, Some(port)) => write!(f, "tcp:127.0.0.1:{port}"),
            (None, None) => write!(f, "<none>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_kinds_are_exclusive() {
        let unix = IpcDescriptor::unix(PathBuf::from("/tmp/hourtab.sock"));
        assert!(unix.is_unix_socket());
        assert!(!unix.is_tcp());

        let tcp = IpcDescriptor::tcp(49152);
        assert!(tcp.is_tcp());
        assert!(!tcp.is_unix_socket());

        assert!(IpcDescriptor::default().is_empty());
    }

    #[test]
    fn descriptor_serialization_omits_unset_field() {
        let json = serde_json::to_string(&IpcDescriptor::tcp(50001)).unwrap();
        assert_eq!(json, r#"{"port":50001}"#);

        let parsed: IpcDescriptor = serde_json::from_str(r#"{"socket_path":"/tmp/h.sock"}"#).unwrap();
        assert_eq!(parsed, IpcDescriptor::unix(PathBuf::from("/tmp/h.sock")));
    }

    #[test]
    fn descriptor_display() {
        assert_eq!(IpcDescriptor::tcp(50001).to_string(), "tcp:127.0.0.1:50001");
        assert_eq!(IpcDescriptor::default().to_string(), "<none>");
    }
}
