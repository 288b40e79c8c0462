//! Call envelope exchanged over an IPC connection.
//!
//! Each call is one line of JSON: a [`Request`] carrying the method name and
//! a single positional argument, answered by a [`Response`] carrying a single
//! positional reply or an error message.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Remote operations, one per project-collection operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
    /// `()` -> `Vec<Project>`
    ListProjects,
    /// `path` -> `Project`, or an error when no project owns the path
    GetProject,
    /// `Project` -> `()`
    AddProject,
    /// `path` -> `bool`
    RemoveProject,
}

/// Client -> daemon call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub method: Method,
    #[serde(default)]
    pub arg: Value,
}

/// Daemon -> client reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok(id: u64, reply: Value) -> Self {
        Self {
            id,
            reply: Some(reply),
            error: None,
        }
    }

    pub fn error(id: u64, message: impl Into<String>) -> Self {
        Self {
            id,
            reply: None,
            error: Some(message.into()),
        }
    }
}

/// Serialize a message to JSON bytes with newline delimiter
pub fn serialize_message<T: Serialize>(msg: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut bytes = serde_json::to_vec(msg)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Deserialize a message from JSON bytes (strips trailing newline)
pub fn deserialize_message<T: for<'de> Deserialize<'de>>(
    bytes: &[u8],
) -> Result<T, serde_json::Error> {
    let trimmed = bytes.strip_suffix(b"\n").unwrap_or(bytes);
    serde_json::from_slice(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_wire_format() {
        let req = Request {
            id: 3,
            method: Method::GetProject,
            arg: Value::String("/src/app/main.rs".into()),
        };
        let bytes = serialize_message(&req).unwrap();
        assert_eq!(bytes.last(), Some(&b'\n'));

        let json = std::str::from_utf8(&bytes).unwrap().trim_end();
        assert_eq!(
            json,
            r#"{"id":3,"method":"GetProject","arg":"/src/app/main.rs"}"#
        );
    }

    #[test]
    fn request_without_arg_parses() {
        let req: Request = deserialize_message(br#"{"id":1,"method":"ListProjects"}"#).unwrap();
        assert_eq!(req.method, Method::ListProjects);
        assert!(req.arg.is_null());
    }

    #[test]
    fn unknown_method_is_rejected() {
        let result = deserialize_message::<Request>(br#"{"id":1,"method":"DropTables"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn response_error_omits_reply() {
        let json = serde_json::to_string(&Response::error(9, "/x not found")).unwrap();
        assert_eq!(json, r#"{"id":9,"error":"/x not found"}"#);
    }

    #[test]
    fn response_ok_roundtrip() {
        let bytes = serialize_message(&Response::ok(2, Value::Bool(false))).unwrap();
        let parsed: Response = deserialize_message(&bytes).unwrap();
        assert_eq!(parsed.id, 2);
        assert_eq!(parsed.reply, Some(Value::Bool(false)));
        assert!(parsed.error.is_none());
    }
}
