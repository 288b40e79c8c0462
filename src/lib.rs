//! hourtab: per-project working-time tracker
//!
//! A daemon watches the directories of tracked projects, turns filesystem
//! activity into billable time, persists the session periodically, and answers
//! short-lived CLI clients over a local socket.

pub mod config;
pub mod daemon;
pub mod error;
pub mod git;
pub mod ipc;
pub mod persist;
pub mod project;
pub mod session;
pub mod store;
pub mod watch;

pub use config::Options;
pub use daemon::Daemon;
pub use error::*;
pub use project::{Project, ProjectState};
pub use session::{Session, SessionSnapshot};
