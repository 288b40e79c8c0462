//! Tracked projects and their activity state machine

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current wall-clock time in nanoseconds since the Unix epoch.
pub fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
        .try_into()
        .unwrap_or(u64::MAX)
}

fn duration_nanos(duration: Duration) -> u64 {
    duration.as_nanos().try_into().unwrap_or(u64::MAX)
}

/// Whether a project is currently accruing time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProjectState {
    /// Activity seen within the timeout
    Active,
    /// Idle for at least the timeout, or never bumped
    #[default]
    Inactive,
}

impl std::fmt::Display for ProjectState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProjectState::Active => write!(f, "active"),
            ProjectState::Inactive => write!(f, "inactive"),
        }
    }
}

/// A tracked working directory.
///
/// `total_time` and `last_tick` are nanoseconds. `total_time` never
/// decreases and `last_tick` never moves backwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Absolute root of the project; unique within a session.
    pub path: PathBuf,
    /// Normalized repository origin, e.g. `owner/name`.
    #[serde(default)]
    pub origin: String,
    #[serde(default)]
    pub state: ProjectState,
    #[serde(default)]
    pub total_time: u64,
    #[serde(default)]
    pub last_tick: u64,
}

impl Project {
    /// A fresh, inactive project with no accrued time.
    pub fn new(path: impl Into<PathBuf>, origin: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            origin: origin.into(),
            state: ProjectState::Inactive,
            total_time: 0,
            last_tick: 0,
        }
    }

    /// Accrued time as a `Duration`.
    pub fn total(&self) -> Duration {
        Duration::from_nanos(self.total_time)
    }

    /// Record activity at `now`.
    ///
    /// Waking from `Inactive` credits the full `timeout`; while `Active` the
    /// elapsed time since the last tick is credited.
    pub fn bump(&mut self, timeout: Duration, now: u64) {
        match self.state {
            ProjectState::Inactive => {
                self.state = ProjectState::Active;
                self.total_time = self.total_time.saturating_add(duration_nanos(timeout));
                self.last_tick = self.last_tick.max(now);
            }
            ProjectState::Active => {
                let elapsed = now.saturating_sub(self.last_tick);
                self.total_time = self.total_time.saturating_add(elapsed);
                self.last_tick = self.last_tick.max(now);
            }
        }
    }

    /// Mark the project inactive if it has been idle for at least `timeout`.
    ///
    /// Returns `true` when the project transitioned. `last_tick` is left as is.
    pub fn sweep(&mut self, timeout: Duration, now: u64) -> bool {
        if self.state == ProjectState::Inactive {
            return false;
        }

        let timeout = duration_nanos(timeout);
        if now.saturating_sub(self.last_tick) < timeout {
            return false;
        }

        self.state = ProjectState::Inactive;
        self.total_time = self.total_time.saturating_add(timeout);
        true
    }
}
