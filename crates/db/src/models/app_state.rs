//! Process-wide flags persisted in the `app_state` key/value table.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Key holding the schema version.
pub const VERSION_KEY: &str = "version";

/// Key holding the [`QueueState`].
pub const QUEUE_STATE_KEY: &str = "queue_state";

/// Whether the worker may pull new tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueState {
    Running,
    Paused,
}

impl QueueState {
    pub fn as_str(self) -> &'static str {
        match self {
            QueueState::Running => "running",
            QueueState::Paused => "paused",
        }
    }
}

impl fmt::Display for QueueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(QueueState::Running),
            "paused" => Ok(QueueState::Paused),
            other => Err(format!("unknown queue state '{other}'")),
        }
    }
}
