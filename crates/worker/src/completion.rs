//! Action taken when the queue drains.

use std::fmt;
use std::str::FromStr;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// What the host should do once no Pending task is left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletionAction {
    #[default]
    Nothing,
    Shutdown,
    Restart,
    Sleep,
    Hibernate,
    /// Stop this process by cancelling its shutdown token.
    Stop,
}

impl CompletionAction {
    pub fn as_str(self) -> &'static str {
        match self {
            CompletionAction::Nothing => "nothing",
            CompletionAction::Shutdown => "shutdown",
            CompletionAction::Restart => "restart",
            CompletionAction::Sleep => "sleep",
            CompletionAction::Hibernate => "hibernate",
            CompletionAction::Stop => "stop",
        }
    }

    /// The system command carrying out this action on the current platform.
    pub fn command(self) -> Option<Vec<&'static str>> {
        let argv: &[&str] = match self {
            CompletionAction::Nothing | CompletionAction::Stop => return None,
            CompletionAction::Shutdown if cfg!(windows) => &["shutdown", "/s", "/hybrid", "/t", "0"],
            CompletionAction::Shutdown if cfg!(target_os = "macos") => {
                &["osascript", "-e", "tell application \"Finder\" to shut down"]
            }
            CompletionAction::Shutdown => &["systemctl", "poweroff"],
            CompletionAction::Restart if cfg!(windows) => &["shutdown", "/r", "/t", "0"],
            CompletionAction::Restart if cfg!(target_os = "macos") => {
                &["osascript", "-e", "tell application \"Finder\" to restart"]
            }
            CompletionAction::Restart => &["systemctl", "reboot"],
            CompletionAction::Sleep if cfg!(windows) => {
                &["rundll32.exe", "powrprof.dll,SetSuspendState", "0,1,0"]
            }
            CompletionAction::Sleep | CompletionAction::Hibernate if cfg!(target_os = "macos") => {
                &["osascript", "-e", "tell application \"Finder\" to sleep"]
            }
            CompletionAction::Sleep => &["sh", "-c", "systemctl hybrid-sleep || systemctl suspend"],
            CompletionAction::Hibernate if cfg!(windows) => &["shutdown", "/h"],
            CompletionAction::Hibernate => &["systemctl", "hibernate"],
        };
        Some(argv.to_vec())
    }

    /// Carry out the action. Command failures are logged, not returned.
    pub async fn run(self, shutdown: &CancellationToken) {
        if self == CompletionAction::Stop {
            tracing::info!("Queue drained, stopping process");
            shutdown.cancel();
            return;
        }
        let Some(argv) = self.command() else {
            return;
        };
        tracing::info!(action = %self, command = ?argv, "Queue drained, running completion action");

        match Command::new(argv[0]).args(&argv[1..]).status().await {
            Ok(status) if status.success() => {}
            Ok(status) => {
                tracing::error!(action = %self, code = ?status.code(), "Completion action exited with failure");
            }
            Err(e) => {
                tracing::error!(action = %self, error = %e, "Failed to launch completion action");
            }
        }
    }
}

impl fmt::Display for CompletionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompletionAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "nothing" | "none" => Ok(CompletionAction::Nothing),
            "shutdown" => Ok(CompletionAction::Shutdown),
            "restart" => Ok(CompletionAction::Restart),
            "sleep" => Ok(CompletionAction::Sleep),
            "hibernate" => Ok(CompletionAction::Hibernate),
            "stop" => Ok(CompletionAction::Stop),
            other => Err(format!("unknown completion action '{other}'")),
        }
    }
}
