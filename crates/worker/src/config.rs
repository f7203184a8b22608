use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::completion::CompletionAction;

/// An environment variable held a value that does not parse.
#[derive(Debug, thiserror::Error)]
#[error("{key} has invalid value '{value}'")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
}

/// Task runner configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Age after which terminal, non-bookmarked tasks are swept. `0` keeps
    /// them forever.
    pub retention_days: u32,
    /// Reset generically failed tasks to Pending instead of Failed.
    pub auto_requeue_failed: bool,
    /// Recheck interval while another task holds the Running slot.
    pub busy_poll: Duration,
    /// Back-off after a store error while fetching the next task.
    pub store_backoff: Duration,
    /// Upper bound for each lifecycle callback.
    pub callback_timeout: Duration,
    pub completion_action: CompletionAction,
    /// Where the HTTP render engine writes artifacts.
    pub output_dir: PathBuf,
    /// Base URL of the HTTP render engine.
    pub engine_url: Option<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            retention_days: 30,
            auto_requeue_failed: false,
            busy_poll: Duration::from_millis(2000),
            store_backoff: Duration::from_millis(5000),
            callback_timeout: Duration::from_secs(30),
            completion_action: CompletionAction::Nothing,
            output_dir: PathBuf::from("outputs"),
            engine_url: None,
        }
    }
}

impl RunnerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                         | Default   |
    /// |---------------------------------|-----------|
    /// | `RENDERQ_RETENTION_DAYS`        | `30`      |
    /// | `RENDERQ_AUTO_REQUEUE_FAILED`   | `false`   |
    /// | `RENDERQ_BUSY_POLL_MS`          | `2000`    |
    /// | `RENDERQ_STORE_BACKOFF_MS`      | `5000`    |
    /// | `RENDERQ_CALLBACK_TIMEOUT_SECS` | `30`      |
    /// | `RENDERQ_COMPLETION_ACTION`     | `nothing` |
    /// | `RENDERQ_OUTPUT_DIR`            | `outputs` |
    /// | `RENDERQ_ENGINE_URL`            | unset     |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`RunnerConfig::from_env`] but reading from `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let get = |key: &'static str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            retention_days: parse_or(get("RENDERQ_RETENTION_DAYS"), "RENDERQ_RETENTION_DAYS", defaults.retention_days)?,
            auto_requeue_failed: parse_or(
                get("RENDERQ_AUTO_REQUEUE_FAILED"),
                "RENDERQ_AUTO_REQUEUE_FAILED",
                defaults.auto_requeue_failed,
            )?,
            busy_poll: Duration::from_millis(parse_or(get("RENDERQ_BUSY_POLL_MS"), "RENDERQ_BUSY_POLL_MS", 2000)?),
            store_backoff: Duration::from_millis(parse_or(
                get("RENDERQ_STORE_BACKOFF_MS"),
                "RENDERQ_STORE_BACKOFF_MS",
                5000,
            )?),
            callback_timeout: Duration::from_secs(parse_or(
                get("RENDERQ_CALLBACK_TIMEOUT_SECS"),
                "RENDERQ_CALLBACK_TIMEOUT_SECS",
                30,
            )?),
            completion_action: parse_or(
                get("RENDERQ_COMPLETION_ACTION"),
                "RENDERQ_COMPLETION_ACTION",
                defaults.completion_action,
            )?,
            output_dir: get("RENDERQ_OUTPUT_DIR").map(PathBuf::from).unwrap_or(defaults.output_dir),
            engine_url: get("RENDERQ_ENGINE_URL"),
        })
    }

    /// The retention window, `None` when tasks are kept forever.
    pub fn retention(&self) -> Option<chrono::Duration> {
        (self.retention_days > 0).then(|| chrono::Duration::days(i64::from(self.retention_days)))
    }
}

fn parse_or<T: FromStr>(raw: Option<String>, key: &'static str, default: T) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError { key, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<RunnerConfig, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RunnerConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = load(&[]).unwrap();
        assert_eq!(config.retention_days, 30);
        assert!(!config.auto_requeue_failed);
        assert_eq!(config.busy_poll, Duration::from_secs(2));
        assert_eq!(config.completion_action, CompletionAction::Nothing);
        assert!(config.engine_url.is_none());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = load(&[
            ("RENDERQ_RETENTION_DAYS", "0"),
            ("RENDERQ_AUTO_REQUEUE_FAILED", "true"),
            ("RENDERQ_COMPLETION_ACTION", "stop"),
            ("RENDERQ_ENGINE_URL", "http://127.0.0.1:7860"),
        ])
        .unwrap();
        assert!(config.retention().is_none());
        assert!(config.auto_requeue_failed);
        assert_eq!(config.completion_action, CompletionAction::Stop);
        assert_eq!(config.engine_url.as_deref(), Some("http://127.0.0.1:7860"));
    }

    #[test]
    fn invalid_value_names_the_variable() {
        let err = load(&[("RENDERQ_BUSY_POLL_MS", "soon")]).unwrap_err();
        assert_eq!(err.key, "RENDERQ_BUSY_POLL_MS");
        assert_eq!(err.to_string(), "RENDERQ_BUSY_POLL_MS has invalid value 'soon'");
    }
}
