use std::path::PathBuf;
use std::time::Duration;

/// Environment variable overriding the log sink path.
pub const ENV_LOG_FILE: &str = "PROCWRAP_LOG_FILE";
/// Environment variable overriding the grace period, in whole seconds.
pub const ENV_GRACE_SECS: &str = "PROCWRAP_GRACE_SECS";
/// Environment variable overriding the liveness poll interval, in milliseconds.
pub const ENV_POLL_MS: &str = "PROCWRAP_POLL_MS";

/// File name of the log sink inside the system temp directory.
const LOG_FILE_NAME: &str = "procwrap.log";

/// Runtime settings for a single supervisor run.
///
/// There is no config file; every field has a fixed default and a few can be
/// overridden from the environment at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Append-mode log shared by supervisor lines and child output.
    pub log_path: PathBuf,
    /// How long a child gets to exit after SIGTERM before it is killed.
    pub grace_period: Duration,
    /// Interval between non-blocking liveness checks in the main loop.
    pub poll_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            log_path: std::env::temp_dir().join(LOG_FILE_NAME),
            grace_period: Duration::from_secs(5),
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl SupervisorConfig {
    /// Defaults merged with `PROCWRAP_*` environment overrides.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults merged with overrides resolved through `lookup`.
    ///
    /// Empty, unparseable, or zero durations are ignored and the default kept.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup(ENV_LOG_FILE).filter(|v| !v.trim().is_empty()) {
            config.log_path = PathBuf::from(path);
        }
        if let Some(secs) = parse_positive(ENV_GRACE_SECS, lookup(ENV_GRACE_SECS)) {
            config.grace_period = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_positive(ENV_POLL_MS, lookup(ENV_POLL_MS)) {
            config.poll_interval = Duration::from_millis(ms);
        }

        tracing::debug!(
            log_path = %config.log_path.display(),
            grace_ms = config.grace_period.as_millis() as u64,
            poll_ms = config.poll_interval.as_millis() as u64,
            "resolved supervisor config"
        );
        config
    }
}

fn parse_positive(key: &str, raw: Option<String>) -> Option<u64> {
    let raw = raw?;
    match raw.trim().parse::<u64>() {
        Ok(0) => {
            tracing::warn!(key, "override must be greater than zero, keeping default");
            None
        }
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(key, value = %raw, error = %e, "ignoring invalid override");
            None
        }
    }
}
