//! Configuration for the replication engine.

use crate::error::{EngineError, EngineResult};
use crate::target::TargetOptions;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

/// How committed batches reach the retry coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Replicate on the committing thread, after the primary commit.
    Inline,
    /// Hand the batch to a dedicated replay worker thread.
    Background,
}

/// Configuration for the replication engine.
#[derive(Debug, Clone, Serialize)]
pub struct ReplicationConfig {
    /// Target store connection URI.
    pub target_uri: String,
    /// Whether replication starts enabled.
    pub enabled: bool,
    /// Target connection pool size.
    pub pool_size: usize,
    /// Timeout for establishing a target connection.
    pub connect_timeout: Duration,
    /// Timeout for a single target statement.
    pub statement_timeout: Duration,
    /// Retry configuration.
    pub retry: RetryConfig,
    /// Dispatch mode for committed batches.
    pub dispatch: DispatchMode,
    /// Path of the durable failure log, if any.
    pub failure_log_path: Option<PathBuf>,
    /// How long a bulk-sync registration may live before it is treated as
    /// abandoned.
    pub operation_ttl: Duration,
}

impl ReplicationConfig {
    /// Creates a configuration for the given target.
    pub fn new(target_uri: impl Into<String>) -> Self {
        Self {
            target_uri: target_uri.into(),
            enabled: true,
            pool_size: 10,
            connect_timeout: Duration::from_secs(10),
            statement_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            dispatch: DispatchMode::Inline,
            failure_log_path: None,
            operation_ttl: Duration::from_secs(600),
        }
    }

    /// Sets whether replication starts enabled.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the pool size.
    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Sets the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the statement timeout.
    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = timeout;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the dispatch mode.
    pub fn with_dispatch(mut self, dispatch: DispatchMode) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Sets the failure log path.
    pub fn with_failure_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.failure_log_path = Some(path.into());
        self
    }

    /// Sets the bulk-sync registration TTL.
    pub fn with_operation_ttl(mut self, ttl: Duration) -> Self {
        self.operation_ttl = ttl;
        self
    }

    /// Returns the engine options handed to the target store.
    pub fn target_options(&self) -> TargetOptions {
        TargetOptions {
            pool_size: self.pool_size,
            connect_timeout: self.connect_timeout,
            statement_timeout: self.statement_timeout,
        }
    }

    /// Reads the configuration from `TANDEM_*` environment variables.
    pub fn from_env() -> EngineResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    ///
    /// Unset keys keep their defaults; set but unparsable keys are errors.
    pub fn from_lookup<F>(lookup: F) -> EngineResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new(lookup("TANDEM_TARGET_URI").unwrap_or_default());

        if let Some(value) = lookup("TANDEM_SYNC_ENABLED") {
            config.enabled = parse_bool("TANDEM_SYNC_ENABLED", &value)?;
        }
        if let Some(value) = lookup("TANDEM_POOL_SIZE") {
            config.pool_size = parse_number("TANDEM_POOL_SIZE", &value)?;
        }
        if let Some(value) = lookup("TANDEM_CONNECT_TIMEOUT_SECS") {
            config.connect_timeout =
                Duration::from_secs(parse_number("TANDEM_CONNECT_TIMEOUT_SECS", &value)?);
        }
        if let Some(value) = lookup("TANDEM_STATEMENT_TIMEOUT_SECS") {
            config.statement_timeout =
                Duration::from_secs(parse_number("TANDEM_STATEMENT_TIMEOUT_SECS", &value)?);
        }
        if let Some(value) = lookup("TANDEM_RETRY_ATTEMPTS") {
            config.retry.max_attempts = parse_number("TANDEM_RETRY_ATTEMPTS", &value)?;
        }
        if let Some(value) = lookup("TANDEM_RETRY_DELAY_SECS") {
            config.retry.base_delay =
                Duration::from_secs(parse_number("TANDEM_RETRY_DELAY_SECS", &value)?);
        }
        if let Some(value) = lookup("TANDEM_FAILURE_LOG") {
            if !value.is_empty() {
                config.failure_log_path = Some(PathBuf::from(value));
            }
        }
        if let Some(value) = lookup("TANDEM_DISPATCH") {
            config.dispatch = match value.to_ascii_lowercase().as_str() {
                "inline" => DispatchMode::Inline,
                "background" => DispatchMode::Background,
                other => {
                    return Err(EngineError::config(format!(
                        "TANDEM_DISPATCH must be inline or background, got {other}"
                    )))
                }
            };
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks internal consistency.
    pub fn validate(&self) -> EngineResult<()> {
        if self.pool_size == 0 {
            return Err(EngineError::config("pool size must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(EngineError::config("retry attempts must be at least 1"));
        }
        Ok(())
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self::new("")
    }
}

fn parse_bool(key: &str, value: &str) -> EngineResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(EngineError::config(format!(
            "{key} must be a boolean, got {other}"
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> EngineResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| EngineError::config(format!("{key} must be a number, got {value}")))
}

/// Backoff curve between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// `base_delay * attempt`.
    Linear,
    /// `base_delay * multiplier^(attempt - 1)`.
    Exponential {
        /// Growth factor per attempt.
        multiplier: f64,
    },
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, Serialize)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay unit between attempts.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Backoff curve.
    pub backoff: Backoff,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            backoff: Backoff::Linear,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff: Backoff::Linear,
        }
    }

    /// Sets the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff curve.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Calculates the delay before a given attempt (1-indexed).
    ///
    /// The first attempt never waits.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        let retry = attempt - 1;
        let base = self.base_delay.as_secs_f64();
        let delay_secs = match self.backoff {
            Backoff::Linear => base * f64::from(retry),
            Backoff::Exponential { multiplier } => {
                base * multiplier.powi(retry.saturating_sub(1) as i32)
            }
        };

        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}
