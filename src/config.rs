//! Configuration for scheduler construction.
//!
//! This module provides:
//! - A plain-data [`SchedulerConfig`] with sensible defaults
//! - Validation for guardrail invariants
//! - Layered loading (defaults + environment overrides)
//!
//! Note: parsing is intentionally minimal and deterministic.

use core::fmt;
use std::time::Duration;

use crate::error::{Error, ErrorKind};

/// Environment variable overriding the poll batch capacity.
pub const ENV_MAX_EVENTS: &str = "FIBROUS_MAX_EVENTS";
/// Environment variable selecting the readiness backend.
pub const ENV_BACKEND: &str = "FIBROUS_BACKEND";

/// Which readiness backend a scheduler polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// Native epoll with `EPOLLONESHOT` arming (Linux).
    #[cfg_attr(target_os = "linux", default)]
    #[cfg(target_os = "linux")]
    Epoll,
    /// Portable `poll(2)` shim with emulated oneshot arming.
    #[cfg_attr(not(target_os = "linux"), default)]
    Poll,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            #[cfg(target_os = "linux")]
            Self::Epoll => write!(f, "epoll"),
            Self::Poll => write!(f, "poll"),
        }
    }
}

/// Configuration for a scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum readiness events drained per poll.
    pub max_events: usize,
    /// Readiness backend to construct.
    pub backend: BackendKind,
    /// Upper bound on a single blocking poll. `None` trusts the
    /// computed turn timeout; setting this caps latency of external
    /// state changes the backend cannot observe.
    pub max_poll_interval: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_events: 256,
            backend: BackendKind::default(),
            max_poll_interval: None,
        }
    }
}

impl SchedulerConfig {
    /// Validates the configuration for basic sanity.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_events == 0 {
            return Err(ConfigError::InvalidMaxEvents);
        }
        if self.max_poll_interval == Some(Duration::ZERO) {
            return Err(ConfigError::InvalidPollInterval);
        }
        Ok(())
    }

    /// Applies environment overrides on top of this configuration.
    pub fn layered_from_env(mut self) -> Result<Self, ConfigError> {
        if let Ok(raw) = std::env::var(ENV_MAX_EVENTS) {
            self.max_events = raw
                .parse()
                .map_err(|_| ConfigError::UnparsableEnv(ENV_MAX_EVENTS, raw))?;
        }
        if let Ok(raw) = std::env::var(ENV_BACKEND) {
            self.backend = match raw.as_str() {
                #[cfg(target_os = "linux")]
                "epoll" => BackendKind::Epoll,
                "poll" => BackendKind::Poll,
                _ => return Err(ConfigError::UnknownBackend(raw)),
            };
        }
        self.validate()?;
        Ok(self)
    }

    /// Loads the default configuration with environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().layered_from_env()
    }
}

/// Configuration validation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// `max_events` must be at least 1.
    InvalidMaxEvents,
    /// `max_poll_interval` must be non-zero when set.
    InvalidPollInterval,
    /// An environment variable held an unparsable value.
    UnparsableEnv(&'static str, String),
    /// The requested backend name is not recognized.
    UnknownBackend(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidMaxEvents => write!(f, "max_events must be at least 1"),
            Self::InvalidPollInterval => write!(f, "max_poll_interval must be non-zero"),
            Self::UnparsableEnv(var, raw) => write!(f, "{var}={raw} is not parsable"),
            Self::UnknownBackend(raw) => write!(f, "unknown backend {raw:?}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::new(ErrorKind::Config).with_message(e.to_string())
    }
}
