//! Scheduler configuration.
//!
//! These types hold the concrete values that drive scheduler pacing and the
//! background threads used by the foreign-work bridge.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `idle_tick` | 100 ms |
//! | `busy_tick` | 10 ms |
//! | `thread_name_prefix` | `"cosched-offload"` |
//! | `offload_stack_size` | `None` (platform default) |
//!
//! # Environment overrides
//!
//! [`SchedulerConfig::apply_env_overrides`] reads:
//!
//! - `COSCHED_IDLE_TICK_MS`
//! - `COSCHED_BUSY_TICK_MS`
//! - `COSCHED_THREAD_NAME_PREFIX`
//! - `COSCHED_OFFLOAD_STACK_SIZE`

use std::collections::BTreeMap;
use std::time::Duration;

const ENV_PREFIX: &str = "COSCHED_";

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Sleep hint returned by `tick` when the ready queue is empty.
    pub idle_tick: Duration,
    /// Sleep hint returned by `tick` when tasks are still ready.
    pub busy_tick: Duration,
    /// Name prefix for background threads started by the bridge.
    pub thread_name_prefix: String,
    /// Stack size for background threads (`None` = platform default).
    pub offload_stack_size: Option<usize>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            idle_tick: Duration::from_millis(100),
            busy_tick: Duration::from_millis(10),
            thread_name_prefix: "cosched-offload".to_string(),
            offload_stack_size: None,
        }
    }
}

impl SchedulerConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the idle sleep hint.
    #[must_use]
    pub fn idle_tick(mut self, interval: Duration) -> Self {
        self.idle_tick = interval;
        self
    }

    /// Sets the busy sleep hint.
    #[must_use]
    pub fn busy_tick(mut self, interval: Duration) -> Self {
        self.busy_tick = interval;
        self
    }

    /// Sets the background thread name prefix.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Sets the background thread stack size.
    #[must_use]
    pub fn offload_stack_size(mut self, size: Option<usize>) -> Self {
        self.offload_stack_size = size;
        self
    }

    /// Validates the configuration for basic sanity.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.idle_tick.is_zero() {
            return Err(ConfigError::ZeroIdleTick);
        }
        if self.busy_tick > self.idle_tick {
            return Err(ConfigError::BusyExceedsIdle {
                busy: self.busy_tick,
                idle: self.idle_tick,
            });
        }
        if self.thread_name_prefix.trim().is_empty() {
            return Err(ConfigError::EmptyThreadNamePrefix);
        }
        if self.offload_stack_size == Some(0) {
            return Err(ConfigError::ZeroStackSize);
        }
        Ok(())
    }

    /// Applies `COSCHED_*` environment variables on top of this configuration.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        let overrides: BTreeMap<String, String> = std::env::vars()
            .filter(|(key, _)| key.starts_with(ENV_PREFIX))
            .collect();
        self.apply_overrides(&overrides)
    }

    /// Applies a set of `COSCHED_*` key/value overrides.
    pub fn apply_overrides(&mut self, overrides: &BTreeMap<String, String>) -> Result<(), ConfigError> {
        for (key, value) in overrides {
            self.apply_override(key, value)?;
        }
        Ok(())
    }

    fn apply_override(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "COSCHED_IDLE_TICK_MS" => self.idle_tick = parse_duration_ms(value, key)?,
            "COSCHED_BUSY_TICK_MS" => self.busy_tick = parse_duration_ms(value, key)?,
            "COSCHED_THREAD_NAME_PREFIX" => self.thread_name_prefix = value.to_string(),
            "COSCHED_OFFLOAD_STACK_SIZE" => {
                self.offload_stack_size = Some(parse_usize(value, key)?);
            }
            _ => return Err(ConfigError::InvalidOverride(key.to_string())),
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The idle interval is zero, which would turn the host loop into a spin.
    ZeroIdleTick,
    /// The busy interval is longer than the idle interval.
    BusyExceedsIdle {
        /// Configured busy interval.
        busy: Duration,
        /// Configured idle interval.
        idle: Duration,
    },
    /// Background thread names would be blank.
    EmptyThreadNamePrefix,
    /// A zero stack size was requested.
    ZeroStackSize,
    /// Unparseable override value.
    Parse(String),
    /// Unknown override key.
    InvalidOverride(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ZeroIdleTick => write!(f, "idle_tick must be > 0"),
            Self::BusyExceedsIdle { busy, idle } => {
                write!(f, "busy_tick {busy:?} exceeds idle_tick {idle:?}")
            }
            Self::EmptyThreadNamePrefix => write!(f, "thread_name_prefix must not be empty"),
            Self::ZeroStackSize => write!(f, "offload_stack_size must be > 0"),
            Self::Parse(err) => write!(f, "config parse error: {err}"),
            Self::InvalidOverride(key) => write!(f, "invalid override: {key}"),
        }
    }
}

impl std::error::Error for ConfigError {}

fn parse_duration_ms(value: &str, key: &str) -> Result<Duration, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| ConfigError::Parse(format!("{key}: expected milliseconds, got {value:?}")))
}

fn parse_usize(value: &str, key: &str) -> Result<usize, ConfigError> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|_| ConfigError::Parse(format!("{key}: expected integer, got {value:?}")))
}
