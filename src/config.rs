//! Configuration management for Gatekeep.
//!
//! Each sensitive operation (login, lead enrichment, ...) gets its own named
//! [`PolicyConfig`]. Policies are independent instances of the same
//! limiter/retry machinery with their own thresholds.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{GatekeepError, Result};
use crate::telemetry::LoggingConfig;

/// Prefix for environment overrides, e.g. `GATEKEEP__POLICIES__LOGIN__LIMITER__MAX_ATTEMPTS=3`.
pub const ENV_PREFIX: &str = "GATEKEEP";

/// Name of the built-in login policy.
pub const LOGIN_POLICY: &str = "login";
/// Name of the built-in lead enrichment policy.
pub const ENRICHMENT_POLICY: &str = "enrichment";

/// Main configuration for Gatekeep.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatekeepConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Named throttling policies
    #[serde(default)]
    pub policies: HashMap<String, PolicyConfig>,
}

/// Sliding-window admission settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Maximum admissions per key within one window
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Window length in milliseconds
    #[serde(default = "default_window_duration_ms")]
    pub window_duration_ms: u64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            window_duration_ms: default_window_duration_ms(),
        }
    }
}

impl LimiterConfig {
    /// The window as a [`Duration`].
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_duration_ms)
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_window_duration_ms() -> u64 {
    300_000
}

/// Retry and backoff settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Automatic retries after the initial call
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff delay; doubles with every retry
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound applied to the computed delay
    #[serde(default)]
    pub max_delay_ms: Option<u64>,

    /// Uniform random jitter added on top of the delay (0 disables)
    #[serde(default)]
    pub jitter_ms: u64,

    /// HTTP-like statuses treated as transient
    #[serde(default = "default_retryable_statuses")]
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: None,
            jitter_ms: 0,
            retryable_statuses: default_retryable_statuses(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_retryable_statuses() -> Vec<u16> {
    vec![408, 425, 429, 500, 502, 503, 504]
}

/// Settings for one throttled operation type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Admission window
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Retry behavior
    #[serde(default)]
    pub retry: RetryConfig,

    /// Starting value of the remaining-quota counter
    #[serde(default = "default_initial_quota")]
    pub initial_quota: u64,

    /// Clear the caller's limiter record after a successful call
    #[serde(default)]
    pub reset_on_success: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            limiter: LimiterConfig::default(),
            retry: RetryConfig::default(),
            initial_quota: default_initial_quota(),
            reset_on_success: false,
        }
    }
}

fn default_initial_quota() -> u64 {
    100
}

impl PolicyConfig {
    /// Login preset: 5 attempts per 5 minutes, no automatic retries, and a
    /// successful login clears the email's counter.
    pub fn login() -> Self {
        Self {
            retry: RetryConfig {
                max_retries: 0,
                ..RetryConfig::default()
            },
            reset_on_success: true,
            ..Self::default()
        }
    }

    /// Lead enrichment preset.
    pub fn enrichment() -> Self {
        Self::default()
    }

    /// Reject settings the limiter and backoff cannot work with.
    pub fn validate(&self, name: &str) -> Result<()> {
        if self.limiter.max_attempts == 0 {
            return Err(GatekeepError::Config(format!(
                "policy '{}': max_attempts must be at least 1",
                name
            )));
        }
        if self.limiter.window_duration_ms == 0 {
            return Err(GatekeepError::Config(format!(
                "policy '{}': window_duration_ms must be positive",
                name
            )));
        }
        if self.retry.base_delay_ms == 0 {
            return Err(GatekeepError::Config(format!(
                "policy '{}': base_delay_ms must be positive",
                name
            )));
        }
        if let Some(max) = self.retry.max_delay_ms {
            if max < self.retry.base_delay_ms {
                return Err(GatekeepError::Config(format!(
                    "policy '{}': max_delay_ms ({}) is below base_delay_ms ({})",
                    name, max, self.retry.base_delay_ms
                )));
            }
        }
        Ok(())
    }
}

impl GatekeepConfig {
    /// Parse a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: GatekeepConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading gatekeep configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load a YAML file and layer `GATEKEEP__*` environment overrides on top.
    ///
    /// Scalar fields can be overridden from the environment. List fields such
    /// as `retryable_statuses` are file-only: the environment layer does not
    /// split values into lists.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading layered gatekeep configuration");

        let layered = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Yaml))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: GatekeepConfig = layered.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every configured policy.
    pub fn validate(&self) -> Result<()> {
        for (name, policy) in &self.policies {
            policy.validate(name)?;
        }
        Ok(())
    }

    /// Look up a policy by name.
    ///
    /// Unknown names fall back to the built-in preset for `login` and
    /// `enrichment`, and to the plain defaults otherwise.
    pub fn policy(&self, name: &str) -> PolicyConfig {
        if let Some(policy) = self.policies.get(name) {
            return policy.clone();
        }

        debug!(policy = name, "No configured policy, using built-in defaults");
        match name {
            LOGIN_POLICY => PolicyConfig::login(),
            ENRICHMENT_POLICY => PolicyConfig::enrichment(),
            _ => PolicyConfig::default(),
        }
    }
}
