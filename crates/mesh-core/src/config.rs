//! Configuration for the recovery core
//!
//! Every field has a default, so an empty file is a valid config. Files are
//! read as TOML or YAML depending on their extension.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Complete mesh configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Loop detection and recovery policy
    pub recovery: RecoveryConfig,
    /// Deterministic replay
    pub replay: ReplaySettings,
}

impl MeshConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string
    ///
    /// # Errors
    /// Returns [`ConfigError::Toml`] on parse failure, or
    /// [`ConfigError::Invalid`] if validation fails
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse from a YAML string
    ///
    /// # Errors
    /// Returns [`ConfigError::Yaml`] on parse failure, or
    /// [`ConfigError::Invalid`] if validation fails
    pub fn from_yaml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.toml`, `.yaml` or `.yml` file
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the file cannot be read, has an unknown
    /// extension, or fails to parse or validate
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&text),
            Some("yaml" | "yml") => Self::from_yaml_str(&text),
            other => Err(ConfigError::UnsupportedFormat(
                other.unwrap_or("<none>").to_string(),
            )),
        }
    }

    /// Check cross-field constraints
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] naming the first violated constraint
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.recovery.validate()?;
        self.replay.validate()
    }

    /// With recovery section
    #[inline]
    #[must_use]
    pub fn with_recovery(mut self, recovery: RecoveryConfig) -> Self {
        self.recovery = recovery;
        self
    }

    /// With replay section
    #[inline]
    #[must_use]
    pub fn with_replay(mut self, replay: ReplaySettings) -> Self {
        self.replay = replay;
        self
    }
}

/// Loop detection, circuit breaker and retry policy settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Retries allowed before `fail`
    pub max_retries: u32,
    /// Backoff base in milliseconds
    pub base_delay_ms: u64,
    /// Backoff ceiling in milliseconds
    pub max_delay_ms: u64,
    /// Upper bound of additive jitter as a fraction of the delay
    pub jitter_ratio: f64,
    /// Failures that open an agent's circuit breaker
    pub circuit_breaker_threshold: u32,
    /// Time an open breaker waits before going half-open
    pub recovery_timeout_ms: u64,
    /// Loop iterations after which a loop is failed outright
    pub loop_iteration_cap: u32,
    /// Retention window for retry contexts
    pub retry_history_ttl_ms: u64,
    /// Failing agents at which health becomes `degraded`
    pub health_degraded_at: usize,
    /// Failing agents at which health becomes `critical`
    pub health_critical_at: usize,
    /// Fallback strategies per event namespace
    pub fallback_strategies: BTreeMap<String, Vec<String>>,
}

impl RecoveryConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With max retries
    #[inline]
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// With backoff base delay
    #[inline]
    #[must_use]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay_ms = duration_ms(delay);
        self
    }

    /// With circuit breaker threshold
    #[inline]
    #[must_use]
    pub fn with_circuit_breaker_threshold(mut self, threshold: u32) -> Self {
        self.circuit_breaker_threshold = threshold;
        self
    }

    /// With breaker recovery timeout
    #[inline]
    #[must_use]
    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout_ms = duration_ms(timeout);
        self
    }

    /// With loop iteration cap
    #[inline]
    #[must_use]
    pub fn with_loop_iteration_cap(mut self, cap: u32) -> Self {
        self.loop_iteration_cap = cap;
        self
    }

    /// Replace the fallback strategy table
    #[inline]
    #[must_use]
    pub fn with_fallback_strategies(mut self, table: BTreeMap<String, Vec<String>>) -> Self {
        self.fallback_strategies = table;
        self
    }

    /// Drop all fallback strategies
    #[inline]
    #[must_use]
    pub fn without_fallback_strategies(mut self) -> Self {
        self.fallback_strategies.clear();
        self
    }

    /// Backoff base
    #[inline]
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Backoff ceiling
    #[inline]
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Breaker recovery timeout
    #[inline]
    #[must_use]
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }

    /// Retry history retention
    #[inline]
    #[must_use]
    pub fn retry_history_ttl(&self) -> Duration {
        Duration::from_millis(self.retry_history_ttl_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.circuit_breaker_threshold == 0 {
            return Err(ConfigError::Invalid(
                "circuit_breaker_threshold must be at least 1".into(),
            ));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "base_delay_ms ({}) exceeds max_delay_ms ({})",
                self.base_delay_ms, self.max_delay_ms
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter_ratio) {
            return Err(ConfigError::Invalid(format!(
                "jitter_ratio {} outside [0, 1]",
                self.jitter_ratio
            )));
        }
        if self.health_degraded_at > self.health_critical_at {
            return Err(ConfigError::Invalid(
                "health_degraded_at must not exceed health_critical_at".into(),
            ));
        }
        Ok(())
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter_ratio: 0.1,
            circuit_breaker_threshold: 5,
            recovery_timeout_ms: 60_000,
            loop_iteration_cap: 5,
            retry_history_ttl_ms: 5 * 60 * 1_000,
            health_degraded_at: 3,
            health_critical_at: 8,
            fallback_strategies: default_fallback_strategies(),
        }
    }
}

fn default_fallback_strategies() -> BTreeMap<String, Vec<String>> {
    let table: [(&str, &[&str]); 4] = [
        ("gpu", &["cpu-execution", "reduced-batch-size"]),
        ("neural", &["cached-architecture", "baseline-model"]),
        ("deployment", &["rollback", "canary-hold"]),
        ("network", &["static-routing", "reduced-bandwidth"]),
    ];
    table
        .into_iter()
        .map(|(ns, strategies)| {
            (
                ns.to_string(),
                strategies.iter().map(|s| (*s).to_string()).collect(),
            )
        })
        .collect()
}

/// Deterministic replay settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplaySettings {
    /// Mixed into every critical-path seed
    pub base_seed: u64,
    /// Token budget on the critical path
    pub critical_max_tokens: u32,
    /// Temperature on the non-critical path
    pub exploratory_temperature: f64,
    /// Token budget on the non-critical path
    pub exploratory_max_tokens: u32,
}

impl ReplaySettings {
    /// With base seed
    #[inline]
    #[must_use]
    pub fn with_base_seed(mut self, seed: u64) -> Self {
        self.base_seed = seed;
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.exploratory_temperature) {
            return Err(ConfigError::Invalid(format!(
                "exploratory_temperature {} outside [0, 2]",
                self.exploratory_temperature
            )));
        }
        Ok(())
    }
}

impl Default for ReplaySettings {
    fn default() -> Self {
        Self {
            base_seed: 42,
            critical_max_tokens: 1_000,
            exploratory_temperature: 0.7,
            exploratory_max_tokens: 2_000,
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
