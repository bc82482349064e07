//! Resource context configuration.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::CacheError;

/// Default seconds between two periodic pool sweeps.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 600;

/// Environment variable overriding [`CacheConfig::sweep_interval_secs`].
pub const ENV_SWEEP_INTERVAL: &str = "RESOURCE_CACHE_SWEEP_INTERVAL_SECS";
/// Environment variable overriding [`CacheConfig::eviction_factor`].
pub const ENV_EVICTION_FACTOR: &str = "RESOURCE_CACHE_EVICTION_FACTOR";
/// Environment variable overriding [`CacheConfig::auto_sweep`].
pub const ENV_AUTO_SWEEP: &str = "RESOURCE_CACHE_AUTO_SWEEP";

/// Configuration of a [`ResourceContext`](crate::core::ResourceContext).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Seconds between periodic pool sweeps.
    pub sweep_interval_secs: u64,
    /// Multiplier on the high-water mark giving the idle instances a record
    /// keeps across a sweep.
    pub eviction_factor: f64,
    /// Schedule the periodic sweep on the context's scheduler.
    pub auto_sweep: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            eviction_factor: crate::core::DEFAULT_EVICTION_FACTOR,
            auto_sweep: true,
        }
    }
}

impl CacheConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sweep interval in seconds.
    #[must_use]
    pub const fn with_sweep_interval_secs(mut self, secs: u64) -> Self {
        self.sweep_interval_secs = secs;
        self
    }

    /// Set the eviction factor.
    #[must_use]
    pub const fn with_eviction_factor(mut self, factor: f64) -> Self {
        self.eviction_factor = factor;
        self
    }

    /// Enable or disable the periodic sweep.
    #[must_use]
    pub const fn with_auto_sweep(mut self, enabled: bool) -> Self {
        self.auto_sweep = enabled;
        self
    }

    /// Sweep interval as a duration.
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.sweep_interval_secs == 0 {
            return Err(CacheError::InvalidConfig(
                "sweep_interval_secs must be greater than 0".into(),
            ));
        }
        if !self.eviction_factor.is_finite() || self.eviction_factor < 1.0 {
            return Err(CacheError::InvalidConfig(format!(
                "eviction_factor must be finite and at least 1, got {}",
                self.eviction_factor
            )));
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate. Missing fields
    /// take their defaults.
    pub fn from_json_str(input: &str) -> Result<Self, CacheError> {
        let cfg: Self = serde_json::from_str(input)
            .map_err(|e| CacheError::InvalidConfig(format!("parse error: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration from the process environment, reading a `.env`
    /// file first when one exists. Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, CacheError> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                return Err(CacheError::InvalidConfig(format!(".env: {e}")));
            }
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CacheError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(value) = lookup(ENV_SWEEP_INTERVAL) {
            cfg.sweep_interval_secs = parse_var(ENV_SWEEP_INTERVAL, &value)?;
        }
        if let Some(value) = lookup(ENV_EVICTION_FACTOR) {
            cfg.eviction_factor = parse_var(ENV_EVICTION_FACTOR, &value)?;
        }
        if let Some(value) = lookup(ENV_AUTO_SWEEP) {
            cfg.auto_sweep = parse_var(ENV_AUTO_SWEEP, &value)?;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

fn parse_var<T>(name: &str, value: &str) -> Result<T, CacheError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| CacheError::InvalidConfig(format!("{name}={value}: {e}")))
}
