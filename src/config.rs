//! Configuration Module
//!
//! Loads cache, prediction and server settings from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::cache::TierLimits;
use crate::error::{CacheError, Result};
use crate::prediction::{PredictionLimits, RecorderLimits};
use crate::prefetch::PrefetchSettings;

const KIB: usize = 1024;
const MIB: usize = 1024 * KIB;

/// Service configuration.
///
/// Every field has an environment variable; unset or unparsable values fall
/// back to the default.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Fast tier capacity in bytes
    pub fast_max: usize,
    /// Mid tier capacity in bytes
    pub mid_max: usize,
    /// Cold tier capacity in bytes
    pub cold_max: usize,
    /// Items smaller than this start in the Fast tier
    pub fast_item_size: usize,
    /// Items smaller than this (and not Fast) start in the Mid tier
    pub mid_item_size: usize,
    pub default_ttl: Duration,
    /// TTL for prefetched entries; must exceed `default_ttl`
    pub prefetch_ttl: Duration,
    pub load_timeout: Duration,
    /// Interval between expiry sweeps and model saves
    pub sweep_interval: Duration,
    pub history_capacity: usize,
    pub group_capacity: usize,
    pub hour_capacity: usize,
    /// Predictions returned per `predict` call
    pub prediction_limit: usize,
    /// Candidates kept per strategy before merging
    pub strategy_limit: usize,
    pub prefetch_threshold: f64,
    pub max_concurrent_prefetch: usize,
    /// HTTP server port
    pub server_port: u16,
    /// When set, Mid/Cold tiers and the pattern model are file-backed here
    pub data_dir: Option<PathBuf>,
    /// Origin directory the server loads content from
    pub content_dir: PathBuf,
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_secs(name: &str, default: Duration) -> Duration {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `FAST_MAX_BYTES`, `MID_MAX_BYTES`, `COLD_MAX_BYTES` - tier capacities
    /// - `FAST_ITEM_SIZE`, `MID_ITEM_SIZE` - tier placement thresholds
    /// - `DEFAULT_TTL`, `PREFETCH_TTL`, `LOAD_TIMEOUT`, `SWEEP_INTERVAL` - seconds
    /// - `HISTORY_CAPACITY`, `GROUP_CAPACITY`, `HOUR_CAPACITY` - recorder windows
    /// - `PREDICTION_LIMIT`, `STRATEGY_LIMIT`
    /// - `PREFETCH_THRESHOLD`, `MAX_CONCURRENT_PREFETCH`
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `DATA_DIR` - enables file-backed persistence
    /// - `CONTENT_DIR` - origin directory (default: ./content)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            fast_max: env_or("FAST_MAX_BYTES", defaults.fast_max),
            mid_max: env_or("MID_MAX_BYTES", defaults.mid_max),
            cold_max: env_or("COLD_MAX_BYTES", defaults.cold_max),
            fast_item_size: env_or("FAST_ITEM_SIZE", defaults.fast_item_size),
            mid_item_size: env_or("MID_ITEM_SIZE", defaults.mid_item_size),
            default_ttl: env_secs("DEFAULT_TTL", defaults.default_ttl),
            prefetch_ttl: env_secs("PREFETCH_TTL", defaults.prefetch_ttl),
            load_timeout: env_secs("LOAD_TIMEOUT", defaults.load_timeout),
            sweep_interval: env_secs("SWEEP_INTERVAL", defaults.sweep_interval),
            history_capacity: env_or("HISTORY_CAPACITY", defaults.history_capacity),
            group_capacity: env_or("GROUP_CAPACITY", defaults.group_capacity),
            hour_capacity: env_or("HOUR_CAPACITY", defaults.hour_capacity),
            prediction_limit: env_or("PREDICTION_LIMIT", defaults.prediction_limit),
            strategy_limit: env_or("STRATEGY_LIMIT", defaults.strategy_limit),
            prefetch_threshold: env_or("PREFETCH_THRESHOLD", defaults.prefetch_threshold),
            max_concurrent_prefetch: env_or(
                "MAX_CONCURRENT_PREFETCH",
                defaults.max_concurrent_prefetch,
            ),
            server_port: env_or("SERVER_PORT", defaults.server_port),
            data_dir: env::var("DATA_DIR").ok().map(PathBuf::from),
            content_dir: env::var("CONTENT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.content_dir),
        }
    }

    // == Validation ==
    pub fn validate(&self) -> Result<()> {
        let capacities = [
            ("fast_max", self.fast_max),
            ("mid_max", self.mid_max),
            ("cold_max", self.cold_max),
            ("fast_item_size", self.fast_item_size),
            ("mid_item_size", self.mid_item_size),
            ("history_capacity", self.history_capacity),
            ("group_capacity", self.group_capacity),
            ("hour_capacity", self.hour_capacity),
            ("prediction_limit", self.prediction_limit),
            ("strategy_limit", self.strategy_limit),
        ];
        if let Some((name, _)) = capacities.iter().find(|(_, value)| *value == 0) {
            return Err(CacheError::InvalidConfig(format!("{} must be positive", name)));
        }
        if self.fast_item_size >= self.mid_item_size {
            return Err(CacheError::InvalidConfig(
                "fast_item_size must be below mid_item_size".to_string(),
            ));
        }
        if self.default_ttl.is_zero() || self.load_timeout.is_zero() {
            return Err(CacheError::InvalidConfig(
                "default_ttl and load_timeout must be positive".to_string(),
            ));
        }
        if self.prefetch_ttl <= self.default_ttl {
            return Err(CacheError::InvalidConfig(
                "prefetch_ttl must exceed default_ttl".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.prefetch_threshold) {
            return Err(CacheError::InvalidConfig(format!(
                "prefetch_threshold {} is outside [0, 1]",
                self.prefetch_threshold
            )));
        }
        if self.max_concurrent_prefetch == 0 {
            return Err(CacheError::InvalidConfig(
                "max_concurrent_prefetch must be positive".to_string(),
            ));
        }
        Ok(())
    }

    // == Component Settings ==
    pub fn tier_limits(&self) -> TierLimits {
        TierLimits {
            fast_max: self.fast_max,
            mid_max: self.mid_max,
            cold_max: self.cold_max,
            fast_item_size: self.fast_item_size,
            mid_item_size: self.mid_item_size,
        }
    }

    pub fn recorder_limits(&self) -> RecorderLimits {
        RecorderLimits {
            history_capacity: self.history_capacity,
            group_capacity: self.group_capacity,
            hour_capacity: self.hour_capacity,
        }
    }

    pub fn prediction_limits(&self) -> PredictionLimits {
        PredictionLimits {
            top_k: self.prediction_limit,
            per_strategy: self.strategy_limit,
            ..PredictionLimits::default()
        }
    }

    pub fn prefetch_settings(&self) -> PrefetchSettings {
        PrefetchSettings {
            threshold: self.prefetch_threshold,
            max_concurrent: self.max_concurrent_prefetch,
            ttl: self.prefetch_ttl,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fast_max: 8 * MIB,
            mid_max: 64 * MIB,
            cold_max: 512 * MIB,
            fast_item_size: KIB,
            mid_item_size: 50 * KIB,
            default_ttl: Duration::from_secs(5 * 60),
            prefetch_ttl: Duration::from_secs(10 * 60),
            load_timeout: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(60),
            history_capacity: 1000,
            group_capacity: 1000,
            hour_capacity: 1000,
            prediction_limit: 10,
            strategy_limit: 20,
            prefetch_threshold: 0.5,
            max_concurrent_prefetch: 3,
            server_port: 3000,
            data_dir: None,
            content_dir: PathBuf::from("content"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.fast_max, 8 * MIB);
        assert_eq!(config.fast_item_size, 1024);
        assert_eq!(config.mid_item_size, 50 * 1024);
        assert_eq!(config.default_ttl, Duration::from_secs(300));
        assert_eq!(config.load_timeout, Duration::from_secs(10));
        assert_eq!(config.max_concurrent_prefetch, 3);
        assert_eq!(config.server_port, 3000);
        assert!(config.data_dir.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_env_defaults() {
        // Clear any existing env vars to test defaults
        for name in ["FAST_MAX_BYTES", "DEFAULT_TTL", "SERVER_PORT", "DATA_DIR"] {
            env::remove_var(name);
        }

        let config = Config::from_env();
        assert_eq!(config.fast_max, 8 * MIB);
        assert_eq!(config.default_ttl, Duration::from_secs(300));
        assert_eq!(config.server_port, 3000);
        assert!(config.data_dir.is_none());
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let cases = [
            Config {
                fast_max: 0,
                ..Config::default()
            },
            Config {
                fast_item_size: 50 * KIB,
                ..Config::default()
            },
            Config {
                prefetch_ttl: Duration::from_secs(300),
                ..Config::default()
            },
            Config {
                prefetch_threshold: 1.5,
                ..Config::default()
            },
            Config {
                max_concurrent_prefetch: 0,
                ..Config::default()
            },
        ];
        for config in cases {
            assert!(matches!(
                config.validate(),
                Err(CacheError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn test_component_settings_follow_config() {
        let config = Config::default();
        assert_eq!(config.tier_limits().mid_max, 64 * MIB);
        assert_eq!(config.recorder_limits().hour_capacity, 1000);
        assert_eq!(config.prediction_limits().top_k, 10);
        assert_eq!(config.prefetch_settings().ttl, Duration::from_secs(600));
    }
}
