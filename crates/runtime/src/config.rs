//! Configuration management for the governance runtime
//!
//! Provides centralized configuration handling with validation, environment
//! variable overrides, and defaults that match the documented governance
//! thresholds.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("IO error reading config file: {message}")]
    IoError { message: String },

    #[error("Configuration parsing error: {message}")]
    ParseError { message: String },
}

/// Main runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Storage layout
    pub storage: StorageConfig,
    /// ODE integration parameters
    pub dynamics: DynamicsConfig,
    /// PI controller for lambda1
    pub controller: ControllerConfig,
    /// Classification thresholds (mutable at runtime via set_thresholds)
    pub thresholds: ThresholdConfig,
    /// Per-agent sliding-window rate limits
    pub rate_limits: RateLimitConfig,
    /// Dialectic protocol bounds
    pub dialectic: DialecticConfig,
    /// Advisory lock behaviour
    pub locks: LockConfig,
    /// Save debouncing and history capping
    pub persistence: PersistenceConfig,
    /// Tool dispatch timeouts
    pub dispatch: DispatchConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Storage layout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root of the data directory; every persisted file lives below it
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
        }
    }
}

/// Parameters of the four coupled ODEs and their integration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicsConfig {
    pub alpha: f64,
    pub beta_e: f64,
    pub gamma_e: f64,
    pub k: f64,
    pub beta_i: f64,
    pub gamma_i: f64,
    pub mu: f64,
    pub lambda2: f64,
    pub beta_c: f64,
    pub kappa: f64,
    pub delta: f64,
    pub sigma: f64,
    pub dt: f64,
    pub lambda_min: f64,
    pub lambda_max: f64,
    pub lambda_init: f64,
    pub initial_e: f64,
    pub initial_i: f64,
    pub initial_s: f64,
    pub initial_v: f64,
}

impl Default for DynamicsConfig {
    fn default() -> Self {
        Self {
            alpha: 0.4,
            beta_e: 0.1,
            gamma_e: 0.05,
            k: 0.1,
            beta_i: 0.3,
            gamma_i: 0.25,
            mu: 0.8,
            lambda2: 0.1,
            beta_c: 0.15,
            kappa: 0.3,
            delta: 0.4,
            sigma: 0.1,
            dt: 0.1,
            lambda_min: 0.09,
            lambda_max: 0.30,
            lambda_init: 0.125,
            initial_e: 0.8,
            initial_i: 0.8,
            initial_s: 0.2,
            initial_v: 0.0,
        }
    }
}

/// PI controller configuration for the adaptive lambda1 parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub target_coherence: f64,
    pub kp: f64,
    pub ki: f64,
    /// Adjust lambda1 every this many updates
    pub adjust_every: u64,
    /// No adjustment before this many updates have been processed
    pub warmup_updates: u64,
    /// Coherence window width used for the error term
    pub coherence_window: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            target_coherence: 0.55,
            kp: 0.5,
            ki: 0.05,
            adjust_every: 10,
            warmup_updates: 100,
            coherence_window: 10,
        }
    }
}

/// Classification thresholds and attention weights.
///
/// Everything here is reported by `get_thresholds` and adjustable through
/// `set_thresholds`; the bands have been retuned before and will be again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// Coherence below this forces a pause
    pub coherence_critical: f64,
    /// |V| above this forces a pause (initial value; adaptive after warm-up)
    pub void_threshold: f64,
    /// Attention above this yields a caution verdict with regroup guidance
    pub risk_revise: f64,
    /// Attention above this yields a caution verdict
    pub risk_approve: f64,
    /// Maximum accepted response_text size in bytes
    pub max_response_bytes: usize,
    /// Mean-attention bound for the healthy band
    pub healthy_attention: f64,
    /// Coherence floor for the healthy band
    pub healthy_coherence: f64,
    /// Mean-attention bound for the moderate band
    pub moderate_attention: f64,
    /// Weights of the phi attention blend
    pub phi_weights: AttentionWeights,
    /// Weights of the legacy attention heuristic
    pub legacy_weights: AttentionWeights,
    /// Share of phi in the final attention score (legacy takes the rest)
    pub phi_share: f64,
}

/// Weighted blend over the four normalized attention signals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttentionWeights {
    pub length: f64,
    pub complexity: f64,
    pub coherence_gap: f64,
    pub keywords: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            coherence_critical: 0.40,
            void_threshold: 0.15,
            risk_revise: 0.60,
            risk_approve: 0.35,
            max_response_bytes: 50_000,
            healthy_attention: 0.48,
            healthy_coherence: 0.48,
            moderate_attention: 0.70,
            phi_weights: AttentionWeights {
                length: 0.30,
                complexity: 0.30,
                coherence_gap: 0.25,
                keywords: 0.15,
            },
            legacy_weights: AttentionWeights {
                length: 0.20,
                complexity: 0.40,
                coherence_gap: 0.30,
                keywords: 0.10,
            },
            phi_share: 0.7,
        }
    }
}

/// Sliding-window rate limits, per agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Knowledge-graph stores per rolling hour
    pub knowledge_stores_per_hour: usize,
    /// Updates per rolling hour (the loop detector is the fine-grained guard)
    pub updates_per_hour: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            knowledge_stores_per_hour: 10,
            updates_per_hour: 600,
        }
    }
}

/// Dialectic protocol bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialecticConfig {
    /// Inactivity bound in awaiting_antithesis before the session times out
    #[serde(with = "humantime_serde")]
    pub max_antithesis_wait: Duration,
    /// Synthesis rounds before the session is forced to blocked
    pub max_synthesis_rounds: usize,
    /// A reviewer may not re-review the same agent within this window
    #[serde(with = "humantime_serde")]
    pub review_exclusion_window: Duration,
}

impl Default for DialecticConfig {
    fn default() -> Self {
        Self {
            max_antithesis_wait: Duration::from_secs(2 * 60 * 60),
            max_synthesis_rounds: 5,
            review_exclusion_window: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Advisory lock acquisition behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub acquire_deadline: Duration,
    /// Locks older than this with a dead owner are reaped
    #[serde(with = "humantime_serde")]
    pub stale_age: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            acquire_deadline: Duration::from_secs(5),
            stale_age: Duration::from_secs(5 * 60),
        }
    }
}

/// Save debouncing and history capping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Coalescing window for routine metadata saves
    #[serde(with = "humantime_serde")]
    pub metadata_debounce: Duration,
    /// History arrays are trimmed to this many entries at serialization
    pub history_cap: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            metadata_debounce: Duration::from_millis(500),
            history_cap: 100,
        }
    }
}

/// Per-tool timeout classes enforced by the dispatcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(with = "humantime_serde")]
    pub default_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub update_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub admin_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            update_timeout: Duration::from_secs(60),
            admin_timeout: Duration::from_secs(10),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter when GOVMON_LOG / RUST_LOG are unset
    pub level: String,
    /// Emit compact single-line output instead of the pretty format
    pub compact: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            compact: true,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a TOML file, falling back to defaults when
    /// the path is `None`. Environment variables override afterwards:
    /// `GOVMON_DATA_DIR` replaces `storage.data_dir`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
                    message: format!("{}: {e}", path.display()),
                })?;
                toml::from_str(&raw).map_err(|e| ConfigError::ParseError {
                    message: e.to_string(),
                })?
            }
            None => Self::default(),
        };

        if let Ok(dir) = env::var("GOVMON_DATA_DIR") {
            config.storage.data_dir = PathBuf::from(dir);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would break classification invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit = |key: &str, value: f64| -> Result<(), ConfigError> {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    reason: format!("{value} is outside [0, 1]"),
                });
            }
            Ok(())
        };

        unit("thresholds.coherence_critical", self.thresholds.coherence_critical)?;
        unit("thresholds.risk_revise", self.thresholds.risk_revise)?;
        unit("thresholds.risk_approve", self.thresholds.risk_approve)?;
        unit("thresholds.healthy_attention", self.thresholds.healthy_attention)?;
        unit("thresholds.healthy_coherence", self.thresholds.healthy_coherence)?;
        unit("thresholds.moderate_attention", self.thresholds.moderate_attention)?;
        unit("thresholds.phi_share", self.thresholds.phi_share)?;

        if self.thresholds.risk_approve > self.thresholds.risk_revise {
            return Err(ConfigError::InvalidValue {
                key: "thresholds.risk_approve".to_string(),
                reason: "must not exceed risk_revise".to_string(),
            });
        }
        if self.dynamics.lambda_min > self.dynamics.lambda_max {
            return Err(ConfigError::InvalidValue {
                key: "dynamics.lambda_min".to_string(),
                reason: "must not exceed lambda_max".to_string(),
            });
        }
        if !(self.dynamics.lambda_min..=self.dynamics.lambda_max)
            .contains(&self.dynamics.lambda_init)
        {
            return Err(ConfigError::InvalidValue {
                key: "dynamics.lambda_init".to_string(),
                reason: "must lie within [lambda_min, lambda_max]".to_string(),
            });
        }
        if self.dynamics.dt <= 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "dynamics.dt".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.dynamics.sigma <= 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "dynamics.sigma".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.persistence.history_cap == 0 {
            return Err(ConfigError::InvalidValue {
                key: "persistence.history_cap".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.dialectic.max_synthesis_rounds == 0 {
            return Err(ConfigError::InvalidValue {
                key: "dialectic.max_synthesis_rounds".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        RuntimeConfig::default().validate().unwrap();
    }

    #[test]
    fn toml_round_trip() {
        let config = RuntimeConfig::default();
        let raw = toml::to_string(&config).unwrap();
        let back: RuntimeConfig = toml::from_str(&raw).unwrap();
        assert_eq!(back.thresholds.coherence_critical, 0.40);
        assert_eq!(back.rate_limits.knowledge_stores_per_hour, 10);
        assert_eq!(back.dialectic.max_synthesis_rounds, 5);
    }

    #[test]
    fn rejects_inverted_risk_bands() {
        let mut config = RuntimeConfig::default();
        config.thresholds.risk_approve = 0.9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_out_of_band_lambda() {
        let mut config = RuntimeConfig::default();
        config.dynamics.lambda_init = 0.5;
        assert!(config.validate().is_err());
    }
}
