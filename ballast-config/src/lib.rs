//! Configuration for the control plane.
//!
//! Every recognized option is an explicit field with a default; a config
//! file only needs to name what it overrides. `validate` runs once at
//! construction time, components assume a validated config afterwards.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use ballast_types::DeviceId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable naming a YAML config file.
pub const CONFIG_ENV: &str = "BALLAST_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error reading {path}: {message}")]
    Io { path: String, message: String },
    #[error("parse error: {0}")]
    Parse(String),
    #[error("invalid value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BallastConfig {
    pub batcher: BatcherConfig,
    pub scheduler: SchedulerConfig,
    pub optimizer: OptimizerConfig,
    pub slo: SloConfig,
    pub control: ControlConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatcherConfig {
    /// Memory budget of a single batch, in MB.
    pub max_memory_mb: f64,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            max_memory_mb: 1024.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Devices in iteration order; ties in device selection go to the earliest entry.
    pub gpu_devices: Vec<DeviceId>,
    /// EMA smoothing factor for load and weight.
    pub alpha: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            gpu_devices: vec![DeviceId(0)],
            alpha: 0.2,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Capacity of the observation ring buffer.
    pub max_history: usize,
    /// A retrain is considered every `retrain_every` updates.
    pub retrain_every: u64,
    /// History needed before the model is trained or consulted.
    pub min_history: usize,
    /// Available memory assumed when rebuilding training features from history.
    pub training_available_memory_mb: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_history: 1000,
            retrain_every: 100,
            min_history: 50,
            training_available_memory_mb: 1024.0,
        }
    }
}

/// Target and rolling window of one objective.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SloObjective {
    pub target: f64,
    pub window_seconds: f64,
}

impl SloObjective {
    pub const fn new(target: f64, window_seconds: f64) -> Self {
        Self {
            target,
            window_seconds,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SloConfig {
    pub latency_p95: SloObjective,
    pub error_rate: SloObjective,
    pub availability: SloObjective,
    pub cache_hit_rate: SloObjective,
}

impl Default for SloConfig {
    fn default() -> Self {
        Self {
            latency_p95: SloObjective::new(0.1, 3600.0),
            error_rate: SloObjective::new(0.001, 3600.0),
            availability: SloObjective::new(0.999, 86400.0),
            cache_hit_rate: SloObjective::new(0.7, 3600.0),
        }
    }
}

impl SloConfig {
    pub fn objectives(&self) -> [(&'static str, SloObjective); 4] {
        [
            ("latency_p95", self.latency_p95),
            ("error_rate", self.error_rate),
            ("availability", self.availability),
            ("cache_hit_rate", self.cache_hit_rate),
        ]
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Upper bound on a single backend execution.
    pub execution_timeout_ms: u64,
    /// Memory reported to the optimizer when sizing batches.
    pub available_memory_mb: f64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            execution_timeout_ms: 30_000,
            available_memory_mb: 1024.0,
        }
    }
}

impl BallastConfig {
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let cfg: BallastConfig =
            serde_yaml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_yaml(&text)
    }

    /// Load from `$BALLAST_CONFIG` if set, otherwise defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.is_empty() => Self::from_path(path),
            _ => {
                tracing::debug!("{CONFIG_ENV} not set, using default configuration");
                Ok(Self::default())
            }
        }
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let b = &self.batcher;
        if !b.max_memory_mb.is_finite() || b.max_memory_mb <= 0.0 {
            return Err(invalid("batcher.max_memory_mb", "must be a positive number"));
        }

        let s = &self.scheduler;
        if s.gpu_devices.is_empty() {
            return Err(invalid("scheduler.gpu_devices", "at least one device is required"));
        }
        let mut seen = HashSet::new();
        for d in &s.gpu_devices {
            if !seen.insert(*d) {
                return Err(invalid("scheduler.gpu_devices", format!("duplicate device {}", d.0)));
            }
        }
        if !(s.alpha > 0.0 && s.alpha <= 1.0) {
            return Err(invalid("scheduler.alpha", "must be in (0, 1]"));
        }

        let o = &self.optimizer;
        if o.max_history == 0 {
            return Err(invalid("optimizer.max_history", "must be non-zero"));
        }
        if o.retrain_every == 0 {
            return Err(invalid("optimizer.retrain_every", "must be non-zero"));
        }
        if o.min_history > o.max_history {
            return Err(invalid(
                "optimizer.min_history",
                format!("{} exceeds max_history {}", o.min_history, o.max_history),
            ));
        }
        if !o.training_available_memory_mb.is_finite() || o.training_available_memory_mb <= 0.0 {
            return Err(invalid(
                "optimizer.training_available_memory_mb",
                "must be a positive number",
            ));
        }

        for (name, obj) in self.slo.objectives() {
            if !obj.target.is_finite() || obj.target < 0.0 {
                return Err(invalid("slo.target", format!("{name}: must be non-negative")));
            }
            if !obj.window_seconds.is_finite() || obj.window_seconds <= 0.0 {
                return Err(invalid("slo.window_seconds", format!("{name}: must be positive")));
            }
        }

        let c = &self.control;
        if c.execution_timeout_ms == 0 {
            return Err(invalid("control.execution_timeout_ms", "must be non-zero"));
        }
        if !c.available_memory_mb.is_finite() || c.available_memory_mb <= 0.0 {
            return Err(invalid("control.available_memory_mb", "must be a positive number"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = BallastConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.batcher.max_memory_mb, 1024.0);
        assert_eq!(cfg.optimizer.max_history, 1000);
        assert_eq!(cfg.optimizer.retrain_every, 100);
        assert_eq!(cfg.optimizer.min_history, 50);
        assert_eq!(cfg.scheduler.alpha, 0.2);
        assert_eq!(cfg.slo.availability, SloObjective::new(0.999, 86400.0));
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let yaml = r#"
batcher:
  max_memory_mb: 512
scheduler:
  gpu_devices: [0, 1, 2]
slo:
  latency_p95:
    target: 0.25
    window_seconds: 600
"#;
        let cfg = BallastConfig::from_yaml(yaml).unwrap();
        assert_eq!(cfg.batcher.max_memory_mb, 512.0);
        assert_eq!(cfg.scheduler.gpu_devices, vec![DeviceId(0), DeviceId(1), DeviceId(2)]);
        assert_eq!(cfg.scheduler.alpha, 0.2);
        assert_eq!(cfg.slo.latency_p95, SloObjective::new(0.25, 600.0));
        assert_eq!(cfg.slo.error_rate, SloObjective::new(0.001, 3600.0));
    }

    #[test]
    fn empty_device_list_rejected() {
        let err = BallastConfig::from_yaml("scheduler:\n  gpu_devices: []\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "scheduler.gpu_devices", .. }));
    }

    #[test]
    fn duplicate_devices_rejected() {
        let err = BallastConfig::from_yaml("scheduler:\n  gpu_devices: [1, 1]\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "scheduler.gpu_devices", .. }));
    }

    #[test]
    fn min_history_bounded_by_capacity() {
        let mut cfg = BallastConfig::default();
        cfg.optimizer.max_history = 10;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn yaml_round_trip_of_defaults() {
        let cfg = BallastConfig::default();
        let text = cfg.to_yaml().unwrap();
        assert_eq!(BallastConfig::from_yaml(&text).unwrap(), cfg);
    }
}
