//! Offload configuration
//!
//! Loaded from JSON by the host application (or defaulted).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::consts::*;
use crate::error::ConfigError;
use crate::offload::TransportKind;
use crate::offload::signal::WaitStrategy;
use crate::sim::KernelParams;

/// How idle workers wait for work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum WaitMode {
    /// Block if the platform supports it, otherwise yield
    #[default]
    Auto,
    Block,
    Yield,
}

impl WaitMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitMode::Auto => "Auto",
            WaitMode::Block => "Block",
            WaitMode::Yield => "Yield",
        }
    }

    pub fn resolve(&self) -> WaitStrategy {
        match self {
            WaitMode::Auto => WaitStrategy::detect(),
            WaitMode::Block => WaitStrategy::Block,
            WaitMode::Yield => WaitStrategy::Yield,
        }
    }
}

/// Physics offload settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OffloadConfig {
    /// Number of job slots
    pub ring_size: usize,
    /// Maximum balls per slot
    pub capacity: usize,
    /// Worker threads to spawn (0 = run synchronously)
    pub workers: usize,
    pub transport: TransportKind,
    pub wait: WaitMode,
    /// Longest a parked worker sleeps before re-checking control messages
    pub idle_wait_ms: u64,
    pub kernel: KernelParams,
}

impl Default for OffloadConfig {
    fn default() -> Self {
        Self {
            ring_size: DEFAULT_RING_SIZE,
            capacity: DEFAULT_CAPACITY,
            workers: 1,
            transport: TransportKind::SharedRing,
            wait: WaitMode::Auto,
            idle_wait_ms: DEFAULT_IDLE_WAIT_MS,
            kernel: KernelParams::default(),
        }
    }
}

impl OffloadConfig {
    /// Parse and validate a JSON config; missing fields take defaults
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ring_size == 0 {
            return Err(ConfigError::Invalid("ring_size must be at least 1".into()));
        }
        if self.capacity == 0 {
            return Err(ConfigError::Invalid("capacity must be at least 1".into()));
        }
        if self.kernel.max_step_seconds.is_nan() || self.kernel.max_step_seconds <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "kernel.max_step_seconds must be positive, got {}",
                self.kernel.max_step_seconds
            )));
        }
        if !self.kernel.frame_scale.is_finite() || self.kernel.frame_scale <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "kernel.frame_scale must be positive and finite, got {}",
                self.kernel.frame_scale
            )));
        }
        Ok(())
    }

    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms.max(1))
    }
}
