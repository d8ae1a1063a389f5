//! Stage configuration: workers, queue capacity, device target, error policy.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::backoff::Backoff;
use crate::error::{ValidationError, ValidationResult};

/// Compute device a stage's backend should run on, passed through to the
/// backend opaquely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeviceTarget {
    #[default]
    Cpu,
    Gpu {
        index: u32,
    },
}

impl fmt::Display for DeviceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceTarget::Cpu => write!(f, "cpu"),
            DeviceTarget::Gpu { index } => write!(f, "gpu:{}", index),
        }
    }
}

impl std::str::FromStr for DeviceTarget {
    type Err = ValidationError;

    /// Parses `cpu`, `gpu`, or `gpu:<index>` (case-insensitive).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        if lower == "cpu" {
            return Ok(DeviceTarget::Cpu);
        }
        if lower == "gpu" {
            return Ok(DeviceTarget::Gpu { index: 0 });
        }
        if let Some(index) = lower.strip_prefix("gpu:") {
            if let Ok(index) = index.parse() {
                return Ok(DeviceTarget::Gpu { index });
            }
        }
        Err(ValidationError::UnknownDevice {
            device: s.to_string(),
        })
    }
}

/// What a stage does when its processing function fails on one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Log, drop the item, keep going. Default for transient per-item
    /// failures.
    #[default]
    Skip,
    /// Re-invoke the processor up to `max_attempts` more times with
    /// exponential backoff, then drop the item.
    Retry { max_attempts: u32, backoff: Backoff },
    /// Treat any item failure as fatal for the whole pipeline.
    FailPipeline,
}

impl ErrorPolicy {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ErrorPolicy::FailPipeline)
    }
}

/// Configuration for one pipeline stage. Immutable after pipeline start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Stage name used in logs, metrics labels, and failure reasons.
    pub name: String,
    /// Worker tasks pulling from this stage's input queue.
    pub workers: usize,
    /// Capacity of this stage's input queue.
    pub queue_capacity: usize,
    /// Device the stage backend runs on.
    #[serde(default)]
    pub device: DeviceTarget,
    /// Per-item failure handling.
    #[serde(default)]
    pub error_policy: ErrorPolicy,
}

impl StageConfig {
    /// Create a stage config with a single worker and a small queue.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            workers: 1,
            queue_capacity: 8,
            device: DeviceTarget::default(),
            error_policy: ErrorPolicy::default(),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_device(mut self, device: DeviceTarget) -> Self {
        self.device = device;
        self
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    /// Check the config is usable before a stage is spawned from it.
    pub fn validate(&self) -> ValidationResult<()> {
        if self.name.is_empty() {
            return Err(ValidationError::EmptyStageName);
        }
        if self.workers == 0 {
            return Err(ValidationError::NoWorkers {
                stage: self.name.clone(),
            });
        }
        if self.queue_capacity == 0 {
            return Err(ValidationError::ZeroQueueCapacity {
                stage: self.name.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_stage_config_defaults() {
        let config = StageConfig::new("detect");
        assert_eq!(config.workers, 1);
        assert_eq!(config.queue_capacity, 8);
        assert_eq!(config.device, DeviceTarget::Cpu);
        assert_eq!(config.error_policy, ErrorPolicy::Skip);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_stage_config_rejects_zero_workers_and_capacity() {
        let no_workers = StageConfig::new("detect").with_workers(0);
        assert_eq!(
            no_workers.validate(),
            Err(ValidationError::NoWorkers {
                stage: "detect".to_string()
            })
        );

        let no_capacity = StageConfig::new("detect").with_queue_capacity(0);
        assert_eq!(
            no_capacity.validate(),
            Err(ValidationError::ZeroQueueCapacity {
                stage: "detect".to_string()
            })
        );
    }

    #[test]
    fn test_error_policy_serde_round_trip() {
        let policy = ErrorPolicy::Retry {
            max_attempts: 3,
            backoff: Backoff::new(Duration::from_millis(50), Duration::from_secs(1)),
        };
        let json = serde_json::to_string(&policy).unwrap();
        let back: ErrorPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(back, policy);
    }

    #[test]
    fn test_device_target_display() {
        assert_eq!(DeviceTarget::Cpu.to_string(), "cpu");
        assert_eq!(DeviceTarget::Gpu { index: 1 }.to_string(), "gpu:1");
    }

    #[test]
    fn test_device_target_parse() {
        assert_eq!("cpu".parse(), Ok(DeviceTarget::Cpu));
        assert_eq!("GPU".parse(), Ok(DeviceTarget::Gpu { index: 0 }));
        assert_eq!("gpu:2".parse(), Ok(DeviceTarget::Gpu { index: 2 }));
        assert!("tpu".parse::<DeviceTarget>().is_err());
    }
}
