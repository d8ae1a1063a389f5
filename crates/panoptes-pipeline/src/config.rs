//! Pipeline, manager, and daemon configuration.

use std::time::Duration;

use panoptes_models::{
    Backoff, DeviceTarget, StageConfig, ValidationError, ValidationResult,
};

/// Topology of one camera pipeline: two analytics stages and the queue
/// feeding the metrics sink.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Detection stage, the first hop after the source.
    pub detection: StageConfig,
    /// Classification stage.
    pub classification: StageConfig,
    /// Capacity of the final queue feeding the metrics sink.
    pub sink_queue_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            detection: StageConfig::new("detect"),
            classification: StageConfig::new("classify"),
            sink_queue_capacity: 8,
        }
    }
}

impl PipelineConfig {
    pub fn with_detection(mut self, config: StageConfig) -> Self {
        self.detection = config;
        self
    }

    pub fn with_classification(mut self, config: StageConfig) -> Self {
        self.classification = config;
        self
    }

    pub fn with_sink_queue_capacity(mut self, capacity: usize) -> Self {
        self.sink_queue_capacity = capacity;
        self
    }

    pub fn validate(&self) -> ValidationResult<()> {
        self.detection.validate()?;
        self.classification.validate()?;
        if self.sink_queue_capacity == 0 {
            return Err(ValidationError::ZeroQueueCapacity {
                stage: "sink".to_string(),
            });
        }
        Ok(())
    }
}

/// How the manager revives a camera whose pipeline failed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RestartPolicy {
    /// Total restarts allowed per camera before it stays failed.
    pub max_restarts: u32,
    /// Backoff applied before each restart attempt.
    pub backoff: Backoff,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: 3,
            backoff: Backoff::default(),
        }
    }
}

/// Configuration for a [`PipelineManager`](crate::PipelineManager).
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerConfig {
    /// Topology applied to every camera the manager runs.
    pub pipeline: PipelineConfig,
    /// Restart failed cameras automatically; `None` leaves them failed
    /// until removed.
    pub restart: Option<RestartPolicy>,
    /// Capacity of the shared event channel.
    pub event_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            restart: None,
            event_capacity: 64,
        }
    }
}

impl ManagerConfig {
    pub fn with_pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn with_restart(mut self, policy: RestartPolicy) -> Self {
        self.restart = Some(policy);
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}

/// Runtime knobs for the demo daemon, read from the environment.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Number of synthetic cameras to register.
    pub cameras: usize,
    /// Frames per camera before end of stream; `None` streams forever.
    pub frames_per_camera: Option<u64>,
    /// Delay between synthetic frames.
    pub frame_interval: Duration,
    /// Synthetic payload size in bytes.
    pub payload_len: usize,
    /// How often the daemon logs a metrics snapshot.
    pub snapshot_interval: Duration,
    /// Worker count for the detection stage.
    pub detection_workers: usize,
    /// Worker count for the classification stage.
    pub classification_workers: usize,
    /// Capacity of every stage queue.
    pub queue_capacity: usize,
    /// Restart budget per camera.
    pub max_restarts: u32,
    /// Device label handed to the synthetic backends.
    pub device: DeviceTarget,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            cameras: 3,
            frames_per_camera: None,
            frame_interval: Duration::from_millis(33),
            payload_len: 4096,
            snapshot_interval: Duration::from_secs(10),
            detection_workers: 2,
            classification_workers: 1,
            queue_capacity: 8,
            max_restarts: 3,
            device: DeviceTarget::Cpu,
        }
    }
}

impl DaemonConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            cameras: env_parse("PANOPTES_CAMERAS", defaults.cameras),
            frames_per_camera: std::env::var("PANOPTES_FRAMES")
                .ok()
                .and_then(|v| v.parse().ok()),
            frame_interval: Duration::from_millis(env_parse("PANOPTES_FRAME_INTERVAL_MS", 33)),
            payload_len: env_parse("PANOPTES_PAYLOAD_BYTES", defaults.payload_len),
            snapshot_interval: Duration::from_secs(env_parse(
                "PANOPTES_SNAPSHOT_INTERVAL_SECS",
                10,
            )),
            detection_workers: env_parse("PANOPTES_DETECT_WORKERS", defaults.detection_workers),
            classification_workers: env_parse(
                "PANOPTES_CLASSIFY_WORKERS",
                defaults.classification_workers,
            ),
            queue_capacity: env_parse("PANOPTES_QUEUE_CAPACITY", defaults.queue_capacity),
            max_restarts: env_parse("PANOPTES_MAX_RESTARTS", defaults.max_restarts),
            device: std::env::var("PANOPTES_DEVICE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.device),
        }
    }

    /// Manager configuration implied by the daemon knobs.
    pub fn manager_config(&self) -> ManagerConfig {
        let pipeline = PipelineConfig::default()
            .with_detection(
                StageConfig::new("detect")
                    .with_workers(self.detection_workers)
                    .with_queue_capacity(self.queue_capacity)
                    .with_device(self.device),
            )
            .with_classification(
                StageConfig::new("classify")
                    .with_workers(self.classification_workers)
                    .with_queue_capacity(self.queue_capacity)
                    .with_device(self.device),
            )
            .with_sink_queue_capacity(self.queue_capacity);
        ManagerConfig::default()
            .with_pipeline(pipeline)
            .with_restart(RestartPolicy {
                max_restarts: self.max_restarts,
                backoff: Backoff::default(),
            })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pipeline_config_is_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_sink_queue_is_rejected() {
        let config = PipelineConfig::default().with_sink_queue_capacity(0);
        assert_eq!(
            config.validate(),
            Err(ValidationError::ZeroQueueCapacity {
                stage: "sink".to_string()
            })
        );
    }

    #[test]
    fn test_invalid_stage_is_rejected() {
        let config =
            PipelineConfig::default().with_detection(StageConfig::new("detect").with_workers(0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_daemon_knobs_reach_manager_config() {
        let daemon = DaemonConfig {
            detection_workers: 4,
            classification_workers: 2,
            queue_capacity: 16,
            max_restarts: 1,
            device: DeviceTarget::Gpu { index: 0 },
            ..DaemonConfig::default()
        };
        let manager = daemon.manager_config();
        assert_eq!(manager.pipeline.detection.workers, 4);
        assert_eq!(manager.pipeline.classification.workers, 2);
        assert_eq!(manager.pipeline.sink_queue_capacity, 16);
        assert_eq!(
            manager.pipeline.detection.device,
            DeviceTarget::Gpu { index: 0 }
        );
        assert_eq!(manager.restart.unwrap().max_restarts, 1);
    }
}
