//! Per-camera analytics pipelines and their supervision.
//!
//! This crate wires the other panoptes crates into running pipelines:
//!
//! - [`Pipeline`] runs one camera through detection and classification
//!   over bounded queues, with a graceful drain and a supervised
//!   failure path;
//! - [`PipelineManager`] keeps one pipeline per camera, isolates their
//!   failures, and restarts failed cameras under a [`RestartPolicy`];
//! - [`MetricsSink`] terminates every pipeline and aggregates
//!   per-camera counters into [`MetricsSnapshot`]s.
//!
//! The `panoptesd` binary in this package runs the whole stack over
//! synthetic sources and backends.
//!
//! [`MetricsSnapshot`]: panoptes_models::MetricsSnapshot

pub mod analytics;
pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod pipeline;
pub mod sink;
pub mod stage;

pub use analytics::{ClassificationStage, DetectionStage};
pub use config::{DaemonConfig, ManagerConfig, PipelineConfig, RestartPolicy};
pub use error::{FailureReason, PipelineError, PipelineResult};
pub use events::{EventChannel, PipelineEvent};
pub use manager::{CameraStatus, PipelineManager};
pub use pipeline::Pipeline;
pub use sink::MetricsSink;
pub use stage::{Stage, StageOutput, StageProcessor};
