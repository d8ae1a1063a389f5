//! Shared data models for the Panoptes analytics pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Camera identity and stream configuration
//! - Frames and their per-camera sequence identity
//! - Detection and classification artifacts
//! - Stage configuration (workers, queue capacity, device target, error policy)
//! - Pipeline lifecycle states
//! - Metrics snapshots

pub mod backoff;
pub mod camera;
pub mod classification;
pub mod detection;
pub mod error;
pub mod frame;
pub mod metrics;
pub mod stage;
pub mod state;

// Re-export common types
pub use backoff::Backoff;
pub use camera::{CameraConfig, CameraId, ReconnectPolicy};
pub use classification::{Classification, ClassifiedObject};
pub use detection::{Detection, NormalizedRect, ObjectBox};
pub use error::{ValidationError, ValidationResult};
pub use frame::{Frame, FrameId};
pub use metrics::{CameraMetrics, MetricsSnapshot};
pub use stage::{DeviceTarget, ErrorPolicy, StageConfig};
pub use state::PipelineState;
