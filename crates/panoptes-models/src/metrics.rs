//! Metrics snapshot types.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::camera::CameraId;

/// Aggregate counters for one camera pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct CameraMetrics {
    /// Frames that completed the full pipeline.
    pub frames_processed: u64,
    /// Objects emitted by the detection stage.
    pub objects_detected: u64,
    /// Objects that received a class label.
    pub objects_classified: u64,
    /// Mean capture-to-sink latency in milliseconds.
    pub avg_latency_ms: f64,
}

/// Immutable copy of all camera counters at one instant.
///
/// Produced by the metrics sink without pausing in-flight accumulation,
/// so the copy is eventually consistent, which is fine for monitoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub taken_at: DateTime<Utc>,
    pub cameras: HashMap<CameraId, CameraMetrics>,
}

impl MetricsSnapshot {
    pub fn new(cameras: HashMap<CameraId, CameraMetrics>) -> Self {
        Self {
            taken_at: Utc::now(),
            cameras,
        }
    }

    pub fn camera(&self, id: &CameraId) -> Option<&CameraMetrics> {
        self.cameras.get(id)
    }

    /// Total frames processed across every camera.
    pub fn total_frames(&self) -> u64 {
        self.cameras.values().map(|m| m.frames_processed).sum()
    }
}
