//! The in-memory metrics sink terminating every pipeline.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::debug;

use panoptes_models::{CameraId, CameraMetrics, Classification, Detection, MetricsSnapshot};
use panoptes_queue::{PopError, StageQueue};

/// Per-camera accumulation cells, updated lock-free once allocated.
#[derive(Debug, Default)]
struct CameraCounters {
    frames: AtomicU64,
    objects_detected: AtomicU64,
    objects_classified: AtomicU64,
    latency_sum_micros: AtomicU64,
    latency_samples: AtomicU64,
}

impl CameraCounters {
    fn to_metrics(&self) -> CameraMetrics {
        let samples = self.latency_samples.load(Ordering::Relaxed);
        let avg_latency_ms = if samples == 0 {
            0.0
        } else {
            self.latency_sum_micros.load(Ordering::Relaxed) as f64 / samples as f64 / 1000.0
        };
        CameraMetrics {
            frames_processed: self.frames.load(Ordering::Relaxed),
            objects_detected: self.objects_detected.load(Ordering::Relaxed),
            objects_classified: self.objects_classified.load(Ordering::Relaxed),
            avg_latency_ms,
        }
    }
}

/// Thread-safe accumulator for per-camera analytics counters.
///
/// The hot path (`record`, `record_detection`) takes the map's read lock
/// just long enough to clone an `Arc` and then works on atomics, so
/// concurrent pipelines never serialize on each other. `snapshot` copies
/// under the read lock without blocking in-flight updates; the copy is
/// eventually consistent.
#[derive(Debug, Default)]
pub struct MetricsSink {
    cameras: RwLock<HashMap<CameraId, Arc<CameraCounters>>>,
}

impl MetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a camera appear in snapshots, zeroed, from pipeline start.
    pub fn register(&self, camera: &CameraId) {
        self.counters(camera);
    }

    /// Forget a camera's counters entirely.
    pub fn remove(&self, camera: &CameraId) {
        self.write_map().remove(camera);
    }

    /// Count the objects a detection found.
    pub fn record_detection(&self, detection: &Detection) {
        let counters = self.counters(&detection.frame.camera);
        counters
            .objects_detected
            .fetch_add(detection.object_count() as u64, Ordering::Relaxed);
    }

    /// Count one frame that completed the whole pipeline.
    pub fn record(&self, classification: &Classification) {
        let counters = self.counters(&classification.frame.camera);
        counters.frames.fetch_add(1, Ordering::Relaxed);
        counters
            .objects_classified
            .fetch_add(classification.object_count() as u64, Ordering::Relaxed);

        let latency_micros = (Utc::now() - classification.captured_at)
            .num_microseconds()
            .unwrap_or(0)
            .max(0) as u64;
        counters
            .latency_sum_micros
            .fetch_add(latency_micros, Ordering::Relaxed);
        counters.latency_samples.fetch_add(1, Ordering::Relaxed);

        metrics::counter!(
            "panoptes_frames_processed_total",
            "camera" => classification.frame.camera.to_string()
        )
        .increment(1);
    }

    /// Immutable copy of every camera's counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let cameras = self
            .read_map()
            .iter()
            .map(|(camera, counters)| (camera.clone(), counters.to_metrics()))
            .collect();
        MetricsSnapshot::new(cameras)
    }

    fn counters(&self, camera: &CameraId) -> Arc<CameraCounters> {
        if let Some(counters) = self.read_map().get(camera) {
            return Arc::clone(counters);
        }
        let mut map = self.write_map();
        Arc::clone(map.entry(camera.clone()).or_default())
    }

    fn read_map(&self) -> RwLockReadGuard<'_, HashMap<CameraId, Arc<CameraCounters>>> {
        self.cameras.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_map(&self) -> RwLockWriteGuard<'_, HashMap<CameraId, Arc<CameraCounters>>> {
        self.cameras.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Consume the final queue into the sink until it closes and drains.
pub(crate) fn spawn_consumer(
    camera: CameraId,
    queue: StageQueue<Classification>,
    sink: Arc<MetricsSink>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match queue.pop().await {
                Ok(classification) => sink.record(&classification),
                Err(PopError::Closed) => break,
                Err(PopError::Timeout) => continue,
            }
        }
        debug!(camera = %camera, "metrics consumer drained");
    })
}
