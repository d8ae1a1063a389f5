//! The pipeline manager: camera registry, isolation, restarts.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use panoptes_ingest::SourceFactory;
use panoptes_inference::{Classifier, Detector};
use panoptes_models::{CameraConfig, CameraId, MetricsSnapshot, PipelineState};

use crate::config::ManagerConfig;
use crate::error::{FailureReason, PipelineError, PipelineResult};
use crate::events::{EventChannel, PipelineEvent};
use crate::pipeline::Pipeline;
use crate::sink::MetricsSink;

/// Point-in-time status of one managed camera.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CameraStatus {
    pub camera: CameraId,
    pub state: PipelineState,
    pub restarts: u32,
    pub failure: Option<FailureReason>,
}

struct CameraEntry {
    config: CameraConfig,
    pipeline: Arc<Pipeline>,
    restarts: u32,
    monitor: Option<JoinHandle<()>>,
}

/// Camera registry plus the latch [`PipelineManager::shutdown`] sets;
/// a closed registry refuses new cameras.
#[derive(Default)]
struct Registry {
    cameras: HashMap<CameraId, CameraEntry>,
    closed: bool,
}

struct ManagerInner {
    config: ManagerConfig,
    sources: Arc<dyn SourceFactory>,
    detector: Arc<dyn Detector>,
    classifier: Arc<dyn Classifier>,
    sink: Arc<MetricsSink>,
    events: EventChannel,
    registry: Mutex<Registry>,
}

/// Runs one pipeline per registered camera.
///
/// Cameras are isolated from one another: a failing pipeline never
/// touches its peers' queues, tasks, or counters. When a restart policy
/// is configured, a per-camera monitor task revives failed pipelines
/// with a fresh source, up to the policy's budget.
#[derive(Clone)]
pub struct PipelineManager {
    inner: Arc<ManagerInner>,
}

impl PipelineManager {
    pub fn new(
        config: ManagerConfig,
        sources: Arc<dyn SourceFactory>,
        detector: Arc<dyn Detector>,
        classifier: Arc<dyn Classifier>,
    ) -> Self {
        let events = EventChannel::new(config.event_capacity);
        Self {
            inner: Arc::new(ManagerInner {
                config,
                sources,
                detector,
                classifier,
                sink: Arc::new(MetricsSink::new()),
                events,
                registry: Mutex::new(Registry::default()),
            }),
        }
    }

    /// Subscribe to lifecycle events across all cameras.
    pub fn subscribe_events(&self) -> broadcast::Receiver<PipelineEvent> {
        self.inner.events.subscribe()
    }

    /// Register a camera and start its pipeline.
    ///
    /// The source is opened outside the registry lock, so a factory
    /// that dials eagerly cannot stall [`statuses`], [`remove_camera`],
    /// or [`shutdown`] behind the connect.
    ///
    /// [`statuses`]: PipelineManager::statuses
    /// [`remove_camera`]: PipelineManager::remove_camera
    /// [`shutdown`]: PipelineManager::shutdown
    pub async fn add_camera(&self, config: CameraConfig) -> PipelineResult<()> {
        config.validate()?;
        {
            let registry = self.inner.registry.lock().await;
            if registry.closed {
                return Err(PipelineError::ShutDown);
            }
            if registry.cameras.contains_key(&config.id) {
                return Err(PipelineError::DuplicateCamera(config.id));
            }
        }

        let pipeline = Self::build_pipeline(&self.inner, &config).await?;

        // Re-check under the lock: the registry may have changed while
        // the source was dialing. The losing pipeline has not started,
        // so dropping it tears nothing down.
        let mut registry = self.inner.registry.lock().await;
        if registry.closed {
            return Err(PipelineError::ShutDown);
        }
        if registry.cameras.contains_key(&config.id) {
            return Err(PipelineError::DuplicateCamera(config.id));
        }
        pipeline.start()?;
        let monitor = tokio::spawn(Self::monitor_camera(
            Arc::clone(&self.inner),
            config.id.clone(),
        ));
        info!(camera = %config.id, uri = %config.uri, "camera added");
        registry.cameras.insert(
            config.id.clone(),
            CameraEntry {
                config,
                pipeline,
                restarts: 0,
                monitor: Some(monitor),
            },
        );
        Ok(())
    }

    /// Stop and deregister a camera. A failed pipeline is discarded
    /// as-is; there is nothing left in it to drain.
    pub async fn remove_camera(&self, camera: &CameraId) -> PipelineResult<()> {
        let mut entry = {
            let mut registry = self.inner.registry.lock().await;
            registry
                .cameras
                .remove(camera)
                .ok_or_else(|| PipelineError::NotFound(camera.clone()))?
        };
        if let Some(monitor) = entry.monitor.take() {
            monitor.abort();
        }
        match entry.pipeline.stop().await {
            Ok(()) => info!(camera = %camera, "camera removed"),
            Err(err) => debug!(camera = %camera, error = %err, "camera removed without drain"),
        }
        self.inner.sink.remove(camera);
        Ok(())
    }

    /// Per-camera state, restart count, and failure reason, sorted by
    /// camera id.
    pub async fn statuses(&self) -> Vec<CameraStatus> {
        let registry = self.inner.registry.lock().await;
        let mut statuses: Vec<CameraStatus> = registry
            .cameras
            .values()
            .map(|entry| CameraStatus {
                camera: entry.config.id.clone(),
                state: entry.pipeline.state(),
                restarts: entry.restarts,
                failure: entry.pipeline.failure(),
            })
            .collect();
        statuses.sort_by(|a, b| a.camera.cmp(&b.camera));
        statuses
    }

    /// Aggregated metrics across every camera.
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.sink.snapshot()
    }

    /// Number of registered cameras.
    pub async fn camera_count(&self) -> usize {
        self.inner.registry.lock().await.cameras.len()
    }

    /// Drain every pipeline and close the registry; later
    /// [`add_camera`] calls report [`PipelineError::ShutDown`].
    ///
    /// [`add_camera`]: PipelineManager::add_camera
    pub async fn shutdown(&self) {
        let entries: Vec<CameraEntry> = {
            let mut registry = self.inner.registry.lock().await;
            registry.closed = true;
            registry.cameras.drain().map(|(_, entry)| entry).collect()
        };
        info!(cameras = entries.len(), "pipeline manager shutting down");
        let stops = entries.into_iter().map(|mut entry| async move {
            if let Some(monitor) = entry.monitor.take() {
                monitor.abort();
            }
            if let Err(err) = entry.pipeline.stop().await {
                debug!(
                    camera = %entry.pipeline.camera(),
                    error = %err,
                    "pipeline not drained at shutdown"
                );
            }
        });
        join_all(stops).await;
        info!("pipeline manager shut down");
    }

    /// Open the camera's source and assemble its pipeline, still in
    /// `Created`. Callers start it under the registry lock once the
    /// entry is in place; a build that loses its registration race is
    /// dropped without ever having run.
    async fn build_pipeline(
        inner: &Arc<ManagerInner>,
        config: &CameraConfig,
    ) -> PipelineResult<Arc<Pipeline>> {
        let source = inner.sources.create(config).await?;
        let pipeline = Pipeline::new(
            config.clone(),
            inner.config.pipeline.clone(),
            source,
            Arc::clone(&inner.detector),
            Arc::clone(&inner.classifier),
            Arc::clone(&inner.sink),
        )?
        .with_events(inner.events.clone());
        Ok(Arc::new(pipeline))
    }

    /// Watches one camera's pipeline and applies the restart policy.
    ///
    /// The loop re-reads the registry on every pass, so removal of the
    /// camera ends the monitor even if the abort signal is late.
    async fn monitor_camera(inner: Arc<ManagerInner>, camera: CameraId) {
        loop {
            let pipeline = {
                let registry = inner.registry.lock().await;
                match registry.cameras.get(&camera) {
                    Some(entry) => Arc::clone(&entry.pipeline),
                    None => return,
                }
            };

            if pipeline.wait_for_terminal().await != PipelineState::Failed {
                return;
            }

            let Some(policy) = inner.config.restart else {
                return;
            };

            let restarts = {
                let registry = inner.registry.lock().await;
                match registry.cameras.get(&camera) {
                    Some(entry) => entry.restarts,
                    None => return,
                }
            };
            if restarts >= policy.max_restarts {
                warn!(
                    camera = %camera,
                    restarts,
                    "restart budget exhausted; camera stays failed"
                );
                return;
            }

            let delay = policy.backoff.delay_for_attempt(restarts);
            warn!(
                camera = %camera,
                attempt = restarts + 1,
                delay_ms = delay.as_millis() as u64,
                "scheduling camera restart"
            );
            time::sleep(delay).await;

            match Self::restart_camera(&inner, &camera).await {
                Ok(Some(attempt)) => {
                    inner.events.camera_restarted(&camera, attempt);
                    info!(camera = %camera, attempt, "camera restarted");
                }
                // Removed while the restart was pending.
                Ok(None) => return,
                Err(err) => {
                    warn!(camera = %camera, error = %err, "camera restart failed");
                }
            }
        }
    }

    /// Swap in a fresh pipeline for a failed camera. Consumes one
    /// restart from the budget even when the rebuild fails, so a camera
    /// whose source cannot be reopened still runs out of attempts.
    async fn restart_camera(
        inner: &Arc<ManagerInner>,
        camera: &CameraId,
    ) -> PipelineResult<Option<u32>> {
        let (attempt, config) = {
            let mut registry = inner.registry.lock().await;
            let Some(entry) = registry.cameras.get_mut(camera) else {
                return Ok(None);
            };
            entry.restarts += 1;
            (entry.restarts, entry.config.clone())
        };

        // The re-dial happens outside the registry lock, like the
        // original dial in add_camera.
        let pipeline = Self::build_pipeline(inner, &config).await?;

        let mut registry = inner.registry.lock().await;
        let Some(entry) = registry.cameras.get_mut(camera) else {
            // Removed while the rebuild was in flight; the unstarted
            // pipeline drops inert.
            return Ok(None);
        };
        pipeline.start()?;
        entry.pipeline = pipeline;
        Ok(Some(attempt))
    }
}
