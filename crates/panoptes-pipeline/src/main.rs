//! Multi-camera analytics daemon over synthetic streams.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use panoptes_ingest::{SyntheticConfig, SyntheticSourceFactory};
use panoptes_inference::{LabelMapClassifier, SyntheticDetector};
use panoptes_models::CameraConfig;
use panoptes_pipeline::{DaemonConfig, PipelineEvent, PipelineManager};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter =
        EnvFilter::from_default_env().add_directive("panoptes=info".parse().unwrap());

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting panoptesd");

    // Load configuration
    let config = DaemonConfig::from_env();
    info!("Daemon config: {:?}", config);

    // Synthetic sources and backends stand in for real stream ingest
    // and real models; the pipeline topology is the production one.
    let mut stream = SyntheticConfig::default()
        .with_payload_len(config.payload_len)
        .with_interval(config.frame_interval);
    if let Some(frames) = config.frames_per_camera {
        stream = stream.with_frames(frames);
    }
    let factory = Arc::new(SyntheticSourceFactory::new(stream));
    let detector = Arc::new(SyntheticDetector::new(config.device));
    let classifier =
        Arc::new(LabelMapClassifier::new(config.device).with_mapping("person", "human"));

    let manager = PipelineManager::new(config.manager_config(), factory, detector, classifier);

    // Log lifecycle events as they happen
    let mut events = manager.subscribe_events();
    let event_log = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(PipelineEvent::StateChanged { camera, state }) => {
                    debug!(camera = %camera, state = %state, "Pipeline state changed");
                }
                Ok(PipelineEvent::PipelineFailed { camera, reason }) => {
                    error!(camera = %camera, origin = %reason.origin, "Pipeline failed: {}", reason.message);
                }
                Ok(PipelineEvent::CameraRestarted { camera, attempt }) => {
                    info!(camera = %camera, attempt, "Camera restarted");
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event subscriber lagging");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Register cameras
    for index in 0..config.cameras {
        let camera = CameraConfig::new(
            format!("camera-{index}"),
            format!("synthetic://camera-{index}"),
        );
        if let Err(e) = manager.add_camera(camera).await {
            error!("Failed to add camera-{index}: {e}");
            std::process::exit(1);
        }
    }
    info!(cameras = config.cameras, "All cameras registered");

    // Periodic metrics until shutdown (or until finite streams end)
    let finite = config.frames_per_camera.is_some();
    let mut ticker = tokio::time::interval(config.snapshot_interval);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
            _ = ticker.tick() => {
                let snapshot = manager.snapshot();
                info!(
                    cameras = snapshot.cameras.len(),
                    total_frames = snapshot.total_frames(),
                    "Metrics snapshot"
                );
                let statuses = manager.statuses().await;
                for status in &statuses {
                    let metrics = snapshot.camera(&status.camera).copied().unwrap_or_default();
                    info!(
                        camera = %status.camera,
                        state = %status.state,
                        restarts = status.restarts,
                        frames = metrics.frames_processed,
                        objects_detected = metrics.objects_detected,
                        objects_classified = metrics.objects_classified,
                        avg_latency_ms = metrics.avg_latency_ms,
                        "Camera status"
                    );
                }
                if finite && !statuses.is_empty() && statuses.iter().all(|s| s.state.is_terminal()) {
                    info!("All camera streams ended");
                    break;
                }
            }
        }
    }

    manager.shutdown().await;
    event_log.abort();

    match serde_json::to_string_pretty(&manager.snapshot()) {
        Ok(json) => info!("Final metrics: {json}"),
        Err(e) => error!("Failed to serialize final metrics: {e}"),
    }

    info!("panoptesd shutdown complete");
}
