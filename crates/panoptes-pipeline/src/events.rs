//! Lifecycle events broadcast to embedders.

use serde::Serialize;
use tokio::sync::broadcast;

use panoptes_models::{CameraId, PipelineState};

use crate::error::FailureReason;

/// Something observable happened to a managed pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    StateChanged {
        camera: CameraId,
        state: PipelineState,
    },
    PipelineFailed {
        camera: CameraId,
        reason: FailureReason,
    },
    CameraRestarted {
        camera: CameraId,
        attempt: u32,
    },
}

/// Fan-out channel for [`PipelineEvent`]s.
///
/// Built on a broadcast channel: a subscriber that falls more than the
/// channel capacity behind loses the oldest events, which is acceptable
/// for observability. Emitting never blocks and never fails, even with
/// zero subscribers.
#[derive(Debug, Clone)]
pub struct EventChannel {
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventChannel {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    pub fn state_changed(&self, camera: &CameraId, state: PipelineState) {
        let _ = self.sender.send(PipelineEvent::StateChanged {
            camera: camera.clone(),
            state,
        });
    }

    pub fn pipeline_failed(&self, reason: &FailureReason) {
        let _ = self.sender.send(PipelineEvent::PipelineFailed {
            camera: reason.camera.clone(),
            reason: reason.clone(),
        });
    }

    pub fn camera_restarted(&self, camera: &CameraId, attempt: u32) {
        let _ = self.sender.send(PipelineEvent::CameraRestarted {
            camera: camera.clone(),
            attempt,
        });
    }
}

impl Default for EventChannel {
    fn default() -> Self {
        Self::new(64)
    }
}
