//! Deterministic in-process sources for tests and the demo daemon.

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::{self, Duration};

use panoptes_models::{CameraConfig, CameraId, Frame, FrameId};

use crate::error::ConnectionResult;
use crate::source::{FrameSource, SourceFactory};

/// Shape of a synthetic stream.
#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    /// How many frames to emit before ending the stream; `None` streams
    /// forever.
    pub frames: Option<u64>,
    /// Payload size in bytes.
    pub payload_len: usize,
    /// Pause before each frame. Zero emits as fast as the consumer pulls.
    pub interval: Duration,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            frames: None,
            payload_len: 1024,
            interval: Duration::from_millis(33),
        }
    }
}

impl SyntheticConfig {
    pub fn with_frames(mut self, frames: u64) -> Self {
        self.frames = Some(frames);
        self
    }

    pub fn with_payload_len(mut self, payload_len: usize) -> Self {
        self.payload_len = payload_len;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// A [`FrameSource`] that fabricates frames instead of reading a network.
///
/// Payload bytes are a fixed function of the sequence number, so a test
/// (or a synthetic detector) can derive stable facts from frame content.
pub struct SyntheticSource {
    camera: CameraId,
    config: SyntheticConfig,
    sequence: u64,
}

impl SyntheticSource {
    pub fn new(camera: CameraId, config: SyntheticConfig) -> Self {
        Self {
            camera,
            config,
            sequence: 0,
        }
    }

    fn payload(&self) -> Vec<u8> {
        let seed = (self.sequence as u8).wrapping_mul(31);
        (0..self.config.payload_len)
            .map(|i| seed.wrapping_add(i as u8))
            .collect()
    }
}

#[async_trait]
impl FrameSource for SyntheticSource {
    async fn next_frame(&mut self) -> ConnectionResult<Option<Frame>> {
        if let Some(limit) = self.config.frames {
            if self.sequence >= limit {
                return Ok(None);
            }
        }
        if !self.config.interval.is_zero() {
            time::sleep(self.config.interval).await;
        }
        self.sequence += 1;
        let frame = Frame::new(
            FrameId::new(self.camera.clone(), self.sequence),
            self.payload(),
            Utc::now(),
        );
        Ok(Some(frame))
    }

    fn camera(&self) -> &CameraId {
        &self.camera
    }
}

/// Builds [`SyntheticSource`]s from one shared stream shape.
///
/// The camera id comes from each [`CameraConfig`]; the uri is ignored.
pub struct SyntheticSourceFactory {
    config: SyntheticConfig,
}

impl SyntheticSourceFactory {
    pub fn new(config: SyntheticConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SourceFactory for SyntheticSourceFactory {
    async fn create(&self, config: &CameraConfig) -> ConnectionResult<Box<dyn FrameSource>> {
        Ok(Box::new(SyntheticSource::new(
            config.id.clone(),
            self.config.clone(),
        )))
    }
}
