//! The source seam a pipeline pulls frames from.

use async_trait::async_trait;

use panoptes_models::{CameraConfig, CameraId, Frame};

use crate::error::ConnectionResult;

/// A pull-based supplier of frames for one camera.
///
/// Sources are lazy and possibly infinite. The pipeline's feeder task
/// calls [`next_frame`](Self::next_frame) in a loop and pushes each frame
/// into the first stage queue, so a full queue naturally pauses the pull
/// (backpressure reaches all the way into the source).
///
/// A source is not seekable: once `Ok(None)` (end of stream) or a fatal
/// error is returned, the only way to read the camera again is a fresh
/// source from a [`SourceFactory`].
#[async_trait]
pub trait FrameSource: Send {
    /// Produce the next frame, waiting as long as the underlying stream
    /// needs. `Ok(None)` means the stream ended cleanly.
    async fn next_frame(&mut self) -> ConnectionResult<Option<Frame>>;

    /// The camera this source feeds.
    fn camera(&self) -> &CameraId;

    /// Release any underlying session. The default does nothing, which
    /// suits purely in-process sources.
    async fn close(&mut self) {}
}

/// Builds a fresh [`FrameSource`] for a camera.
///
/// Every pipeline start goes through a factory rather than reusing a
/// source instance; restarting a failed camera needs a brand-new
/// connection, not a resumed one.
#[async_trait]
pub trait SourceFactory: Send + Sync {
    async fn create(&self, config: &CameraConfig) -> ConnectionResult<Box<dyn FrameSource>>;
}
