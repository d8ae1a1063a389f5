//! Frames and their per-camera sequence identity.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::camera::CameraId;

/// Identity of one frame: which camera produced it and where it sits in
/// that camera's stream.
///
/// Sequence numbers are assigned by the frame source and are strictly
/// increasing per camera, including across reconnects. Downstream stages
/// reference frames by id rather than holding the payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameId {
    pub camera: CameraId,
    pub sequence: u64,
}

impl FrameId {
    pub fn new(camera: CameraId, sequence: u64) -> Self {
        Self { camera, sequence }
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.camera, self.sequence)
    }
}

/// One decoded frame moving through a pipeline.
///
/// The payload is an opaque byte buffer (decoded pixels, encoder output,
/// whatever the source produces); the pipeline never inspects it. A frame
/// is immutable once produced and is owned by exactly one queue or stage
/// at a time.
#[derive(Debug, Clone)]
pub struct Frame {
    pub id: FrameId,
    pub payload: Vec<u8>,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(id: FrameId, payload: Vec<u8>, captured_at: DateTime<Utc>) -> Self {
        Self {
            id,
            payload,
            captured_at,
        }
    }

    /// Payload size in bytes.
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_id_display() {
        let id = FrameId::new(CameraId::new("lobby"), 42);
        assert_eq!(id.to_string(), "lobby#42");
    }
}
