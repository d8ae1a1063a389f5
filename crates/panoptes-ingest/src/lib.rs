//! Frame acquisition for camera pipelines.
//!
//! Everything upstream of the first stage queue lives here:
//!
//! - [`FrameSource`] is the pull-based seam a pipeline feeds from;
//!   `Ok(None)` from [`FrameSource::next_frame`] is the end-of-stream
//!   signal that triggers a graceful drain.
//! - [`LiveSource`] wraps a network stream behind the [`StreamConnector`]
//!   transport seam and reconnects with exponential backoff on transient
//!   loss, keeping per-camera sequence numbers monotonic across sessions.
//! - [`SyntheticSource`] produces deterministic frames at a configurable
//!   rate for tests and the demo daemon.
//! - [`SourceFactory`] builds a fresh source per pipeline start, which is
//!   what lets a manager restart a failed camera.

pub mod error;
pub mod live;
pub mod source;
pub mod synthetic;

pub use error::{ConnectionError, ConnectionResult};
pub use live::{LiveSource, StreamConnection, StreamConnector};
pub use source::{FrameSource, SourceFactory};
pub use synthetic::{SyntheticConfig, SyntheticSource, SyntheticSourceFactory};
