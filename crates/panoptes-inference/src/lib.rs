//! Inference seams for the analytics stages.
//!
//! The pipeline never links against an ML runtime. It talks to two narrow
//! capability traits, and external backends satisfy them:
//!
//! - [`Detector`]: one decoded frame in, labeled boxes out.
//! - [`Classifier`]: one frame's detections in, class labels out.
//!
//! Backends receive a [`DeviceTarget`](panoptes_models::DeviceTarget) at
//! construction and treat it opaquely; the pipeline only logs it.
//!
//! [`SyntheticDetector`] and [`LabelMapClassifier`] are deterministic
//! in-process backends for tests and the demo daemon.

pub mod classifier;
pub mod detector;
pub mod error;
pub mod synthetic;

pub use classifier::Classifier;
pub use detector::Detector;
pub use error::{ProcessingError, ProcessingResult};
pub use synthetic::{LabelMapClassifier, SyntheticDetector};
