//! Bounded queues connecting pipeline stages.
//!
//! Every hop between two stages goes through a [`StageQueue`]:
//!
//! - **Bounded**: a full queue makes producers wait, so a slow stage
//!   backpressures everything upstream instead of growing memory.
//! - **Multi-producer, multi-consumer**: cloned handles can be pushed to
//!   and popped from by any number of worker tasks.
//! - **Drain on close**: closing stops new items immediately, but
//!   consumers keep popping until the buffer is empty and only then see
//!   [`PopError::Closed`]. Nothing in flight is dropped.
//!
//! Timeouts are opt-in via [`StageQueue::push_timeout`] and
//! [`StageQueue::pop_timeout`]; the plain `push`/`pop` calls wait for as
//! long as it takes.

pub mod error;
pub mod queue;

pub use error::{PopError, PushError};
pub use queue::StageQueue;
