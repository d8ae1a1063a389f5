//! Error types for stage queue operations.

use thiserror::Error;

/// Why a push did not enqueue its item.
///
/// Both variants hand the rejected item back to the caller so it can be
/// retried, rerouted, or counted as dropped. Nothing is lost silently.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PushError<T> {
    /// The queue was closed; no further items will be accepted.
    #[error("queue is closed")]
    Closed(T),

    /// No slot became free before the deadline.
    #[error("push timed out waiting for queue space")]
    Timeout(T),
}

impl<T> PushError<T> {
    /// Recovers the item that failed to enqueue.
    pub fn into_inner(self) -> T {
        match self {
            PushError::Closed(item) | PushError::Timeout(item) => item,
        }
    }

    /// True when the queue rejected the item because it was closed.
    pub fn is_closed(&self) -> bool {
        matches!(self, PushError::Closed(_))
    }
}

/// Why a pop returned no item.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PopError {
    /// The queue is closed and fully drained. This is the terminal
    /// signal consumers use to shut down; it is only reported once the
    /// buffer is empty.
    #[error("queue is closed and drained")]
    Closed,

    /// No item arrived before the deadline. The queue is still open;
    /// popping again may succeed.
    #[error("pop timed out waiting for an item")]
    Timeout,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_error_returns_item() {
        let err: PushError<u32> = PushError::Closed(7);
        assert!(err.is_closed());
        assert_eq!(err.into_inner(), 7);

        let err: PushError<u32> = PushError::Timeout(9);
        assert!(!err.is_closed());
        assert_eq!(err.into_inner(), 9);
    }

    #[test]
    fn test_pop_error_distinguishes_closed_from_timeout() {
        assert_ne!(PopError::Closed, PopError::Timeout);
        assert_eq!(PopError::Closed.to_string(), "queue is closed and drained");
    }
}
