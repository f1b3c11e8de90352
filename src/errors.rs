//! Error types for the connection pool

use std::time::Duration;
use thiserror::Error;

/// Errors raised by [`Pool`](crate::Pool) operations.
///
/// `E` is the connection's own error type; factory and close failures are
/// carried through unchanged.
#[derive(Error, Debug)]
pub enum PoolError<E> {
    #[error("parameter error: max_conn ({max_conn}) is less than min_conn ({min_conn})")]
    InvalidParameters { min_conn: usize, max_conn: usize },

    #[error("pool closed")]
    Closed,

    #[error("idle buffer no longer accepts connections")]
    Drained,

    #[error("connection factory failed: {0}")]
    Factory(#[source] E),

    #[error("failed to close connection: {0}")]
    Close(#[source] E),

    #[error("acquire timed out after {0:?}")]
    Timeout(Duration),

    #[error("metrics export failed: {0}")]
    Metrics(String),
}

impl<E> PoolError<E> {
    /// Whether this error means the pool has been shut down for good.
    pub fn is_closed(&self) -> bool {
        matches!(self, PoolError::Closed | PoolError::Drained)
    }
}

pub type PoolResult<T, E> = Result<T, PoolError<E>>;
