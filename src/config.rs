//! Pool configuration options

use crate::errors::{PoolError, PoolResult};
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Ceiling used when `max_conn` is zero.
pub const DEFAULT_MAX_CONN: usize = 4;

/// What happens to a connection's capacity slot when closing it fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CloseFailurePolicy {
    /// Keep counting the connection against `max_conn`. The slot is never
    /// given back.
    #[default]
    Retain,

    /// Give the slot back even though the close failed.
    Reclaim,
}

/// Configuration for connection pool behavior
///
/// # Examples
///
/// ```
/// use esox_connpool::{CloseFailurePolicy, PoolConfiguration};
/// use std::time::Duration;
///
/// let config = PoolConfiguration::new()
///     .with_min_conn(2)
///     .with_max_conn(8)
///     .with_acquire_timeout(Duration::from_secs(5))
///     .with_close_failure_policy(CloseFailurePolicy::Reclaim);
///
/// assert_eq!(config.min_conn, 2);
/// assert_eq!(config.max_conn, 8);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PoolConfiguration {
    /// Connections built eagerly when the pool is created (best effort)
    pub min_conn: usize,

    /// Hard ceiling on live connections, idle and checked out together
    pub max_conn: usize,

    /// Upper bound for async acquisition
    pub acquire_timeout: Duration,

    /// Accounting applied when a connection fails to close
    pub close_failure_policy: CloseFailurePolicy,
}

impl Default for PoolConfiguration {
    fn default() -> Self {
        Self {
            min_conn: 0,
            max_conn: DEFAULT_MAX_CONN,
            acquire_timeout: Duration::from_secs(30),
            close_failure_policy: CloseFailurePolicy::Retain,
        }
    }
}

impl PoolConfiguration {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of connections to warm up
    pub fn with_min_conn(mut self, min_conn: usize) -> Self {
        self.min_conn = min_conn;
        self
    }

    /// Set the maximum number of live connections
    ///
    /// Zero means [`DEFAULT_MAX_CONN`].
    pub fn with_max_conn(mut self, max_conn: usize) -> Self {
        self.max_conn = max_conn;
        self
    }

    /// Set the timeout used by `acquire_async`
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set the close-failure policy
    pub fn with_close_failure_policy(mut self, policy: CloseFailurePolicy) -> Self {
        self.close_failure_policy = policy;
        self
    }

    /// Check the bounds and fill in defaults.
    ///
    /// Fails when `max_conn < min_conn`. A zero `max_conn` that passes that
    /// check becomes [`DEFAULT_MAX_CONN`].
    ///
    /// # Examples
    ///
    /// ```
    /// use esox_connpool::{PoolConfiguration, DEFAULT_MAX_CONN};
    ///
    /// let config = PoolConfiguration::new().with_max_conn(0);
    /// let config = config.validate::<std::io::Error>().unwrap();
    /// assert_eq!(config.max_conn, DEFAULT_MAX_CONN);
    ///
    /// let bad = PoolConfiguration::new().with_min_conn(5).with_max_conn(2);
    /// assert!(bad.validate::<std::io::Error>().is_err());
    /// ```
    pub fn validate<E>(mut self) -> PoolResult<Self, E> {
        if self.max_conn < self.min_conn {
            return Err(PoolError::InvalidParameters {
                min_conn: self.min_conn,
                max_conn: self.max_conn,
            });
        }
        if self.max_conn == 0 {
            self.max_conn = DEFAULT_MAX_CONN;
        }
        Ok(self)
    }
}
