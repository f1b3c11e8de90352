//! Health reporting for connection pools

/// Health status of a connection pool
///
/// # Examples
///
/// ```
/// use esox_connpool::{Connection, Pool};
///
/// # struct Conn;
/// # impl Connection for Conn {
/// #     type Error = std::io::Error;
/// #     fn close(&mut self) -> Result<(), Self::Error> { Ok(()) }
/// #     fn is_alive(&self) -> bool { true }
/// # }
/// let pool = Pool::new(3, 5, || Ok(Conn)).unwrap();
///
/// let health = pool.health_status();
/// assert!(health.is_healthy());
/// assert_eq!(health.idle, 3);
/// assert_eq!(health.checked_out, 0);
/// ```
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Whether the pool is healthy
    pub is_healthy: bool,

    /// Number of warnings detected
    pub warning_count: usize,

    /// Live connections over capacity (0.0 to 1.0)
    pub utilization: f64,

    /// Connections alive (idle + checked out)
    pub live: usize,

    /// Connections waiting in the idle buffer
    pub idle: usize,

    /// Connections held by callers
    pub checked_out: usize,

    /// Configured ceiling
    pub max_conn: usize,

    /// Whether shutdown has completed
    pub closed: bool,

    /// Warning messages
    pub warnings: Vec<String>,
}

impl HealthStatus {
    pub(crate) fn new(live: usize, idle: usize, max_conn: usize, closed: bool) -> Self {
        let utilization = if max_conn > 0 {
            live as f64 / max_conn as f64
        } else {
            0.0
        };
        let checked_out = live.saturating_sub(idle);

        let mut warnings = Vec::new();
        let mut is_healthy = true;

        if closed {
            warnings.push("Pool is shut down".to_string());
            is_healthy = false;
        }

        // Every slot is in use and nothing is idle: the next acquire waits.
        if max_conn > 0 && checked_out >= max_conn {
            warnings.push(format!("Pool exhausted: {checked_out}/{max_conn} checked out"));
            is_healthy = false;
        } else if utilization > 0.9 {
            warnings.push(format!("High utilization: {:.1}%", utilization * 100.0));
        }

        Self {
            is_healthy,
            warning_count: warnings.len(),
            utilization,
            live,
            idle,
            checked_out,
            max_conn,
            closed,
            warnings,
        }
    }

    /// Check if the pool is healthy
    pub fn is_healthy(&self) -> bool {
        self.is_healthy
    }
}
