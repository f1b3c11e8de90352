//! Metrics collection and export for connection pools

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Snapshot of pool counters
///
/// # Examples
///
/// ```
/// use esox_connpool::{Connection, Pool};
///
/// # #[derive(Debug)] struct Conn;
/// # impl Connection for Conn {
/// #     type Error = std::io::Error;
/// #     fn close(&mut self) -> Result<(), Self::Error> { Ok(()) }
/// #     fn is_alive(&self) -> bool { true }
/// # }
/// let pool = Pool::new(1, 2, || Ok(Conn)).unwrap();
///
/// let conn = pool.acquire().unwrap();
/// let metrics = pool.get_metrics();
/// assert_eq!(metrics.total_created, 1);
/// assert_eq!(metrics.total_acquired, 1);
/// assert_eq!(metrics.checked_out, 1);
/// # pool.release(conn).unwrap();
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PoolMetrics {
    /// Connections successfully built by the factory
    pub total_created: usize,

    /// Factory invocations that failed
    pub factory_failures: usize,

    /// Connections handed out by acquire
    pub total_acquired: usize,

    /// Connections given back by release
    pub total_released: usize,

    /// Connections closed and removed from the live count
    pub total_reaped: usize,

    /// Close calls that returned an error
    pub close_failures: usize,

    /// Times an acquirer had to wait because the pool was at capacity
    pub wait_events: usize,

    /// Deadline-bearing acquires that gave up
    pub timeouts: usize,

    /// Connections alive right now
    pub live: usize,

    /// Connections sitting idle right now
    pub idle: usize,

    /// Connections checked out right now
    pub checked_out: usize,

    /// Live connections over capacity (0.0 to 1.0)
    pub utilization: f64,

    /// Configured ceiling
    pub max_conn: usize,
}

impl PoolMetrics {
    /// Export metrics as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("total_created".to_string(), self.total_created.to_string());
        metrics.insert("factory_failures".to_string(), self.factory_failures.to_string());
        metrics.insert("total_acquired".to_string(), self.total_acquired.to_string());
        metrics.insert("total_released".to_string(), self.total_released.to_string());
        metrics.insert("total_reaped".to_string(), self.total_reaped.to_string());
        metrics.insert("close_failures".to_string(), self.close_failures.to_string());
        metrics.insert("wait_events".to_string(), self.wait_events.to_string());
        metrics.insert("timeouts".to_string(), self.timeouts.to_string());
        metrics.insert("live".to_string(), self.live.to_string());
        metrics.insert("idle".to_string(), self.idle.to_string());
        metrics.insert("checked_out".to_string(), self.checked_out.to_string());
        metrics.insert("utilization".to_string(), format!("{:.2}", self.utilization));
        metrics.insert("max_conn".to_string(), self.max_conn.to_string());
        metrics
    }
}

/// Metrics exporter for Prometheus format
#[cfg(feature = "metrics")]
pub struct MetricsExporter;

#[cfg(feature = "metrics")]
impl MetricsExporter {
    /// Export metrics in Prometheus exposition format
    ///
    /// Every series carries a `pool` label plus any extra `tags`.
    ///
    /// # Examples
    ///
    /// ```
    /// use esox_connpool::{Connection, Pool};
    /// use std::collections::HashMap;
    ///
    /// # struct Conn;
    /// # impl Connection for Conn {
    /// #     type Error = std::io::Error;
    /// #     fn close(&mut self) -> Result<(), Self::Error> { Ok(()) }
    /// #     fn is_alive(&self) -> bool { true }
    /// # }
    /// let pool = Pool::new(2, 4, || Ok(Conn)).unwrap();
    ///
    /// let mut tags = HashMap::new();
    /// tags.insert("service".to_string(), "api".to_string());
    ///
    /// let output = pool.export_metrics_prometheus("db", Some(&tags)).unwrap();
    /// assert!(output.contains("connpool_connections_live"));
    /// assert!(output.contains("service=\"api\""));
    /// ```
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> prometheus::Result<String> {
        use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Opts, Registry, TextEncoder};

        let mut labels = HashMap::new();
        labels.insert("pool".to_string(), pool_name.to_string());
        if let Some(tags) = tags {
            for (key, value) in tags {
                labels.insert(key.clone(), value.clone());
            }
        }
        let opts = |name: &str, help: &str| Opts::new(name, help).const_labels(labels.clone());

        let registry = Registry::new();

        let gauges = [
            ("connpool_connections_live", "Connections currently alive", metrics.live),
            ("connpool_connections_idle", "Connections currently idle", metrics.idle),
            ("connpool_connections_checked_out", "Connections currently checked out", metrics.checked_out),
            ("connpool_connections_max", "Configured connection ceiling", metrics.max_conn),
        ];
        for (name, help, value) in gauges {
            let gauge = IntGauge::with_opts(opts(name, help))?;
            gauge.set(value as i64);
            registry.register(Box::new(gauge))?;
        }

        let utilization = Gauge::with_opts(opts("connpool_utilization", "Live connections over capacity"))?;
        utilization.set(metrics.utilization);
        registry.register(Box::new(utilization))?;

        let counters = [
            ("connpool_created_total", "Connections built by the factory", metrics.total_created),
            ("connpool_factory_failures_total", "Failed factory invocations", metrics.factory_failures),
            ("connpool_acquired_total", "Connections handed out", metrics.total_acquired),
            ("connpool_released_total", "Connections returned", metrics.total_released),
            ("connpool_reaped_total", "Connections closed and removed", metrics.total_reaped),
            ("connpool_close_failures_total", "Close calls that failed", metrics.close_failures),
            ("connpool_wait_events_total", "Acquires that waited at capacity", metrics.wait_events),
            ("connpool_timeouts_total", "Acquires that timed out", metrics.timeouts),
        ];
        for (name, help, value) in counters {
            let counter = IntCounter::with_opts(opts(name, help))?;
            counter.inc_by(value as u64);
            registry.register(Box::new(counter))?;
        }

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Internal metrics tracker
#[derive(Debug, Default)]
pub(crate) struct MetricsTracker {
    pub total_created: AtomicUsize,
    pub factory_failures: AtomicUsize,
    pub total_acquired: AtomicUsize,
    pub total_released: AtomicUsize,
    pub total_reaped: AtomicUsize,
    pub close_failures: AtomicUsize,
    pub wait_events: AtomicUsize,
    pub timeouts: AtomicUsize,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_metrics(&self, live: usize, idle: usize, max_conn: usize) -> PoolMetrics {
        let utilization = if max_conn > 0 {
            live as f64 / max_conn as f64
        } else {
            0.0
        };

        PoolMetrics {
            total_created: self.total_created.load(Ordering::Relaxed),
            factory_failures: self.factory_failures.load(Ordering::Relaxed),
            total_acquired: self.total_acquired.load(Ordering::Relaxed),
            total_released: self.total_released.load(Ordering::Relaxed),
            total_reaped: self.total_reaped.load(Ordering::Relaxed),
            close_failures: self.close_failures.load(Ordering::Relaxed),
            wait_events: self.wait_events.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            live,
            idle,
            checked_out: live.saturating_sub(idle),
            utilization,
            max_conn,
        }
    }
}
