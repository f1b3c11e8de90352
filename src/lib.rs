//! # EsoxSolutions.ConnectionPool
//!
//! Bounded, thread-safe pool for expensive reusable resources such as
//! network connections.
//!
//! ## Features
//!
//! - Lazy creation through a factory, capped at `max_conn` live connections
//! - Best-effort warm-up of `min_conn` connections
//! - Dead connections are reaped and replaced on acquire
//! - Blocking, deadline-bearing, non-blocking and async acquisition
//! - Automatic release via RAII (Drop trait)
//! - Idempotent shutdown that wakes blocked acquirers
//! - Health status, metrics and Prometheus export
//!
//! ## Quick Start
//!
//! ```rust
//! use esox_connpool::{Connection, Pool};
//!
//! struct Conn;
//!
//! impl Connection for Conn {
//!     type Error = std::io::Error;
//!     fn close(&mut self) -> Result<(), Self::Error> { Ok(()) }
//!     fn is_alive(&self) -> bool { true }
//! }
//!
//! let pool = Pool::new(1, 4, || Ok(Conn)).unwrap();
//! {
//!     let _conn = pool.get().unwrap();
//!     // Connection automatically returned when `_conn` goes out of scope
//! }
//! assert_eq!(pool.idle_count(), 1);
//! ```

mod config;
mod connection;
mod errors;
mod health;
mod metrics;
mod pool;

pub use config::{CloseFailurePolicy, PoolConfiguration, DEFAULT_MAX_CONN};
pub use connection::Connection;
pub use errors::{PoolError, PoolResult};
pub use health::HealthStatus;
#[cfg(feature = "metrics")]
pub use metrics::MetricsExporter;
pub use metrics::PoolMetrics;
pub use pool::{Pool, PooledConnection};
