//! Core connection pool implementation

use crate::config::{CloseFailurePolicy, PoolConfiguration};
use crate::connection::Connection;
use crate::errors::{PoolError, PoolResult};
use crate::health::HealthStatus;
use crate::metrics::{MetricsTracker, PoolMetrics};

#[cfg(feature = "metrics")]
use crate::metrics::MetricsExporter;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

type Factory<R> = dyn Fn() -> Result<R, <R as Connection>::Error> + Send + Sync;

/// A connection checked out through [`Pool::get`].
///
/// Goes back to the idle buffer when dropped. If the pool no longer accepts
/// it, the connection is closed instead.
pub struct PooledConnection<R: Connection> {
    conn: Option<R>,
    pool: Pool<R>,
}

impl<R: Connection> PooledConnection<R> {
    /// Take the connection out of the guard without returning it.
    ///
    /// It keeps counting against the pool until handed to [`Pool::release`]
    /// or [`Pool::close`].
    pub fn detach(mut self) -> R {
        self.conn.take().expect("Connection already taken")
    }

    /// Close the connection and remove it from the pool's accounting.
    pub fn discard(mut self) -> PoolResult<(), R::Error> {
        match self.conn.take() {
            Some(conn) => self.pool.close(conn),
            None => Ok(()),
        }
    }
}

impl<R: Connection> Deref for PooledConnection<R> {
    type Target = R;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("Connection already taken")
    }
}

impl<R: Connection> DerefMut for PooledConnection<R> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("Connection already taken")
    }
}

impl<R: Connection> Drop for PooledConnection<R> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take()
            && let Err((conn, _)) = self.pool.try_release(conn)
            && let Err(err) = self.pool.close(conn)
        {
            warn!(error = %err, "failed to close connection refused by pool");
        }
    }
}

/// How long an acquirer may wait once the pool is at capacity.
#[derive(Debug, Clone, Copy)]
enum Wait {
    Never,
    Forever,
    Until(Instant, Duration),
}

/// Counters guarded by the pool mutex.
#[derive(Debug, Default)]
struct PoolState {
    live_count: usize,
}

struct PoolInner<R: Connection> {
    /// `None` once shutdown has stopped the buffer accepting entries.
    idle_tx: RwLock<Option<Sender<R>>>,
    idle_rx: Receiver<R>,
    state: Mutex<PoolState>,
    /// Written only while `state` is held; read without it.
    closed: AtomicBool,
    config: PoolConfiguration,
    factory: Arc<Factory<R>>,
    metrics: MetricsTracker,
}

impl<R: Connection> Drop for PoolInner<R> {
    fn drop(&mut self) {
        while let Ok(mut conn) = self.idle_rx.try_recv() {
            if let Err(err) = conn.close() {
                warn!(error = %err, "failed to close idle connection on drop");
            }
        }
    }
}

/// Bounded, thread-safe connection pool.
///
/// Connections are created lazily by a factory up to `max_conn`, handed out
/// by [`acquire`](Pool::acquire) and given back with
/// [`release`](Pool::release). Dead connections are detected with
/// [`Connection::is_alive`] when they leave the idle buffer and replaced
/// transparently.
///
/// Cloning a `Pool` is cheap; clones share the same connections.
///
/// The closed flag is read without the pool lock, so an `acquire` or
/// `release` that races with [`shutdown`](Pool::shutdown) may slip past the
/// check just before shutdown completes. A release that slips through finds
/// the buffer drained and fails with [`PoolError::Drained`].
pub struct Pool<R: Connection> {
    inner: Arc<PoolInner<R>>,
}

impl<R: Connection> Clone for Pool<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: Connection> fmt::Debug for Pool<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.inner.config)
            .field("live_count", &self.live_count())
            .field("idle_count", &self.idle_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<R: Connection> Pool<R> {
    /// Create a pool holding at most `max_conn` connections and warm up
    /// `min_conn` of them.
    ///
    /// Fails when `max_conn < min_conn`. A `max_conn` of zero means
    /// [`DEFAULT_MAX_CONN`](crate::DEFAULT_MAX_CONN). Factory failures during
    /// warm-up are skipped, so fewer than `min_conn` connections may exist
    /// afterwards.
    ///
    /// # Examples
    ///
    /// ```
    /// use esox_connpool::{Connection, Pool};
    ///
    /// struct Conn;
    ///
    /// impl Connection for Conn {
    ///     type Error = std::io::Error;
    ///     fn close(&mut self) -> Result<(), Self::Error> { Ok(()) }
    ///     fn is_alive(&self) -> bool { true }
    /// }
    ///
    /// let pool = Pool::new(2, 3, || Ok(Conn)).unwrap();
    /// assert_eq!(pool.live_count(), 2);
    ///
    /// let conn = pool.acquire().unwrap();
    /// pool.release(conn).unwrap();
    /// pool.shutdown().unwrap();
    /// assert!(pool.acquire().is_err());
    /// ```
    pub fn new<F>(min_conn: usize, max_conn: usize, factory: F) -> PoolResult<Self, R::Error>
    where
        F: Fn() -> Result<R, R::Error> + Send + Sync + 'static,
    {
        let config = PoolConfiguration::new()
            .with_min_conn(min_conn)
            .with_max_conn(max_conn);
        Self::with_config(config, factory)
    }

    /// Create a pool from a full configuration.
    pub fn with_config<F>(config: PoolConfiguration, factory: F) -> PoolResult<Self, R::Error>
    where
        F: Fn() -> Result<R, R::Error> + Send + Sync + 'static,
    {
        let config = config.validate()?;
        let (idle_tx, idle_rx) = channel::bounded(config.max_conn);
        let metrics = MetricsTracker::new();

        let mut live_count = 0;
        for _ in 0..config.min_conn {
            match factory() {
                // Capacity is max_conn >= min_conn and idle_rx is alive, so
                // this neither blocks nor fails.
                Ok(conn) => {
                    if idle_tx.send(conn).is_ok() {
                        live_count += 1;
                        MetricsTracker::record(&metrics.total_created);
                    }
                }
                Err(err) => {
                    MetricsTracker::record(&metrics.factory_failures);
                    warn!(error = %err, "skipping connection that failed during warm-up");
                }
            }
        }
        debug!(
            warmed = live_count,
            min_conn = config.min_conn,
            max_conn = config.max_conn,
            "connection pool created"
        );

        Ok(Self {
            inner: Arc::new(PoolInner {
                idle_tx: RwLock::new(Some(idle_tx)),
                idle_rx,
                state: Mutex::new(PoolState { live_count }),
                closed: AtomicBool::new(false),
                config,
                factory: Arc::new(factory),
                metrics,
            }),
        })
    }

    /// Get a connection, waiting as long as it takes when the pool is at
    /// capacity.
    ///
    /// Idle connections are reused first; one that reports itself dead is
    /// closed and the next is tried. With no idle connection and spare
    /// capacity, the factory builds a new one and its error is returned
    /// unchanged on failure.
    pub fn acquire(&self) -> PoolResult<R, R::Error> {
        // Forever never yields None: it either gets a connection or errors.
        self.checkout(Wait::Forever)?.ok_or(PoolError::Closed)
    }

    /// Like [`acquire`](Pool::acquire), but give up with
    /// [`PoolError::Timeout`] after `timeout` at capacity.
    pub fn acquire_timeout(&self, timeout: Duration) -> PoolResult<R, R::Error> {
        let deadline = Instant::now() + timeout;
        self.checkout(Wait::Until(deadline, timeout))?
            .ok_or(PoolError::Timeout(timeout))
    }

    /// Get a connection without blocking.
    ///
    /// Returns `Ok(None)` when the pool is at capacity and nothing is idle.
    pub fn try_acquire(&self) -> PoolResult<Option<R>, R::Error> {
        self.checkout(Wait::Never)
    }

    /// Get a connection asynchronously, bounded by the configured
    /// `acquire_timeout`.
    ///
    /// The factory is synchronous and, when a new connection is needed, runs
    /// on the calling task's worker thread. Factories that block (a TCP
    /// connect, a handshake) should be warmed up with `min_conn` or the call
    /// wrapped in `tokio::task::spawn_blocking` with a cloned pool.
    pub async fn acquire_async(&self) -> PoolResult<R, R::Error> {
        let timeout = self.inner.config.acquire_timeout;

        tokio::time::timeout(timeout, async {
            loop {
                match self.try_acquire() {
                    Ok(Some(conn)) => return Ok(conn),
                    Ok(None) => tokio::time::sleep(Duration::from_millis(10)).await,
                    Err(err) => return Err(err),
                }
            }
        })
        .await
        .map_err(|_| {
            MetricsTracker::record(&self.inner.metrics.timeouts);
            PoolError::Timeout(timeout)
        })?
    }

    /// Get a connection wrapped in a guard that releases it on drop.
    pub fn get(&self) -> PoolResult<PooledConnection<R>, R::Error> {
        let conn = self.acquire()?;
        Ok(self.wrap(conn))
    }

    /// Async counterpart of [`get`](Pool::get).
    pub async fn get_async(&self) -> PoolResult<PooledConnection<R>, R::Error> {
        let conn = self.acquire_async().await?;
        Ok(self.wrap(conn))
    }

    /// Put a connection back into the idle buffer.
    ///
    /// No liveness check happens here. Blocks if the buffer is full, which
    /// only happens when releasing a connection that did not come from this
    /// pool. A release in flight holds off [`shutdown`](Pool::shutdown) until
    /// the connection is in the buffer, so shutdown drains it.
    pub fn release(&self, conn: R) -> PoolResult<(), R::Error> {
        self.try_release(conn).map_err(|(_, err)| err)
    }

    /// Close a connection and give its slot back.
    ///
    /// If the connection's own close fails, the error is returned and the
    /// slot is handled according to [`CloseFailurePolicy`].
    pub fn close(&self, mut conn: R) -> PoolResult<(), R::Error> {
        match conn.close() {
            Ok(()) => {
                self.reclaim_slot();
                Ok(())
            }
            Err(err) => {
                MetricsTracker::record(&self.inner.metrics.close_failures);
                if self.inner.config.close_failure_policy == CloseFailurePolicy::Reclaim {
                    self.reclaim_slot();
                }
                Err(PoolError::Close(err))
            }
        }
    }

    /// Close every idle connection and refuse further use.
    ///
    /// Calling it again is a no-op. Connections checked out at the time are
    /// not touched; their holders should [`close`](Pool::close) them.
    /// Acquirers blocked at capacity wake up with [`PoolError::Closed`].
    pub fn shutdown(&self) -> PoolResult<(), R::Error> {
        if self.is_closed() {
            return Ok(());
        }

        let mut state = self.inner.state.lock();
        if self.inner.closed.load(Ordering::Acquire) {
            return Ok(());
        }

        drop(self.inner.idle_tx.write().take());

        let mut drained = 0;
        while let Ok(mut conn) = self.inner.idle_rx.try_recv() {
            if let Err(err) = conn.close() {
                MetricsTracker::record(&self.inner.metrics.close_failures);
                warn!(error = %err, "failed to close idle connection during shutdown");
            }
            state.live_count = state.live_count.saturating_sub(1);
            MetricsTracker::record(&self.inner.metrics.total_reaped);
            drained += 1;
        }

        self.inner.closed.store(true, Ordering::Release);
        debug!(drained, remaining = state.live_count, "connection pool shut down");
        Ok(())
    }

    /// Connections alive right now, idle or checked out.
    pub fn live_count(&self) -> usize {
        self.inner.state.lock().live_count
    }

    /// Connections waiting in the idle buffer.
    pub fn idle_count(&self) -> usize {
        self.inner.idle_rx.len()
    }

    /// Effective ceiling after defaults were applied.
    pub fn max_conn(&self) -> usize {
        self.inner.config.max_conn
    }

    /// Configured warm-up size.
    pub fn min_conn(&self) -> usize {
        self.inner.config.min_conn
    }

    /// Whether shutdown has completed.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// The configuration in effect.
    pub fn config(&self) -> &PoolConfiguration {
        &self.inner.config
    }

    /// Get health status
    pub fn health_status(&self) -> HealthStatus {
        HealthStatus::new(
            self.live_count(),
            self.idle_count(),
            self.max_conn(),
            self.is_closed(),
        )
    }

    /// Get pool metrics
    pub fn get_metrics(&self) -> PoolMetrics {
        self.inner
            .metrics
            .get_metrics(self.live_count(), self.idle_count(), self.max_conn())
    }

    /// Export metrics
    pub fn export_metrics(&self) -> HashMap<String, String> {
        self.get_metrics().export()
    }

    /// Export metrics in Prometheus format
    #[cfg(feature = "metrics")]
    pub fn export_metrics_prometheus(
        &self,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> PoolResult<String, R::Error> {
        MetricsExporter::export_prometheus(&self.get_metrics(), pool_name, tags)
            .map_err(|err| PoolError::Metrics(err.to_string()))
    }

    fn checkout(&self, wait: Wait) -> PoolResult<Option<R>, R::Error> {
        if self.is_closed() {
            return Err(PoolError::Closed);
        }

        loop {
            let conn = match self.inner.idle_rx.try_recv() {
                Ok(conn) => conn,
                Err(TryRecvError::Disconnected) => return Err(PoolError::Closed),
                Err(TryRecvError::Empty) => {
                    let mut state = self.inner.state.lock();
                    if state.live_count < self.inner.config.max_conn {
                        // The factory runs under the lock so concurrent
                        // acquirers cannot overshoot max_conn.
                        let conn = self.create(&mut state)?;
                        MetricsTracker::record(&self.inner.metrics.total_acquired);
                        return Ok(Some(conn));
                    }
                    drop(state);

                    match wait {
                        Wait::Never => return Ok(None),
                        Wait::Forever => {
                            MetricsTracker::record(&self.inner.metrics.wait_events);
                            self.inner
                                .idle_rx
                                .recv()
                                .map_err(|_| PoolError::Closed)?
                        }
                        Wait::Until(deadline, timeout) => {
                            MetricsTracker::record(&self.inner.metrics.wait_events);
                            match self.inner.idle_rx.recv_deadline(deadline) {
                                Ok(conn) => conn,
                                Err(RecvTimeoutError::Timeout) => {
                                    MetricsTracker::record(&self.inner.metrics.timeouts);
                                    return Err(PoolError::Timeout(timeout));
                                }
                                Err(RecvTimeoutError::Disconnected) => {
                                    return Err(PoolError::Closed);
                                }
                            }
                        }
                    }
                }
            };

            if conn.is_alive() {
                MetricsTracker::record(&self.inner.metrics.total_acquired);
                return Ok(Some(conn));
            }
            self.reap(conn);
        }
    }

    fn create(&self, state: &mut PoolState) -> PoolResult<R, R::Error> {
        match (self.inner.factory)() {
            Ok(conn) => {
                state.live_count += 1;
                MetricsTracker::record(&self.inner.metrics.total_created);
                debug!(live = state.live_count, "created connection");
                Ok(conn)
            }
            Err(err) => {
                MetricsTracker::record(&self.inner.metrics.factory_failures);
                Err(PoolError::Factory(err))
            }
        }
    }

    fn reap(&self, conn: R) {
        debug!("reaping dead connection");
        if let Err(err) = self.close(conn) {
            warn!(error = %err, "failed to close dead connection");
        }
    }

    fn reclaim_slot(&self) {
        let mut state = self.inner.state.lock();
        state.live_count = state.live_count.saturating_sub(1);
        MetricsTracker::record(&self.inner.metrics.total_reaped);
    }

    /// Release that hands the connection back when the pool refuses it.
    fn try_release(&self, conn: R) -> Result<(), (R, PoolError<R::Error>)> {
        if self.is_closed() {
            return Err((conn, PoolError::Closed));
        }

        // Hold the read guard across the send: shutdown takes the write
        // guard before draining, so nothing lands in the buffer after it.
        let idle_tx = self.inner.idle_tx.read();
        let Some(sender) = idle_tx.as_ref() else {
            return Err((conn, PoolError::Drained));
        };
        sender
            .send(conn)
            .map_err(|err| (err.into_inner(), PoolError::Drained))?;
        drop(idle_tx);

        MetricsTracker::record(&self.inner.metrics.total_released);
        Ok(())
    }

    fn wrap(&self, conn: R) -> PooledConnection<R> {
        PooledConnection {
            conn: Some(conn),
            pool: self.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::thread;

    #[derive(Default)]
    struct Counters {
        created: AtomicUsize,
        closed: AtomicUsize,
    }

    struct MockConn {
        id: usize,
        alive: Arc<AtomicBool>,
        fail_close: bool,
        counters: Arc<Counters>,
    }

    impl Connection for MockConn {
        type Error = io::Error;

        fn close(&mut self) -> Result<(), Self::Error> {
            if self.fail_close {
                return Err(io::Error::other("close failed"));
            }
            self.counters.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn is_alive(&self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }
    }

    fn factory(counters: &Arc<Counters>) -> impl Fn() -> io::Result<MockConn> + Send + Sync + 'static {
        let counters = Arc::clone(counters);
        move || {
            let id = counters.created.fetch_add(1, Ordering::SeqCst);
            Ok(MockConn {
                id,
                alive: Arc::new(AtomicBool::new(true)),
                fail_close: false,
                counters: Arc::clone(&counters),
            })
        }
    }

    #[test]
    fn test_warmup_creates_min_conn() {
        let counters = Arc::new(Counters::default());
        let pool = Pool::new(2, 3, factory(&counters)).unwrap();

        assert_eq!(pool.live_count(), 2);
        assert_eq!(pool.idle_count(), 2);

        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_eq!(counters.created.load(Ordering::SeqCst), 2);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_warmup_failures_are_skipped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counters = Arc::new(Counters::default());
        let make = factory(&counters);
        let calls_in = Arc::clone(&calls);
        let pool = Pool::new(4, 4, move || {
            if calls_in.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
                Err(io::Error::other("refused"))
            } else {
                make()
            }
        })
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(pool.live_count(), 2);
        assert_eq!(pool.get_metrics().factory_failures, 2);
    }

    #[test]
    fn test_max_below_min_fails() {
        let counters = Arc::new(Counters::default());
        let result = Pool::new(3, 2, factory(&counters));
        assert!(matches!(result, Err(PoolError::InvalidParameters { .. })));
        assert_eq!(counters.created.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_zero_max_defaults_to_four() {
        let counters = Arc::new(Counters::default());
        let pool = Pool::new(0, 0, factory(&counters)).unwrap();
        assert_eq!(pool.max_conn(), 4);

        let held: Vec<_> = (0..4).map(|_| pool.acquire().unwrap()).collect();
        assert_eq!(pool.live_count(), 4);
        assert!(pool.try_acquire().unwrap().is_none());
        drop(held);
    }

    #[test]
    fn test_release_makes_connection_reusable() {
        let counters = Arc::new(Counters::default());
        let pool = Pool::new(0, 2, factory(&counters)).unwrap();

        let conn = pool.acquire().unwrap();
        let id = conn.id;
        pool.release(conn).unwrap();

        let again = pool.acquire().unwrap();
        assert_eq!(again.id, id);
        assert_eq!(counters.created.load(Ordering::SeqCst), 1);
        assert_eq!(pool.live_count(), 1);
    }

    #[test]
    fn test_dead_connection_is_reaped_and_replaced() {
        let counters = Arc::new(Counters::default());
        let pool = Pool::new(0, 2, factory(&counters)).unwrap();

        let conn = pool.acquire().unwrap();
        let dead_id = conn.id;
        conn.alive.store(false, Ordering::SeqCst);
        pool.release(conn).unwrap();

        let fresh = pool.acquire().unwrap();
        assert_ne!(fresh.id, dead_id);
        assert!(fresh.is_alive());
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.live_count(), 1);
        assert_eq!(pool.get_metrics().total_reaped, 1);
    }

    #[test]
    fn test_blocking_acquire_reaps_dead_release() {
        let counters = Arc::new(Counters::default());
        let pool = Pool::new(0, 1, factory(&counters)).unwrap();
        let conn = pool.acquire().unwrap();

        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || pool.acquire().map(|c| c.id))
        };
        thread::sleep(Duration::from_millis(50));

        conn.alive.store(false, Ordering::SeqCst);
        pool.release(conn).unwrap();

        let got = waiter.join().unwrap();
        assert!(matches!(got, Ok(1)));
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.live_count(), 1);
        assert_eq!(pool.get_metrics().total_reaped, 1);
    }

    #[test]
    fn test_factory_error_is_surfaced() {
        let counters = Arc::new(Counters::default());
        let make = factory(&counters);
        let calls = AtomicUsize::new(0);
        let pool = Pool::new(0, 5, move || {
            if calls.fetch_add(1, Ordering::SeqCst) == 2 {
                Err(io::Error::new(io::ErrorKind::ConnectionRefused, "third"))
            } else {
                make()
            }
        })
        .unwrap();

        let _a = pool.acquire().unwrap();
        let _b = pool.acquire().unwrap();
        match pool.acquire() {
            Err(PoolError::Factory(err)) => {
                assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
                assert_eq!(err.to_string(), "third");
            }
            other => panic!("expected factory error, got {:?}", other.map(|c| c.id)),
        }
        assert_eq!(pool.live_count(), 2);
    }

    #[test]
    fn test_fourth_acquirer_blocks_until_release() {
        let counters = Arc::new(Counters::default());
        let pool = Pool::new(2, 3, factory(&counters)).unwrap();
        assert_eq!(pool.live_count(), 2);

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let pool = pool.clone();
                thread::spawn(move || pool.acquire().unwrap())
            })
            .collect();
        let held: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(pool.live_count(), 3);
        assert_eq!(counters.created.load(Ordering::SeqCst), 3);

        let (tx, rx) = mpsc::channel();
        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || {
                let conn = pool.acquire().unwrap();
                tx.send(conn.id).unwrap();
                conn
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        let mut held = held.into_iter();
        let first = held.next().unwrap();
        let released_id = first.id;
        pool.release(first).unwrap();

        let got = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(got, released_id);
        waiter.join().unwrap();
        assert_eq!(pool.live_count(), 3);
        assert_eq!(counters.created.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_live_count_never_exceeds_max_under_contention() {
        let counters = Arc::new(Counters::default());
        let pool = Pool::new(1, 4, factory(&counters)).unwrap();
        let outstanding = Arc::new(AtomicUsize::new(0));
        let high_water = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let pool = pool.clone();
                let outstanding = Arc::clone(&outstanding);
                let high_water = Arc::clone(&high_water);
                thread::spawn(move || {
                    for _ in 0..50 {
                        let conn = pool.acquire().unwrap();
                        let now = outstanding.fetch_add(1, Ordering::SeqCst) + 1;
                        high_water.fetch_max(now, Ordering::SeqCst);
                        assert!(pool.live_count() <= 4);
                        outstanding.fetch_sub(1, Ordering::SeqCst);
                        pool.release(conn).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(high_water.load(Ordering::SeqCst) <= 4);
        assert!(counters.created.load(Ordering::SeqCst) <= 4);
        assert_eq!(pool.live_count(), pool.idle_count());
    }

    #[test]
    fn test_shutdown_closes_idle_once_and_rejects_use() {
        let counters = Arc::new(Counters::default());
        let pool = Pool::new(3, 4, factory(&counters)).unwrap();
        let held = pool.acquire().unwrap();

        pool.shutdown().unwrap();
        assert!(pool.is_closed());
        assert_eq!(counters.closed.load(Ordering::SeqCst), 2);
        assert_eq!(pool.live_count(), 1);

        assert!(matches!(pool.acquire(), Err(PoolError::Closed)));
        assert!(pool.try_acquire().err().is_some_and(|e| e.is_closed()));
        assert!(matches!(pool.release(held), Err(PoolError::Closed)));

        pool.shutdown().unwrap();
        assert_eq!(counters.closed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_release_racing_shutdown_finds_buffer_drained() {
        let counters = Arc::new(Counters::default());
        let pool = Pool::new(0, 2, factory(&counters)).unwrap();
        let held = pool.acquire().unwrap();

        // Shutdown has stopped the buffer but not yet flipped the flag.
        drop(pool.inner.idle_tx.write().take());
        assert!(!pool.is_closed());

        let result = pool.release(held);
        assert!(matches!(result, Err(PoolError::Drained)));
        assert!(result.unwrap_err().is_closed());
    }

    #[test]
    fn test_in_flight_release_is_drained_by_shutdown() {
        let counters = Arc::new(Counters::default());
        let pool = Pool::new(0, 2, factory(&counters)).unwrap();
        let held = pool.acquire().unwrap();

        // A release that already holds the sender when shutdown starts.
        let idle_tx = pool.inner.idle_tx.read();
        let shutdown = {
            let pool = pool.clone();
            thread::spawn(move || pool.shutdown().is_ok())
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!pool.is_closed());

        idle_tx.as_ref().unwrap().send(held).unwrap();
        drop(idle_tx);
        assert!(shutdown.join().unwrap());

        assert!(pool.is_closed());
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.live_count(), 0);
    }

    #[test]
    fn test_release_racing_shutdown_never_strands_connection() {
        for _ in 0..100 {
            let counters = Arc::new(Counters::default());
            let pool = Pool::new(0, 1, factory(&counters)).unwrap();
            let held = pool.acquire().unwrap();

            let releaser = {
                let pool = pool.clone();
                thread::spawn(move || pool.release(held))
            };
            pool.shutdown().unwrap();

            match releaser.join().unwrap() {
                Ok(()) => {
                    assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
                    assert_eq!(pool.live_count(), 0);
                }
                Err(err) => {
                    assert!(err.is_closed());
                    assert_eq!(pool.live_count(), 1);
                }
            }
            assert_eq!(pool.idle_count(), 0);
        }
    }

    #[test]
    fn test_shutdown_drain_counts_failed_close() {
        let counters = Arc::new(Counters::default());
        let pool = Pool::new(0, 2, factory(&counters)).unwrap();

        let mut conn = pool.acquire().unwrap();
        conn.fail_close = true;
        pool.release(conn).unwrap();
        assert_eq!(pool.idle_count(), 1);

        pool.shutdown().unwrap();
        assert_eq!(pool.live_count(), 0);
        assert_eq!(pool.idle_count(), 0);

        let metrics = pool.get_metrics();
        assert_eq!(metrics.close_failures, 1);
        assert_eq!(metrics.total_reaped, 1);
    }

    #[test]
    fn test_checked_out_connection_closed_by_caller_after_shutdown() {
        let counters = Arc::new(Counters::default());
        let pool = Pool::new(0, 2, factory(&counters)).unwrap();
        let held = pool.acquire().unwrap();

        pool.shutdown().unwrap();
        assert_eq!(pool.live_count(), 1);

        pool.close(held).unwrap();
        assert_eq!(pool.live_count(), 0);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_shutdown_wakes_blocked_acquirer() {
        let counters = Arc::new(Counters::default());
        let pool = Pool::new(1, 1, factory(&counters)).unwrap();
        let _held = pool.acquire().unwrap();

        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || pool.acquire().map(|c| c.id))
        };
        thread::sleep(Duration::from_millis(50));
        pool.shutdown().unwrap();

        let result = waiter.join().unwrap();
        assert!(matches!(result, Err(PoolError::Closed)));
    }

    #[test]
    fn test_close_failure_retains_slot_by_default() {
        let counters = Arc::new(Counters::default());
        let pool = Pool::new(0, 1, factory(&counters)).unwrap();

        let mut conn = pool.acquire().unwrap();
        conn.fail_close = true;
        assert!(matches!(pool.close(conn), Err(PoolError::Close(_))));
        assert_eq!(pool.live_count(), 1);
        assert!(pool.try_acquire().unwrap().is_none());
        assert_eq!(pool.get_metrics().close_failures, 1);
    }

    #[test]
    fn test_close_failure_reclaim_policy_frees_slot() {
        let counters = Arc::new(Counters::default());
        let config = PoolConfiguration::new()
            .with_max_conn(1)
            .with_close_failure_policy(CloseFailurePolicy::Reclaim);
        let pool = Pool::with_config(config, factory(&counters)).unwrap();

        let mut conn = pool.acquire().unwrap();
        conn.fail_close = true;
        assert!(matches!(pool.close(conn), Err(PoolError::Close(_))));
        assert_eq!(pool.live_count(), 0);
        assert!(pool.try_acquire().unwrap().is_some());
    }

    #[test]
    fn test_acquire_timeout_at_capacity() {
        let counters = Arc::new(Counters::default());
        let pool = Pool::new(0, 1, factory(&counters)).unwrap();
        let _held = pool.acquire().unwrap();

        let started = Instant::now();
        let result = pool.acquire_timeout(Duration::from_millis(50));
        assert!(matches!(result, Err(PoolError::Timeout(_))));
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(pool.get_metrics().timeouts, 1);
    }

    #[test]
    fn test_acquire_timeout_gets_released_connection() {
        let counters = Arc::new(Counters::default());
        let pool = Pool::new(0, 1, factory(&counters)).unwrap();
        let held = pool.acquire().unwrap();

        let releaser = {
            let pool = pool.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                pool.release(held).unwrap();
            })
        };
        let conn = pool.acquire_timeout(Duration::from_secs(5)).unwrap();
        releaser.join().unwrap();
        assert_eq!(conn.id, 0);
    }

    #[test]
    fn test_pooled_connection_returns_on_drop() {
        let counters = Arc::new(Counters::default());
        let pool = Pool::new(0, 1, factory(&counters)).unwrap();

        {
            let conn = pool.get().unwrap();
            assert_eq!(conn.id, 0);
            assert_eq!(pool.idle_count(), 0);
        }
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.get_metrics().total_released, 1);
    }

    #[test]
    fn test_pooled_connection_closed_when_pool_shut_down() {
        let counters = Arc::new(Counters::default());
        let pool = Pool::new(0, 1, factory(&counters)).unwrap();

        let conn = pool.get().unwrap();
        pool.shutdown().unwrap();
        drop(conn);

        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.live_count(), 0);
    }

    #[test]
    fn test_pooled_connection_discard_and_detach() {
        let counters = Arc::new(Counters::default());
        let pool = Pool::new(0, 2, factory(&counters)).unwrap();

        pool.get().unwrap().discard().unwrap();
        assert_eq!(pool.live_count(), 0);

        let raw = pool.get().unwrap().detach();
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.live_count(), 1);
        pool.release(raw).unwrap();
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn test_health_and_metrics() {
        let counters = Arc::new(Counters::default());
        let pool = Pool::new(1, 2, factory(&counters)).unwrap();
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();

        let health = pool.health_status();
        assert!(!health.is_healthy());
        assert_eq!(health.checked_out, 2);

        let metrics = pool.get_metrics();
        assert_eq!(metrics.total_created, 2);
        assert_eq!(metrics.total_acquired, 2);
        assert_eq!(metrics.live, 2);

        pool.release(a).unwrap();
        pool.release(b).unwrap();
        assert!(pool.health_status().is_healthy());
    }

    #[tokio::test]
    async fn test_acquire_async() {
        let counters = Arc::new(Counters::default());
        let pool = Pool::new(1, 2, factory(&counters)).unwrap();

        let conn = pool.acquire_async().await.unwrap();
        assert_eq!(conn.id, 0);
        pool.release(conn).unwrap();

        let guard = pool.get_async().await.unwrap();
        assert_eq!(guard.id, 0);
    }

    #[tokio::test]
    async fn test_acquire_async_times_out() {
        let counters = Arc::new(Counters::default());
        let config = PoolConfiguration::new()
            .with_max_conn(1)
            .with_acquire_timeout(Duration::from_millis(50));
        let pool = Pool::with_config(config, factory(&counters)).unwrap();
        let _held = pool.acquire().unwrap();

        let result = pool.acquire_async().await;
        assert!(matches!(result, Err(PoolError::Timeout(_))));
    }
}
