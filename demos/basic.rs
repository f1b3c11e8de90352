//! Basic usage examples for the connection pool

use esox_connpool::{CloseFailurePolicy, Connection, Pool, PoolConfiguration};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug)]
struct FakeConn {
    id: usize,
    alive: bool,
}

impl FakeConn {
    fn open() -> std::io::Result<Self> {
        Ok(Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            alive: true,
        })
    }
}

impl Connection for FakeConn {
    type Error = std::io::Error;

    fn close(&mut self) -> Result<(), Self::Error> {
        println!("     closing connection {}", self.id);
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive
    }
}

fn main() {
    println!("=== EsoxSolutions.ConnectionPool - Basic Examples ===\n");

    // Example 1: Acquire and release
    acquire_release();

    // Example 2: RAII guard
    guard();

    // Example 3: Dead connection reaping
    reaping();

    // Example 4: Capacity and timeouts
    capacity();

    // Example 5: Metrics and health
    metrics_and_health();
}

fn acquire_release() {
    println!("1. Acquire and Release:");
    let pool = Pool::new(2, 4, FakeConn::open).unwrap();
    println!("   Warmed up: {}", pool.live_count());

    let conn = pool.acquire().unwrap();
    println!("   Got connection {}", conn.id);
    pool.release(conn).unwrap();
    println!("   Idle after release: {}\n", pool.idle_count());
}

fn guard() {
    println!("2. RAII Guard:");
    let pool = Pool::new(0, 2, FakeConn::open).unwrap();
    {
        let conn = pool.get().unwrap();
        println!("   Using connection {}", conn.id);
    }
    println!("   Idle after drop: {}\n", pool.idle_count());
}

fn reaping() {
    println!("3. Dead Connection Reaping:");
    let pool = Pool::new(0, 2, FakeConn::open).unwrap();

    let mut conn = pool.acquire().unwrap();
    println!("   Connection {} goes stale", conn.id);
    conn.alive = false;
    pool.release(conn).unwrap();

    let fresh = pool.acquire().unwrap();
    println!("   Replaced with connection {}\n", fresh.id);
    pool.release(fresh).unwrap();
}

fn capacity() {
    println!("4. Capacity and Timeouts:");
    let config = PoolConfiguration::new()
        .with_max_conn(1)
        .with_close_failure_policy(CloseFailurePolicy::Reclaim);
    let pool = Pool::with_config(config, FakeConn::open).unwrap();

    let held = pool.acquire().unwrap();
    println!("   try_acquire at capacity: {:?}", pool.try_acquire().unwrap().map(|c| c.id));
    match pool.acquire_timeout(Duration::from_millis(50)) {
        Ok(conn) => println!("   Unexpected connection {}", conn.id),
        Err(err) => println!("   acquire_timeout: {}", err),
    }

    let waiter = {
        let pool = pool.clone();
        std::thread::spawn(move || pool.acquire().map(|c| c.id))
    };
    std::thread::sleep(Duration::from_millis(20));
    pool.release(held).unwrap();
    println!("   Waiter received: {:?}\n", waiter.join().unwrap().ok());
}

fn metrics_and_health() {
    println!("5. Metrics and Health:");
    let pool = Pool::new(2, 3, FakeConn::open).unwrap();

    {
        let _a = pool.get().unwrap();
        let _b = pool.get().unwrap();

        let health = pool.health_status();
        println!("   Health: {}", if health.is_healthy { "Healthy" } else { "Unhealthy" });
        println!("   Utilization: {:.1}%", health.utilization * 100.0);
        println!("   Live: {}, Idle: {}", health.live, health.idle);
    }

    let metrics = pool.export_metrics();
    println!("\n   Metrics:");
    for (key, value) in metrics {
        println!("     {}: {}", key, value);
    }

    pool.shutdown().unwrap();
    println!("\n   Closed: {}", pool.is_closed());
}
