//! Async usage examples for the connection pool

use esox_connpool::{Connection, Pool, PoolConfiguration, PoolError};
use std::time::Duration;

struct Session(u32);

impl Connection for Session {
    type Error = std::io::Error;

    fn close(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn is_alive(&self) -> bool {
        true
    }
}

#[tokio::main]
async fn main() {
    println!("=== EsoxSolutions.ConnectionPool - Async Examples ===\n");

    let config = PoolConfiguration::new()
        .with_min_conn(1)
        .with_max_conn(2)
        .with_acquire_timeout(Duration::from_millis(200));
    let pool = Pool::with_config(config, || Ok(Session(7))).unwrap();

    println!("1. Concurrent tasks:");
    let tasks: Vec<_> = (0..4)
        .map(|i| {
            let pool = pool.clone();
            tokio::spawn(async move {
                let session = pool.get_async().await?;
                tokio::time::sleep(Duration::from_millis(20)).await;
                println!("   Task {} used session {}", i, session.0);
                Ok::<_, PoolError<std::io::Error>>(())
            })
        })
        .collect();
    for task in tasks {
        let _ = task.await;
    }

    println!("\n2. Timeout at capacity:");
    let _a = pool.acquire_async().await.unwrap();
    let _b = pool.acquire_async().await.unwrap();
    match pool.acquire_async().await {
        Ok(_) => println!("   Unexpected session"),
        Err(err) => println!("   {}", err),
    }
}
