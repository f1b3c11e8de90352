//! Pooling TCP connections to a local server

use esox_connpool::{Connection, Pool};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

struct TcpConn {
    stream: TcpStream,
}

impl Connection for TcpConn {
    type Error = io::Error;

    fn close(&mut self) -> Result<(), Self::Error> {
        self.stream.shutdown(Shutdown::Both)
    }

    fn is_alive(&self) -> bool {
        self.stream.peer_addr().is_ok()
    }
}

fn echo_server() -> io::Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?.to_string();

    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            thread::spawn(move || {
                let mut stream = stream;
                let mut buf = [0u8; 64];
                while let Ok(n) = stream.read(&mut buf) {
                    if n == 0 || stream.write_all(&buf[..n]).is_err() {
                        break;
                    }
                }
            });
        }
    });

    Ok(addr)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== EsoxSolutions.ConnectionPool - TCP Pool ===\n");

    let addr = echo_server()?;
    let pool = Pool::new(5, 10, move || {
        TcpStream::connect(&addr).map(|stream| TcpConn { stream })
    })?;
    println!("Warmed up {} connections", pool.live_count());

    let workers: Vec<_> = (0..10)
        .map(|i| {
            let pool = pool.clone();
            thread::spawn(move || -> io::Result<()> {
                let mut conn = pool
                    .get()
                    .map_err(|e| io::Error::other(e.to_string()))?;
                conn.stream.write_all(format!("hello {i}").as_bytes())?;

                let mut buf = [0u8; 64];
                let n = conn.stream.read(&mut buf)?;
                println!("{i} got {:?}", String::from_utf8_lossy(&buf[..n]));
                thread::sleep(Duration::from_millis(100));
                Ok(())
            })
        })
        .collect();

    for worker in workers {
        if let Ok(Err(err)) = worker.join() {
            eprintln!("worker failed: {err}");
        }
    }

    println!("\nLive connections: {}", pool.live_count());
    pool.shutdown()?;
    println!("Shut down, live connections left: {}", pool.live_count());
    Ok(())
}
