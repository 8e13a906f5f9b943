//! Counter helper WITH port locking
//!
//! Usage: counter_child_locked <port> <counter_path> <iterations>
//!
//! Performs read-modify-write operations on a counter file, each one inside
//! an acquire/release of the port lock. Concurrent processes running this
//! must not lose any increment.

use anyhow::{bail, Context, Result};
use portlock::PortLock;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

fn main() -> Result<()> {
    portlock_testkit::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() != 4 {
        bail!("Usage: counter_child_locked <port> <counter_path> <iterations>");
    }

    let port: u16 = args[1].parse().context("port must be a number")?;
    let counter_path = PathBuf::from(&args[2]);
    let iterations: usize = args[3].parse().context("iterations must be a number")?;

    let lock = PortLock::with_port(port);

    for _ in 0..iterations {
        // Blocks until this process holds the port
        lock.acquire()
            .with_context(|| format!("Failed to acquire lock on port {}", port))?;

        let content = fs::read_to_string(&counter_path).context("Failed to read counter file")?;
        let value: u32 = content
            .trim()
            .parse()
            .context("Counter file should contain a number")?;

        // Sleep to increase contention
        std::thread::sleep(Duration::from_millis(5));

        fs::write(&counter_path, (value + 1).to_string())
            .context("Failed to write counter file")?;

        lock.release();
    }

    println!("Counter child completed {} iterations", iterations);
    Ok(())
}
