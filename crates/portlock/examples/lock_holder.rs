//! Helper binary that acquires the lock, writes markers, holds, releases
//!
//! Usage: lock_holder <port> <marker_path> <process_id>
//!
//! Appends an "acquired" and a "released" line for its process id around a
//! short hold. Multiple processes running this must never interleave their
//! pairs of lines.

use anyhow::{bail, Context, Result};
use portlock::PortLock;
use std::env;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

fn main() -> Result<()> {
    portlock_testkit::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() != 4 {
        bail!("Usage: lock_holder <port> <marker_path> <process_id>");
    }

    let port: u16 = args[1].parse().context("port must be a number")?;
    let marker_path = Path::new(&args[2]);
    let process_id = &args[3];

    let lock = PortLock::with_port(port);
    let guard = lock
        .lock()
        .with_context(|| format!("process {} failed to acquire lock", process_id))?;

    append_marker(marker_path, &format!("process_{} acquired", process_id))?;

    // Hold lock for a bit so contenders pile up as waiters
    std::thread::sleep(Duration::from_millis(100));

    append_marker(marker_path, &format!("process_{} released", process_id))?;
    drop(guard);

    println!("Process {} completed", process_id);
    Ok(())
}

fn append_marker(path: &Path, line: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .context("Failed to open marker file")?;
    writeln!(file, "{}", line).context("Failed to write marker")
}
