//! Test utilities for portlock
//!
//! This crate provides shared testing utilities used across the portlock workspace.

use std::net::{Ipv4Addr, TcpListener};
use std::path::PathBuf;
use std::time::{Duration, Instant};

pub mod occupant;

pub use occupant::{Occupant, OccupantBehavior};

/// Returns a loopback port that was free a moment ago
///
/// The port is found by binding port 0 and dropping the listener, so another
/// process may grab it in between; tests use it as the lock port of a single
/// test case.
///
/// # Panics
///
/// Panics if no loopback port can be bound.
pub fn free_port() -> u16 {
    let listener =
        TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).expect("Failed to bind an ephemeral port");
    listener
        .local_addr()
        .expect("Failed to read local address")
        .port()
}

/// Polls `condition` every 10ms until it holds or `timeout` elapses
///
/// # Returns
///
/// Whether the condition was observed to hold.
pub fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

/// Installs a stderr tracing subscriber honoring `RUST_LOG`
///
/// Safe to call from every test and helper binary; only the first call in a
/// process installs the subscriber.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}

/// Get the path to a compiled example binary
///
/// This helper locates example binaries compiled by cargo test.
/// Example binaries are in the `target/debug/examples/` directory.
///
/// # Arguments
///
/// * `name` - Name of the example binary (without .exe extension)
///
/// # Returns
///
/// PathBuf to the compiled example binary
///
/// # Panics
///
/// Panics if unable to determine the current executable path
///
/// # Examples
///
/// ```no_run
/// use portlock_testkit::{example_bin, free_port};
/// use std::process::Command;
///
/// // Example test function (not executed in doctest)
/// fn test_with_example() {
///     let status = Command::new(example_bin("lock_holder"))
///         .arg(free_port().to_string())
///         .arg("marker.txt")
///         .arg("0")
///         .status()
///         .unwrap();
///     assert!(status.success());
/// }
/// ```
pub fn example_bin(name: &str) -> PathBuf {
    let mut path = std::env::current_exe().expect("Failed to get current executable path");

    // Navigate from target/debug/deps/test_binary to target/debug/examples/
    path.pop(); // Remove test binary name
    path.pop(); // Remove "deps"
    path.push("examples");
    path.push(name);

    // Add .exe extension on Windows
    if cfg!(target_os = "windows") {
        path.set_extension("exe");
    }

    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_port_is_bindable() {
        let port = free_port();
        assert_ne!(port, 0);
        assert!(
            TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_ok(),
            "Port {} should be bindable right after allocation",
            port
        );
    }

    #[test]
    fn test_wait_until_times_out() {
        let start = Instant::now();
        assert!(!wait_until(Duration::from_millis(50), || false));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_wait_until_observes_condition() {
        let mut calls = 0;
        assert!(wait_until(Duration::from_secs(1), || {
            calls += 1;
            calls >= 3
        }));
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_example_bin_points_to_examples_dir() {
        let path = example_bin("lock_holder");
        let parent = path.parent().expect("example path should have a parent");
        assert_eq!(
            parent.file_name().and_then(|n| n.to_str()),
            Some("examples")
        );
    }
}
