//! Process-level port locking tests
//!
//! These tests verify that locks work across process boundaries,
//! not just thread boundaries. Uses counter-based verification
//! to detect lost updates.

use portlock_testkit::{example_bin, free_port};
use std::fs;
use std::process::Command;
use tempfile::TempDir;

/// Verifies that port locks prevent lost updates across processes.
///
/// - Spawn 4 processes that each perform 5 read-modify-write operations
/// - Every operation runs between acquire and release of the same port
/// - Expected: 20 updates, all preserved
#[test]
fn test_counter_with_lock_no_lost_updates() {
    let temp = TempDir::new().unwrap();
    let counter_path = temp.path().join("counter.txt");
    fs::write(&counter_path, "0").unwrap();

    const NUM_PROCESSES: usize = 4;
    const ITERATIONS_PER_PROCESS: usize = 5;
    let port = free_port();

    let mut handles = vec![];
    for _ in 0..NUM_PROCESSES {
        let counter_path = counter_path.clone();
        let handle = std::thread::spawn(move || {
            let status = Command::new(example_bin("counter_child_locked"))
                .arg(port.to_string())
                .arg(&counter_path)
                .arg(ITERATIONS_PER_PROCESS.to_string())
                .status()
                .expect("Failed to execute counter_child_locked");

            assert!(
                status.success(),
                "counter_child_locked should exit successfully"
            );
        });
        handles.push(handle);
    }

    for handle in handles {
        handle.join().unwrap();
    }

    let final_count: usize = fs::read_to_string(&counter_path)
        .unwrap()
        .trim()
        .parse()
        .unwrap();

    let expected = NUM_PROCESSES * ITERATIONS_PER_PROCESS;
    assert_eq!(
        final_count, expected,
        "With locks, should have no lost updates: got {}, expected {}",
        final_count, expected
    );
}

#[test]
fn test_cross_process_exclusive_locking() {
    // Verify only one process holds the port at a time
    let temp = TempDir::new().unwrap();
    let marker_path = temp.path().join("marker.txt");

    const NUM_PROCESSES: usize = 3;
    let port = free_port();

    let mut handles = vec![];
    for id in 0..NUM_PROCESSES {
        let marker_path = marker_path.clone();
        let handle = std::thread::spawn(move || {
            let status = Command::new(example_bin("lock_holder"))
                .arg(port.to_string())
                .arg(&marker_path)
                .arg(id.to_string())
                .status()
                .expect("Failed to execute lock_holder");

            assert!(status.success(), "lock_holder should exit successfully");
        });
        handles.push(handle);
    }

    for handle in handles {
        handle.join().unwrap();
    }

    // Every "acquired" line must be directly followed by the same process's
    // "released" line
    let content = fs::read_to_string(&marker_path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), NUM_PROCESSES * 2, "markers: {:?}", lines);

    for pair in lines.chunks(2) {
        let holder = pair[0]
            .strip_suffix(" acquired")
            .unwrap_or_else(|| panic!("Expected an acquired marker, got {:?}", lines));
        assert_eq!(
            pair[1],
            format!("{} released", holder),
            "Critical sections interleaved: {:?}",
            lines
        );
    }

    for id in 0..NUM_PROCESSES {
        assert!(
            content.contains(&format!("process_{} acquired", id)),
            "Should contain process_{}",
            id
        );
    }
}

#[test]
fn test_holder_exit_frees_port_for_next_process() {
    // A holder process that exits releases the port for the next one
    let temp = TempDir::new().unwrap();
    let marker_path = temp.path().join("marker.txt");
    let port = free_port();

    for id in 0..2 {
        let status = Command::new(example_bin("lock_holder"))
            .arg(port.to_string())
            .arg(&marker_path)
            .arg(id.to_string())
            .status()
            .expect("Failed to execute lock_holder");
        assert!(status.success());
    }

    assert!(std::net::TcpListener::bind(("127.0.0.1", port)).is_ok());
}
