// SPDX-License-Identifier: (MIT OR Apache-2.0)

//! Managed thread lifecycle: startup handshake, concurrent starts, and crash
//! containment. Fatal paths re-run `crashing_worker_aborts_process` in a
//! child process and check that it died of SIGABRT.

use std::collections::HashSet;
use std::os::unix::process::ExitStatusExt;
use std::process::Command;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use lute_base::current_thread;
use lute_base::{Exception, Mutex, Thread};

const CRASH_MODE_ENV: &str = "LUTE_CRASH_MODE";

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[test]
fn worker_writes_shared_value() {
    init_tracing();
    let slot = Arc::new(AtomicI32::new(0));
    let writer = slot.clone();
    let mut t = Thread::new(move || writer.store(42, Ordering::SeqCst), "worker1");

    t.start();
    assert!(t.tid() > 0);
    assert_eq!(t.name(), "worker1");

    t.join().unwrap();
    assert_eq!(slot.load(Ordering::SeqCst), 42);
}

#[test]
fn concurrent_starts_each_publish_their_own_tid() {
    init_tracing();
    let starters: Vec<_> = (0..8)
        .map(|i| {
            std::thread::spawn(move || {
                let caller = current_thread::tid();
                let mut t = Thread::new(
                    || current_thread::sleep_usec(1_000),
                    format!("concurrent-{i}"),
                );
                t.start();
                let tid = t.tid();
                assert!(tid > 0);
                assert_ne!(tid, caller);
                t.join().unwrap();
                tid
            })
        })
        .collect();

    let tids: HashSet<_> = starters.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(tids.len(), 8);
}

#[test]
fn tid_is_known_before_function_runs() {
    init_tracing();
    let gate = Arc::new(Mutex::new(()));
    let held = gate.lock();

    let inner = gate.clone();
    let mut t = Thread::new(
        move || {
            drop(inner.lock());
        },
        "gated",
    );
    // The function is stuck behind `held`, yet start() has returned with a tid.
    t.start();
    assert!(t.tid() > 0);

    drop(held);
    t.join().unwrap();
}

#[test]
fn threads_count_under_shared_mutex() {
    init_tracing();
    let counter = Arc::new(Mutex::new(0u64));
    let mut threads: Vec<_> = (0..2)
        .map(|i| {
            let counter = counter.clone();
            Thread::new(
                move || {
                    for _ in 0..100_000 {
                        let mut guard = counter.lock();
                        *guard += 1;
                    }
                },
                format!("adder-{i}"),
            )
        })
        .collect();

    for t in &mut threads {
        t.start();
    }
    for t in &mut threads {
        t.join().unwrap();
    }
    assert_eq!(*counter.lock(), 200_000);
}

fn crash_in_thread(mode: &str) {
    let mode = mode.to_string();
    let mut t = Thread::new(
        move || match mode.as_str() {
            "exception" => Exception::new("invariant broken").raise(),
            "panic" => panic!("plain panic"),
            _ => std::panic::panic_any(17u8),
        },
        "crasher",
    );
    t.start();
    let _ = t.join();
}

fn drop_held_mutex() {
    let mutex = Mutex::new(());
    std::mem::forget(mutex.lock());
    drop(mutex);
}

fn start_with_oversized_stack() {
    let mut t = Thread::builder()
        .name("huge-stack")
        .stack_size(1 << 46)
        .build(|| {});
    t.start();
}

fn crash_with(mode: &str) -> ! {
    match mode {
        "held" => drop_held_mutex(),
        "spawn" => start_with_oversized_stack(),
        _ => crash_in_thread(mode),
    }
    // Unreachable when the failure is fatal.
    std::process::exit(0)
}

/// Re-run this test in a child with `mode` set, assert it died of SIGABRT,
/// and return its stderr.
fn expect_abort(mode: &str) -> String {
    let out = Command::new(std::env::current_exe().unwrap())
        .args([
            "--exact",
            "crashing_worker_aborts_process",
            "--nocapture",
            "--test-threads=1",
        ])
        .env(CRASH_MODE_ENV, mode)
        .output()
        .expect("failed to re-run test binary");
    let stderr = String::from_utf8_lossy(&out.stderr).into_owned();
    eprintln!("[{mode}] {stderr}");
    assert_eq!(out.status.signal(), Some(libc::SIGABRT));
    stderr
}

#[test]
fn crashing_worker_aborts_process() {
    if let Ok(mode) = std::env::var(CRASH_MODE_ENV) {
        crash_with(&mode);
    }

    let stderr = expect_abort("exception");
    assert!(stderr.contains("exception caught in Thread crasher"));
    assert!(stderr.contains("reason: invariant broken"));
    assert!(stderr.contains("stack trace:"));

    let stderr = expect_abort("panic");
    assert!(stderr.contains("exception caught in Thread crasher"));
    assert!(stderr.contains("reason: plain panic"));

    let unknown = "unknown exception caught in Thread crasher";
    assert!(expect_abort("unknown").contains(unknown));
}

#[test]
fn dropping_held_mutex_aborts_process() {
    let held = "invariant violated: mutex destroyed while held";
    assert!(expect_abort("held").contains(held));
}

#[test]
fn failed_thread_creation_aborts_process() {
    assert!(expect_abort("spawn").contains("Failed in pthread_create"));
}
