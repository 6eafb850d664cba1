mod common;

use common::{EXCLUSIVE, FlakyBackend, NONE, handshake, pattern, start};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::tempdir;
use tether_backend::{Backend, FsBackend, MemoryBackend};
use tether_channel::Request;
use tether_proxy::{ProxyError, RetryPolicy};

/// Open, write, size, read back and close one file.
fn scenario_a<B: Backend>(backend: B) {
    let h = start(backend, handshake());
    let codes = *h.caller.codes();
    let data = pattern(512, 42);

    assert_eq!(h.caller.open(1, "/db/test.bin", codes.open_create).unwrap(), codes.ok);
    assert_eq!(h.caller.write(1, &data, 0).unwrap(), codes.ok);
    assert_eq!(h.caller.file_size(1).unwrap(), (codes.ok, Some(512)));
    assert_eq!(h.caller.read(1, 512, 0).unwrap(), (codes.ok, data));
    assert_eq!(h.caller.close(1).unwrap(), codes.ok);

    let metrics = h.proxy.metrics();
    assert_eq!(metrics.total_requests(), 5);
}

#[test]
fn test_scenario_a_memory() {
    scenario_a(MemoryBackend::new());
}

#[test]
fn test_scenario_a_filesystem() {
    let dir = tempdir().unwrap();
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
    let backend = runtime.block_on(FsBackend::open(dir.path().join("root"))).unwrap();
    scenario_a(backend);
    assert_eq!(std::fs::read(dir.path().join("root/db/test.bin")).unwrap(), pattern(512, 42));
}

#[test]
fn test_scenario_b_delete_while_open() {
    let backend = MemoryBackend::new();
    let h = start(backend.clone(), handshake());
    let codes = *h.caller.codes();

    assert_eq!(h.caller.open(1, "/db/gone.bin", codes.open_create).unwrap(), codes.ok);
    assert_eq!(h.caller.delete("/db/gone.bin", 0, false).unwrap(), codes.ok);
    assert_ne!(h.caller.access("/db/gone.bin").unwrap(), codes.ok);
    assert_eq!(h.caller.close(1).unwrap(), codes.ok);
}

#[test]
fn test_scenario_b_delete_on_close() {
    let backend = MemoryBackend::new();
    let h = start(backend.clone(), handshake());
    let codes = *h.caller.codes();
    let flags = codes.open_create | codes.open_delete_on_close;

    assert_eq!(h.caller.open(1, "/db/temp.bin", flags).unwrap(), codes.ok);
    assert_eq!(h.caller.write(1, b"scratch", 0).unwrap(), codes.ok);
    assert_eq!(h.caller.access("/db/temp.bin").unwrap(), codes.ok);

    assert_eq!(h.caller.close(1).unwrap(), codes.ok);
    assert_eq!(h.caller.access("/db/temp.bin").unwrap(), codes.io_err);
    assert!(!backend.exists("/db/temp.bin"));
}

#[test]
fn test_scenario_c_acquisition_succeeds_after_backoff() {
    let backend = FlakyBackend::new(MemoryBackend::new(), 3);
    let h = start(backend.clone(), handshake());
    let codes = *h.caller.codes();

    assert_eq!(h.caller.open(1, "/db/flaky.bin", codes.open_create).unwrap(), codes.ok);
    let started = Instant::now();
    assert_eq!(h.caller.lock(1, EXCLUSIVE).unwrap(), codes.ok);
    assert!(started.elapsed() >= RetryPolicy::default().total_delay());
    assert_eq!(backend.remaining(), 0);

    let wait = h.proxy.metrics().op(tether_channel::OpKind::Lock).backend_wait;
    assert!(wait >= Duration::from_millis(1800), "{wait:?}");
}

#[test]
fn test_scenario_c_exhausted_acquisition_reports_lock_error() {
    let backend = FlakyBackend::new(MemoryBackend::new(), 4);
    let h = start(backend, handshake().with_retry(RetryPolicy::new(4, Duration::from_millis(20))));
    let codes = *h.caller.codes();

    assert_eq!(h.caller.open(1, "/db/broken.bin", codes.open_create).unwrap(), codes.ok);
    let reply = h.caller.call(&Request::Lock { fid: 1, level: EXCLUSIVE }).unwrap();
    assert_eq!(reply.rc, codes.io_err_lock);
    let text = reply.exception().unwrap();
    assert!(text.contains("after 4 attempts"), "{text}");
    assert!(text.contains("transient failure"), "{text}");

    // The failed lock left the file unlocked; the next attempt succeeds.
    assert_eq!(h.caller.lock(1, EXCLUSIVE).unwrap(), codes.ok);
}

#[test]
fn test_scenario_d_contention_reports_busy() {
    let backend = MemoryBackend::new();
    let quick = RetryPolicy::new(2, Duration::from_millis(20));
    let first = start(backend.clone(), handshake());
    let second = start(backend.clone(), handshake().with_retry(quick));
    let codes = *first.caller.codes();

    assert_eq!(first.caller.open(1, "/shared.db", codes.open_create).unwrap(), codes.ok);
    assert_eq!(second.caller.open(1, "/shared.db", 0).unwrap(), codes.ok);

    assert_eq!(first.caller.lock(1, EXCLUSIVE).unwrap(), codes.ok);
    assert_eq!(second.caller.lock(1, EXCLUSIVE).unwrap(), codes.busy);
    assert_eq!(second.caller.write(1, b"x", 0).unwrap(), codes.busy);

    assert_eq!(first.caller.unlock(1, NONE).unwrap(), codes.ok);
    assert_eq!(second.caller.lock(1, EXCLUSIVE).unwrap(), codes.ok);
    assert_eq!(first.caller.lock(1, EXCLUSIVE).unwrap(), codes.busy);
}

#[test]
fn test_scenario_d_waiter_gets_handle_after_release() {
    let backend = MemoryBackend::new();
    let first = start(backend.clone(), handshake());
    let second = start(backend.clone(), handshake());
    let codes = *first.caller.codes();

    assert_eq!(first.caller.open(1, "/shared.db", codes.open_create).unwrap(), codes.ok);
    assert_eq!(second.caller.open(7, "/shared.db", 0).unwrap(), codes.ok);
    assert_eq!(first.caller.lock(1, EXCLUSIVE).unwrap(), codes.ok);

    let waiter = thread::spawn(move || {
        let rc = second.caller.lock(7, EXCLUSIVE)?;
        Ok::<_, ProxyError>((rc, second))
    });
    thread::sleep(Duration::from_millis(100));
    assert!(backend.is_held("/shared.db"));
    assert_eq!(first.caller.unlock(1, NONE).unwrap(), codes.ok);

    let (rc, second) = waiter.join().unwrap().unwrap();
    assert_eq!(rc, codes.ok);
    assert!(backend.is_held("/shared.db"));
    assert_eq!(first.caller.lock(1, EXCLUSIVE).unwrap(), codes.busy);
    drop(second);
}
