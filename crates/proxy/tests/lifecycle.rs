mod common;

use common::{EXCLUSIVE, FlakyBackend, handshake, start};
use std::thread;
use std::time::{Duration, Instant};
use tether_backend::MemoryBackend;
use tether_channel::OpKind;
use tether_proxy::{Caller, Proxy, ProxyError, ProxyStatus};

const STATUS_TIMEOUT: Duration = Duration::from_secs(3);

#[test]
fn test_status_before_and_after_init() {
    let proxy = Proxy::spawn(MemoryBackend::new()).unwrap();
    assert_eq!(proxy.status(), ProxyStatus::Loaded);

    proxy.init(handshake()).unwrap();
    assert_eq!(proxy.status(), ProxyStatus::Inited);

    let err = proxy.init(handshake()).unwrap_err();
    assert!(matches!(err, ProxyError::InvalidRequest { .. }), "{err}");
}

#[test]
fn test_rejected_handshake_reports_unavailable() {
    let proxy = Proxy::spawn(MemoryBackend::new()).unwrap();

    let mut bad = handshake();
    bad.op_ids.insert("read".to_owned(), 0);
    let err = proxy.init(bad).unwrap_err();
    assert!(matches!(err, ProxyError::Channel { .. }), "{err}");
    match proxy.status() {
        ProxyStatus::Unavailable(reason) => assert!(reason.contains("read"), "{reason}"),
        other => panic!("unexpected status {other:?}"),
    }

    let mut duplicate = handshake();
    duplicate.op_ids.insert("write".to_owned(), 1);
    assert!(proxy.init(duplicate).is_err());

    let mut missing = handshake();
    missing.io_region = None;
    assert!(Caller::connect(&missing).is_err());

    // A valid handshake still brings the proxy up afterwards.
    proxy.init(handshake()).unwrap();
    assert_eq!(proxy.status(), ProxyStatus::Inited);
}

#[test]
fn test_shutdown_and_restart_keep_open_files() {
    let backend = MemoryBackend::new();
    let h = start(backend.clone(), handshake());
    let codes = *h.caller.codes();

    assert_eq!(h.caller.open(1, "/keep.bin", codes.open_create).unwrap(), codes.ok);
    assert_eq!(h.caller.lock(1, EXCLUSIVE).unwrap(), codes.ok);
    assert_eq!(h.caller.write(1, b"before", 0).unwrap(), codes.ok);

    h.proxy.shutdown().unwrap();
    h.proxy.wait_for_status(STATUS_TIMEOUT, |s| *s == ProxyStatus::Stopped).unwrap();
    assert!(backend.is_held("/keep.bin"));

    h.proxy.restart().unwrap();
    h.proxy.wait_for_status(STATUS_TIMEOUT, |s| *s == ProxyStatus::Inited).unwrap();
    assert_eq!(h.caller.read(1, 6, 0).unwrap(), (codes.ok, b"before".to_vec()));
    assert_eq!(h.caller.close(1).unwrap(), codes.ok);
}

#[test]
fn test_request_posted_while_stopped_is_served_after_restart() {
    let h = start(MemoryBackend::new(), handshake());
    let codes = *h.caller.codes();
    assert_eq!(h.caller.mkdir("/queued").unwrap(), codes.ok);

    h.proxy.shutdown().unwrap();
    h.proxy.wait_for_status(STATUS_TIMEOUT, |s| *s == ProxyStatus::Stopped).unwrap();

    let caller = Caller::connect(&h.handshake).unwrap();
    let pending = thread::spawn(move || caller.access("/queued/missing"));
    thread::sleep(Duration::from_millis(150));
    assert!(!pending.is_finished());

    h.proxy.restart().unwrap();
    assert_eq!(pending.join().unwrap().unwrap(), codes.io_err);
}

#[test]
fn test_restart_while_serving_is_harmless() {
    let h = start(MemoryBackend::new(), handshake());
    let codes = *h.caller.codes();

    h.proxy.restart().unwrap();
    h.proxy.shutdown().unwrap();
    h.proxy.restart().unwrap();
    h.proxy.wait_for_status(STATUS_TIMEOUT, |s| *s == ProxyStatus::Inited).unwrap();
    assert_eq!(h.caller.mkdir("/still/here").unwrap(), codes.ok);
}

#[test]
fn test_failed_serve_loop_answers_caller_and_reports_unavailable() {
    let backend = FlakyBackend::panicking(MemoryBackend::new(), 1);
    let h = start(backend.clone(), handshake());
    let codes = *h.caller.codes();
    assert_eq!(h.caller.open(1, "/p.bin", codes.open_create).unwrap(), codes.ok);

    let started = Instant::now();
    assert_eq!(h.caller.write(1, b"x", 0).unwrap(), codes.io_err);
    assert!(started.elapsed() < Duration::from_secs(5), "{:?}", started.elapsed());

    let status = h
        .proxy
        .wait_for_status(STATUS_TIMEOUT, |s| matches!(s, ProxyStatus::Unavailable(_)))
        .unwrap();
    assert!(matches!(&status, ProxyStatus::Unavailable(reason) if reason.contains("serve loop failed")));
    assert_eq!(backend.remaining(), 0);

    // A new handshake on the same regions starts a fresh session.
    h.proxy.init(h.handshake.clone()).unwrap();
    assert_eq!(h.proxy.status(), ProxyStatus::Inited);
    assert_eq!(h.caller.close(1).unwrap(), codes.not_found);
    assert_eq!(h.caller.open(1, "/p.bin", 0).unwrap(), codes.ok);
    assert_eq!(h.caller.write(1, b"x", 0).unwrap(), codes.ok);
    assert_eq!(h.caller.close(1).unwrap(), codes.ok);
}

#[test]
fn test_metrics_dump_and_reset() {
    let h = start(MemoryBackend::new(), handshake());
    let codes = *h.caller.codes();

    assert_eq!(h.caller.open(1, "/m.bin", codes.open_create).unwrap(), codes.ok);
    assert_eq!(h.caller.write(1, b"abc", 0).unwrap(), codes.ok);
    assert_eq!(h.caller.write(1, b"def", 3).unwrap(), codes.ok);
    assert_eq!(h.caller.file_size(1).unwrap(), (codes.ok, Some(6)));

    let snapshot = h.proxy.dump_metrics().unwrap();
    assert_eq!(snapshot.op(OpKind::Write).count, 2);
    assert_eq!(snapshot.op(OpKind::Open).count, 1);
    assert_eq!(snapshot.op(OpKind::Read).count, 0);
    assert_eq!(snapshot.codec.deserialize_count, 4);
    assert!(snapshot.codec.serialize_count >= 1);
    assert!(snapshot.op(OpKind::Write).service >= snapshot.op(OpKind::Write).backend_wait);

    h.proxy.reset_metrics().unwrap();
    assert_eq!(h.proxy.dump_metrics().unwrap().total_requests(), 0);
}

#[test]
fn test_dropping_the_proxy_releases_handles() {
    let backend = MemoryBackend::new();
    let h = start(backend.clone(), handshake());
    let codes = *h.caller.codes();

    assert_eq!(h.caller.open(1, "/held.bin", codes.open_create).unwrap(), codes.ok);
    assert_eq!(h.caller.lock(1, EXCLUSIVE).unwrap(), codes.ok);
    assert!(backend.is_held("/held.bin"));

    drop(h);
    assert!(!backend.is_held("/held.bin"));
}

#[test]
fn test_caller_times_out_without_a_proxy() {
    let handshake = handshake();
    let caller = Caller::connect(&handshake).unwrap().with_timeout(Duration::from_millis(50));
    let err = caller.mkdir("/nobody").unwrap_err();
    assert!(matches!(err, ProxyError::Timeout { .. }), "{err}");
}
