use tempfile::tempdir;
use tether_backend::{FsBackend, MemoryBackend};
use tether_cli::commands::{SoakPlan, check, soak};
use tether_proxy::Handshake;

#[test]
fn test_check_against_memory() {
    let report = check(MemoryBackend::new(), &Handshake::new(4096), 512).unwrap();
    let names: Vec<_> = report.steps.iter().map(|step| step.name).collect();
    assert_eq!(names, ["open", "write", "file-size", "read", "close", "delete"]);
    assert!(report.steps.iter().all(|step| step.rc == 0));
    assert_eq!(report.metrics.total_requests(), 6);
    assert!(report.to_string().contains("file-size"));
}

#[test]
fn test_check_against_filesystem_cleans_up() {
    let dir = tempdir().unwrap();
    let runtime = tether_runtime::build_proxy_runtime().unwrap();
    let backend = runtime.block_on(FsBackend::open(dir.path())).unwrap();

    check(backend, &Handshake::new(4096), 1000).unwrap();
    assert!(!dir.path().join("tether-check").exists());
}

#[test]
fn test_check_rejects_oversized_payload() {
    let err = check(MemoryBackend::new(), &Handshake::new(256), 512).unwrap_err();
    assert!(err.to_string().contains("file buffer"), "{err}");
}

#[test]
fn test_soak_rotates_files() {
    let backend = MemoryBackend::new();
    let plan = SoakPlan { iterations: 12, size: 128, files: 3 };
    let report = soak(backend.clone(), &Handshake::new(4096), plan).unwrap();

    assert_eq!(report.cycles, 12);
    assert_eq!(report.steps.len(), 3);
    assert_eq!(report.metrics.op(tether_channel::OpKind::Lock).count, 12);
    assert!(!backend.exists("/tether-soak"));
}
