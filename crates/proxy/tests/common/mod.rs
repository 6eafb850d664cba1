#![allow(dead_code, unreachable_pub)]

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tether_backend::{Backend, BackendError};
use tether_proxy::{Caller, Handshake, Proxy};

pub const EXCLUSIVE: i32 = 4;
pub const NONE: i32 = 0;

/// A proxy plus a caller attached to the same regions.
pub struct Harness {
    pub proxy: Proxy,
    pub caller: Caller,
    pub handshake: Handshake,
}

/// A small handshake with a short idle window so maintenance shows up quickly.
pub fn handshake() -> Handshake {
    Handshake::new(4096).with_wait_window(Duration::from_millis(50))
}

pub fn start<B: Backend>(backend: B, handshake: Handshake) -> Harness {
    let proxy = Proxy::spawn(backend).unwrap();
    proxy.init(handshake.clone()).unwrap();
    let caller = Caller::connect(&handshake).unwrap().with_timeout(Duration::from_secs(10));
    Harness { proxy, caller, handshake }
}

pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

/// Polls `check` until it holds or `timeout` passes.
pub fn eventually(timeout: Duration, check: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    check()
}

/// Wraps a backend and fails the next `failures` handle acquisitions with a transient
/// I/O error, or with a panic when built through [`FlakyBackend::panicking`].
#[derive(Debug, Clone)]
pub struct FlakyBackend<B> {
    inner: B,
    failures: Arc<AtomicU32>,
    panics: bool,
}

impl<B: Backend> FlakyBackend<B> {
    pub fn new(inner: B, failures: u32) -> Self {
        Self { inner, failures: Arc::new(AtomicU32::new(failures)), panics: false }
    }

    pub fn panicking(inner: B, failures: u32) -> Self {
        Self { panics: true, ..Self::new(inner, failures) }
    }

    pub fn remaining(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }
}

impl<B: Backend> Backend for FlakyBackend<B> {
    type Dir = B::Dir;
    type File = B::File;
    type Access = B::Access;

    fn root(&self) -> Self::Dir {
        self.inner.root()
    }

    async fn directory(&self, parent: &Self::Dir, name: &str, create: bool) -> Result<Self::Dir, BackendError> {
        self.inner.directory(parent, name, create).await
    }

    async fn file(&self, dir: &Self::Dir, name: &str, create: bool) -> Result<Self::File, BackendError> {
        self.inner.file(dir, name, create).await
    }

    async fn remove_entry(&self, dir: &Self::Dir, name: &str, recursive: bool) -> Result<(), BackendError> {
        self.inner.remove_entry(dir, name, recursive).await
    }

    async fn open_access(&self, file: &Self::File) -> Result<Self::Access, BackendError> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing && self.panics {
            panic!("backend blew up");
        }
        if failing {
            return Err(BackendError::Io { source: io::Error::other("transient failure"), context: None });
        }
        self.inner.open_access(file).await
    }
}
