use crate::autolock::AutoLocks;
use crate::error::ProxyError;
use crate::retry::{Exhausted, RetryPolicy, retry};
use fxhash::FxHashMap;
use tether_backend::{AccessHandle, Backend, BackendError};
use tracing::{debug, warn};

/// One open file, from `open` until `close`.
#[derive(Debug)]
pub(crate) struct OpenFile<B: Backend> {
    pub(crate) fid: i32,
    /// Normalized absolute path, for diagnostics.
    pub(crate) path: String,
    pub(crate) leaf: String,
    pub(crate) dir: B::Dir,
    pub(crate) file: B::File,
    /// Present iff the file currently holds the backend's exclusive lock.
    pub(crate) access: Option<B::Access>,
    pub(crate) lock_level: i32,
    pub(crate) read_only: bool,
    pub(crate) delete_on_close: bool,
    pub(crate) release_implicit: bool,
}

/// Open files by id plus the set of implicitly held handles.
#[derive(Debug)]
pub(crate) struct Registry<B: Backend> {
    files: FxHashMap<i32, OpenFile<B>>,
    auto_locks: AutoLocks,
    lock_none: i32,
}

impl<B: Backend> Registry<B> {
    pub(crate) fn new(lock_none: i32) -> Self {
        Self { files: FxHashMap::default(), auto_locks: AutoLocks::default(), lock_none }
    }

    pub(crate) fn insert(&mut self, file: OpenFile<B>) -> Result<(), ProxyError> {
        if self.files.contains_key(&file.fid) {
            return Err(ProxyError::DuplicateFile { fid: file.fid, context: Some(file.path.into()) });
        }
        self.files.insert(file.fid, file);
        Ok(())
    }

    /// Drops the record; the caller must have released its handle first.
    pub(crate) fn remove(&mut self, fid: i32) -> Option<OpenFile<B>> {
        self.auto_locks.remove(fid);
        self.files.remove(&fid)
    }

    pub(crate) fn get(&self, fid: i32) -> Result<&OpenFile<B>, ProxyError> {
        self.files.get(&fid).ok_or(ProxyError::unknown_file(fid))
    }

    pub(crate) fn get_mut(&mut self, fid: i32) -> Result<&mut OpenFile<B>, ProxyError> {
        self.files.get_mut(&fid).ok_or(ProxyError::unknown_file(fid))
    }

    /// The held access handle of `fid`.
    pub(crate) fn access_mut(&mut self, fid: i32) -> Result<&mut B::Access, ProxyError> {
        self.get_mut(fid)?.access.as_mut().ok_or_else(|| ProxyError::Internal {
            message: "access handle is not held".into(),
            context: Some(format!("file {fid}").into()),
        })
    }

    pub(crate) const fn auto_locks(&self) -> &AutoLocks {
        &self.auto_locks
    }

    /// Forgets an implicit registration; the handle, if any, becomes explicit.
    pub(crate) fn unmark_auto_lock(&mut self, fid: i32) {
        if self.auto_locks.remove(fid) {
            debug!(fid, "Implicit lock became explicit");
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.files.len()
    }

    pub(crate) fn fids(&self) -> Vec<i32> {
        self.files.keys().copied().collect()
    }

    /// Takes the exclusive handle of `fid` unless it is already held.
    ///
    /// Without a recorded explicit lock level the handle is registered as implicit.
    pub(crate) async fn acquire(
        &mut self,
        backend: &B,
        policy: &RetryPolicy,
        fid: i32,
    ) -> Result<(), ProxyError> {
        let record = self.files.get_mut(&fid).ok_or(ProxyError::unknown_file(fid))?;
        if record.access.is_some() {
            return Ok(());
        }

        let file = &record.file;
        let path = record.path.as_str();
        let access = retry(policy, "acquire access handle", move |attempt| {
            debug!(fid, path, attempt, "Acquiring access handle");
            backend.open_access(file)
        })
        .await
        .map_err(|Exhausted { attempts, last }: Exhausted<BackendError>| {
            ProxyError::HandleAcquisition {
                fid,
                attempts,
                cause: last,
                context: Some(record.path.clone().into()),
            }
        })?;

        record.access = Some(access);
        if record.lock_level == self.lock_none {
            self.auto_locks.insert(fid);
            debug!(fid, path = %record.path, "Access handle taken implicitly");
        }
        Ok(())
    }

    /// Clears the lock level and closes the held handle, if any.
    ///
    /// Returns whether a handle was closed.
    pub(crate) async fn release(&mut self, fid: i32) -> Result<bool, ProxyError> {
        self.auto_locks.remove(fid);
        let Some(record) = self.files.get_mut(&fid) else {
            return Ok(false);
        };
        record.lock_level = self.lock_none;
        let Some(access) = record.access.take() else {
            return Ok(false);
        };

        debug!(fid, path = %record.path, "Releasing access handle");
        access.close().await.map_err(|source| ProxyError::Backend {
            source,
            context: Some(format!("closing access handle of {}", record.path).into()),
        })?;
        Ok(true)
    }

    /// Releases every implicitly held handle, logging failures.
    pub(crate) async fn release_auto_locks(&mut self) -> usize {
        let mut released = 0;
        for fid in self.auto_locks.take_all() {
            match self.release(fid).await {
                Ok(true) => released += 1,
                Ok(false) => {},
                Err(err) => warn!(fid, error = %err, "Failed to release implicit lock"),
            }
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tether_backend::MemoryBackend;

    async fn open(backend: &MemoryBackend, registry: &mut Registry<MemoryBackend>, fid: i32, name: &str) {
        let dir = backend.root();
        let file = backend.file(&dir, name, true).await.unwrap();
        registry
            .insert(OpenFile {
                fid,
                path: format!("/{name}"),
                leaf: name.to_owned(),
                dir,
                file,
                access: None,
                lock_level: 0,
                read_only: false,
                delete_on_close: false,
                release_implicit: false,
            })
            .unwrap();
    }

    #[tokio::test]
    async fn test_implicit_acquire_is_tracked_until_released() {
        let backend = MemoryBackend::new();
        let mut registry = Registry::new(0);
        open(&backend, &mut registry, 1, "a.bin").await;

        registry.acquire(&backend, &RetryPolicy::default(), 1).await.unwrap();
        assert!(registry.auto_locks().contains(1));
        assert!(backend.is_held("/a.bin"));

        assert_eq!(registry.release_auto_locks().await, 1);
        assert!(registry.auto_locks().is_empty());
        assert!(!backend.is_held("/a.bin"));
        assert!(registry.get(1).unwrap().access.is_none());
    }

    #[tokio::test]
    async fn test_explicit_level_is_not_tracked() {
        let backend = MemoryBackend::new();
        let mut registry = Registry::new(0);
        open(&backend, &mut registry, 1, "a.bin").await;

        registry.get_mut(1).unwrap().lock_level = 4;
        registry.acquire(&backend, &RetryPolicy::default(), 1).await.unwrap();
        assert!(!registry.auto_locks().contains(1));

        assert!(registry.release(1).await.unwrap());
        assert_eq!(registry.get(1).unwrap().lock_level, 0);
        assert!(!registry.release(1).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_contention_exhausts_retries() {
        let backend = MemoryBackend::new();
        let mut registry = Registry::new(0);
        open(&backend, &mut registry, 1, "a.bin").await;
        let file = registry.get(1).unwrap().file;
        let _other = backend.open_access(&file).await.unwrap();

        let policy = RetryPolicy::new(2, Duration::from_millis(50));
        let err = registry.acquire(&backend, &policy, 1).await.unwrap_err();
        match err {
            ProxyError::HandleAcquisition { fid: 1, attempts: 2, cause, .. } => {
                assert!(cause.is_conflict());
            },
            other => panic!("unexpected {other}"),
        }
        assert!(registry.auto_locks().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_and_unknown_ids() {
        let backend = MemoryBackend::new();
        let mut registry = Registry::new(0);
        open(&backend, &mut registry, 1, "a.bin").await;

        let dir = backend.root();
        let file = backend.file(&dir, "b.bin", true).await.unwrap();
        let err = registry
            .insert(OpenFile {
                fid: 1,
                path: "/b.bin".into(),
                leaf: "b.bin".into(),
                dir,
                file,
                access: None,
                lock_level: 0,
                read_only: false,
                delete_on_close: false,
                release_implicit: false,
            })
            .unwrap_err();
        assert!(matches!(err, ProxyError::DuplicateFile { fid: 1, .. }));

        let err = registry.acquire(&backend, &RetryPolicy::default(), 9).await.unwrap_err();
        assert!(matches!(err, ProxyError::UnknownFile { fid: 9, .. }));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.fids(), vec![1]);
    }
}
