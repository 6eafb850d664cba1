//! # Backend
//!
//! Asynchronous hierarchical key/blob stores the Tether proxy serves requests from.
//!
//! A backend exposes directories, file entries, and at most one exclusive
//! [`AccessHandle`] per file at a time. Exclusivity is enforced by the store itself, so
//! two proxies sharing one backend contend for the same handles:
//!
//! * [`MemoryBackend`] keeps the tree in memory; clones share it.
//! * [`FsBackend`] maps the tree onto a directory of the local filesystem through
//!   `tokio::fs`; every instance in the process shares one table of held files.
//!
//! ## Example
//!
//! ```rust
//! use tether_backend::{AccessHandle, Backend, MemoryBackend};
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let backend = MemoryBackend::new();
//! let db = backend.directory(&backend.root(), "db", true).await.unwrap();
//! let file = backend.file(&db, "main.db", true).await.unwrap();
//!
//! let mut handle = backend.open_access(&file).await.unwrap();
//! assert!(backend.open_access(&file).await.unwrap_err().is_conflict());
//!
//! handle.write_at(b"hello", 0).await.unwrap();
//! assert_eq!(handle.size().await.unwrap(), 5);
//! handle.close().await.unwrap();
//! # });
//! ```

mod error;
mod fs;
mod memory;
pub mod path;

pub use crate::error::{BackendError, BackendErrorExt};
pub use crate::fs::{FsAccess, FsBackend, FsDir, FsFile};
pub use crate::memory::{MAX_MEMORY_FILE_SIZE, MemoryAccess, MemoryBackend, MemoryDir, MemoryFile};

use std::fmt;
use std::future::Future;

/// A hierarchical store with per-file exclusive access handles.
///
/// Directory and file handles are cheap references into the tree; they stay valid
/// after the entry is removed, but every later use reports [`BackendError::NotFound`].
pub trait Backend: Clone + Send + Sync + fmt::Debug + 'static {
    type Dir: Clone + Send + Sync + fmt::Debug + 'static;
    type File: Clone + Send + Sync + fmt::Debug + 'static;
    type Access: AccessHandle;

    /// The top-level directory.
    fn root(&self) -> Self::Dir;

    /// Looks up (or creates) the sub-directory `name` of `parent`.
    fn directory(
        &self,
        parent: &Self::Dir,
        name: &str,
        create: bool,
    ) -> impl Future<Output = Result<Self::Dir, BackendError>> + Send;

    /// Looks up (or creates, empty) the file `name` in `dir`.
    fn file(
        &self,
        dir: &Self::Dir,
        name: &str,
        create: bool,
    ) -> impl Future<Output = Result<Self::File, BackendError>> + Send;

    /// Removes the entry `name` from `dir`.
    ///
    /// Non-empty directories need `recursive`. Files with an open access handle are
    /// refused with [`BackendError::Conflict`].
    fn remove_entry(
        &self,
        dir: &Self::Dir,
        name: &str,
        recursive: bool,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Takes the exclusive access handle of `file`.
    ///
    /// Fails with [`BackendError::Conflict`] while any other handle to the same file is
    /// open, through this backend value or any other sharing the same store.
    fn open_access(
        &self,
        file: &Self::File,
    ) -> impl Future<Output = Result<Self::Access, BackendError>> + Send;
}

/// The exclusive, byte-addressed handle of one file.
///
/// Dropping a handle without [`AccessHandle::close`] still releases it.
pub trait AccessHandle: Send + fmt::Debug + 'static {
    /// Reads into `buf` from `offset`, returning fewer bytes only at end of file.
    fn read_at(
        &mut self,
        buf: &mut [u8],
        offset: u64,
    ) -> impl Future<Output = Result<usize, BackendError>> + Send;

    /// Writes `data` at `offset`, zero-extending the file if needed.
    fn write_at(
        &mut self,
        data: &[u8],
        offset: u64,
    ) -> impl Future<Output = Result<usize, BackendError>> + Send;

    fn truncate(&mut self, len: u64) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn flush(&mut self) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn size(&mut self) -> impl Future<Output = Result<u64, BackendError>> + Send;

    /// Releases the handle; the file can be opened again once this resolves.
    fn close(self) -> impl Future<Output = Result<(), BackendError>> + Send;
}
