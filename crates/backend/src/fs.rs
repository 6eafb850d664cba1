use crate::error::{BackendError, BackendErrorExt};
use crate::path::validate_name;
use crate::{AccessHandle, Backend};
use fxhash::FxHashSet;
use parking_lot::Mutex;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, trace};

/// Files with an open [`FsAccess`], shared by every [`FsBackend`] in the process.
static HELD: LazyLock<Mutex<FxHashSet<PathBuf>>> = LazyLock::new(Mutex::default);

/// A directory of an [`FsBackend`] tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FsDir(Arc<Path>);

/// A file of an [`FsBackend`] tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FsFile(Arc<Path>);

impl FsDir {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl FsFile {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.0
    }
}

/// Serves the tree below a root directory of the local filesystem.
#[derive(Debug, Clone)]
pub struct FsBackend {
    root: Arc<Path>,
}

impl FsBackend {
    /// Opens (creating if needed) the tree rooted at `root`.
    ///
    /// # Errors
    /// [`BackendError::Io`] when the root cannot be created or canonicalized.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, BackendError> {
        let root = root.into();
        fs::create_dir_all(&root).await.context(format!("Failed to create {}", root.display()))?;
        let root = fs::canonicalize(&root)
            .await
            .context(format!("Failed to canonicalize {}", root.display()))?;
        debug!(root = %root.display(), "Filesystem backend ready");
        Ok(Self { root: root.into() })
    }

    #[must_use]
    pub fn root_path(&self) -> &Path {
        &self.root
    }
}

async fn kind_of(path: &Path) -> Result<Option<bool>, BackendError> {
    match fs::symlink_metadata(path).await {
        Ok(meta) => Ok(Some(meta.is_dir())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(BackendError::from_io(e, path)),
    }
}

async fn ensure_dir(path: &Path) -> Result<(), BackendError> {
    match kind_of(path).await? {
        Some(true) => Ok(()),
        Some(false) => Err(BackendError::type_mismatch(path.display().to_string())),
        None => Err(BackendError::not_found(path.display().to_string())),
    }
}

impl Backend for FsBackend {
    type Dir = FsDir;
    type File = FsFile;
    type Access = FsAccess;

    fn root(&self) -> FsDir {
        FsDir(Arc::clone(&self.root))
    }

    async fn directory(&self, parent: &FsDir, name: &str, create: bool) -> Result<FsDir, BackendError> {
        validate_name(name)?;
        ensure_dir(parent.path()).await?;

        let path = parent.path().join(name);
        match kind_of(&path).await? {
            Some(true) => {},
            Some(false) => return Err(BackendError::type_mismatch(path.display().to_string())),
            None if create => {
                match fs::create_dir(&path).await {
                    Ok(()) => trace!(path = %path.display(), "Created directory"),
                    Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {},
                    Err(e) => return Err(BackendError::from_io(e, &path)),
                }
            },
            None => return Err(BackendError::not_found(path.display().to_string())),
        }
        Ok(FsDir(path.into()))
    }

    async fn file(&self, dir: &FsDir, name: &str, create: bool) -> Result<FsFile, BackendError> {
        validate_name(name)?;
        ensure_dir(dir.path()).await?;

        let path = dir.path().join(name);
        match kind_of(&path).await? {
            Some(false) => {},
            Some(true) => return Err(BackendError::type_mismatch(path.display().to_string())),
            None if create => {
                fs::OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(false)
                    .open(&path)
                    .await
                    .map_err(|e| BackendError::from_io(e, &path))?;
                trace!(path = %path.display(), "Created file");
            },
            None => return Err(BackendError::not_found(path.display().to_string())),
        }
        Ok(FsFile(path.into()))
    }

    async fn remove_entry(&self, dir: &FsDir, name: &str, recursive: bool) -> Result<(), BackendError> {
        validate_name(name)?;
        let path = dir.path().join(name);

        let removed = match kind_of(&path).await? {
            None => return Err(BackendError::not_found(path.display().to_string())),
            Some(false) => {
                if HELD.lock().contains(&path) {
                    return Err(BackendError::conflict(format!(
                        "{} has an open access handle",
                        path.display()
                    )));
                }
                fs::remove_file(&path).await
            },
            Some(true) if recursive => {
                if HELD.lock().iter().any(|held| held.starts_with(&path)) {
                    return Err(BackendError::conflict(format!(
                        "{} contains a file with an open access handle",
                        path.display()
                    )));
                }
                fs::remove_dir_all(&path).await
            },
            Some(true) => fs::remove_dir(&path).await,
        };
        removed.map_err(|e| BackendError::from_io(e, &path))?;
        trace!(path = %path.display(), "Removed entry");
        Ok(())
    }

    async fn open_access(&self, file: &FsFile) -> Result<FsAccess, BackendError> {
        let path = file.path().to_path_buf();
        if !HELD.lock().insert(path.clone()) {
            return Err(BackendError::conflict(format!(
                "{} already has an open access handle",
                path.display()
            )));
        }

        // From here on the guard owns the `HELD` entry, including on the error path.
        let mut access = FsAccess { file: None, path };
        let opened = fs::OpenOptions::new().read(true).write(true).open(&access.path).await;
        access.file = Some(opened.map_err(|e| BackendError::from_io(e, &access.path))?);
        Ok(access)
    }
}

/// Exclusive handle of one [`FsBackend`] file.
#[derive(Debug)]
pub struct FsAccess {
    file: Option<fs::File>,
    path: PathBuf,
}

impl FsAccess {
    fn file(&mut self) -> Result<&mut fs::File, BackendError> {
        let path = &self.path;
        self.file.as_mut().ok_or_else(|| BackendError::not_found(path.display().to_string()))
    }
}

impl AccessHandle for FsAccess {
    async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, BackendError> {
        let file = self.file()?;
        file.seek(SeekFrom::Start(offset)).await?;

        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]).await? {
                0 => break,
                n => filled += n,
            }
        }
        Ok(filled)
    }

    async fn write_at(&mut self, data: &[u8], offset: u64) -> Result<usize, BackendError> {
        let file = self.file()?;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(data.len())
    }

    async fn truncate(&mut self, len: u64) -> Result<(), BackendError> {
        self.file()?.set_len(len).await.context("Failed to resize file")
    }

    async fn flush(&mut self) -> Result<(), BackendError> {
        let file = self.file()?;
        file.flush().await?;
        file.sync_all().await.context("Failed to sync file")
    }

    async fn size(&mut self) -> Result<u64, BackendError> {
        Ok(self.file()?.metadata().await?.len())
    }

    async fn close(mut self) -> Result<(), BackendError> {
        if let Some(mut file) = self.file.take() {
            file.flush().await.context("Failed to flush on close")?;
        }
        Ok(())
    }
}

impl Drop for FsAccess {
    fn drop(&mut self) {
        HELD.lock().remove(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_handles_are_exclusive_across_instances() {
        let tmp = tempdir().unwrap();
        let one = FsBackend::open(tmp.path()).await.unwrap();
        let two = FsBackend::open(tmp.path()).await.unwrap();

        let dir = one.directory(&one.root(), "db", true).await.unwrap();
        let file = one.file(&dir, "a.bin", true).await.unwrap();

        let handle = one.open_access(&file).await.unwrap();
        let file_two = two.file(&two.directory(&two.root(), "db", false).await.unwrap(), "a.bin", false)
            .await
            .unwrap();
        assert!(two.open_access(&file_two).await.unwrap_err().is_conflict());
        assert!(one.remove_entry(&dir, "a.bin", false).await.unwrap_err().is_conflict());

        handle.close().await.unwrap();
        two.open_access(&file_two).await.unwrap();
    }

    #[tokio::test]
    async fn test_read_write_truncate() {
        let tmp = tempdir().unwrap();
        let backend = FsBackend::open(tmp.path().join("root")).await.unwrap();
        let file = backend.file(&backend.root(), "data.bin", true).await.unwrap();
        let mut handle = backend.open_access(&file).await.unwrap();

        assert_eq!(handle.write_at(b"abcdef", 2).await.unwrap(), 6);
        assert_eq!(handle.size().await.unwrap(), 8);

        let mut buf = [9u8; 8];
        assert_eq!(handle.read_at(&mut buf, 4).await.unwrap(), 4);
        assert_eq!(&buf[..4], b"cdef");

        handle.truncate(3).await.unwrap();
        handle.flush().await.unwrap();
        assert_eq!(handle.size().await.unwrap(), 3);
        handle.close().await.unwrap();

        assert_eq!(std::fs::read(tmp.path().join("root/data.bin")).unwrap(), vec![0, 0, b'a']);
    }

    #[tokio::test]
    async fn test_missing_entries_and_removal() {
        let tmp = tempdir().unwrap();
        let backend = FsBackend::open(tmp.path()).await.unwrap();
        let root = backend.root();

        assert!(backend.file(&root, "nope", false).await.unwrap_err().is_not_found());
        assert!(backend.directory(&root, "nope", false).await.unwrap_err().is_not_found());

        let sub = backend.directory(&root, "sub", true).await.unwrap();
        backend.file(&sub, "x", true).await.unwrap();
        let err = backend.remove_entry(&root, "sub", false).await.unwrap_err();
        assert!(matches!(err, BackendError::NotEmpty { .. }));

        backend.remove_entry(&root, "sub", true).await.unwrap();
        assert!(backend.file(&sub, "x", false).await.unwrap_err().is_not_found());
    }
}
