use crate::error::{ProxyError, ProxyErrorExt};
use crate::metrics::timed;
use crate::registry::OpenFile;
use crate::session::Session;
use tether_backend::path::normalize;
use tether_backend::{AccessHandle, Backend, BackendError};
use tether_channel::{OpKind, PRUNE_EMPTY_PARENTS, ProxyFlags, Request, Value};
use tracing::{debug, warn};

impl<B: Backend> Session<B> {
    /// Runs one request to completion and returns its result code.
    ///
    /// Failures are logged, optionally captured into the payload, and mapped to the
    /// op's own I/O code.
    pub(crate) async fn handle(&mut self, request: Request) -> i32 {
        let kind = request.kind();
        let fid = request.fid();
        let codes = self.codes;

        let (result, fallback) = match request {
            Request::Open { fid, path, flags, proxy_flags } => {
                (self.open(fid, &path, flags, proxy_flags).await, codes.io_err)
            },
            Request::Close { fid } => (self.close(fid).await, codes.io_err),
            Request::Read { fid, len, offset } => (self.read(fid, len, offset).await, codes.io_err_read),
            Request::Write { fid, len, offset } => {
                (self.write(fid, len, offset).await, codes.io_err_write)
            },
            Request::Truncate { fid, size } => (self.truncate(fid, size).await, codes.io_err_truncate),
            Request::Sync { fid, .. } => (self.sync(fid).await, codes.io_err_fsync),
            Request::Lock { fid, level } => (self.lock(fid, level).await, codes.io_err_lock),
            Request::Unlock { fid, level } => (self.unlock(fid, level).await, codes.io_err_unlock),
            Request::Access { path } => (self.access(&path).await, codes.io_err),
            Request::Delete { path, sync_dir, recursive } => {
                (self.delete(&path, sync_dir, recursive).await, codes.io_err_delete)
            },
            Request::FileSize { fid } => (self.file_size(fid).await, codes.io_err),
            Request::Mkdir { path } => (self.mkdir(&path).await, codes.io_err),
        };

        let rc = match result {
            Ok(rc) => rc,
            Err(err) => {
                let fallback = match (kind, &err) {
                    (OpKind::Open, err) if err.backend_cause().is_some_and(BackendError::is_not_found) => {
                        codes.not_found
                    },
                    (OpKind::Close, ProxyError::UnknownFile { .. }) => codes.not_found,
                    _ => fallback,
                };
                self.fail(Some(kind), &err, fallback)
            },
        };

        if let Some(fid) = fid
            && kind != OpKind::Close
        {
            self.release_if_unlock_asap(fid).await;
        }
        rc
    }

    async fn open(
        &mut self,
        fid: i32,
        path: &str,
        flags: i32,
        proxy_flags: ProxyFlags,
    ) -> Result<i32, ProxyError> {
        if self.registry.get(fid).is_ok() {
            return Err(ProxyError::DuplicateFile { fid, context: Some(path.to_owned().into()) });
        }
        let mode = self.codes.open_mode(flags);
        let (dir, leaf, abs) = self.resolve(path, mode.create).await?;

        if proxy_flags.contains(ProxyFlags::UNLINK_BEFORE_OPEN) {
            let (removed, waited) = timed(self.backend.remove_entry(&dir, &leaf, false)).await;
            self.note_wait(waited);
            if let Err(err) = removed {
                debug!(fid, path = %abs, error = %err, "Ignoring unlink-before-open failure");
            }
        }

        let (file, waited) = timed(self.backend.file(&dir, &leaf, mode.create)).await;
        self.note_wait(waited);
        let file = file.context(abs.clone())?;

        debug!(fid, path = %abs, ?mode, "Opened file");
        self.registry.insert(OpenFile {
            fid,
            path: abs,
            leaf,
            dir,
            file,
            access: None,
            lock_level: self.codes.lock_none,
            read_only: mode.read_only,
            delete_on_close: mode.delete_on_close,
            release_implicit: proxy_flags.contains(ProxyFlags::UNLOCK_ASAP) || self.options.unlock_asap,
        })?;
        Ok(self.codes.ok)
    }

    async fn close(&mut self, fid: i32) -> Result<i32, ProxyError> {
        self.registry.get(fid)?;
        if let Err(err) = self.release(fid).await {
            warn!(fid, error = %err, "Failed to release access handle on close");
        }

        if let Some(record) = self.registry.remove(fid)
            && record.delete_on_close
        {
            let (removed, waited) =
                timed(self.backend.remove_entry(&record.dir, &record.leaf, false)).await;
            self.note_wait(waited);
            if let Err(err) = removed {
                warn!(fid, path = %record.path, error = %err, "Failed to delete file on close");
            }
        }
        Ok(self.codes.ok)
    }

    async fn read(&mut self, fid: i32, len: usize, offset: u64) -> Result<i32, ProxyError> {
        self.check_len(len)?;
        self.acquire(fid).await?;

        let mut buf = vec![0; len];
        let access = self.registry.access_mut(fid)?;
        let (read, waited) = timed(access.read_at(&mut buf, offset)).await;
        self.note_wait(waited);
        let n = read?.min(len);
        buf[n..].fill(0);

        self.channel.io_region().with_file_buffer(|region| region[..len].copy_from_slice(&buf));
        if n < len {
            debug!(fid, offset, len, n, "Short read");
            return Ok(self.codes.io_err_short_read);
        }
        Ok(self.codes.ok)
    }

    async fn write(&mut self, fid: i32, len: usize, offset: u64) -> Result<i32, ProxyError> {
        self.check_writable(fid)?;
        self.check_len(len)?;
        let data = self.channel.io_region().with_file_buffer(|region| region[..len].to_vec());
        self.acquire(fid).await?;

        let access = self.registry.access_mut(fid)?;
        let (written, waited) = timed(access.write_at(&data, offset)).await;
        self.note_wait(waited);
        let n = written?;
        if n != len {
            return Err(ProxyError::Internal {
                message: format!("wrote {n} of {len} bytes").into(),
                context: Some(format!("file {fid}").into()),
            });
        }
        Ok(self.codes.ok)
    }

    async fn truncate(&mut self, fid: i32, size: u64) -> Result<i32, ProxyError> {
        self.check_writable(fid)?;
        self.acquire(fid).await?;

        let access = self.registry.access_mut(fid)?;
        let (truncated, waited) = timed(access.truncate(size)).await;
        self.note_wait(waited);
        truncated?;
        Ok(self.codes.ok)
    }

    /// Flushes only what is already held; never takes a handle.
    async fn sync(&mut self, fid: i32) -> Result<i32, ProxyError> {
        let record = self.registry.get_mut(fid)?;
        if record.read_only {
            return Ok(self.codes.ok);
        }
        let Some(access) = record.access.as_mut() else {
            return Ok(self.codes.ok);
        };
        let (flushed, waited) = timed(access.flush()).await;
        self.note_wait(waited);
        flushed?;
        Ok(self.codes.ok)
    }

    async fn lock(&mut self, fid: i32, level: i32) -> Result<i32, ProxyError> {
        let none = self.codes.lock_none;
        let record = self.registry.get_mut(fid)?;
        let previous = std::mem::replace(&mut record.lock_level, level);
        let held = record.access.is_some();
        if level == none {
            return Ok(self.codes.ok);
        }

        if !held && let Err(err) = self.acquire(fid).await {
            if let Ok(record) = self.registry.get_mut(fid) {
                record.lock_level = previous;
            }
            return Err(err);
        }
        self.registry.unmark_auto_lock(fid);
        Ok(self.codes.ok)
    }

    async fn unlock(&mut self, fid: i32, level: i32) -> Result<i32, ProxyError> {
        let record = self.registry.get_mut(fid)?;
        record.lock_level = level;
        if level == self.codes.lock_none && record.access.is_some() {
            self.release(fid).await?;
        }
        Ok(self.codes.ok)
    }

    async fn access(&mut self, path: &str) -> Result<i32, ProxyError> {
        let (dir, leaf, abs) = self.resolve(path, false).await?;
        let (file, waited) = timed(self.backend.file(&dir, &leaf, false)).await;
        self.note_wait(waited);
        file.context(abs)?;
        Ok(self.codes.ok)
    }

    async fn delete(&mut self, path: &str, sync_dir: i32, recursive: bool) -> Result<i32, ProxyError> {
        let (dir, leaf, abs) = self.resolve(path, false).await?;
        let (removed, waited) = timed(self.backend.remove_entry(&dir, &leaf, recursive)).await;
        self.note_wait(waited);
        removed.context(abs.clone())?;

        if sync_dir == PRUNE_EMPTY_PARENTS {
            self.prune_parents(&abs).await;
        }
        Ok(self.codes.ok)
    }

    /// Removes the ancestors of `path` bottom-up while they are empty.
    async fn prune_parents(&mut self, path: &str) {
        let parts: Vec<String> = normalize(path).into_iter().map(str::to_owned).collect();
        let names: Vec<&str> = parts.iter().map(String::as_str).collect();

        for depth in (1..names.len()).rev() {
            let (parents, name) = (&names[..depth - 1], names[depth - 1]);
            let dir = match self.resolve_dir(parents, false).await {
                Ok(dir) => dir,
                Err(err) => {
                    debug!(path, error = %err, "Stopped pruning parents");
                    return;
                },
            };
            let (removed, waited) = timed(self.backend.remove_entry(&dir, name, false)).await;
            self.note_wait(waited);
            if let Err(err) = removed {
                debug!(path, dir = name, error = %err, "Stopped pruning parents");
                return;
            }
            debug!(path, dir = name, "Pruned empty parent");
        }
    }

    async fn file_size(&mut self, fid: i32) -> Result<i32, ProxyError> {
        self.acquire(fid).await?;

        let access = self.registry.access_mut(fid)?;
        let (size, waited) = timed(access.size()).await;
        self.note_wait(waited);
        let size = size?;
        self.serialize(&[Value::BigInt(size as i64)])?;
        Ok(self.codes.ok)
    }

    async fn mkdir(&mut self, path: &str) -> Result<i32, ProxyError> {
        let parts = normalize(path);
        self.resolve_dir(&parts, true).await?;
        Ok(self.codes.ok)
    }

    fn check_len(&self, len: usize) -> Result<(), ProxyError> {
        let capacity = self.channel.io_region().file_buffer_size();
        if len > capacity {
            return Err(ProxyError::invalid_request(format!(
                "{len} bytes exceed the {capacity}-byte file buffer"
            )));
        }
        Ok(())
    }

    fn check_writable(&self, fid: i32) -> Result<(), ProxyError> {
        let record = self.registry.get(fid)?;
        if record.read_only {
            return Err(ProxyError::ReadOnly { fid, context: Some(record.path.clone().into()) });
        }
        Ok(())
    }
}
