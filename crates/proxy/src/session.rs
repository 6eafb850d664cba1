use crate::error::ProxyError;
use crate::handshake::SessionOptions;
use crate::metrics::{Metrics, timed};
use crate::registry::Registry;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tether_backend::{Backend, path::normalize};
use tether_channel::{ControlChannel, OpKind, Request, ResultCodes, Value};
use tether_logger::{LevelFilter, level_for_verbosity};
use tracing::{debug, error, warn};

/// Longest exception description written into the codec region.
const MAX_EXCEPTION_LEN: usize = 1024;

/// State of one initialized proxy, handed to every handler.
#[derive(Debug)]
pub(crate) struct Session<B: Backend> {
    pub(crate) backend: B,
    pub(crate) channel: ControlChannel,
    pub(crate) codes: ResultCodes,
    pub(crate) options: SessionOptions,
    pub(crate) registry: Registry<B>,
    pub(crate) metrics: Arc<Metrics>,
    level: LevelFilter,
    /// Backend time spent by the request being serviced.
    backend_wait: Duration,
}

impl<B: Backend> Session<B> {
    pub(crate) fn new(
        backend: B,
        channel: ControlChannel,
        options: SessionOptions,
        metrics: Arc<Metrics>,
    ) -> Self {
        let codes = *channel.codes();
        Self {
            backend,
            channel,
            codes,
            options,
            registry: Registry::new(codes.lock_none),
            metrics,
            level: level_for_verbosity(options.verbosity),
            backend_wait: Duration::ZERO,
        }
    }

    /// Services the request announced by `code` and publishes its result.
    pub(crate) async fn service(&mut self, code: i32) {
        let started = Instant::now();
        self.backend_wait = Duration::ZERO;

        let Some(kind) = self.channel.ops().kind(code) else {
            if self.level >= LevelFilter::ERROR {
                error!(code, "No handler for op code");
            }
            let _ = self.deserialize();
            let err = ProxyError::invalid_request(format!("unknown op code {code}"));
            let rc = self.fail(None, &err, self.codes.io_err);
            self.metrics.record_unknown(started.elapsed());
            self.channel.complete(rc);
            return;
        };

        let request = self
            .deserialize()
            .and_then(|args| Request::from_args(kind, args).map_err(ProxyError::from));
        let rc = match request {
            Ok(request) => {
                if self.level >= LevelFilter::DEBUG {
                    debug!(op = kind.name(), ?request, "Servicing request");
                }
                self.handle(request).await
            },
            Err(err) => self.fail(Some(kind), &err, self.codes.io_err),
        };

        self.metrics.record_op(kind, started.elapsed(), self.backend_wait);
        self.channel.complete(rc);
    }

    /// Idle maintenance: releases every implicitly held handle.
    pub(crate) async fn idle(&mut self) {
        if self.registry.auto_locks().is_empty() {
            return;
        }
        let pending = self.registry.auto_locks().len();
        let released = self.registry.release_auto_locks().await;
        if self.level >= LevelFilter::DEBUG {
            debug!(pending, released, "Released implicit locks while idle");
        }
    }

    /// Closes every held handle; used when the proxy goes away for good.
    pub(crate) async fn release_all(&mut self) {
        let open = self.registry.len();
        for fid in self.registry.fids() {
            if let Err(err) = self.registry.release(fid).await {
                warn!(fid, error = %err, "Failed to release access handle on teardown");
            }
        }
        debug!(open, "Released every access handle");
    }

    pub(crate) fn serialize(&self, values: &[Value]) -> Result<(), ProxyError> {
        let started = Instant::now();
        let result = self.channel.codec().serialize(values);
        self.metrics.record_serialize(started.elapsed());
        Ok(result?)
    }

    fn deserialize(&self) -> Result<Vec<Value>, ProxyError> {
        let started = Instant::now();
        let result = self.channel.codec().deserialize(true);
        self.metrics.record_deserialize(started.elapsed());
        Ok(result?)
    }

    /// Logs `err`, captures its description if its priority is enabled, and picks the
    /// result code: contention maps to busy or the lock code, everything else to
    /// `fallback`.
    pub(crate) fn fail(&self, op: Option<OpKind>, err: &ProxyError, fallback: i32) -> i32 {
        let op = op.map_or("unknown", OpKind::name);
        if self.level >= LevelFilter::WARN {
            warn!(op, error = %err, "Operation failed");
        }

        let level = self.options.exception_level;
        if level > 0 && err.priority() <= level {
            let mut text = err.to_string();
            if text.len() > MAX_EXCEPTION_LEN {
                let mut end = MAX_EXCEPTION_LEN;
                while !text.is_char_boundary(end) {
                    end -= 1;
                }
                text.truncate(end);
            }
            if let Err(e) = self.serialize(&[Value::Text(text)]) {
                error!(op, error = %e, "Failed to serialize exception");
            }
        }

        match err {
            ProxyError::HandleAcquisition { cause, .. } if cause.is_conflict() => self.codes.busy,
            ProxyError::HandleAcquisition { .. } => self.codes.io_err_lock,
            _ => fallback,
        }
    }

    /// Walks (or creates) every directory named by `parts`.
    pub(crate) async fn resolve_dir(&mut self, parts: &[&str], create: bool) -> Result<B::Dir, ProxyError> {
        let backend = &self.backend;
        let (dir, waited) = timed(async {
            let mut dir = backend.root();
            for name in parts {
                dir = backend.directory(&dir, name, create).await?;
            }
            Ok::<_, ProxyError>(dir)
        })
        .await;
        self.backend_wait += waited;
        dir
    }

    /// Resolves `path` to its containing directory and leaf name.
    ///
    /// Returns the normalized absolute path alongside.
    pub(crate) async fn resolve(
        &mut self,
        path: &str,
        create_dirs: bool,
    ) -> Result<(B::Dir, String, String), ProxyError> {
        let parts = normalize(path);
        let Some((leaf, parents)) = parts.split_last() else {
            return Err(ProxyError::InvalidPath {
                message: format!("{path:?} names no file").into(),
                context: None,
            });
        };
        let dir = self.resolve_dir(parents, create_dirs).await?;
        Ok((dir, (*leaf).to_owned(), format!("/{}", parts.join("/"))))
    }

    /// Takes the access handle of `fid` if needed, counting the time as backend wait.
    pub(crate) async fn acquire(&mut self, fid: i32) -> Result<(), ProxyError> {
        let (result, waited) =
            timed(self.registry.acquire(&self.backend, &self.options.retry, fid)).await;
        self.backend_wait += waited;
        result
    }

    pub(crate) async fn release(&mut self, fid: i32) -> Result<bool, ProxyError> {
        let (result, waited) = timed(self.registry.release(fid)).await;
        self.backend_wait += waited;
        result
    }

    /// Adds backend time measured by a handler.
    pub(crate) fn note_wait(&mut self, waited: Duration) {
        self.backend_wait += waited;
    }

    /// Releases a handle the current op took implicitly when its file asked for that.
    pub(crate) async fn release_if_unlock_asap(&mut self, fid: i32) {
        let asap = self.registry.get(fid).is_ok_and(|file| file.release_implicit);
        if asap
            && self.registry.auto_locks().contains(fid)
            && let Err(err) = self.release(fid).await
        {
            warn!(fid, error = %err, "Failed to release implicit lock");
        }
    }
}
