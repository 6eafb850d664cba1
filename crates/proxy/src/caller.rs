use crate::error::ProxyError;
use crate::handshake::Handshake;
use std::time::{Duration, Instant};
use tether_channel::{Cell, ControlChannel, ProxyFlags, RESULT_PENDING, Request, ResultCodes, Value, WaitOutcome};
use tracing::trace;

/// How long [`Caller::call`] waits for a result by default.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Result code and decoded payload of one call.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub rc: i32,
    pub payload: Vec<Value>,
}

impl Reply {
    /// The captured exception description, if the proxy wrote one.
    #[must_use]
    pub fn exception(&self) -> Option<&str> {
        self.payload.iter().find_map(Value::as_str)
    }
}

/// The synchronous side of the protocol, for tests and tooling.
///
/// Each call posts one request and blocks the current thread until the proxy answers.
/// Must not be used from inside an async task.
#[derive(Debug)]
pub struct Caller {
    channel: ControlChannel,
    timeout: Duration,
}

impl Caller {
    /// Attaches to the regions named by `handshake`.
    ///
    /// # Errors
    /// The same validation errors as the proxy's own handshake check.
    pub fn connect(handshake: &Handshake) -> Result<Self, ProxyError> {
        Ok(Self { channel: handshake.channel()?, timeout: DEFAULT_CALL_TIMEOUT })
    }

    #[must_use = "The caller keeps the timeout it was built with"]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub const fn codes(&self) -> &ResultCodes {
        self.channel.codes()
    }

    /// Posts `request` and blocks until its result is stored.
    ///
    /// # Errors
    /// [`ProxyError::Channel`] when the arguments do not fit, [`ProxyError::Timeout`] when
    /// no result arrives in time. A timed-out request may still complete later, so the
    /// caller must not be reused after a timeout.
    pub fn call(&self, request: &Request) -> Result<Reply, ProxyError> {
        self.channel.post(request.kind(), &request.to_args())?;

        let op = self.channel.op_region();
        let deadline = Instant::now() + self.timeout;
        let rc = loop {
            let rc = op.load(Cell::Result);
            if rc != RESULT_PENDING {
                break rc;
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(ProxyError::Timeout {
                    message: format!("no result for {} after {:?}", request.kind().name(), self.timeout)
                        .into(),
                    context: None,
                });
            }
            op.wait(Cell::Result, RESULT_PENDING, deadline - now);
        };

        let payload = self.channel.codec().deserialize(true)?;
        trace!(op = request.kind().name(), rc, "Call answered");
        Ok(Reply { rc, payload })
    }

    /// # Errors
    /// See [`Caller::call`].
    pub fn open(&self, fid: i32, path: &str, flags: i32) -> Result<i32, ProxyError> {
        self.open_with(fid, path, flags, ProxyFlags::empty())
    }

    /// # Errors
    /// See [`Caller::call`].
    pub fn open_with(
        &self,
        fid: i32,
        path: &str,
        flags: i32,
        proxy_flags: ProxyFlags,
    ) -> Result<i32, ProxyError> {
        self.rc(&Request::Open { fid, path: path.to_owned(), flags, proxy_flags })
    }

    /// # Errors
    /// See [`Caller::call`].
    pub fn close(&self, fid: i32) -> Result<i32, ProxyError> {
        self.rc(&Request::Close { fid })
    }

    /// # Errors
    /// See [`Caller::call`].
    pub fn access(&self, path: &str) -> Result<i32, ProxyError> {
        self.rc(&Request::Access { path: path.to_owned() })
    }

    /// # Errors
    /// See [`Caller::call`].
    pub fn delete(&self, path: &str, sync_dir: i32, recursive: bool) -> Result<i32, ProxyError> {
        self.rc(&Request::Delete { path: path.to_owned(), sync_dir, recursive })
    }

    /// # Errors
    /// See [`Caller::call`].
    pub fn mkdir(&self, path: &str) -> Result<i32, ProxyError> {
        self.rc(&Request::Mkdir { path: path.to_owned() })
    }

    /// # Errors
    /// See [`Caller::call`].
    pub fn lock(&self, fid: i32, level: i32) -> Result<i32, ProxyError> {
        self.rc(&Request::Lock { fid, level })
    }

    /// # Errors
    /// See [`Caller::call`].
    pub fn unlock(&self, fid: i32, level: i32) -> Result<i32, ProxyError> {
        self.rc(&Request::Unlock { fid, level })
    }

    /// # Errors
    /// See [`Caller::call`].
    pub fn sync(&self, fid: i32) -> Result<i32, ProxyError> {
        self.rc(&Request::Sync { fid, flags: 0 })
    }

    /// # Errors
    /// See [`Caller::call`].
    pub fn truncate(&self, fid: i32, size: u64) -> Result<i32, ProxyError> {
        self.rc(&Request::Truncate { fid, size })
    }

    /// Reads `len` bytes at `offset`; the bytes come back whatever the code, zero-filled
    /// past what the proxy could read.
    ///
    /// # Errors
    /// [`ProxyError::InvalidRequest`] when `len` exceeds the file buffer, otherwise see
    /// [`Caller::call`].
    pub fn read(&self, fid: i32, len: usize, offset: u64) -> Result<(i32, Vec<u8>), ProxyError> {
        self.check_len(len)?;
        let rc = self.rc(&Request::Read { fid, len, offset })?;
        let data = self.channel.io_region().with_file_buffer(|region| region[..len].to_vec());
        Ok((rc, data))
    }

    /// Copies `data` into the file buffer and writes it at `offset`.
    ///
    /// # Errors
    /// [`ProxyError::InvalidRequest`] when `data` exceeds the file buffer, otherwise see
    /// [`Caller::call`].
    pub fn write(&self, fid: i32, data: &[u8], offset: u64) -> Result<i32, ProxyError> {
        self.check_len(data.len())?;
        self.channel.io_region().with_file_buffer(|region| region[..data.len()].copy_from_slice(data));
        self.rc(&Request::Write { fid, len: data.len(), offset })
    }

    /// The file's byte length, present only on success.
    ///
    /// # Errors
    /// See [`Caller::call`].
    pub fn file_size(&self, fid: i32) -> Result<(i32, Option<u64>), ProxyError> {
        let reply = self.call(&Request::FileSize { fid })?;
        let size = if reply.rc == self.codes().ok {
            reply.payload.first().and_then(Value::as_i64).and_then(|n| u64::try_from(n).ok())
        } else {
            None
        };
        Ok((reply.rc, size))
    }

    /// Blocks the calling thread for `duration` on the retry cell, without spinning.
    ///
    /// Returns early, with `true`, once another thread changes the cell and notifies it.
    #[must_use = "Tells whether the pause was cut short"]
    pub fn pause(&self, duration: Duration) -> bool {
        let op = self.channel.op_region();
        op.wait(Cell::Retry, op.load(Cell::Retry), duration) != WaitOutcome::TimedOut
    }

    fn rc(&self, request: &Request) -> Result<i32, ProxyError> {
        Ok(self.call(request)?.rc)
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    #[test]
    fn test_pause_sleeps_for_the_whole_duration() {
        let caller = Caller::connect(&Handshake::new(1024)).unwrap();
        let started = Instant::now();
        assert!(!caller.pause(Duration::from_millis(60)));
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn test_retry_cell_change_ends_a_pause() {
        let caller = Caller::connect(&Handshake::new(1024)).unwrap();
        let op = Arc::clone(caller.channel.op_region());
        let done = Arc::new(AtomicBool::new(false));

        let waker = {
            let done = Arc::clone(&done);
            thread::spawn(move || {
                while !done.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(20));
                    op.store(Cell::Retry, op.load(Cell::Retry).wrapping_add(1));
                    op.notify(Cell::Retry);
                }
            })
        };

        let started = Instant::now();
        assert!(caller.pause(Duration::from_secs(10)));
        assert!(started.elapsed() < Duration::from_secs(5));
        done.store(true, Ordering::SeqCst);
        waker.join().unwrap();
    }
}
