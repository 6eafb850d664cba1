use crate::error::ProxyError;
use crate::retry::RetryPolicy;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tether_channel::{
    ByteOrder, ControlChannel, DEFAULT_S11N_SIZE, IoRegion, OpRegion, OpTable, ResultCodes,
};

/// Default size of the raw read/write payload area.
pub const DEFAULT_FILE_BUFFER_SIZE: usize = 64 * 1024;

/// Default window the proxy blocks on the op slot before doing idle maintenance.
pub const DEFAULT_WAIT_WINDOW: Duration = Duration::from_millis(500);

/// Everything the caller hands the proxy before the first request.
///
/// Fields the caller must supply are optional so a missing one can be reported by
/// name instead of silently defaulted.
#[derive(Debug, Clone)]
pub struct Handshake {
    pub little_endian: Option<bool>,
    /// `0..=3`: off, errors, warnings and info, everything.
    pub verbosity: u8,
    /// Highest exception priority whose description is written into the payload.
    pub exception_level: u8,
    pub file_buffer_size: Option<usize>,
    pub op_region: Option<Arc<OpRegion>>,
    pub io_region: Option<Arc<IoRegion>>,
    pub op_ids: BTreeMap<String, i32>,
    pub result_codes: BTreeMap<String, i32>,
    /// Default for files opened without the unlock-asap bit.
    pub unlock_asap: bool,
    pub wait_window: Duration,
    pub retry: RetryPolicy,
}

/// Proxy-side knobs that travel with the handshake.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SessionOptions {
    pub(crate) verbosity: u8,
    pub(crate) exception_level: u8,
    pub(crate) unlock_asap: bool,
    pub(crate) wait_window: Duration,
    pub(crate) retry: RetryPolicy,
}

impl Handshake {
    /// A complete handshake over freshly allocated regions and stock tables.
    #[must_use]
    pub fn new(file_buffer_size: usize) -> Self {
        Self {
            little_endian: Some(ByteOrder::native() == ByteOrder::Little),
            verbosity: 1,
            exception_level: 2,
            file_buffer_size: Some(file_buffer_size),
            op_region: Some(Arc::new(OpRegion::new())),
            io_region: Some(Arc::new(IoRegion::new(file_buffer_size, DEFAULT_S11N_SIZE))),
            op_ids: OpTable::default_ids(),
            result_codes: ResultCodes::sqlite_table(),
            unlock_asap: false,
            wait_window: DEFAULT_WAIT_WINDOW,
            retry: RetryPolicy::default(),
        }
    }

    #[must_use = "The handshake must be passed to the proxy"]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use = "The handshake must be passed to the proxy"]
    pub const fn with_wait_window(mut self, window: Duration) -> Self {
        self.wait_window = window;
        self
    }

    #[must_use = "The handshake must be passed to the proxy"]
    pub const fn with_unlock_asap(mut self, unlock_asap: bool) -> Self {
        self.unlock_asap = unlock_asap;
        self
    }

    #[must_use = "The handshake must be passed to the proxy"]
    pub const fn with_exception_level(mut self, level: u8) -> Self {
        self.exception_level = level;
        self
    }

    /// Builds the validated channel both ends operate on.
    ///
    /// # Errors
    /// [`ProxyError::Channel`] when a required field is missing, the buffer size does not
    /// match the I/O region, or the op/result tables are incomplete or inconsistent.
    pub fn channel(&self) -> Result<ControlChannel, ProxyError> {
        let order = ByteOrder::from_little_endian(require(self.little_endian, "little_endian")?);
        let file_buffer_size = require(self.file_buffer_size, "file_buffer_size")?;
        let op = require(self.op_region.clone(), "op_region")?;
        let io = require(self.io_region.clone(), "io_region")?;

        if io.file_buffer_size() != file_buffer_size {
            return Err(missing(format!(
                "file_buffer_size {file_buffer_size} does not match the I/O region's {}",
                io.file_buffer_size()
            )));
        }
        Ok(ControlChannel::new(op, io, order, &self.op_ids, &self.result_codes)?)
    }

    pub(crate) fn validate(&self) -> Result<(ControlChannel, SessionOptions), ProxyError> {
        let channel = self.channel()?;
        if self.wait_window.is_zero() {
            return Err(missing("wait_window must be positive"));
        }
        let options = SessionOptions {
            verbosity: self.verbosity,
            exception_level: self.exception_level,
            unlock_asap: self.unlock_asap,
            wait_window: self.wait_window,
            retry: self.retry,
        };
        Ok((channel, options))
    }
}

fn missing(message: impl Into<std::borrow::Cow<'static, str>>) -> ProxyError {
    ProxyError::Channel {
        source: tether_channel::ChannelError::Handshake { message: message.into(), context: None },
        context: None,
    }
}

fn require<T>(value: Option<T>, field: &'static str) -> Result<T, ProxyError> {
    value.ok_or_else(|| missing(format!("missing handshake field '{field}'")))
}
