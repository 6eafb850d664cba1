use std::borrow::Cow;
use tether_backend::BackendError;
use tether_channel::ChannelError;

/// A specialized [`ProxyError`] enum of this crate.
#[tether_derive::tether_error]
pub enum ProxyError {
    #[error("Protocol error{}: {source}", format_context(.context))]
    Channel { source: ChannelError, context: Option<Cow<'static, str>> },

    #[error("Backend error{}: {source}", format_context(.context))]
    Backend { source: BackendError, context: Option<Cow<'static, str>> },

    /// Every attempt to take the exclusive access handle failed.
    #[error(
        "Could not acquire access handle for file {fid} after {attempts} attempts{}: {cause}",
        format_context(.context)
    )]
    HandleAcquisition {
        fid: i32,
        attempts: u32,
        cause: BackendError,
        context: Option<Cow<'static, str>>,
    },

    #[error("Unknown file id {fid}{}", format_context(.context))]
    UnknownFile { fid: i32, context: Option<Cow<'static, str>> },

    #[error("File id {fid} is already open{}", format_context(.context))]
    DuplicateFile { fid: i32, context: Option<Cow<'static, str>> },

    #[error("File {fid} is read-only{}", format_context(.context))]
    ReadOnly { fid: i32, context: Option<Cow<'static, str>> },

    #[error("Invalid path{}: {message}", format_context(.context))]
    InvalidPath { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    #[error("Invalid request{}: {message}", format_context(.context))]
    InvalidRequest { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    #[error("Configuration error{}: {source}", format_context(.context))]
    Config { source: config::ConfigError, context: Option<Cow<'static, str>> },

    #[error("Thread error{}: {source}", format_context(.context))]
    Io { source: std::io::Error, context: Option<Cow<'static, str>> },

    /// The proxy is not serving: handshake rejected, shut down, or its thread is gone.
    #[error("Proxy unavailable{}: {message}", format_context(.context))]
    Unavailable { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    #[error("Timed out{}: {message}", format_context(.context))]
    Timeout { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    #[error("Internal proxy error{}: {message}", format_context(.context))]
    Internal { message: Cow<'static, str>, context: Option<Cow<'static, str>> },
}

impl ProxyError {
    pub(crate) const fn unknown_file(fid: i32) -> Self {
        Self::UnknownFile { fid, context: None }
    }

    pub(crate) fn unavailable(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Unavailable { message: message.into(), context: None }
    }

    pub(crate) fn invalid_request(message: impl Into<Cow<'static, str>>) -> Self {
        Self::InvalidRequest { message: message.into(), context: None }
    }

    /// Capture priority of the error's description: 1 for contention and protocol
    /// faults, 2 for everything else.
    #[must_use]
    pub const fn priority(&self) -> u8 {
        match self {
            Self::HandleAcquisition { .. } | Self::Channel { .. } => 1,
            _ => 2,
        }
    }

    /// The backend failure behind this error, if any.
    #[must_use]
    pub const fn backend_cause(&self) -> Option<&BackendError> {
        match self {
            Self::Backend { source, .. } => Some(source),
            Self::HandleAcquisition { cause, .. } => Some(cause),
            _ => None,
        }
    }
}
