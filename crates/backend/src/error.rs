use std::borrow::Cow;
use std::io;
use std::path::Path;

/// A specialized [`BackendError`] enum of this crate.
#[tether_derive::tether_error]
pub enum BackendError {
    #[error("Entry not found{}: {message}", format_context(.context))]
    NotFound { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    #[error("Entry has the wrong kind{}: {message}", format_context(.context))]
    TypeMismatch { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// Another access handle holds the entry.
    #[error("Modification not allowed{}: {message}", format_context(.context))]
    Conflict { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    #[error("Directory not empty{}: {message}", format_context(.context))]
    NotEmpty { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    #[error("Invalid entry name{}: {message}", format_context(.context))]
    InvalidName { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// A write or truncate would grow a file beyond what the store can hold.
    #[error("File too large{}: {message}", format_context(.context))]
    TooLarge { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    #[error("Backend I/O failure{}: {source}", format_context(.context))]
    Io { source: io::Error, context: Option<Cow<'static, str>> },
}

impl BackendError {
    pub(crate) fn not_found(message: impl Into<Cow<'static, str>>) -> Self {
        Self::NotFound { message: message.into(), context: None }
    }

    pub(crate) fn type_mismatch(message: impl Into<Cow<'static, str>>) -> Self {
        Self::TypeMismatch { message: message.into(), context: None }
    }

    pub(crate) fn conflict(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Conflict { message: message.into(), context: None }
    }

    pub(crate) fn not_empty(message: impl Into<Cow<'static, str>>) -> Self {
        Self::NotEmpty { message: message.into(), context: None }
    }

    pub(crate) fn too_large(message: impl Into<Cow<'static, str>>) -> Self {
        Self::TooLarge { message: message.into(), context: None }
    }

    /// Maps an OS error on `path`, keeping "not found" distinguishable.
    pub(crate) fn from_io(source: io::Error, path: &Path) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => Self::not_found(path.display().to_string()),
            io::ErrorKind::DirectoryNotEmpty => Self::not_empty(path.display().to_string()),
            _ => Self::Io { source, context: Some(path.display().to_string().into()) },
        }
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// True when the failure is another holder's exclusive handle.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
