use std::borrow::Cow;

/// Protocol-level failures of the control channel and its codec.
#[tether_derive::tether_error]
pub enum ChannelError {
    /// Encoding would write past the end of the codec region.
    #[error("Codec overflow{}: {message}", format_context(.context))]
    Overflow { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// The payload names a type tag the codec does not know.
    #[error("Unknown type tag {tag} at argument {index}{}", format_context(.context))]
    UnknownTag { tag: u8, index: usize, context: Option<Cow<'static, str>> },

    /// The payload ends before the layout it announces, or carries invalid UTF-8.
    #[error("Malformed payload{}: {message}", format_context(.context))]
    Malformed { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// Decoded arguments do not match what an operation expects.
    #[error("Bad arguments for '{op}'{}: {message}", format_context(.context))]
    Arguments {
        op: &'static str,
        message: Cow<'static, str>,
        context: Option<Cow<'static, str>>,
    },

    /// The handshake tables are incomplete or inconsistent.
    #[error("Handshake rejected{}: {message}", format_context(.context))]
    Handshake { message: Cow<'static, str>, context: Option<Cow<'static, str>> },
}

impl ChannelError {
    pub(crate) fn overflow(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Overflow { message: message.into(), context: None }
    }

    pub(crate) fn malformed(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Malformed { message: message.into(), context: None }
    }

    pub(crate) fn handshake(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Handshake { message: message.into(), context: None }
    }

    pub(crate) fn arguments(op: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self::Arguments { op, message: message.into(), context: None }
    }
}
