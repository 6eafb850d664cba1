use crate::codec::Value;
use crate::codes::ProxyFlags;
use crate::error::ChannelError;
use crate::ops::OpKind;

/// A decoded request with its typed arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Access { path: String },
    Close { fid: i32 },
    Delete { path: String, sync_dir: i32, recursive: bool },
    FileSize { fid: i32 },
    Lock { fid: i32, level: i32 },
    Mkdir { path: String },
    Open { fid: i32, path: String, flags: i32, proxy_flags: ProxyFlags },
    Read { fid: i32, len: usize, offset: u64 },
    Sync { fid: i32, flags: i32 },
    Truncate { fid: i32, size: u64 },
    Unlock { fid: i32, level: i32 },
    Write { fid: i32, len: usize, offset: u64 },
}

impl Request {
    #[must_use]
    pub const fn kind(&self) -> OpKind {
        match self {
            Self::Access { .. } => OpKind::Access,
            Self::Close { .. } => OpKind::Close,
            Self::Delete { .. } => OpKind::Delete,
            Self::FileSize { .. } => OpKind::FileSize,
            Self::Lock { .. } => OpKind::Lock,
            Self::Mkdir { .. } => OpKind::Mkdir,
            Self::Open { .. } => OpKind::Open,
            Self::Read { .. } => OpKind::Read,
            Self::Sync { .. } => OpKind::Sync,
            Self::Truncate { .. } => OpKind::Truncate,
            Self::Unlock { .. } => OpKind::Unlock,
            Self::Write { .. } => OpKind::Write,
        }
    }

    /// The file id the request targets, if any.
    #[must_use]
    pub const fn fid(&self) -> Option<i32> {
        match self {
            Self::Close { fid }
            | Self::FileSize { fid }
            | Self::Lock { fid, .. }
            | Self::Open { fid, .. }
            | Self::Read { fid, .. }
            | Self::Sync { fid, .. }
            | Self::Truncate { fid, .. }
            | Self::Unlock { fid, .. }
            | Self::Write { fid, .. } => Some(*fid),
            Self::Access { .. } | Self::Delete { .. } | Self::Mkdir { .. } => None,
        }
    }

    /// Argument list in wire order.
    #[must_use]
    pub fn to_args(&self) -> Vec<Value> {
        match self {
            Self::Access { path } | Self::Mkdir { path } => vec![path.as_str().into()],
            Self::Close { fid } | Self::FileSize { fid } => vec![(*fid).into()],
            Self::Delete { path, sync_dir, recursive } => {
                vec![path.as_str().into(), (*sync_dir).into(), (*recursive).into()]
            },
            Self::Lock { fid, level } | Self::Unlock { fid, level } => {
                vec![(*fid).into(), (*level).into()]
            },
            Self::Open { fid, path, flags, proxy_flags } => vec![
                (*fid).into(),
                path.as_str().into(),
                (*flags).into(),
                i64::from(proxy_flags.bits()).into(),
            ],
            Self::Read { fid, len, offset } | Self::Write { fid, len, offset } => {
                vec![(*fid).into(), (*len as i64).into(), (*offset as i64).into()]
            },
            Self::Sync { fid, flags } => vec![(*fid).into(), (*flags).into()],
            Self::Truncate { fid, size } => vec![(*fid).into(), (*size as i64).into()],
        }
    }

    /// Rebuilds a request from the arguments decoded for `kind`.
    ///
    /// Integer arguments accept either numbers or 64-bit integers. Trailing optional
    /// arguments (`recursive`, the open's proxy flags) default to false/empty.
    ///
    /// # Errors
    /// [`ChannelError::Arguments`] when an argument is missing or has the wrong type.
    pub fn from_args(kind: OpKind, args: Vec<Value>) -> Result<Self, ChannelError> {
        let mut args = Args { op: kind.name(), values: args.into_iter(), index: 0 };
        let request = match kind {
            OpKind::Access => Self::Access { path: args.text()? },
            OpKind::Close => Self::Close { fid: args.int()? },
            OpKind::Delete => Self::Delete {
                path: args.text()?,
                sync_dir: args.int()?,
                recursive: args.optional_bool()?,
            },
            OpKind::FileSize => Self::FileSize { fid: args.int()? },
            OpKind::Lock => Self::Lock { fid: args.int()?, level: args.int()? },
            OpKind::Mkdir => Self::Mkdir { path: args.text()? },
            OpKind::Open => Self::Open {
                fid: args.int()?,
                path: args.text()?,
                flags: args.int()?,
                proxy_flags: ProxyFlags::from_bits_truncate(args.optional_int()?.unwrap_or(0)),
            },
            OpKind::Read => Self::Read { fid: args.int()?, len: args.int()?, offset: args.int()? },
            OpKind::Sync => Self::Sync { fid: args.int()?, flags: args.optional_int()?.unwrap_or(0) },
            OpKind::Truncate => Self::Truncate { fid: args.int()?, size: args.int()? },
            OpKind::Unlock => Self::Unlock { fid: args.int()?, level: args.int()? },
            OpKind::Write => {
                Self::Write { fid: args.int()?, len: args.int()?, offset: args.int()? }
            },
        };
        Ok(request)
    }
}

struct Args {
    op: &'static str,
    values: std::vec::IntoIter<Value>,
    index: usize,
}

impl Args {
    fn next(&mut self) -> Option<Value> {
        self.index += 1;
        self.values.next()
    }

    fn missing(&self) -> ChannelError {
        ChannelError::arguments(self.op, format!("argument {} is missing", self.index))
    }

    fn mismatch(&self, expected: &str, got: &Value) -> ChannelError {
        ChannelError::arguments(
            self.op,
            format!("argument {} should be {expected}, got {got}", self.index),
        )
    }

    fn text(&mut self) -> Result<String, ChannelError> {
        match self.next() {
            Some(Value::Text(text)) => Ok(text),
            Some(other) => Err(self.mismatch("text", &other)),
            None => Err(self.missing()),
        }
    }

    fn integer<T: TryFrom<i64>>(&self, value: &Value) -> Result<T, ChannelError> {
        value
            .as_i64()
            .and_then(|v| T::try_from(v).ok())
            .ok_or_else(|| self.mismatch("an in-range integer", value))
    }

    fn int<T: TryFrom<i64>>(&mut self) -> Result<T, ChannelError> {
        let value = self.next().ok_or_else(|| self.missing())?;
        self.integer(&value)
    }

    fn optional_int<T: TryFrom<i64>>(&mut self) -> Result<Option<T>, ChannelError> {
        self.next().map(|value| self.integer(&value)).transpose()
    }

    fn optional_bool(&mut self) -> Result<bool, ChannelError> {
        match self.next() {
            None => Ok(false),
            Some(value) => value.as_bool().ok_or_else(|| self.mismatch("a boolean", &value)),
        }
    }
}
