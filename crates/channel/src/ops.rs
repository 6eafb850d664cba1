use crate::error::ChannelError;
use crate::region::NO_REQUEST;
use fxhash::FxHashMap;
use std::collections::BTreeMap;
use strum::IntoEnumIterator;
use strum_macros::{AsRefStr, Display, EnumCount, EnumIter, EnumString, IntoStaticStr};

/// Every operation the proxy implements, named as on the wire.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    AsRefStr,
    Display,
    EnumCount,
    EnumIter,
    EnumString,
    IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case")]
pub enum OpKind {
    Access,
    Close,
    Delete,
    FileSize,
    Lock,
    Mkdir,
    Open,
    Read,
    Sync,
    Truncate,
    Unlock,
    Write,
}

impl OpKind {
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }
}

/// Validated mapping between op codes and [`OpKind`]s.
#[derive(Debug, Clone)]
pub struct OpTable {
    by_code: FxHashMap<i32, OpKind>,
    by_kind: FxHashMap<OpKind, i32>,
}

impl OpTable {
    /// Builds the table from the handshake's name-to-code map.
    ///
    /// Names the proxy does not implement are ignored.
    ///
    /// # Errors
    /// [`ChannelError::Handshake`] when an operation has no code, a code is reused, or a
    /// code equals the idle value of the op slot.
    pub fn from_ids(ids: &BTreeMap<String, i32>) -> Result<Self, ChannelError> {
        let mut by_code = FxHashMap::default();
        let mut by_kind = FxHashMap::default();

        for kind in OpKind::iter() {
            let Some(&code) = ids.get(kind.name()) else {
                return Err(ChannelError::handshake(format!("no op code for '{kind}'")));
            };
            if code == NO_REQUEST {
                return Err(ChannelError::handshake(format!(
                    "op code {code} of '{kind}' collides with the idle op slot"
                )));
            }
            if let Some(other) = by_code.insert(code, kind) {
                return Err(ChannelError::handshake(format!(
                    "op code {code} shared by '{other}' and '{kind}'"
                )));
            }
            by_kind.insert(kind, code);
        }

        for name in ids.keys().filter(|name| name.parse::<OpKind>().is_err()) {
            tracing::debug!(op = %name, "Ignoring op code for an unimplemented operation");
        }

        Ok(Self { by_code, by_kind })
    }

    /// Assigns `1..` to the operations in declaration order.
    #[must_use]
    pub fn default_ids() -> BTreeMap<String, i32> {
        OpKind::iter().zip(1..).map(|(kind, code)| (kind.name().to_owned(), code)).collect()
    }

    #[must_use]
    pub fn kind(&self, code: i32) -> Option<OpKind> {
        self.by_code.get(&code).copied()
    }

    #[must_use]
    pub fn code(&self, kind: OpKind) -> i32 {
        // Every kind is present once the table is validated.
        self.by_kind.get(&kind).copied().unwrap_or(NO_REQUEST)
    }
}
