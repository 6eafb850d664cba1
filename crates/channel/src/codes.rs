//! Result codes, lock levels and open flags mirrored from the storage engine.
//!
//! The engine owns these numbers. The caller mirrors them into the handshake and the
//! proxy looks every one up by name, so a mismatch fails the handshake instead of
//! producing wrong answers at runtime.

use crate::error::ChannelError;
use bitflags::bitflags;
use std::collections::BTreeMap;

/// Codes the proxy answers with or interprets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultCodes {
    pub ok: i32,
    pub busy: i32,
    pub not_found: i32,
    pub io_err: i32,
    pub io_err_read: i32,
    pub io_err_short_read: i32,
    pub io_err_write: i32,
    pub io_err_fsync: i32,
    pub io_err_truncate: i32,
    pub io_err_unlock: i32,
    pub io_err_delete: i32,
    pub io_err_lock: i32,
    pub lock_none: i32,
    pub open_create: i32,
    pub open_readonly: i32,
    pub open_delete_on_close: i32,
}

/// Open mode decoded from the engine's open flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenMode {
    pub create: bool,
    pub read_only: bool,
    pub delete_on_close: bool,
}

impl ResultCodes {
    /// Looks every code up in the mirrored table.
    ///
    /// # Errors
    /// [`ChannelError::Handshake`] naming the first missing entry.
    pub fn from_table(table: &BTreeMap<String, i32>) -> Result<Self, ChannelError> {
        let get = |name: &str| {
            table
                .get(name)
                .copied()
                .ok_or_else(|| ChannelError::handshake(format!("result code table lacks {name}")))
        };
        Ok(Self {
            ok: get("SQLITE_OK")?,
            busy: get("SQLITE_BUSY")?,
            not_found: get("SQLITE_NOTFOUND")?,
            io_err: get("SQLITE_IOERR")?,
            io_err_read: get("SQLITE_IOERR_READ")?,
            io_err_short_read: get("SQLITE_IOERR_SHORT_READ")?,
            io_err_write: get("SQLITE_IOERR_WRITE")?,
            io_err_fsync: get("SQLITE_IOERR_FSYNC")?,
            io_err_truncate: get("SQLITE_IOERR_TRUNCATE")?,
            io_err_unlock: get("SQLITE_IOERR_UNLOCK")?,
            io_err_delete: get("SQLITE_IOERR_DELETE")?,
            io_err_lock: get("SQLITE_IOERR_LOCK")?,
            lock_none: get("SQLITE_LOCK_NONE")?,
            open_create: get("SQLITE_OPEN_CREATE")?,
            open_readonly: get("SQLITE_OPEN_READONLY")?,
            open_delete_on_close: get("SQLITE_OPEN_DELETEONCLOSE")?,
        })
    }

    /// The engine's stock values, for callers that do not carry their own table.
    #[must_use]
    pub fn sqlite_table() -> BTreeMap<String, i32> {
        [
            ("SQLITE_OK", 0),
            ("SQLITE_ERROR", 1),
            ("SQLITE_BUSY", 5),
            ("SQLITE_IOERR", 10),
            ("SQLITE_NOTFOUND", 12),
            ("SQLITE_CANTOPEN", 14),
            ("SQLITE_IOERR_READ", 266),
            ("SQLITE_IOERR_SHORT_READ", 522),
            ("SQLITE_IOERR_WRITE", 778),
            ("SQLITE_IOERR_FSYNC", 1034),
            ("SQLITE_IOERR_TRUNCATE", 1546),
            ("SQLITE_IOERR_FSTAT", 1802),
            ("SQLITE_IOERR_UNLOCK", 2058),
            ("SQLITE_IOERR_DELETE", 2570),
            ("SQLITE_IOERR_ACCESS", 3338),
            ("SQLITE_IOERR_LOCK", 3850),
            ("SQLITE_IOERR_CLOSE", 4106),
            ("SQLITE_LOCK_NONE", 0),
            ("SQLITE_LOCK_SHARED", 1),
            ("SQLITE_LOCK_RESERVED", 2),
            ("SQLITE_LOCK_PENDING", 3),
            ("SQLITE_LOCK_EXCLUSIVE", 4),
            ("SQLITE_OPEN_READONLY", 0x0000_0001),
            ("SQLITE_OPEN_READWRITE", 0x0000_0002),
            ("SQLITE_OPEN_CREATE", 0x0000_0004),
            ("SQLITE_OPEN_DELETEONCLOSE", 0x0000_0008),
        ]
        .into_iter()
        .map(|(name, code)| (name.to_owned(), code))
        .collect()
    }

    /// Splits the engine's open flags into what the proxy cares about.
    ///
    /// A file is read-only only when it is not being created.
    #[must_use]
    pub const fn open_mode(&self, flags: i32) -> OpenMode {
        let create = flags & self.open_create != 0;
        OpenMode {
            create,
            read_only: !create && flags & self.open_readonly != 0,
            delete_on_close: flags & self.open_delete_on_close != 0,
        }
    }
}

impl Default for ResultCodes {
    fn default() -> Self {
        Self {
            ok: 0,
            busy: 5,
            not_found: 12,
            io_err: 10,
            io_err_read: 266,
            io_err_short_read: 522,
            io_err_write: 778,
            io_err_fsync: 1034,
            io_err_truncate: 1546,
            io_err_unlock: 2058,
            io_err_delete: 2570,
            io_err_lock: 3850,
            lock_none: 0,
            open_create: 0x4,
            open_readonly: 0x1,
            open_delete_on_close: 0x8,
        }
    }
}

bitflags! {
    /// Proxy-specific bits passed alongside the engine's open flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
    pub struct ProxyFlags: u32 {
        /// Release an implicitly acquired handle at the end of the op that acquired it.
        const UNLOCK_ASAP = 0x01;
        /// Remove any existing leaf before opening it.
        const UNLINK_BEFORE_OPEN = 0x02;
    }
}

/// Value of the delete op's `sync_dir` argument that also prunes emptied parents.
pub const PRUNE_EMPTY_PARENTS: i32 = 0x1234;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stock_table_matches_defaults() {
        let codes = ResultCodes::from_table(&ResultCodes::sqlite_table()).unwrap();
        assert_eq!(codes, ResultCodes::default());
        assert_eq!(codes.io_err_lock, 3850);
        assert_eq!(codes.io_err_short_read, 522);
    }

    #[test]
    fn test_missing_code_fails() {
        let mut table = ResultCodes::sqlite_table();
        table.remove("SQLITE_IOERR_DELETE");
        let err = ResultCodes::from_table(&table).unwrap_err();
        assert!(err.to_string().contains("SQLITE_IOERR_DELETE"));
    }

    #[test]
    fn test_open_mode() {
        let codes = ResultCodes::default();
        let created = codes.open_mode(0x4 | 0x1 | 0x8);
        assert!(created.create && !created.read_only && created.delete_on_close);

        let ro = codes.open_mode(0x1);
        assert!(ro.read_only && !ro.create);
    }

    #[test]
    fn test_proxy_flags_ignore_unknown_bits() {
        let flags = ProxyFlags::from_bits_truncate(0x03 | 0x80);
        assert!(flags.contains(ProxyFlags::UNLOCK_ASAP | ProxyFlags::UNLINK_BEFORE_OPEN));
        assert_eq!(flags.bits(), 0x03);
    }
}
