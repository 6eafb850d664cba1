//! # Channel
//!
//! The shared-memory contract between a synchronous caller and the storage proxy.
//!
//! * [`region`]: the op slot, result cell and retry cell with their wait/notify
//!   primitive, plus the I/O region (raw file buffer followed by the codec region).
//! * [`codec`]: the count/tags/values argument layout.
//! * [`ops`] and [`codes`]: op-code and result-code tables negotiated at handshake.
//! * [`request`]: typed requests decoded from argument lists.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tether_channel::{ByteOrder, ControlChannel, IoRegion, OpKind, OpRegion, OpTable};
//! use tether_channel::{Request, ResultCodes};
//!
//! let channel = ControlChannel::new(
//!     Arc::new(OpRegion::new()),
//!     Arc::new(IoRegion::new(4096, tether_channel::DEFAULT_S11N_SIZE)),
//!     ByteOrder::native(),
//!     &OpTable::default_ids(),
//!     &ResultCodes::sqlite_table(),
//! )
//! .unwrap();
//!
//! let request = Request::FileSize { fid: 1 };
//! channel.post(request.kind(), &request.to_args()).unwrap();
//! let args = channel.codec().deserialize(true).unwrap();
//! assert_eq!(Request::from_args(OpKind::FileSize, args).unwrap(), request);
//! ```

pub mod codec;
pub mod codes;
mod control;
mod error;
pub mod ops;
pub mod region;
pub mod request;

pub use crate::codec::{ByteOrder, Codec, Value};
pub use crate::codes::{OpenMode, PRUNE_EMPTY_PARENTS, ProxyFlags, ResultCodes};
pub use crate::control::ControlChannel;
pub use crate::error::{ChannelError, ChannelErrorExt};
pub use crate::ops::{OpKind, OpTable};
pub use crate::region::{
    Cell, DEFAULT_S11N_SIZE, IoRegion, NO_REQUEST, OpRegion, RESULT_PENDING, WaitOutcome,
};
pub use crate::request::Request;
