//! # CLI
//!
//! The `tether` binary: quick end-to-end checks and soak runs against a proxy, driven
//! through the synchronous [`Caller`](tether_proxy::Caller) harness.
//!
//! * `tether check` opens, writes, sizes, reads back and closes one file under the
//!   backend root and fails on the first unexpected result code.
//! * `tether soak` repeats lock/write/read/unlock cycles over a handful of files and
//!   dumps the proxy's metrics.

pub mod args;
pub mod commands;
