//! # Proxy
//!
//! Serves a strictly synchronous storage-engine I/O interface from an asynchronous
//! [`Backend`](tether_backend::Backend).
//!
//! A [`Proxy`] owns a dedicated thread with a single-threaded Tokio runtime. After the
//! [`Handshake`] it blocks on the shared op slot, decodes each request, runs it against
//! the backend, stores the result code and wakes the caller. Exactly one request is in
//! flight at any time. Between requests the proxy releases access handles it took
//! implicitly, so other proxies sharing the backend can get at the same files.
//!
//! [`Caller`] is the synchronous side of the protocol, used by tests and tooling.
//!
//! ## Example
//!
//! ```rust
//! use tether_backend::MemoryBackend;
//! use tether_proxy::{Caller, Handshake, Proxy};
//!
//! let handshake = Handshake::new(4096);
//! let proxy = Proxy::spawn(MemoryBackend::new()).unwrap();
//! proxy.init(handshake.clone()).unwrap();
//!
//! let caller = Caller::connect(&handshake).unwrap();
//! let create = caller.codes().open_create;
//! assert_eq!(caller.open(1, "/db/main.db", create).unwrap(), 0);
//! assert_eq!(caller.write(1, b"hello", 0).unwrap(), 0);
//! assert_eq!(caller.file_size(1).unwrap(), (0, Some(5)));
//! assert_eq!(caller.close(1).unwrap(), 0);
//! ```

mod autolock;
mod caller;
mod dispatcher;
mod error;
mod handlers;
mod handshake;
mod metrics;
mod proxy;
mod registry;
mod retry;
mod session;
mod settings;

pub use crate::caller::{Caller, DEFAULT_CALL_TIMEOUT, Reply};
pub use crate::error::{ProxyError, ProxyErrorExt};
pub use crate::handshake::{DEFAULT_FILE_BUFFER_SIZE, DEFAULT_WAIT_WINDOW, Handshake};
pub use crate::metrics::{CodecStats, Metrics, MetricsSnapshot, OpStats};
pub use crate::proxy::{Proxy, ProxyStatus};
pub use crate::retry::{Exhausted, RetryPolicy, retry};
pub use crate::settings::{ENV_PREFIX, ProxySettings};
