//! # Runtime
//!
//! Tokio runtime presets used across the workspace.
//!
//! The storage proxy services exactly one request at a time, so it runs on a dedicated
//! single-threaded runtime ([`RuntimeConfig::proxy`]) owned by its own OS thread. Command
//! line tools use a small multithreaded runtime ([`RuntimeConfig::tooling`]).
//!
//! ## Example
//!
//! ```rust,ignore
//! #[tether_runtime::main(tooling)]
//! async fn main() -> anyhow::Result<()> {
//!     Ok(())
//! }
//! ```

pub use anyhow::Result;
pub use tether_derive::main;

use anyhow::anyhow;
use std::{thread::available_parallelism, time::Duration};
use tokio::runtime::{Builder, Runtime};
use tracing::debug;

/// The default number of worker threads if detection fails.
const DEFAULT_WORKER_THREADS: usize = 4;
/// The default stack size for threads (2 `MiB`).
const DEFAULT_STACK_SIZE: usize = 2 * 1024 * 1024;
/// Minimum allowed stack size (512 `KiB`).
const MIN_STACK_SIZE: usize = 512 * 1024;
/// Maximum allowed stack size (16 `MiB`).
const MAX_STACK_SIZE: usize = 16 * 1024 * 1024;
/// How long an idle blocking thread stays alive.
const THREAD_KEEP_ALIVE: Duration = Duration::from_secs(10);

/// Scheduler flavour of a runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    /// Everything runs on the thread that calls `block_on`.
    CurrentThread,
    /// Work-stealing scheduler with `worker_threads` workers.
    MultiThread,
}

/// Configuration for a Tokio runtime.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub flavor: Flavor,
    pub worker_threads: usize,
    pub stack_size: usize,
    pub thread_name: String,
    pub thread_keep_alive: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            flavor: Flavor::MultiThread,
            worker_threads: detect_worker_threads(),
            stack_size: DEFAULT_STACK_SIZE,
            thread_name: "tether-worker".to_owned(),
            thread_keep_alive: THREAD_KEEP_ALIVE,
        }
    }
}

impl RuntimeConfig {
    /// Single-threaded preset for a proxy's dispatcher thread.
    ///
    /// Blocking work (the op-slot doorbell) still lands on Tokio's blocking pool.
    #[must_use = "Use this configuration for a proxy dispatcher thread"]
    pub fn proxy() -> Self {
        Self {
            flavor: Flavor::CurrentThread,
            worker_threads: 1,
            stack_size: DEFAULT_STACK_SIZE,
            thread_name: "tether-proxy".to_owned(),
            thread_keep_alive: THREAD_KEEP_ALIVE,
        }
    }

    /// Small multithreaded preset for command line tools.
    #[must_use = "Use this configuration for command line tools"]
    pub fn tooling() -> Self {
        Self {
            flavor: Flavor::MultiThread,
            worker_threads: detect_worker_threads().min(2),
            stack_size: DEFAULT_STACK_SIZE,
            thread_name: "tether-tool".to_owned(),
            thread_keep_alive: Duration::from_secs(30),
        }
    }

    #[must_use = "Customize the number of worker threads for the runtime"]
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads.clamp(1, 1024);
        self
    }

    #[must_use = "Customize the stack size for worker threads"]
    pub fn with_stack_size(mut self, size: usize) -> Self {
        self.stack_size = size.clamp(MIN_STACK_SIZE, MAX_STACK_SIZE);
        self
    }

    #[must_use = "Customize the thread name"]
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !name.trim().is_empty() {
            self.thread_name = name;
        }
        self
    }

    fn normalized(&self) -> Self {
        let mut config = self.clone().with_worker_threads(self.worker_threads);
        config.stack_size = self.stack_size.clamp(MIN_STACK_SIZE, MAX_STACK_SIZE);
        if config.thread_name.trim().is_empty() {
            config.thread_name = "tether-worker".to_owned();
        }
        config
    }
}

fn detect_worker_threads() -> usize {
    std::env::var("TOKIO_WORKER_THREADS")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|&n| n > 0 && n <= 1024)
        .unwrap_or_else(|| {
            available_parallelism().map(std::num::NonZero::get).unwrap_or(DEFAULT_WORKER_THREADS)
        })
}

/// Creates a Tokio runtime from `config` with I/O and timers enabled.
///
/// # Errors
///
/// Returns an [`anyhow::Error`] if the OS refuses to create the runtime threads.
pub fn build_runtime_with_config(config: &RuntimeConfig) -> Result<Runtime> {
    let config = config.normalized();
    debug!(config = ?config, "Building tokio runtime");

    let mut builder = match config.flavor {
        Flavor::CurrentThread => Builder::new_current_thread(),
        Flavor::MultiThread => {
            let mut builder = Builder::new_multi_thread();
            builder.worker_threads(config.worker_threads);
            builder
        },
    };

    builder
        .thread_name(&config.thread_name)
        .thread_stack_size(config.stack_size)
        .thread_keep_alive(config.thread_keep_alive)
        .enable_all();

    builder.build().map_err(|e| anyhow!("Failed to initialize runtime: {e}"))
}

/// Builds the single-threaded runtime a proxy dispatcher runs on.
///
/// # Errors
///
/// Returns an [`anyhow::Error`] if the runtime cannot be created.
pub fn build_proxy_runtime() -> Result<Runtime> {
    build_runtime_with_config(&RuntimeConfig::proxy())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_threads_validation() {
        let config = RuntimeConfig::default().with_worker_threads(0);
        assert_eq!(config.worker_threads, 1);

        let config = RuntimeConfig::default().with_worker_threads(2000);
        assert_eq!(config.worker_threads, 1024);
    }

    #[test]
    fn test_stack_size_validation() {
        let config = RuntimeConfig::default().with_stack_size(100);
        assert_eq!(config.stack_size, MIN_STACK_SIZE);

        let config = RuntimeConfig::default().with_stack_size(100 * 1024 * 1024);
        assert_eq!(config.stack_size, MAX_STACK_SIZE);
    }

    #[test]
    fn test_proxy_preset_is_single_threaded() {
        let config = RuntimeConfig::proxy();
        assert_eq!(config.flavor, Flavor::CurrentThread);

        let runtime = build_proxy_runtime().unwrap();
        let answer = runtime.block_on(async {
            tokio::time::sleep(Duration::from_millis(1)).await;
            42
        });
        assert_eq!(answer, 42);
    }

    #[test]
    fn test_blank_thread_name_is_ignored() {
        let config = RuntimeConfig::tooling().with_thread_name("  ");
        assert_eq!(config.thread_name, "tether-tool");
    }
}
