//! Shared memory of one caller/proxy pair.
//!
//! [`OpRegion`] holds three 32-bit cells and the wait/notify primitive both sides block
//! on. [`IoRegion`] is a flat byte buffer: the first `file_buffer_size` bytes carry raw
//! read/write payloads, the rest is the codec region.
//!
//! Both regions are single-writer-at-a-time by protocol: the caller writes while the proxy
//! is idle and the proxy writes while the caller is blocked. The mutex around the bytes is
//! therefore never contended; it exists so the buffer can be shared without `unsafe`.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::{Duration, Instant};

/// Default size of the codec region that follows the file buffer.
pub const DEFAULT_S11N_SIZE: usize = 2048;

/// Value of the op slot when no request is pending.
pub const NO_REQUEST: i32 = 0;

/// Value the caller parks in the result cell before ringing the proxy.
pub const RESULT_PENDING: i32 = -1;

/// Addressable cells of the [`OpRegion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cell {
    /// Op code of the pending request, [`NO_REQUEST`] when idle.
    Op,
    /// Result code of the last serviced request.
    Result,
    /// Scratch cell the caller blocks on to pace its own retries.
    Retry,
}

impl Cell {
    const fn index(self) -> usize {
        match self {
            Self::Op => 0,
            Self::Result => 1,
            Self::Retry => 2,
        }
    }
}

/// How a [`OpRegion::wait`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The cell already differed from the expected value.
    NotEqual,
    /// The cell changed while waiting.
    Woken,
    /// The window elapsed with the cell unchanged.
    TimedOut,
}

/// The op slot, result cell and retry cell plus their wake-up primitive.
#[derive(Debug, Default)]
pub struct OpRegion {
    cells: [AtomicI32; 3],
    gate: Mutex<()>,
    bell: Condvar,
}

impl OpRegion {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn load(&self, cell: Cell) -> i32 {
        self.cells[cell.index()].load(Ordering::SeqCst)
    }

    pub fn store(&self, cell: Cell, value: i32) {
        self.cells[cell.index()].store(value, Ordering::SeqCst);
    }

    /// Atomically replaces the cell and returns what it held.
    pub fn swap(&self, cell: Cell, value: i32) -> i32 {
        self.cells[cell.index()].swap(value, Ordering::SeqCst)
    }

    /// Blocks the calling thread while `cell` still holds `expected`, at most `timeout`.
    ///
    /// The value is checked under the gate, and [`OpRegion::notify`] takes the same gate,
    /// so a store followed by a notify can never slip between the check and the sleep.
    pub fn wait(&self, cell: Cell, expected: i32, timeout: Duration) -> WaitOutcome {
        let deadline = Instant::now() + timeout;
        let mut gate = self.gate.lock();
        if self.load(cell) != expected {
            return WaitOutcome::NotEqual;
        }

        loop {
            let timed_out = self.bell.wait_until(&mut gate, deadline).timed_out();
            if self.load(cell) != expected {
                return WaitOutcome::Woken;
            }
            if timed_out {
                return WaitOutcome::TimedOut;
            }
        }
    }

    /// Wakes every thread blocked in [`OpRegion::wait`]; each re-checks its own cell.
    pub fn notify(&self, _cell: Cell) {
        let _gate = self.gate.lock();
        self.bell.notify_all();
    }
}

/// The raw file buffer followed by the codec region.
#[derive(Debug)]
pub struct IoRegion {
    file_buffer_size: usize,
    bytes: Mutex<Box<[u8]>>,
}

impl IoRegion {
    #[must_use]
    pub fn new(file_buffer_size: usize, s11n_size: usize) -> Self {
        Self {
            file_buffer_size,
            bytes: Mutex::new(vec![0; file_buffer_size + s11n_size].into_boxed_slice()),
        }
    }

    #[must_use]
    pub const fn file_buffer_size(&self) -> usize {
        self.file_buffer_size
    }

    #[must_use]
    pub fn s11n_size(&self) -> usize {
        self.bytes.lock().len() - self.file_buffer_size
    }

    /// Runs `f` over the raw read/write payload area.
    pub fn with_file_buffer<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut bytes = self.bytes.lock();
        f(&mut bytes[..self.file_buffer_size])
    }

    /// Runs `f` over the codec region.
    pub fn with_s11n<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut bytes = self.bytes.lock();
        f(&mut bytes[self.file_buffer_size..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_wait_returns_immediately_when_value_differs() {
        let region = OpRegion::new();
        region.store(Cell::Result, 7);
        let outcome = region.wait(Cell::Result, RESULT_PENDING, Duration::from_secs(5));
        assert_eq!(outcome, WaitOutcome::NotEqual);
    }

    #[test]
    fn test_wait_times_out_when_nothing_changes() {
        let region = OpRegion::new();
        let started = Instant::now();
        let outcome = region.wait(Cell::Op, NO_REQUEST, Duration::from_millis(30));
        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_store_then_notify_wakes_waiter() {
        let region = Arc::new(OpRegion::new());
        let waiter = {
            let region = Arc::clone(&region);
            thread::spawn(move || region.wait(Cell::Op, NO_REQUEST, Duration::from_secs(5)))
        };

        thread::sleep(Duration::from_millis(20));
        region.store(Cell::Op, 3);
        region.notify(Cell::Op);

        let outcome = waiter.join().unwrap();
        assert!(matches!(outcome, WaitOutcome::Woken | WaitOutcome::NotEqual));
        assert_eq!(region.swap(Cell::Op, NO_REQUEST), 3);
        assert_eq!(region.load(Cell::Op), NO_REQUEST);
    }

    #[test]
    fn test_notify_on_other_cell_does_not_end_wait() {
        let region = Arc::new(OpRegion::new());
        region.store(Cell::Result, RESULT_PENDING);
        let waiter = {
            let region = Arc::clone(&region);
            thread::spawn(move || region.wait(Cell::Result, RESULT_PENDING, Duration::from_millis(80)))
        };

        thread::sleep(Duration::from_millis(10));
        region.store(Cell::Retry, 1);
        region.notify(Cell::Retry);

        assert_eq!(waiter.join().unwrap(), WaitOutcome::TimedOut);
    }

    #[test]
    fn test_io_region_split() {
        let io = IoRegion::new(16, DEFAULT_S11N_SIZE);
        assert_eq!(io.file_buffer_size(), 16);
        assert_eq!(io.s11n_size(), DEFAULT_S11N_SIZE);

        io.with_file_buffer(|buf| buf.fill(0xAB));
        let first_codec_byte = io.with_s11n(|buf| buf[0]);
        assert_eq!(first_codec_byte, 0);
        assert!(io.with_file_buffer(|buf| buf.iter().all(|b| *b == 0xAB)));
    }
}
