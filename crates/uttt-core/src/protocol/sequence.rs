//! Thread-safe counter for announcement sequence numbers.
//!
//! Every discovery datagram carries a monotonically increasing integer so a
//! receiver can tell a fresh broadcast tick from a duplicate delivery of an
//! old one.  The broadcast loop and any caller inspecting the counter run on
//! different threads, hence the atomic.

use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonically increasing counter for announcement numbering.
///
/// Starts at 0 and increments by 1 per [`next`](SequenceCounter::next) call;
/// wraps at `u64::MAX` without panicking.
///
/// `Ordering::Relaxed` is sufficient: the counter orders announcements, it
/// does not synchronize other memory.
#[derive(Debug, Default)]
pub struct SequenceCounter {
    inner: AtomicU64,
}

impl SequenceCounter {
    /// Creates a new counter starting at 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next sequence number and advances the counter.
    pub fn next(&self) -> u64 {
        self.inner.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the current value without advancing.  Another thread may
    /// advance the counter before the caller uses the result.
    pub fn current(&self) -> u64 {
        self.inner.load(Ordering::Relaxed)
    }
}
