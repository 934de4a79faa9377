//! Sequence numbering for outgoing frames.
//!
//! Every frame a controller writes carries the next value of a per-link
//! counter.  The board uses it to spot dropped or replayed frames, and the
//! controller logs it so a captured trace can be lined up with board logs.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free, monotonically increasing frame counter.
///
/// Starts at 0 and wraps from `u64::MAX` back to 0 without panicking.
///
/// # Examples
///
/// ```rust
/// use triaxis_core::protocol::SequenceCounter;
///
/// let counter = SequenceCounter::new();
/// assert_eq!(counter.next(), 0);
/// assert_eq!(counter.next(), 1);
/// ```
#[derive(Debug, Default)]
pub struct SequenceCounter {
    inner: AtomicU64,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next sequence number.
    ///
    /// `Relaxed` is enough: the value orders frames on one link and is never
    /// used to publish other memory.
    pub fn next(&self) -> u64 {
        self.inner.fetch_add(1, Ordering::Relaxed)
    }

    /// Value the next call to [`next`](Self::next) would return.  For logs only.
    pub fn current(&self) -> u64 {
        self.inner.load(Ordering::Relaxed)
    }
}
