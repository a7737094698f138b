// this_file: src/memory_tracker.rs
//! Off-heap memory accounting.
//!
//! Every confined [`OffHeapBuffer`](crate::offheap::OffHeapBuffer) reserves
//! its bytes here before touching the allocator, so a pool can enforce a
//! byte limit and report current and peak usage.

use crate::error::{Error, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Tracks off-heap bytes for one pool
#[derive(Debug)]
pub struct MemoryTracker {
    /// Current usage in bytes
    current: AtomicUsize,
    /// Peak usage in bytes
    peak: AtomicUsize,
    /// Limit in bytes, `None` when unbounded
    limit: Option<usize>,
    allocations: AtomicU64,
    resizes: AtomicU64,
    frees: AtomicU64,
}

/// Point-in-time copy of the tracker counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemorySnapshot {
    pub current_bytes: usize,
    pub peak_bytes: usize,
    pub allocations: u64,
    pub resizes: u64,
    pub frees: u64,
}

impl MemoryTracker {
    /// Create a tracker with an optional byte limit
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            limit,
            allocations: AtomicU64::new(0),
            resizes: AtomicU64::new(0),
            frees: AtomicU64::new(0),
        }
    }

    /// Tracker without a limit
    pub fn unlimited() -> Self {
        Self::new(None)
    }

    /// Reserve `bytes` before allocating them
    pub fn reserve(&self, bytes: usize) -> Result<()> {
        let old = self.current.fetch_add(bytes, Ordering::SeqCst);
        let new = old.saturating_add(bytes);

        if let Some(limit) = self.limit {
            if new > limit {
                self.current.fetch_sub(bytes, Ordering::SeqCst);
                return Err(Error::OutOfMemory { requested: bytes });
            }
        }

        let mut peak = self.peak.load(Ordering::Relaxed);
        while new > peak {
            match self
                .peak
                .compare_exchange_weak(peak, new, Ordering::SeqCst, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(p) => peak = p,
            }
        }
        Ok(())
    }

    /// Give back bytes reserved earlier
    pub fn release(&self, bytes: usize) {
        self.current.fetch_sub(bytes, Ordering::SeqCst);
    }

    pub(crate) fn note_allocation(&self) {
        self.allocations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_resize(&self) {
        self.resizes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_free(&self) {
        self.frees.fetch_add(1, Ordering::Relaxed);
    }

    /// Current usage in bytes
    pub fn current_usage(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }

    /// Peak usage in bytes
    pub fn peak_usage(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }

    /// Configured limit
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Reset peak tracking to the current usage
    pub fn reset_peak(&self) {
        let current = self.current.load(Ordering::Relaxed);
        self.peak.store(current, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MemorySnapshot {
        MemorySnapshot {
            current_bytes: self.current_usage(),
            peak_bytes: self.peak_usage(),
            allocations: self.allocations.load(Ordering::Relaxed),
            resizes: self.resizes.load(Ordering::Relaxed),
            frees: self.frees.load(Ordering::Relaxed),
        }
    }
}

impl Default for MemoryTracker {
    fn default() -> Self {
        Self::unlimited()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_and_release() {
        let tracker = MemoryTracker::unlimited();
        tracker.reserve(4096).unwrap();
        assert_eq!(tracker.current_usage(), 4096);
        tracker.release(1024);
        assert_eq!(tracker.current_usage(), 3072);
        assert_eq!(tracker.peak_usage(), 4096);
    }

    #[test]
    fn limit_refuses_without_side_effects() {
        let tracker = MemoryTracker::new(Some(1000));
        tracker.reserve(600).unwrap();
        let err = tracker.reserve(500).unwrap_err();
        assert!(matches!(err, Error::OutOfMemory { requested: 500 }));
        assert_eq!(tracker.current_usage(), 600);
    }

    #[test]
    fn reset_peak_follows_current() {
        let tracker = MemoryTracker::unlimited();
        tracker.reserve(100).unwrap();
        tracker.release(60);
        tracker.reset_peak();
        assert_eq!(tracker.peak_usage(), 40);
    }
}
