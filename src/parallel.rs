//! Module `parallel` implement the shared state for parallel scans.
//!
//! The entire cross-worker coordination is a single atomic word holding
//! the next leaf to claim. Workers publish the successor with one CAS
//! per leaf; there are no queues and no locks.

use std::sync::atomic::{AtomicU32, Ordering::SeqCst};

/// Shared state for one parallel scan, living in caller-provided shared
/// memory (an `Arc` between worker threads). Value semantics of the
/// claim word:
///
/// * `0`, uninitialised; the first worker to observe it seeds the scan.
/// * `INVALID_BLOCK`, scan is done; further claimers get nothing.
/// * any other value is the block id of the next leaf to be claimed.
///
/// Block 0 is the metapage and never a leaf, so `0` is free to mean
/// uninitialised.
pub struct ParallelScanState {
    curr: AtomicU32,
}

impl Default for ParallelScanState {
    fn default() -> Self {
        Self::new()
    }
}

impl ParallelScanState {
    pub fn new() -> ParallelScanState {
        ParallelScanState {
            curr: AtomicU32::new(0),
        }
    }

    /// Reset the claim word so the next iteration reseeds. The caller
    /// must make sure no worker is mid-claim.
    pub fn parallel_rescan(&self) {
        self.curr.store(0, SeqCst);
    }

    pub(crate) fn load(&self) -> u32 {
        self.curr.load(SeqCst)
    }

    /// Publish `next` if the word still reads `seen`. Returns true when
    /// this worker won the claim.
    pub(crate) fn publish(&self, seen: u32, next: u32) -> bool {
        self.curr.compare_exchange(seen, next, SeqCst, SeqCst).is_ok()
    }
}

/// Default worker count for a parallel scan harness.
pub fn default_workers() -> usize {
    num_cpus::get()
}

#[cfg(test)]
#[path = "parallel_test.rs"]
mod parallel_test;
