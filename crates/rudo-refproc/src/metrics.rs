//! Reference processing metrics and statistics.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crate::gc::GcPhase;

/// Statistics from the most recent reference resolution pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceMetrics {
    /// Collector phase that requested the pass.
    pub phase: GcPhase,
    /// Whether the collector reported concurrent marking.
    pub concurrent: bool,
    /// Whether soft references were requested to be cleared.
    pub clear_soft_references: bool,
    /// Whether the pass ran after compaction.
    pub after_compaction: bool,
    /// References recorded by `handle_reference` during the cycle.
    pub discovered: usize,
    /// Referents replaced by the undefined sentinel.
    pub cleared: usize,
    /// Referents that survived marking and were left in place.
    pub survived: usize,
    /// Surviving referents rewritten to their forwarding address.
    pub relocated: usize,
    /// Entries skipped: null, already cleared, or rejected by the predicate.
    pub skipped: usize,
    /// Finalizers moved to the finalizer queue.
    pub finalizers_enqueued: usize,
    /// Wall time of the pass.
    pub duration: Duration,
}

impl Default for ReferenceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ReferenceMetrics {
    /// Create a snapshot with every counter at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            phase: GcPhase::Idle,
            concurrent: false,
            clear_soft_references: false,
            after_compaction: false,
            discovered: 0,
            cleared: 0,
            survived: 0,
            relocated: 0,
            skipped: 0,
            finalizers_enqueued: 0,
            duration: Duration::ZERO,
        }
    }

    /// Number of entries resolved by the pass.
    #[must_use]
    pub const fn resolved(&self) -> usize {
        self.cleared + self.survived + self.relocated + self.skipped
    }
}

/// Process-level cumulative reference statistics.
///
/// # Example
///
/// ```
/// use rudo_refproc::global_reference_metrics;
///
/// let metrics = global_reference_metrics();
/// println!("Referents cleared: {}", metrics.total_cleared());
/// ```
#[derive(Debug)]
pub struct GlobalReferenceMetrics {
    passes: AtomicUsize,
    discovered: AtomicUsize,
    cleared: AtomicUsize,
    relocated: AtomicUsize,
    finalizers_enqueued: AtomicUsize,
    finalizers_run: AtomicUsize,
    resolve_ns: AtomicU64,
}

impl Default for GlobalReferenceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl GlobalReferenceMetrics {
    /// Create a set of counters initialized to zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            passes: AtomicUsize::new(0),
            discovered: AtomicUsize::new(0),
            cleared: AtomicUsize::new(0),
            relocated: AtomicUsize::new(0),
            finalizers_enqueued: AtomicUsize::new(0),
            finalizers_run: AtomicUsize::new(0),
            resolve_ns: AtomicU64::new(0),
        }
    }

    pub(crate) fn record_pass(&self, metrics: &ReferenceMetrics) {
        self.passes.fetch_add(1, Ordering::Relaxed);
        self.discovered
            .fetch_add(metrics.discovered, Ordering::Relaxed);
        self.cleared.fetch_add(metrics.cleared, Ordering::Relaxed);
        self.relocated
            .fetch_add(metrics.relocated, Ordering::Relaxed);
        self.finalizers_enqueued
            .fetch_add(metrics.finalizers_enqueued, Ordering::Relaxed);
        let nanos = u64::try_from(metrics.duration.as_nanos()).unwrap_or(u64::MAX);
        self.resolve_ns.fetch_add(nanos, Ordering::Relaxed);
    }

    pub(crate) fn record_finalizers_run(&self, count: usize) {
        self.finalizers_run.fetch_add(count, Ordering::Relaxed);
    }

    /// Returns the number of resolution passes performed.
    #[inline]
    #[must_use]
    pub fn total_passes(&self) -> usize {
        self.passes.load(Ordering::Relaxed)
    }

    /// Returns the number of reference objects discovered while marking.
    #[inline]
    #[must_use]
    pub fn total_discovered(&self) -> usize {
        self.discovered.load(Ordering::Relaxed)
    }

    /// Returns the number of referents cleared.
    #[inline]
    #[must_use]
    pub fn total_cleared(&self) -> usize {
        self.cleared.load(Ordering::Relaxed)
    }

    /// Returns the number of referents rewritten after compaction.
    #[inline]
    #[must_use]
    pub fn total_relocated(&self) -> usize {
        self.relocated.load(Ordering::Relaxed)
    }

    /// Returns the number of finalizers enqueued.
    #[inline]
    #[must_use]
    pub fn total_finalizers_enqueued(&self) -> usize {
        self.finalizers_enqueued.load(Ordering::Relaxed)
    }

    /// Returns the number of finalizers run.
    #[inline]
    #[must_use]
    pub fn total_finalizers_run(&self) -> usize {
        self.finalizers_run.load(Ordering::Relaxed)
    }

    /// Returns the total time spent resolving references, in nanoseconds.
    #[inline]
    #[must_use]
    pub fn total_resolve_ns(&self) -> u64 {
        self.resolve_ns.load(Ordering::Relaxed)
    }
}

static GLOBAL_REFERENCE_METRICS: GlobalReferenceMetrics = GlobalReferenceMetrics::new();

/// Get the global cumulative reference metrics.
///
/// The counters are shared by every processor in the process.
#[must_use]
pub fn global_reference_metrics() -> &'static GlobalReferenceMetrics {
    &GLOBAL_REFERENCE_METRICS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolved_sums_outcomes() {
        let metrics = ReferenceMetrics {
            cleared: 2,
            survived: 3,
            relocated: 1,
            skipped: 4,
            ..ReferenceMetrics::new()
        };
        assert_eq!(metrics.resolved(), 10);
    }

    #[test]
    fn test_record_pass_accumulates() {
        let global = GlobalReferenceMetrics::new();
        let metrics = ReferenceMetrics {
            discovered: 5,
            cleared: 2,
            finalizers_enqueued: 1,
            duration: Duration::from_nanos(40),
            ..ReferenceMetrics::new()
        };

        global.record_pass(&metrics);
        global.record_pass(&metrics);
        global.record_finalizers_run(1);

        assert_eq!(global.total_passes(), 2);
        assert_eq!(global.total_discovered(), 10);
        assert_eq!(global.total_cleared(), 4);
        assert_eq!(global.total_finalizers_enqueued(), 2);
        assert_eq!(global.total_finalizers_run(), 1);
        assert_eq!(global.total_resolve_ns(), 80);
    }
}
