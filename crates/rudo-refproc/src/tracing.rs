//! Reference processing tracing support.
//!
//! When the `tracing` feature is enabled, this module provides structured
//! spans and events for collection cycles, reference resolution and
//! finalizer drains. Span helpers are only called from `cfg`-gated sites;
//! event helpers have empty stand-ins so call sites stay unconditional.

#[cfg(feature = "tracing")]
pub mod internal {
    use std::sync::atomic::{AtomicU64, Ordering};
    use tracing::{span, Level};

    use crate::gc::GcPhase;
    use crate::ptr::ObjectId;

    /// Stable identifier for a collection cycle.
    ///
    /// Correlates every event emitted during one cycle. Starts at 1.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CycleId(pub u64);

    static NEXT_CYCLE_ID: AtomicU64 = AtomicU64::new(1);

    /// Generate the next unique cycle ID.
    pub fn next_cycle_id() -> CycleId {
        CycleId(NEXT_CYCLE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Create a span for a whole collection cycle.
    pub fn trace_collection(compact: bool, cycle_id: CycleId) -> span::EnteredSpan {
        span!(
            Level::DEBUG,
            "gc_collect",
            compact = compact,
            cycle_id = cycle_id.0
        )
        .entered()
    }

    /// Create a span for a collector phase.
    pub fn trace_phase(phase: GcPhase) -> span::EnteredSpan {
        span!(Level::DEBUG, "gc_phase", phase = ?phase).entered()
    }

    /// Create a span for one reference resolution pass.
    pub fn trace_reference_processing(
        phase: GcPhase,
        after_compaction: bool,
        pending: usize,
    ) -> span::EnteredSpan {
        span!(
            Level::DEBUG,
            "reference_processing",
            phase = ?phase,
            after_compaction,
            pending
        )
        .entered()
    }

    /// Create a span for a finalizer drain.
    pub fn trace_finalizer_drain(queued: usize) -> span::EnteredSpan {
        span!(Level::DEBUG, "finalizer_drain", queued).entered()
    }

    /// Log a reference object recorded during marking.
    pub fn log_discovered(obj: ObjectId, finalizable: bool) {
        tracing::debug!(obj = %obj, finalizable, "reference_discovered");
    }

    /// Log a referent replaced by the undefined sentinel.
    pub fn log_cleared(obj: ObjectId, referent: ObjectId) {
        tracing::debug!(obj = %obj, referent = %referent, "referent_cleared");
    }

    /// Log a referent that survived marking.
    pub fn log_survived(obj: ObjectId, referent: ObjectId) {
        tracing::debug!(obj = %obj, referent = %referent, "referent_survived");
    }

    /// Log a referent rewritten to its forwarding address.
    pub fn log_relocated(obj: ObjectId, from: ObjectId, to: ObjectId) {
        tracing::debug!(obj = %obj, from = %from, to = %to, "referent_relocated");
    }

    /// Log an entry resolved without touching it.
    pub fn log_skipped(obj: ObjectId, reason: &'static str) {
        tracing::debug!(obj = %obj, reason, "reference_skipped");
    }

    /// Log a finalizer moved to the finalizer queue.
    pub fn log_finalizer_enqueued(obj: ObjectId) {
        tracing::debug!(obj = %obj, "finalizer_enqueued");
    }

    /// Log the end of a finalizer drain.
    pub fn log_finalizers_run(count: usize) {
        tracing::debug!(count, "finalizers_run");
    }
}

#[cfg(not(feature = "tracing"))]
#[allow(clippy::missing_const_for_fn)]
pub mod internal {
    use crate::ptr::ObjectId;

    /// Stub function when tracing is disabled.
    #[inline(always)]
    pub fn log_discovered(_obj: ObjectId, _finalizable: bool) {}

    /// Stub function when tracing is disabled.
    #[inline(always)]
    pub fn log_cleared(_obj: ObjectId, _referent: ObjectId) {}

    /// Stub function when tracing is disabled.
    #[inline(always)]
    pub fn log_survived(_obj: ObjectId, _referent: ObjectId) {}

    /// Stub function when tracing is disabled.
    #[inline(always)]
    pub fn log_relocated(_obj: ObjectId, _from: ObjectId, _to: ObjectId) {}

    /// Stub function when tracing is disabled.
    #[inline(always)]
    pub fn log_skipped(_obj: ObjectId, _reason: &'static str) {}

    /// Stub function when tracing is disabled.
    #[inline(always)]
    pub fn log_finalizer_enqueued(_obj: ObjectId) {}

    /// Stub function when tracing is disabled.
    #[inline(always)]
    pub fn log_finalizers_run(_count: usize) {}
}

