//! Weak and finalizable reference processing.
//!
//! The collector drives a [`ReferenceProcessor`] through three stages each cycle:
//!
//! 1. **Discovery** (marking): for every reference-tagged object it visits, the
//!    collector asks [`is_reference`](ReferenceProcessor::is_reference). On `true`
//!    it calls one of the `handle_reference` entry points instead of tracing the
//!    referent. The object lands in the pending set; for finalizable objects the
//!    list links are handed back to the collector so the list stays traced.
//! 2. **Resolution** (after marking or after compaction): the pending set is
//!    drained one entry at a time. Dead referents are replaced by the undefined
//!    sentinel and finalizers are moved to the finalizer queue.
//! 3. **Finalization** (later safepoint): [`process_finalizers`](ReferenceProcessor::process_finalizers)
//!    runs queued callbacks in FIFO order with no lock held.
//!
//! Relocation is learned through [`RelocationListener::on_object_moved`]; the
//! processor never inspects object headers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

use crossbeam::queue::SegQueue;
use indexmap::IndexSet;
use parking_lot::Mutex;

use crate::gc::GcPhase;
use crate::heap::{Class, GcHeap, HeapObject};
use crate::invariant::{self, Invariant};
use crate::metrics::{global_reference_metrics, ReferenceMetrics};
use crate::ptr::{ObjectId, ObjectPointer};
use crate::reference::{Finalizer, LinkField, WeakReference};
use crate::tracing::internal as trace;

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for a [`ReferenceProcessor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceProcessorConfig {
    /// Capacity reserved for the pending set.
    pub initial_pending_capacity: usize,
    /// Whether dropping the runtime runs every outstanding finalizer.
    pub finalize_on_teardown: bool,
}

impl Default for ReferenceProcessorConfig {
    fn default() -> Self {
        Self {
            initial_pending_capacity: 64,
            finalize_on_teardown: true,
        }
    }
}

impl ReferenceProcessorConfig {
    /// Set the capacity reserved for the pending set.
    pub const fn set_initial_pending_capacity(&mut self, capacity: usize) {
        self.initial_pending_capacity = capacity;
    }

    /// Enable or disable finalization on teardown.
    pub const fn set_finalize_on_teardown(&mut self, enabled: bool) {
        self.finalize_on_teardown = enabled;
    }
}

// ============================================================================
// RelocationListener
// ============================================================================

/// Receives object moves from a compacting collector.
pub trait RelocationListener {
    /// `old` now lives at `new`. Called once per moved object, before
    /// post-compaction processing starts.
    fn on_object_moved(&self, old: ObjectId, new: ObjectId);
}

// ============================================================================
// ReferenceProcessor
// ============================================================================

/// Which side of compaction a resolution pass runs on.
#[derive(Debug, Clone, Copy)]
struct Pass {
    phase: GcPhase,
    concurrent: bool,
    clear_soft_references: bool,
    after_compaction: bool,
}

/// Discovers, resolves and finalizes weak and finalizable references.
///
/// All methods take `&self`; discovery may run on several marking threads.
#[derive(Debug)]
pub struct ReferenceProcessor {
    config: ReferenceProcessorConfig,
    undefined: OnceLock<ObjectId>,
    pending: Mutex<IndexSet<ObjectId>>,
    finalizer_queue: SegQueue<Finalizer>,
    forwarding: Mutex<HashMap<ObjectId, ObjectId>>,
    discovered: AtomicUsize,
    last_metrics: Mutex<ReferenceMetrics>,
}

impl Default for ReferenceProcessor {
    fn default() -> Self {
        Self::new(ReferenceProcessorConfig::default())
    }
}

impl ReferenceProcessor {
    /// Create a processor. It must be [`initialize`](Self::initialize)d before use.
    #[must_use]
    pub fn new(config: ReferenceProcessorConfig) -> Self {
        Self {
            config,
            undefined: OnceLock::new(),
            pending: Mutex::new(IndexSet::with_capacity(config.initial_pending_capacity)),
            finalizer_queue: SegQueue::new(),
            forwarding: Mutex::new(HashMap::new()),
            discovered: AtomicUsize::new(0),
            last_metrics: Mutex::new(ReferenceMetrics::new()),
        }
    }

    /// The processor's configuration.
    #[must_use]
    pub const fn config(&self) -> &ReferenceProcessorConfig {
        &self.config
    }

    /// Capture the VM's undefined sentinel.
    ///
    /// Calling again with the same sentinel is a no-op.
    ///
    /// # Panics
    ///
    /// Panics if `undefined` is not a live object in non-movable space, or if
    /// a different sentinel was captured earlier.
    #[track_caller]
    pub fn initialize<H: GcHeap + ?Sized>(&self, heap: &H, undefined: ObjectId) {
        if !heap.contains(undefined) {
            invariant::violated(Invariant::HandleOutsideHeap(undefined));
        }
        if !heap.is_in_non_movable_space(undefined) {
            invariant::violated(Invariant::MovableSentinel(undefined));
        }
        let current = *self.undefined.get_or_init(|| undefined);
        if current != undefined {
            invariant::violated(Invariant::SentinelReinitialized {
                current,
                offered: undefined,
            });
        }
    }

    /// Check whether [`initialize`](Self::initialize) has run.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.undefined.get().is_some()
    }

    /// The undefined sentinel.
    ///
    /// # Panics
    ///
    /// Panics if the processor is not initialized.
    #[must_use]
    #[track_caller]
    pub fn undefined_object(&self) -> ObjectPointer {
        ObjectPointer::from_id(self.undefined_id())
    }

    #[track_caller]
    fn undefined_id(&self) -> ObjectId {
        match self.undefined.get() {
            Some(&id) => id,
            None => invariant::violated(Invariant::Uninitialized),
        }
    }

    // ------------------------------------------------------------------------
    // Discovery
    // ------------------------------------------------------------------------

    /// Decide whether `obj` must be treated as a weak edge this cycle.
    ///
    /// Returns `true` only for a weak or finalizer tagged object whose referent
    /// is populated, not yet cleared, accepted by `predicate` and not already
    /// marked. `false` means "trace it as an ordinary strong object".
    ///
    /// # Panics
    ///
    /// Panics if the class tags disagree with the object layout, or if the
    /// processor is not initialized.
    pub fn is_reference<H, P>(&self, heap: &H, class: &Class, obj: ObjectId, predicate: P) -> bool
    where
        H: GcHeap + ?Sized,
        P: Fn(ObjectId) -> bool,
    {
        if !class.is_weak_reference() && !class.is_finalizer_reference() {
            return false;
        }
        let (weak, _) = reference_parts(heap, class, obj);
        let Some(referent) = weak.referent().get() else {
            return false;
        };
        referent != self.undefined_id() && predicate(referent) && !heap.is_marked(referent)
    }

    /// Record `obj` as pending and hand its link fields to the mark stack.
    ///
    /// This is the concurrent marking path: `mark_field(owner, field)` is
    /// called for `prev` and `next` of finalizable objects. Must only be
    /// called after [`is_reference`](Self::is_reference) returned `true`.
    ///
    /// # Panics
    ///
    /// Panics if `obj` was already recorded this cycle or its class tags are
    /// inconsistent.
    pub fn handle_reference<H, P, M>(
        &self,
        heap: &H,
        class: &Class,
        obj: ObjectId,
        predicate: P,
        mut mark_field: M,
    ) where
        H: GcHeap + ?Sized,
        P: Fn(ObjectId) -> bool,
        M: FnMut(ObjectId, LinkField),
    {
        let (weak, finalizable) = reference_parts(heap, class, obj);
        debug_assert!(
            weak.referent().get().is_some_and(&predicate),
            "handle_reference on {obj} whose referent fails the predicate"
        );
        self.record_pending(obj, finalizable);
        if finalizable {
            mark_field(obj, LinkField::Prev);
            mark_field(obj, LinkField::Next);
        }
    }

    /// Record `obj` as pending and hand its linked neighbours to `visit`.
    ///
    /// This is the root scanning path: the caller has already marked `obj`
    /// and `visit` receives whole objects rather than fields.
    ///
    /// # Panics
    ///
    /// Panics if `obj` was already recorded this cycle or its class tags are
    /// inconsistent.
    pub fn handle_reference_with_visitor<H, P, V>(
        &self,
        heap: &H,
        class: &Class,
        obj: ObjectId,
        predicate: P,
        mut visit: V,
    ) where
        H: GcHeap + ?Sized,
        P: Fn(ObjectId) -> bool,
        V: FnMut(ObjectId),
    {
        let (weak, finalizable) = reference_parts(heap, class, obj);
        debug_assert!(
            weak.referent().get().is_some_and(&predicate),
            "handle_reference on {obj} whose referent fails the predicate"
        );
        self.record_pending(obj, finalizable);
        if let Some(node) = heap.object(obj).and_then(HeapObject::as_finalizable) {
            for link in [node.prev(), node.next()] {
                if let Some(id) = link.get() {
                    visit(id);
                }
            }
        }
    }

    fn record_pending(&self, obj: ObjectId, finalizable: bool) {
        let inserted = self.pending.lock().insert(obj);
        if !inserted {
            invariant::violated(Invariant::DuplicateDiscovery(obj));
        }
        self.discovered.fetch_add(1, Ordering::Relaxed);
        trace::log_discovered(obj, finalizable);
    }

    // ------------------------------------------------------------------------
    // Resolution
    // ------------------------------------------------------------------------

    /// Resolve every pending reference after marking.
    ///
    /// For each entry whose referent satisfies `clear_predicate`: a marked
    /// referent is left untouched; an unmarked one is replaced by the undefined
    /// sentinel and, for finalizable objects, the finalizer is queued. Drain
    /// order is unspecified.
    ///
    /// # Panics
    ///
    /// Panics if the processor is not initialized or a pending object is no
    /// longer live.
    pub fn process_references<H, P>(
        &self,
        heap: &H,
        concurrent: bool,
        clear_soft_references: bool,
        phase: GcPhase,
        clear_predicate: P,
    ) where
        H: GcHeap + ?Sized,
        P: Fn(ObjectId) -> bool,
    {
        let pass = Pass {
            phase,
            concurrent,
            clear_soft_references,
            after_compaction: false,
        };
        self.resolve_pending(heap, pass, &clear_predicate);
    }

    /// Resolve every pending reference after compaction.
    ///
    /// Pending objects and referents are looked up through the moves reported
    /// to [`RelocationListener::on_object_moved`]. A surviving referent that
    /// moved is rewritten to its new identity. The move table is cleared when
    /// the pass ends.
    ///
    /// # Panics
    ///
    /// Panics if the processor is not initialized or a pending object is no
    /// longer live.
    pub fn process_references_after_compaction<H, P>(&self, heap: &H, clear_predicate: P)
    where
        H: GcHeap + ?Sized,
        P: Fn(ObjectId) -> bool,
    {
        let pass = Pass {
            phase: GcPhase::Compact,
            concurrent: false,
            clear_soft_references: false,
            after_compaction: true,
        };
        self.resolve_pending(heap, pass, &clear_predicate);
        self.forwarding.lock().clear();
    }

    fn resolve_pending<H>(&self, heap: &H, pass: Pass, clear_predicate: &dyn Fn(ObjectId) -> bool)
    where
        H: GcHeap + ?Sized,
    {
        let start = Instant::now();
        let undefined = self.undefined_id();

        #[cfg(feature = "tracing")]
        let _span = trace::trace_reference_processing(
            pass.phase,
            pass.after_compaction,
            self.reference_queue_size(),
        );

        let mut metrics = ReferenceMetrics {
            phase: pass.phase,
            concurrent: pass.concurrent,
            clear_soft_references: pass.clear_soft_references,
            after_compaction: pass.after_compaction,
            discovered: self.discovered.swap(0, Ordering::Relaxed),
            ..ReferenceMetrics::new()
        };

        // The lock is released before each entry is resolved.
        while let Some(obj) = self.pop_pending() {
            self.resolve(heap, obj, undefined, pass, clear_predicate, &mut metrics);
        }

        metrics.duration = start.elapsed();
        global_reference_metrics().record_pass(&metrics);
        *self.last_metrics.lock() = metrics;
    }

    fn pop_pending(&self) -> Option<ObjectId> {
        self.pending.lock().pop()
    }

    fn forwarded(&self, id: ObjectId) -> Option<ObjectId> {
        self.forwarding.lock().get(&id).copied()
    }

    fn resolve<H>(
        &self,
        heap: &H,
        obj: ObjectId,
        undefined: ObjectId,
        pass: Pass,
        clear_predicate: &dyn Fn(ObjectId) -> bool,
        metrics: &mut ReferenceMetrics,
    ) where
        H: GcHeap + ?Sized,
    {
        let obj = if pass.after_compaction {
            self.forwarded(obj).unwrap_or(obj)
        } else {
            obj
        };
        let Some(object) = heap.object(obj) else {
            invariant::violated(Invariant::HandleOutsideHeap(obj));
        };
        let (weak, _) = reference_parts(heap, object.class(), obj);

        let Some(referent) = weak.referent().get() else {
            trace::log_skipped(obj, "null");
            metrics.skipped += 1;
            return;
        };
        if referent == undefined {
            trace::log_skipped(obj, "cleared");
            metrics.skipped += 1;
            return;
        }
        if !clear_predicate(referent) {
            trace::log_skipped(obj, "predicate");
            metrics.skipped += 1;
            return;
        }

        if pass.after_compaction {
            if let Some(moved) = self.forwarded(referent) {
                weak.set_referent(ObjectPointer::from_id(moved));
                trace::log_relocated(obj, referent, moved);
                metrics.relocated += 1;
                return;
            }
        }
        if heap.is_marked(referent) {
            trace::log_survived(obj, referent);
            metrics.survived += 1;
            return;
        }

        weak.clear_referent(ObjectPointer::from_id(undefined));
        trace::log_cleared(obj, referent);
        metrics.cleared += 1;

        if let Some(finalizer) = object.as_finalizable().and_then(|node| node.release_finalizer()) {
            self.finalizer_queue.push(finalizer);
            trace::log_finalizer_enqueued(obj);
            metrics.finalizers_enqueued += 1;
        }
    }

    // ------------------------------------------------------------------------
    // Cycle bookkeeping and finalization
    // ------------------------------------------------------------------------

    /// Start a new cycle.
    ///
    /// # Panics
    ///
    /// Panics if references from the previous cycle are still pending.
    #[track_caller]
    pub fn begin_cycle(&self) {
        let len = self.pending.lock().len();
        if len != 0 {
            invariant::violated(Invariant::PendingSetNotDrained(len));
        }
        self.forwarding.lock().clear();
        self.discovered.store(0, Ordering::Relaxed);
    }

    /// Number of references discovered and not yet resolved.
    #[must_use]
    pub fn reference_queue_size(&self) -> usize {
        self.pending.lock().len()
    }

    /// Number of finalizers waiting to run.
    #[must_use]
    pub fn finalizer_queue_len(&self) -> usize {
        self.finalizer_queue.len()
    }

    /// Run every queued finalizer in enqueue order.
    ///
    /// Each finalizer is removed before it runs, so a panicking finalizer is
    /// never retried. Finalizers queued while draining run in the same call.
    /// Returns the number of finalizers run.
    pub fn process_finalizers(&self) -> usize {
        #[cfg(feature = "tracing")]
        let _span = trace::trace_finalizer_drain(self.finalizer_queue.len());

        let mut ran = 0;
        while let Some(finalizer) = self.finalizer_queue.pop() {
            finalizer.run();
            ran += 1;
        }
        global_reference_metrics().record_finalizers_run(ran);
        trace::log_finalizers_run(ran);
        ran
    }

    /// Statistics of the most recent resolution pass.
    #[must_use]
    pub fn last_metrics(&self) -> ReferenceMetrics {
        *self.last_metrics.lock()
    }
}

impl RelocationListener for ReferenceProcessor {
    fn on_object_moved(&self, old: ObjectId, new: ObjectId) {
        self.forwarding.lock().insert(old, new);
    }
}

/// Check `class` against the layout of `obj` and return its weak part and
/// whether it is finalizable.
#[track_caller]
fn reference_parts<'h, H: GcHeap + ?Sized>(
    heap: &'h H,
    class: &Class,
    obj: ObjectId,
) -> (&'h WeakReference, bool) {
    let Some(object) = heap.object(obj) else {
        invariant::violated(Invariant::HandleOutsideHeap(obj));
    };
    if class.is_finalizer_reference() {
        // A finalizer reference is always a weak reference too.
        match object.as_finalizable() {
            Some(node) if class.is_weak_reference() => (node.weak(), true),
            _ => invariant::violated(Invariant::InconsistentClassTags(obj)),
        }
    } else {
        match (object.as_weak_reference(), object.as_finalizable()) {
            (Some(weak), None) if class.is_weak_reference() => (weak, false),
            _ => invariant::violated(Invariant::InconsistentClassTags(obj)),
        }
    }
}
