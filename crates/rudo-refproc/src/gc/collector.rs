use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use crate::heap::{GcHeap, ManagedHeap, Space};
use crate::metrics::ReferenceMetrics;
use crate::ptr::ObjectId;
use crate::reference::{ReferenceProcessor, RelocationListener};

use super::mark::Marker;
use super::GcPhase;

#[cfg(feature = "tracing")]
use crate::tracing::internal::{next_cycle_id, trace_collection, trace_phase};

/// Strong roots of a mutator.
pub trait RootSet {
    /// Call `visit` for every root.
    fn visit_roots(&self, visit: &mut dyn FnMut(ObjectId));

    /// Retarget roots whose objects moved. `forward` returns the new
    /// identity of a moved object and `None` otherwise.
    fn update_roots(&mut self, forward: &dyn Fn(ObjectId) -> Option<ObjectId>);
}

/// Options for one collection.
pub struct CollectOptions {
    /// Relocate movable survivors.
    pub compact: bool,
    /// Forwarded to the processor; every reference kind here is weak, so it
    /// does not change the outcome.
    pub clear_soft_references: bool,
    /// Restricts the collection to the objects it accepts. Objects it rejects
    /// are treated as live and their referents are never cleared.
    pub clear_predicate: Box<dyn Fn(ObjectId) -> bool + Send + Sync>,
}

impl CollectOptions {
    /// A full non-moving collection.
    #[must_use]
    pub fn full() -> Self {
        Self {
            compact: false,
            clear_soft_references: false,
            clear_predicate: Box::new(|_| true),
        }
    }

    /// A full collection that relocates movable survivors.
    #[must_use]
    pub fn compacting() -> Self {
        Self {
            compact: true,
            ..Self::full()
        }
    }

    /// Restrict the collection to objects accepted by `predicate`.
    #[must_use]
    pub fn with_clear_predicate(
        mut self,
        predicate: impl Fn(ObjectId) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.clear_predicate = Box::new(predicate);
        self
    }
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self::full()
    }
}

impl fmt::Debug for CollectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectOptions")
            .field("compact", &self.compact)
            .field("clear_soft_references", &self.clear_soft_references)
            .finish_non_exhaustive()
    }
}

/// Summary of one collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectInfo {
    /// Objects marked live.
    pub marked: usize,
    /// Objects relocated by compaction.
    pub relocated: usize,
    /// Objects freed by the sweep.
    pub freed: usize,
    /// Reference resolution statistics.
    pub references: ReferenceMetrics,
    /// Wall time of the whole collection.
    pub duration: Duration,
}

/// Run one stop-the-world collection.
///
/// Order: start the processor's cycle, mark from `roots`, then either
/// resolve references or compact and resolve with the move table, and
/// finally sweep.
///
/// # Panics
///
/// Panics if the processor has unresolved references from an earlier cycle
/// or is not initialized.
pub fn collect<R: RootSet + ?Sized>(
    heap: &mut ManagedHeap,
    processor: &ReferenceProcessor,
    roots: &mut R,
    options: &CollectOptions,
) -> CollectInfo {
    let start = Instant::now();

    #[cfg(feature = "tracing")]
    let _gc_span = trace_collection(options.compact, next_cycle_id());

    processor.begin_cycle();
    heap.clear_marks();
    let predicate: &dyn Fn(ObjectId) -> bool = &*options.clear_predicate;

    let marked = {
        #[cfg(feature = "tracing")]
        let _mark_span = trace_phase(GcPhase::Mark);

        let shared: &ManagedHeap = heap;
        let mut marker = Marker::new(shared, processor, predicate);
        // Objects outside the collected region are live by definition.
        let outside: Vec<ObjectId> = shared
            .live_objects()
            .map(|(id, _)| id)
            .filter(|&id| !predicate(id))
            .collect();
        for id in outside {
            marker.mark_root(id);
        }
        roots.visit_roots(&mut |id| marker.mark_root(id));
        marker.drain();
        marker.marked()
    };

    let mut relocated = 0;
    if options.compact {
        #[cfg(feature = "tracing")]
        let _compact_span = trace_phase(GcPhase::Compact);

        let moves = relocate_survivors(heap, processor);
        relocated = moves.len();
        processor.process_references_after_compaction(&*heap, predicate);

        let forward = |id: ObjectId| moves.get(&id).copied();
        for (_, object) in heap.live_objects() {
            object.update_edges(&forward);
        }
        roots.update_roots(&forward);
    } else {
        processor.process_references(
            &*heap,
            false,
            options.clear_soft_references,
            GcPhase::Remark,
            predicate,
        );
    }

    let freed = {
        #[cfg(feature = "tracing")]
        let _sweep_span = trace_phase(GcPhase::Sweep);
        heap.sweep()
    };

    CollectInfo {
        marked,
        relocated,
        freed,
        references: processor.last_metrics(),
        duration: start.elapsed(),
    }
}

/// Move every marked movable object and report each move.
fn relocate_survivors(
    heap: &mut ManagedHeap,
    listener: &dyn RelocationListener,
) -> HashMap<ObjectId, ObjectId> {
    let survivors: Vec<ObjectId> = heap
        .live_objects()
        .map(|(id, _)| id)
        .filter(|&id| heap.is_marked(id) && heap.space_of(id) == Some(Space::Movable))
        .collect();

    let mut moves = HashMap::with_capacity(survivors.len());
    for old in survivors {
        let new = heap.relocate(old);
        listener.on_object_moved(old, new);
        moves.insert(old, new);
    }
    moves
}
