//! Loom tests for concurrent reference discovery.
//!
//! These tests check that the mark bit is the only thing deciding which
//! marking thread records a reference, and that the finalizer queue can be
//! filled and drained from different threads.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rudo_refproc::heap::{Class, HeapObject, ManagedHeap, ObjectBody, Space};
use rudo_refproc::{
    FinalizableWeakRef, Finalizer, GcPhase, ObjectId, ObjectPointer, ReferenceProcessor,
    WeakReference,
};

struct Shared {
    heap: ManagedHeap,
    processor: ReferenceProcessor,
}

fn shared_with(body: impl FnOnce(&mut ManagedHeap) -> ObjectBody) -> (Arc<Shared>, ObjectId) {
    let mut heap = ManagedHeap::new();
    let undefined =
        heap.allocate_non_movable(HeapObject::plain(Class::plain("undefined"), Vec::new()));
    let processor = ReferenceProcessor::default();
    processor.initialize(&heap, undefined);

    let body = body(&mut heap);
    let class = match body {
        ObjectBody::Finalizable(_) => Class::finalizable_weak_reference(),
        _ => Class::weak_reference(),
    };
    let obj = heap.allocate(HeapObject::new(class, Vec::new(), body), Space::Movable);
    (Arc::new(Shared { heap, processor }), obj)
}

fn referent(heap: &mut ManagedHeap) -> ObjectPointer {
    let id = heap.allocate(HeapObject::plain(Class::plain("Node"), Vec::new()), Space::Movable);
    ObjectPointer::new(heap, id)
}

fn discover(shared: &Shared, obj: ObjectId) -> bool {
    if !shared.heap.mark_if_not_marked(obj) {
        return false;
    }
    let class = shared.heap[obj].class();
    if !shared.processor.is_reference(&shared.heap, class, obj, |_| true) {
        return false;
    }
    shared
        .processor
        .handle_reference_with_visitor(&shared.heap, class, obj, |_| true, |_| {});
    true
}

/// Two markers reaching the same reference record it exactly once.
#[test]
#[ignore = "loom test - run with cargo test loom_pending_set --release -- --ignored"]
fn test_racing_markers_record_once() {
    loom::model(|| {
        let (shared, obj) =
            shared_with(|heap| ObjectBody::Weak(WeakReference::new(referent(heap))));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let shared = Arc::clone(&shared);
                loom::thread::spawn(move || discover(&shared, obj))
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&won| won)
            .count();

        assert_eq!(wins, 1);
        assert_eq!(shared.processor.reference_queue_size(), 1);
    });
}

/// A finalizer queued by the collector thread runs exactly once, whichever
/// thread drains the queue.
#[test]
#[ignore = "loom test - run with cargo test loom_pending_set --release -- --ignored"]
fn test_finalizer_enqueue_and_drain() {
    loom::model(|| {
        let counter = Arc::new(AtomicUsize::new(0));
        let (shared, obj) = shared_with(|heap| {
            let counter = Arc::clone(&counter);
            ObjectBody::Finalizable(FinalizableWeakRef::new(
                referent(heap),
                Some(Finalizer::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })),
            ))
        });

        let collector = loom::thread::spawn({
            let shared = Arc::clone(&shared);
            move || {
                assert!(discover(&shared, obj));
                shared
                    .processor
                    .process_references(&shared.heap, false, false, GcPhase::Remark, |_| true);
            }
        });
        let mutator = loom::thread::spawn({
            let shared = Arc::clone(&shared);
            move || shared.processor.process_finalizers()
        });

        collector.join().unwrap();
        let early = mutator.join().unwrap();
        let late = shared.processor.process_finalizers();

        assert_eq!(early + late, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    });
}
