//! Integration tests for finalizable references and the finalizer queue.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rudo_refproc::heap::{Class, GcHeap};
use rudo_refproc::test_util::{counting_finalizer, recording_finalizer};
use rudo_refproc::{global_reference_metrics, Finalizer, Runtime};

#[test]
fn test_finalizer_runs_only_at_process_finalizers() {
    let counter = Arc::new(AtomicUsize::new(0));
    let mut rt = Runtime::new();
    let b = rt.allocate(Class::plain("Resource"), Vec::new());
    let f = rt.new_finalizable_reference(b, counting_finalizer(&counter));
    let slot = rt.root(f);

    rt.collect();
    assert_eq!(counter.load(Ordering::SeqCst), 0);
    assert!(rt.is_cleared(rt.root_get(slot).unwrap()));

    assert_eq!(rt.process_finalizers(), 1);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[test]
fn test_finalizer_runs_at_most_once_across_cycles() {
    let counter = Arc::new(AtomicUsize::new(0));
    let mut rt = Runtime::new();
    let b = rt.allocate(Class::plain("Resource"), Vec::new());
    let f = rt.new_finalizable_reference(b, counting_finalizer(&counter));
    rt.root(f);

    rt.collect();
    rt.collect();
    rt.process_finalizers();
    rt.collect_compacting();
    rt.process_finalizers();

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(rt.teardown(), 0);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[test]
fn test_finalizer_waits_while_referent_is_reachable() {
    let counter = Arc::new(AtomicUsize::new(0));
    let mut rt = Runtime::new();
    let b = rt.allocate(Class::plain("Resource"), Vec::new());
    let b_slot = rt.root(b);
    rt.new_finalizable_reference(b, counting_finalizer(&counter));

    for _ in 0..3 {
        rt.collect();
        rt.collect_compacting();
        rt.process_finalizers();
    }
    assert_eq!(counter.load(Ordering::SeqCst), 0);
    assert_eq!(rt.finalizable_list().len(), 1);

    rt.unroot(b_slot);
    rt.collect_compacting();
    rt.process_finalizers();
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert!(rt.finalizable_list().is_empty());
}

/// Finalizers queued earlier run earlier.
#[test]
fn test_finalizers_run_in_enqueue_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut rt = Runtime::new();
    let first = rt.allocate(Class::plain("Resource"), Vec::new());
    let second = rt.allocate(Class::plain("Resource"), Vec::new());
    let second_slot = rt.root(second);
    rt.new_finalizable_reference(first, recording_finalizer(&log, "first"));
    rt.new_finalizable_reference(second, recording_finalizer(&log, "second"));

    rt.collect();
    rt.unroot(second_slot);
    rt.collect();
    assert!(log.lock().is_empty());
    assert_eq!(rt.processor().finalizer_queue_len(), 2);

    assert_eq!(rt.process_finalizers(), 2);
    assert_eq!(*log.lock(), vec!["first", "second"]);
}

/// A finalizer is removed from the queue before it runs, so one that
/// panics is not run again by the next drain.
#[test]
fn test_panicking_finalizer_is_not_retried() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::new(AtomicUsize::new(0));
    let mut rt = Runtime::new();
    let first = rt.allocate(Class::plain("Resource"), Vec::new());
    let second = rt.allocate(Class::plain("Resource"), Vec::new());
    let second_slot = rt.root(second);
    let panicking = {
        let attempts = Arc::clone(&attempts);
        Finalizer::new(move || {
            attempts.fetch_add(1, Ordering::SeqCst);
            panic!("finalizer failed");
        })
    };
    rt.new_finalizable_reference(first, panicking);
    rt.new_finalizable_reference(second, counting_finalizer(&counter));

    // Enqueue the panicking finalizer first, then the counting one.
    rt.collect();
    rt.unroot(second_slot);
    rt.collect();
    assert_eq!(rt.processor().finalizer_queue_len(), 2);

    let result = panic::catch_unwind(AssertUnwindSafe(|| rt.process_finalizers()));
    assert!(result.is_err());
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(counter.load(Ordering::SeqCst), 0);
    assert_eq!(rt.processor().finalizer_queue_len(), 1);

    assert_eq!(rt.process_finalizers(), 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(rt.teardown(), 0);
}

#[test]
fn test_many_finalizable_references() {
    let counter = Arc::new(AtomicUsize::new(0));
    let mut rt = Runtime::new();
    let mut kept = Vec::new();
    for i in 0..64 {
        let b = rt.allocate(Class::plain("Resource"), Vec::new());
        if i % 4 == 0 {
            kept.push(rt.root(b));
        }
        rt.new_finalizable_reference(b, counting_finalizer(&counter));
    }

    let info = rt.collect_compacting();
    assert_eq!(info.references.finalizers_enqueued, 48);
    assert_eq!(rt.finalizable_list().len(), 16);
    rt.finalizable_list().check_invariants(rt.heap());

    assert_eq!(rt.process_finalizers(), 48);
    assert_eq!(rt.teardown(), 16);
    assert_eq!(counter.load(Ordering::SeqCst), 64);
}

#[test]
fn test_teardown_drains_queue_and_list() {
    let counter = Arc::new(AtomicUsize::new(0));
    let mut rt = Runtime::new();
    let dead = rt.allocate(Class::plain("Resource"), Vec::new());
    let live = rt.allocate(Class::plain("Resource"), Vec::new());
    rt.root(live);
    rt.new_finalizable_reference(dead, counting_finalizer(&counter));
    rt.new_finalizable_reference(live, counting_finalizer(&counter));

    rt.collect();
    assert_eq!(rt.processor().finalizer_queue_len(), 1);

    assert_eq!(rt.teardown(), 2);
    drop(rt);
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[test]
fn test_drop_runs_outstanding_finalizers() {
    let counter = Arc::new(AtomicUsize::new(0));
    {
        let mut rt = Runtime::new();
        let live = rt.allocate(Class::plain("Resource"), Vec::new());
        rt.root(live);
        rt.new_finalizable_reference(live, counting_finalizer(&counter));
    }
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[test]
fn test_unlinked_reference_is_not_finalized_at_teardown() {
    let counter = Arc::new(AtomicUsize::new(0));
    let mut rt = Runtime::new();
    let live = rt.allocate(Class::plain("Resource"), Vec::new());
    rt.root(live);
    let f = rt.new_finalizable_reference(live, counting_finalizer(&counter));

    assert!(rt.unlink_finalizable(f));
    assert!(!rt.unlink_finalizable(f));
    rt.collect();
    assert!(!rt.heap().contains(f), "nothing keeps an unlinked node alive");

    assert_eq!(rt.teardown(), 0);
    assert_eq!(counter.load(Ordering::SeqCst), 0);
}

#[test]
fn test_global_metrics_count_finalizers() {
    let before = global_reference_metrics().total_finalizers_run();
    let counter = Arc::new(AtomicUsize::new(0));
    let mut rt = Runtime::new();
    let b = rt.allocate(Class::plain("Resource"), Vec::new());
    rt.new_finalizable_reference(b, counting_finalizer(&counter));

    rt.collect();
    rt.process_finalizers();

    assert!(global_reference_metrics().total_finalizers_run() > before);
}
