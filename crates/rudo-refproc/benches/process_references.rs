//! Benchmark: reference processing cost per collection
//!
//! Measures full and compacting collections over heaps dominated by weak
//! and finalizable references, the cost of draining finalizers, and the
//! resolve pass over large pending sets.

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use rudo_refproc::heap::{Class, HeapObject, ManagedHeap, ObjectBody, Space};
use rudo_refproc::{Finalizer, GcPhase, ObjectPointer, ReferenceProcessor, Runtime, WeakReference};
use std::hint::black_box;
use std::time::Duration;

/// Build a runtime with `count` weak references, every other referent rooted.
fn weak_heap(count: usize) -> Runtime {
    let mut rt = Runtime::new();
    let class = Class::plain("Node");
    for i in 0..count {
        let target = rt.allocate(class.clone(), Vec::new());
        let weak = rt.new_weak_reference(target);
        rt.root(weak);
        if i % 2 == 0 {
            rt.root(target);
        }
    }
    rt
}

/// Build a runtime with `count` finalizable references to unrooted objects.
fn finalizable_heap(count: usize) -> Runtime {
    let mut rt = Runtime::new();
    let class = Class::plain("Resource");
    for i in 0..count {
        let target = rt.allocate(class.clone(), Vec::new());
        rt.new_finalizable_reference(
            target,
            Finalizer::new(move || {
                black_box(i);
            }),
        );
    }
    rt
}

/// Build a processor with `count` discovered weak references to dead objects.
fn pending_set(count: usize) -> (ManagedHeap, ReferenceProcessor) {
    let mut heap = ManagedHeap::new();
    let undefined =
        heap.allocate_non_movable(HeapObject::plain(Class::plain("undefined"), Vec::new()));
    let processor = ReferenceProcessor::default();
    processor.initialize(&heap, undefined);

    let node = Class::plain("Node");
    let weak = Class::weak_reference();
    for _ in 0..count {
        let target = heap.allocate(HeapObject::plain(node.clone(), Vec::new()), Space::Movable);
        let obj = heap.allocate(
            HeapObject::new(
                weak.clone(),
                Vec::new(),
                ObjectBody::Weak(WeakReference::new(ObjectPointer::new(&heap, target))),
            ),
            Space::Movable,
        );
        processor.handle_reference(&heap, &weak, obj, |_| true, |_, _| {});
    }
    (heap, processor)
}

fn bench_pending_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("pending_drain");
    group.sample_size(10);
    for count in [25_000, 50_000, 100_000, 200_000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter_batched(
                || pending_set(count),
                |(heap, processor)| {
                    processor.process_references(&heap, false, false, GcPhase::Remark, |_| true);
                    black_box(processor.last_metrics())
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

fn bench_collect_weak(c: &mut Criterion) {
    let mut group = c.benchmark_group("collect_weak");
    for count in [100, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter_batched(
                || weak_heap(count),
                |mut rt| black_box(rt.collect()),
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

fn bench_collect_compacting_weak(c: &mut Criterion) {
    let mut group = c.benchmark_group("collect_compacting_weak");
    for count in [100, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter_batched(
                || weak_heap(count),
                |mut rt| black_box(rt.collect_compacting()),
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

fn bench_finalizable_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("finalizable_cycle");
    for count in [100, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter_batched(
                || finalizable_heap(count),
                |mut rt| {
                    rt.collect();
                    black_box(rt.process_finalizers())
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

criterion_group!(
    name = process_references;
    config = Criterion::default()
        .sample_size(30)
        .warm_up_time(Duration::from_millis(200))
        .measurement_time(Duration::from_secs(2))
        .noise_threshold(0.05);
    targets =
        bench_collect_weak,
        bench_collect_compacting_weak,
        bench_finalizable_cycle,
        bench_pending_drain,
);

criterion_main!(process_references);
