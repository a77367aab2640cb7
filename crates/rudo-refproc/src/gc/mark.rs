//! Mark phase with reference discovery.

use std::sync::atomic::Ordering;

use crossbeam::deque::Worker;

use crate::heap::{HeapObject, ManagedHeap};
use crate::ptr::ObjectId;
use crate::reference::{LinkField, ReferenceProcessor};

/// A unit of marking work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkEntry {
    /// Trace a whole object.
    Object(ObjectId),
    /// Trace whatever a finalizable reference's link field points at.
    Field {
        /// The finalizable reference holding the field.
        owner: ObjectId,
        /// Which link.
        field: LinkField,
    },
}

/// Single-threaded marker over a LIFO mark stack.
///
/// Objects the processor accepts as references are not traced through their
/// referent; everything else is traced through every edge.
pub struct Marker<'a> {
    heap: &'a ManagedHeap,
    processor: &'a ReferenceProcessor,
    predicate: &'a dyn Fn(ObjectId) -> bool,
    stack: Worker<MarkEntry>,
    marked: usize,
}

impl<'a> Marker<'a> {
    /// Create a marker. `predicate` restricts which referents may be
    /// treated as weak this cycle.
    #[must_use]
    pub fn new(
        heap: &'a ManagedHeap,
        processor: &'a ReferenceProcessor,
        predicate: &'a dyn Fn(ObjectId) -> bool,
    ) -> Self {
        Self {
            heap,
            processor,
            predicate,
            stack: Worker::new_lifo(),
            marked: 0,
        }
    }

    /// Number of objects marked so far.
    #[must_use]
    pub const fn marked(&self) -> usize {
        self.marked
    }

    /// Mark a root.
    ///
    /// A root that is a reference object goes through the visitor path: its
    /// linked neighbours are pushed as whole objects.
    pub fn mark_root(&mut self, id: ObjectId) {
        if !self.heap.mark_if_not_marked(id) {
            return;
        }
        self.marked += 1;
        let object = &self.heap[id];
        let class = object.class();
        if self
            .processor
            .is_reference(self.heap, class, id, self.predicate)
        {
            let stack = &self.stack;
            object.for_each_field(|field| stack.push(MarkEntry::Object(field)));
            self.processor.handle_reference_with_visitor(
                self.heap,
                class,
                id,
                self.predicate,
                |linked| stack.push(MarkEntry::Object(linked)),
            );
        } else {
            self.push_edges(object);
        }
    }

    /// Trace until the mark stack is empty.
    pub fn drain(&mut self) {
        while let Some(entry) = self.stack.pop() {
            match entry {
                MarkEntry::Object(id) => self.trace_object(id),
                MarkEntry::Field { owner, field } => {
                    let target = self.heap[owner]
                        .as_finalizable()
                        .and_then(|node| node.link(field).load(Ordering::Acquire).get());
                    if let Some(target) = target {
                        self.trace_object(target);
                    }
                }
            }
        }
    }

    fn trace_object(&mut self, id: ObjectId) {
        if !self.heap.mark_if_not_marked(id) {
            return;
        }
        self.marked += 1;
        let object = &self.heap[id];
        let class = object.class();
        if self
            .processor
            .is_reference(self.heap, class, id, self.predicate)
        {
            let stack = &self.stack;
            object.for_each_field(|field| stack.push(MarkEntry::Object(field)));
            self.processor
                .handle_reference(self.heap, class, id, self.predicate, |owner, field| {
                    stack.push(MarkEntry::Field { owner, field });
                });
        } else {
            self.push_edges(object);
        }
    }

    fn push_edges(&self, object: &HeapObject) {
        object.for_each_edge(|edge| self.stack.push(MarkEntry::Object(edge)));
    }
}
