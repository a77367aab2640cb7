//! Intrusive list of live finalizable references.
//!
//! The list owns no nodes: nodes are heap objects and the list only holds a
//! handle to the first one. Links live inside the nodes, so pushing and
//! unlinking never allocate. The collector sees the list head as a root and
//! the links as ordinary traced edges, which keeps every linked node alive
//! until it is unlinked.
//!
//! Node states:
//!
//! ```text
//! Unlinked --push--> Linked --unlink--> Unlinked
//! ```
//!
//! An unlinked node has both links null, which is how a repeated unlink is
//! recognised as already done.

use crate::heap::GcHeap;
use crate::invariant::{self, Invariant};
use crate::ptr::{ObjectId, ObjectPointer};
use crate::reference::{finalizable_node, FinalizableWeakRef};

/// Head of the finalizable reference list.
///
/// The head has no referent and no predecessor of its own; the first node's
/// `prev` is always null.
#[derive(Debug, Default)]
pub struct FinalizableWeakRefList {
    first: ObjectPointer<FinalizableWeakRef>,
    len: usize,
}

impl FinalizableWeakRefList {
    /// Create an empty list.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            first: ObjectPointer::null(),
            len: 0,
        }
    }

    /// The first node, or null.
    #[must_use]
    pub const fn first(&self) -> ObjectPointer<FinalizableWeakRef> {
        self.first
    }

    /// Number of linked nodes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Check if no node is linked.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Link `node` as the new first node. O(1).
    ///
    /// # Panics
    ///
    /// Panics if `node` is null, not a finalizable reference, or already linked.
    #[track_caller]
    pub fn push<H: GcHeap + ?Sized>(&mut self, heap: &H, node: ObjectPointer<FinalizableWeakRef>) {
        let Some(id) = node.get() else {
            invariant::violated(Invariant::NullHandle);
        };
        let entry = finalizable_node(heap, id);
        if self.first == node || !entry.prev().is_null() || !entry.next().is_null() {
            invariant::violated(Invariant::NodeAlreadyLinked(id));
        }

        entry.set_next(self.first);
        if let Some(old_first) = self.first.get() {
            finalizable_node(heap, old_first).set_prev(node);
        }
        self.first = node;
        self.len += 1;
    }

    /// Remove `node` from the list and null both of its links.
    ///
    /// Returns `false` if the node was not linked; a repeated unlink is a no-op.
    ///
    /// # Panics
    ///
    /// Panics if `node` is null or not a finalizable reference, or if the
    /// list head has a predecessor.
    #[track_caller]
    pub fn unlink<H: GcHeap + ?Sized>(
        &mut self,
        heap: &H,
        node: ObjectPointer<FinalizableWeakRef>,
    ) -> bool {
        let Some(id) = node.get() else {
            invariant::violated(Invariant::NullHandle);
        };
        let entry = finalizable_node(heap, id);
        let prev = entry.prev();
        let next = entry.next();

        if self.first == node {
            if !prev.is_null() {
                invariant::violated(Invariant::CorruptListHead(id));
            }
            self.first = next;
        } else if prev.is_null() {
            // Only the first node may lack a predecessor.
            return false;
        }

        if let Some(prev_id) = prev.get() {
            finalizable_node(heap, prev_id).set_next(next);
        }
        if let Some(next_id) = next.get() {
            finalizable_node(heap, next_id).set_prev(prev);
        }
        entry.set_prev(ObjectPointer::null());
        entry.set_next(ObjectPointer::null());
        self.len -= 1;
        true
    }

    /// Unlink every node whose referent was cleared by the collector.
    ///
    /// A cleared node must already have handed its finalizer to the
    /// processor. Returns the number of nodes unlinked.
    ///
    /// # Panics
    ///
    /// Panics if a cleared node still owns its finalizer.
    pub fn unlink_cleared_references<H: GcHeap + ?Sized>(
        &mut self,
        heap: &H,
        undefined: ObjectId,
    ) -> usize {
        let mut unlinked = 0;
        let mut current = self.first;
        while let Some(id) = current.get() {
            let entry = finalizable_node(heap, id);
            // Capture the successor before unlinking nulls it.
            let next = entry.next();
            if entry.weak().referent() == undefined {
                if entry.has_finalizer() {
                    invariant::violated(Invariant::FinalizerNotReleased(id));
                }
                self.unlink(heap, current);
                unlinked += 1;
            }
            current = next;
        }
        unlinked
    }

    /// Run every finalizer still attached to a linked node.
    ///
    /// Used only at VM teardown: nodes stay linked because no further cycle
    /// will look at them. Returns the number of finalizers run.
    pub fn traverse_and_finalize<H: GcHeap + ?Sized>(&self, heap: &H) -> usize {
        let mut ran = 0;
        for node in self.iter(heap) {
            if let Some(finalizer) = node.release_finalizer() {
                finalizer.run();
                ran += 1;
            }
        }
        ran
    }

    /// Iterate over linked nodes from the head.
    pub fn iter<'a, H: GcHeap + ?Sized>(&self, heap: &'a H) -> Iter<'a, H> {
        Iter {
            heap,
            current: self.first,
        }
    }

    /// Ids of linked nodes from the head.
    pub fn ids<H: GcHeap + ?Sized>(&self, heap: &H) -> Vec<ObjectId> {
        let mut ids = Vec::with_capacity(self.len);
        let mut current = self.first;
        while let Some(id) = current.get() {
            ids.push(id);
            current = finalizable_node(heap, id).next();
        }
        ids
    }

    /// Retarget the head after its first node was relocated.
    pub fn update_after_relocation(&mut self, forward: &dyn Fn(ObjectId) -> Option<ObjectId>) {
        if let Some(new) = self.first.get().and_then(forward) {
            self.first = ObjectPointer::from_id(new);
        }
    }

    /// Walk the list and check its structure.
    ///
    /// # Panics
    ///
    /// Panics if the first node has a predecessor, a neighbour does not link
    /// back, or the node count disagrees with the recorded length.
    pub fn check_invariants<H: GcHeap + ?Sized>(&self, heap: &H) {
        let mut walked = 0;
        let mut prev = ObjectPointer::<FinalizableWeakRef>::null();
        let mut current = self.first;
        while let Some(id) = current.get() {
            let entry = finalizable_node(heap, id);
            if entry.prev() != prev {
                if prev.is_null() {
                    invariant::violated(Invariant::CorruptListHead(id));
                }
                invariant::violated(Invariant::BrokenListLinks(id));
            }
            walked += 1;
            prev = current;
            current = entry.next();
        }
        if walked != self.len {
            invariant::violated(Invariant::ListLengthMismatch {
                recorded: self.len,
                walked,
            });
        }
    }
}

/// Iterator over the nodes of a [`FinalizableWeakRefList`].
pub struct Iter<'a, H: GcHeap + ?Sized> {
    heap: &'a H,
    current: ObjectPointer<FinalizableWeakRef>,
}

impl<'a, H: GcHeap + ?Sized> Iterator for Iter<'a, H> {
    type Item = &'a FinalizableWeakRef;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.current.get()?;
        let entry = finalizable_node(self.heap, id);
        self.current = entry.next();
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::{Class, HeapObject, ManagedHeap, ObjectBody, Space};
    use crate::reference::Finalizer;

    fn node(heap: &mut ManagedHeap, finalizer: Option<Finalizer>) -> ObjectPointer<FinalizableWeakRef> {
        let id = heap.allocate(
            HeapObject::new(
                Class::finalizable_weak_reference(),
                Vec::new(),
                ObjectBody::Finalizable(FinalizableWeakRef::new(ObjectPointer::null(), finalizer)),
            ),
            Space::Movable,
        );
        ObjectPointer::new(heap, id)
    }

    fn ids(list: &FinalizableWeakRefList, heap: &ManagedHeap) -> Vec<ObjectPointer<FinalizableWeakRef>> {
        list.ids(heap)
            .into_iter()
            .map(ObjectPointer::from_id)
            .collect()
    }

    #[test]
    fn test_push_inserts_at_head() {
        let mut heap = ManagedHeap::new();
        let (a, b, c) = (node(&mut heap, None), node(&mut heap, None), node(&mut heap, None));
        let mut list = FinalizableWeakRefList::new();

        list.push(&heap, a);
        list.push(&heap, b);
        list.push(&heap, c);

        assert_eq!(ids(&list, &heap), vec![c, b, a]);
        assert_eq!(list.len(), 3);
        list.check_invariants(&heap);
    }

    #[test]
    fn test_unlink_head_middle_and_tail() {
        let mut heap = ManagedHeap::new();
        let nodes: Vec<_> = (0..4).map(|_| node(&mut heap, None)).collect();
        let mut list = FinalizableWeakRefList::new();
        for &n in &nodes {
            list.push(&heap, n);
        }
        // Order is now [3, 2, 1, 0].

        assert!(list.unlink(&heap, nodes[3]));
        list.check_invariants(&heap);
        assert!(list.unlink(&heap, nodes[1]));
        list.check_invariants(&heap);
        assert!(list.unlink(&heap, nodes[0]));
        list.check_invariants(&heap);

        assert_eq!(ids(&list, &heap), vec![nodes[2]]);
        assert!(heap[nodes[3]].as_finalizable().is_some_and(|n| n.prev().is_null() && n.next().is_null()));
    }

    #[test]
    fn test_unlink_twice_is_noop() {
        let mut heap = ManagedHeap::new();
        let (a, b) = (node(&mut heap, None), node(&mut heap, None));
        let mut list = FinalizableWeakRefList::new();
        list.push(&heap, a);
        list.push(&heap, b);

        assert!(list.unlink(&heap, a));
        assert!(!list.unlink(&heap, a));
        assert_eq!(list.len(), 1);
        assert_eq!(list.first(), b);
        list.check_invariants(&heap);
    }

    #[test]
    fn test_unlink_sole_node_empties_list() {
        let mut heap = ManagedHeap::new();
        let a = node(&mut heap, None);
        let mut list = FinalizableWeakRefList::new();
        list.push(&heap, a);

        assert!(list.unlink(&heap, a));
        assert!(list.is_empty());
        assert!(list.first().is_null());
        assert!(!list.unlink(&heap, a));
    }

    #[test]
    #[should_panic(expected = "already linked")]
    fn test_double_push_is_fatal() {
        let mut heap = ManagedHeap::new();
        let a = node(&mut heap, None);
        let mut list = FinalizableWeakRefList::new();
        list.push(&heap, a);
        list.push(&heap, a);
    }

    #[test]
    fn test_traverse_and_finalize_keeps_links() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let counter = Arc::new(AtomicUsize::new(0));
        let mut heap = ManagedHeap::new();
        let mut list = FinalizableWeakRefList::new();
        for _ in 0..3 {
            let counter = Arc::clone(&counter);
            let n = node(
                &mut heap,
                Some(Finalizer::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })),
            );
            list.push(&heap, n);
        }
        let n = node(&mut heap, None);
        list.push(&heap, n);

        assert_eq!(list.traverse_and_finalize(&heap), 3);
        assert_eq!(list.traverse_and_finalize(&heap), 0);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(list.len(), 4);
    }
}
