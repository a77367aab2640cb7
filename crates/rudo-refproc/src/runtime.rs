//! The VM context tying heap, roots and reference processing together.

use std::fmt;
use std::sync::Arc;

use crate::gc::{self, CollectInfo, CollectOptions, RootSet};
use crate::heap::{Class, HeapObject, ManagedHeap, ObjectBody, Space};
use crate::invariant::{self, Invariant};
use crate::ptr::{ObjectId, ObjectPointer};
use crate::reference::{
    FinalizableWeakRef, FinalizableWeakRefList, Finalizer, ReferenceProcessor,
    ReferenceProcessorConfig, WeakReference,
};
use crate::roots::{RootSlot, ShadowStack};

/// A managed runtime instance.
///
/// Owns the heap, the mutator's shadow stack, the list of live finalizable
/// references and the reference processor. The "undefined" sentinel is
/// allocated in non-movable space when the runtime is created.
///
/// # Examples
///
/// ```
/// use rudo_refproc::heap::Class;
/// use rudo_refproc::Runtime;
///
/// let mut rt = Runtime::new();
/// let target = rt.allocate(Class::plain("Node"), Vec::new());
/// let weak = rt.new_weak_reference(target);
/// let slot = rt.root(weak);
///
/// rt.collect();
/// assert!(rt.is_cleared(rt.root_get(slot).unwrap()));
/// ```
pub struct Runtime {
    heap: ManagedHeap,
    processor: ReferenceProcessor,
    finalizable: FinalizableWeakRefList,
    roots: ShadowStack,
    undefined: ObjectId,
    weak_class: Arc<Class>,
    finalizable_class: Arc<Class>,
    torn_down: bool,
}

impl Runtime {
    /// Create a runtime with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ReferenceProcessorConfig::default())
    }

    /// Create a runtime with the given processor configuration.
    #[must_use]
    pub fn with_config(config: ReferenceProcessorConfig) -> Self {
        let mut heap = ManagedHeap::new();
        let undefined =
            heap.allocate_non_movable(HeapObject::plain(Class::plain("undefined"), Vec::new()));
        let processor = ReferenceProcessor::new(config);
        processor.initialize(&heap, undefined);
        Self {
            heap,
            processor,
            finalizable: FinalizableWeakRefList::new(),
            roots: ShadowStack::new(),
            undefined,
            weak_class: Class::weak_reference(),
            finalizable_class: Class::finalizable_weak_reference(),
            torn_down: false,
        }
    }

    /// The managed heap.
    #[must_use]
    pub const fn heap(&self) -> &ManagedHeap {
        &self.heap
    }

    /// The reference processor.
    #[must_use]
    pub const fn processor(&self) -> &ReferenceProcessor {
        &self.processor
    }

    /// The list of live finalizable references.
    #[must_use]
    pub const fn finalizable_list(&self) -> &FinalizableWeakRefList {
        &self.finalizable
    }

    /// The shadow stack.
    #[must_use]
    pub const fn roots(&self) -> &ShadowStack {
        &self.roots
    }

    /// The undefined sentinel written into cleared referents.
    #[must_use]
    pub const fn undefined(&self) -> ObjectPointer {
        ObjectPointer::from_id(self.undefined)
    }

    // ------------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------------

    /// Allocate an ordinary object with the given strong fields.
    ///
    /// # Panics
    ///
    /// Panics if a field names an object that is not live.
    pub fn allocate(&mut self, class: Arc<Class>, fields: Vec<Option<ObjectId>>) -> ObjectId {
        let fields = self.field_pointers(fields);
        self.heap
            .allocate(HeapObject::plain(class, fields), Space::Movable)
    }

    /// Allocate an ordinary object in non-movable space.
    ///
    /// # Panics
    ///
    /// Panics if a field names an object that is not live.
    pub fn allocate_non_movable(
        &mut self,
        class: Arc<Class>,
        fields: Vec<Option<ObjectId>>,
    ) -> ObjectId {
        let fields = self.field_pointers(fields);
        self.heap
            .allocate_non_movable(HeapObject::plain(class, fields))
    }

    fn field_pointers(&self, fields: Vec<Option<ObjectId>>) -> Vec<ObjectPointer> {
        fields
            .into_iter()
            .map(|field| ObjectPointer::from_option(&self.heap, field))
            .collect()
    }

    /// Allocate a weak reference to `referent`.
    ///
    /// # Panics
    ///
    /// Panics if `referent` is not live.
    pub fn new_weak_reference(&mut self, referent: ObjectId) -> ObjectId {
        let referent = ObjectPointer::new(&self.heap, referent);
        self.heap.allocate(
            HeapObject::new(
                Arc::clone(&self.weak_class),
                Vec::new(),
                ObjectBody::Weak(WeakReference::new(referent)),
            ),
            Space::Movable,
        )
    }

    /// Allocate a finalizable reference to `referent` and link it into the
    /// finalizable list. `finalizer` runs at most once, after `referent` dies.
    ///
    /// # Panics
    ///
    /// Panics if `referent` is not live.
    pub fn new_finalizable_reference(&mut self, referent: ObjectId, finalizer: Finalizer) -> ObjectId {
        let referent = ObjectPointer::new(&self.heap, referent);
        let id = self.heap.allocate(
            HeapObject::new(
                Arc::clone(&self.finalizable_class),
                Vec::new(),
                ObjectBody::Finalizable(FinalizableWeakRef::new(referent, Some(finalizer))),
            ),
            Space::Movable,
        );
        self.finalizable
            .push(&self.heap, ObjectPointer::from_id(id));
        id
    }

    /// Store `value` into field `index` of `obj`.
    ///
    /// # Panics
    ///
    /// Panics if `obj` or `value` is not live, or `index` is out of bounds.
    pub fn write_field(&self, obj: ObjectId, index: usize, value: Option<ObjectId>) {
        self.heap.write_field(obj, index, value);
    }

    /// The referent of a weak or finalizable reference.
    ///
    /// # Panics
    ///
    /// Panics if `reference` is not a live reference object.
    #[must_use]
    #[track_caller]
    pub fn referent_of(&self, reference: ObjectId) -> ObjectPointer {
        match self.heap[reference].as_weak_reference() {
            Some(weak) => weak.referent(),
            None => invariant::violated(Invariant::InconsistentClassTags(reference)),
        }
    }

    /// Whether the collector cleared the referent of `reference`.
    ///
    /// # Panics
    ///
    /// Panics if `reference` is not a live reference object.
    #[must_use]
    pub fn is_cleared(&self, reference: ObjectId) -> bool {
        self.referent_of(reference) == self.undefined
    }

    /// Unlink a finalizable reference from the list, so the list no longer
    /// keeps it alive and teardown no longer finalizes it.
    ///
    /// Returns `false` if it was not linked.
    pub fn unlink_finalizable(&mut self, reference: ObjectId) -> bool {
        let node = ObjectPointer::new(&self.heap, reference);
        self.finalizable.unlink(&self.heap, node)
    }

    // ------------------------------------------------------------------------
    // Roots
    // ------------------------------------------------------------------------

    /// Keep `id` alive until the slot is released.
    pub fn root(&mut self, id: ObjectId) -> RootSlot {
        self.roots.push(id)
    }

    /// The object currently held by `slot`. Compaction updates it.
    #[must_use]
    pub fn root_get(&self, slot: RootSlot) -> Option<ObjectId> {
        self.roots.get(slot)
    }

    /// Release `slot`.
    pub fn unroot(&mut self, slot: RootSlot) {
        self.roots.clear_slot(slot);
    }

    /// Run `f` in a root frame; roots created inside are released after.
    pub fn scope<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.roots.push_frame();
        let result = f(self);
        self.roots.pop_frame();
        result
    }

    // ------------------------------------------------------------------------
    // Collection
    // ------------------------------------------------------------------------

    /// Run a full non-moving collection.
    pub fn collect(&mut self) -> CollectInfo {
        self.collect_with(&CollectOptions::full())
    }

    /// Run a full compacting collection.
    pub fn collect_compacting(&mut self) -> CollectInfo {
        self.collect_with(&CollectOptions::compacting())
    }

    /// Run a collection, then unlink finalizable references whose referents
    /// were cleared. Finalizers stay queued until
    /// [`process_finalizers`](Self::process_finalizers).
    pub fn collect_with(&mut self, options: &CollectOptions) -> CollectInfo {
        let mut roots = RuntimeRoots {
            stack: &mut self.roots,
            finalizable: &mut self.finalizable,
            undefined: self.undefined,
        };
        let info = gc::collect(&mut self.heap, &self.processor, &mut roots, options);
        self.finalizable
            .unlink_cleared_references(&self.heap, self.undefined);
        if cfg!(debug_assertions) {
            self.finalizable.check_invariants(&self.heap);
        }
        info
    }

    /// Run queued finalizers at a safepoint. Returns how many ran.
    pub fn process_finalizers(&self) -> usize {
        self.processor.process_finalizers()
    }

    /// Shut the runtime down: drain the finalizer queue, then run every
    /// finalizer still attached to a linked reference.
    ///
    /// Returns the number of finalizers run. Later calls return 0.
    pub fn teardown(&mut self) -> usize {
        if self.torn_down {
            return 0;
        }
        self.torn_down = true;
        let queued = self.processor.process_finalizers();
        queued + self.finalizable.traverse_and_finalize(&self.heap)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if self.processor.config().finalize_on_teardown {
            self.teardown();
        }
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("objects", &self.heap.len())
            .field("roots", &self.roots.len())
            .field("finalizable", &self.finalizable.len())
            .field("undefined", &self.undefined)
            .field("torn_down", &self.torn_down)
            .finish_non_exhaustive()
    }
}

/// The runtime's roots: the sentinel, the shadow stack and the head of the
/// finalizable list.
struct RuntimeRoots<'a> {
    stack: &'a mut ShadowStack,
    finalizable: &'a mut FinalizableWeakRefList,
    undefined: ObjectId,
}

impl RootSet for RuntimeRoots<'_> {
    fn visit_roots(&self, visit: &mut dyn FnMut(ObjectId)) {
        visit(self.undefined);
        self.stack.visit_roots(visit);
        if let Some(first) = self.finalizable.first().get() {
            visit(first);
        }
    }

    fn update_roots(&mut self, forward: &dyn Fn(ObjectId) -> Option<ObjectId>) {
        self.stack.update_roots(forward);
        self.finalizable.update_after_relocation(forward);
    }
}
