//! Managed heap model.
//!
//! Objects live in a generation-checked arena. Every slot carries a mark bit
//! and the space it was allocated in; freeing a slot bumps its generation so
//! that stale [`ObjectId`]s are detected rather than aliased.
//!
//! # Spaces
//!
//! - [`Space::Movable`]: objects may be relocated by a compacting cycle.
//!   Relocation assigns a new identity and frees the old slot.
//! - [`Space::NonMovable`]: identity is stable for the lifetime of the heap.
//!   The "undefined" sentinel must live here so that identity comparisons
//!   against it stay valid across compaction.
//!
//! The reference processor does not depend on [`ManagedHeap`] directly; it
//! consumes the [`GcHeap`] trait, so an embedder can put its own heap behind it.

use std::num::NonZeroU32;
use std::ops::{BitOr, Index};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::invariant::{self, Invariant};
use crate::ptr::{AtomicObjectPointer, ObjectId, ObjectPointer};
use crate::reference::{FinalizableWeakRef, LinkField, WeakReference};

// ============================================================================
// Class metadata
// ============================================================================

/// Class tag bits consulted by the reference processor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ClassFlags(u8);

impl ClassFlags {
    /// Ordinary object.
    pub const NONE: Self = Self(0);
    /// Instances hold a weak referent.
    pub const WEAK_REFERENCE: Self = Self(1 << 0);
    /// Instances carry a finalizer and list links.
    pub const FINALIZER_REFERENCE: Self = Self(1 << 1);

    /// Check whether all bits of `other` are set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ClassFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Class metadata shared by all instances of a class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Class {
    name: String,
    flags: ClassFlags,
}

impl Class {
    /// Create a class with the given tags.
    pub fn new(name: impl Into<String>, flags: ClassFlags) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            flags,
        })
    }

    /// An ordinary class.
    pub fn plain(name: impl Into<String>) -> Arc<Self> {
        Self::new(name, ClassFlags::NONE)
    }

    /// The weak reference class.
    #[must_use]
    pub fn weak_reference() -> Arc<Self> {
        Self::new("WeakRef", ClassFlags::WEAK_REFERENCE)
    }

    /// The finalizable weak reference class. A finalizable reference is also
    /// a weak reference, so both tags are set.
    #[must_use]
    pub fn finalizable_weak_reference() -> Arc<Self> {
        Self::new(
            "FinalizableWeakRef",
            ClassFlags::WEAK_REFERENCE | ClassFlags::FINALIZER_REFERENCE,
        )
    }

    /// Class name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Class tags.
    #[must_use]
    pub const fn flags(&self) -> ClassFlags {
        self.flags
    }

    /// Check the weak reference tag.
    #[must_use]
    pub const fn is_weak_reference(&self) -> bool {
        self.flags.contains(ClassFlags::WEAK_REFERENCE)
    }

    /// Check the finalizer reference tag.
    #[must_use]
    pub const fn is_finalizer_reference(&self) -> bool {
        self.flags.contains(ClassFlags::FINALIZER_REFERENCE)
    }
}

// ============================================================================
// HeapObject
// ============================================================================

/// Layout-specific part of a heap object.
#[derive(Debug)]
pub enum ObjectBody {
    /// No extra state.
    Plain,
    /// A weak reference.
    Weak(WeakReference),
    /// A finalizable weak reference.
    Finalizable(FinalizableWeakRef),
}

/// A heap object: class, strong reference fields and a layout-specific body.
#[derive(Debug)]
pub struct HeapObject {
    class: Arc<Class>,
    fields: Box<[AtomicObjectPointer]>,
    body: ObjectBody,
}

impl HeapObject {
    /// Create an object.
    #[must_use]
    pub fn new(class: Arc<Class>, fields: Vec<ObjectPointer>, body: ObjectBody) -> Self {
        Self {
            class,
            fields: fields.into_iter().map(AtomicObjectPointer::new).collect(),
            body,
        }
    }

    /// Create an ordinary object.
    #[must_use]
    pub fn plain(class: Arc<Class>, fields: Vec<ObjectPointer>) -> Self {
        Self::new(class, fields, ObjectBody::Plain)
    }

    /// The object's class.
    #[must_use]
    pub fn class(&self) -> &Arc<Class> {
        &self.class
    }

    /// The object's body.
    #[must_use]
    pub const fn body(&self) -> &ObjectBody {
        &self.body
    }

    /// Number of strong reference fields.
    #[must_use]
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Load a strong reference field.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[must_use]
    pub fn field(&self, index: usize) -> ObjectPointer {
        self.fields[index].load(Ordering::Acquire)
    }

    pub(crate) fn set_field(&self, index: usize, value: ObjectPointer) {
        self.fields[index].store(value, Ordering::Release);
    }

    /// The weak reference part, for both weak and finalizable layouts.
    #[must_use]
    pub const fn as_weak_reference(&self) -> Option<&WeakReference> {
        match &self.body {
            ObjectBody::Plain => None,
            ObjectBody::Weak(weak) => Some(weak),
            ObjectBody::Finalizable(node) => Some(node.weak()),
        }
    }

    /// The finalizable part, if this is a finalizable reference.
    #[must_use]
    pub const fn as_finalizable(&self) -> Option<&FinalizableWeakRef> {
        match &self.body {
            ObjectBody::Finalizable(node) => Some(node),
            _ => None,
        }
    }

    /// Visit the targets of the strong reference fields only.
    pub fn for_each_field(&self, mut visit: impl FnMut(ObjectId)) {
        for field in &*self.fields {
            if let Some(id) = field.load(Ordering::Acquire).get() {
                visit(id);
            }
        }
    }

    /// Visit every outgoing edge as if the object were strongly traced:
    /// fields, the referent and the list links.
    pub fn for_each_edge(&self, mut visit: impl FnMut(ObjectId)) {
        self.for_each_field(&mut visit);
        if let Some(weak) = self.as_weak_reference() {
            if let Some(id) = weak.referent().get() {
                visit(id);
            }
        }
        if let Some(node) = self.as_finalizable() {
            for link in [LinkField::Prev, LinkField::Next] {
                if let Some(id) = node.link(link).load(Ordering::Acquire).get() {
                    visit(id);
                }
            }
        }
    }

    /// Rewrite every edge whose target has moved.
    pub(crate) fn update_edges(&self, forward: &dyn Fn(ObjectId) -> Option<ObjectId>) {
        for field in &*self.fields {
            forward_field(field, forward);
        }
        if let Some(weak) = self.as_weak_reference() {
            forward_field(weak.referent_field(), forward);
        }
        if let Some(node) = self.as_finalizable() {
            forward_field(node.link(LinkField::Prev), forward);
            forward_field(node.link(LinkField::Next), forward);
        }
    }
}

fn forward_field<T>(field: &AtomicObjectPointer<T>, forward: &dyn Fn(ObjectId) -> Option<ObjectId>) {
    if let Some(new) = field.load(Ordering::Acquire).get().and_then(forward) {
        field.store(ObjectPointer::from_id(new), Ordering::Release);
    }
}

// ============================================================================
// GcHeap - collector-side interface
// ============================================================================

/// Heap space of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Space {
    /// May be relocated by compaction.
    Movable,
    /// Never relocated.
    NonMovable,
}

/// What the reference processor needs from the heap and collector.
pub trait GcHeap {
    /// The live object named by `id`, or `None` for stale or unknown ids.
    fn object(&self, id: ObjectId) -> Option<&HeapObject>;

    /// Whether `id` names a live object.
    fn contains(&self, id: ObjectId) -> bool {
        self.object(id).is_some()
    }

    /// Whether the collector marked `id` in the current cycle.
    fn is_marked(&self, id: ObjectId) -> bool;

    /// Whether `id` lives in non-movable space.
    fn is_in_non_movable_space(&self, id: ObjectId) -> bool;
}

// ============================================================================
// ManagedHeap - arena implementation
// ============================================================================

struct Slot {
    generation: u32,
    marked: AtomicBool,
    space: Space,
    object: Option<HeapObject>,
}

impl Slot {
    const fn vacant() -> Self {
        Self {
            generation: 0,
            marked: AtomicBool::new(false),
            space: Space::Movable,
            object: None,
        }
    }
}

/// Generation-checked object arena.
///
/// Allocation, sweeping and relocation take `&mut self`; marking only needs
/// `&self`, so several marking threads can share the heap.
pub struct ManagedHeap {
    slots: Vec<Slot>,
    free: Vec<NonZeroU32>,
    live: usize,
}

impl ManagedHeap {
    /// Create an empty heap.
    #[must_use]
    pub fn new() -> Self {
        Self {
            // Slot 0 is reserved so that a packed id of zero means null.
            slots: vec![Slot::vacant()],
            free: Vec::new(),
            live: 0,
        }
    }

    /// Allocate `object` in `space`.
    ///
    /// # Panics
    ///
    /// Panics if the arena has run out of 32-bit slot indices.
    pub fn allocate(&mut self, object: HeapObject, space: Space) -> ObjectId {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                let Some(index) = u32::try_from(self.slots.len())
                    .ok()
                    .and_then(NonZeroU32::new)
                else {
                    panic!("managed heap slot space exhausted");
                };
                self.slots.push(Slot::vacant());
                index
            }
        };
        let slot = &mut self.slots[index.get() as usize];
        slot.space = space;
        slot.marked.store(false, Ordering::Relaxed);
        slot.object = Some(object);
        self.live += 1;
        ObjectId::new(index, slot.generation)
    }

    /// Allocate `object` in non-movable space.
    pub fn allocate_non_movable(&mut self, object: HeapObject) -> ObjectId {
        self.allocate(object, Space::NonMovable)
    }

    fn slot(&self, id: ObjectId) -> Option<&Slot> {
        self.slots
            .get(id.slot())
            .filter(|slot| slot.generation == id.generation() && slot.object.is_some())
    }

    /// Space of a live object.
    #[must_use]
    pub fn space_of(&self, id: ObjectId) -> Option<Space> {
        self.slot(id).map(|slot| slot.space)
    }

    /// Set the mark bit of `id`. Returns `true` if this call marked it.
    ///
    /// Stale ids are never marked.
    pub fn mark_if_not_marked(&self, id: ObjectId) -> bool {
        self.slot(id)
            .is_some_and(|slot| !slot.marked.swap(true, Ordering::AcqRel))
    }

    /// Clear every mark bit.
    pub fn clear_marks(&self) {
        for slot in &self.slots {
            slot.marked.store(false, Ordering::Relaxed);
        }
    }

    /// Load field `index` of `obj`.
    ///
    /// # Panics
    ///
    /// Panics if `obj` is not live or `index` is out of bounds.
    #[must_use]
    #[track_caller]
    pub fn read_field(&self, obj: ObjectId, index: usize) -> Option<ObjectId> {
        self[obj].field(index).get()
    }

    /// Store `value` into field `index` of `obj`.
    ///
    /// # Panics
    ///
    /// Panics if `obj` or `value` is not live, or `index` is out of bounds.
    #[track_caller]
    pub fn write_field(&self, obj: ObjectId, index: usize, value: Option<ObjectId>) {
        let value = ObjectPointer::from_option(self, value);
        self[obj].set_field(index, value);
    }

    /// Free every unmarked object and clear the marks of the survivors.
    ///
    /// Returns the number of objects freed.
    pub fn sweep(&mut self) -> usize {
        let mut freed = 0;
        for index in 1..self.slots.len() {
            let slot = &self.slots[index];
            if slot.object.is_none() {
                continue;
            }
            if !slot.marked.swap(false, Ordering::AcqRel) {
                self.release_slot(index);
                freed += 1;
            }
        }
        freed
    }

    /// Move a movable object into a fresh slot.
    ///
    /// The new slot inherits the mark bit; the old id becomes stale.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not live or lives in non-movable space.
    pub fn relocate(&mut self, id: ObjectId) -> ObjectId {
        let Some(slot) = self.slot(id) else {
            invariant::violated(Invariant::HandleOutsideHeap(id));
        };
        if slot.space != Space::Movable {
            invariant::violated(Invariant::RelocateNonMovable(id));
        }
        let marked = slot.marked.load(Ordering::Acquire);
        let Some(object) = self.slots[id.slot()].object.take() else {
            invariant::violated(Invariant::HandleOutsideHeap(id));
        };
        self.live -= 1;

        let new_id = self.allocate(object, Space::Movable);
        self.slots[new_id.slot()]
            .marked
            .store(marked, Ordering::Release);
        self.release_slot(id.slot());
        new_id
    }

    fn release_slot(&mut self, index: usize) {
        let slot = &mut self.slots[index];
        if slot.object.take().is_some() {
            self.live -= 1;
        }
        slot.generation = slot.generation.wrapping_add(1);
        slot.marked.store(false, Ordering::Relaxed);
        if let Some(index) = u32::try_from(index).ok().and_then(NonZeroU32::new) {
            self.free.push(index);
        }
    }

    /// Iterate over all live objects.
    pub fn live_objects(&self) -> impl Iterator<Item = (ObjectId, &HeapObject)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .skip(1)
            .filter_map(|(index, slot)| {
                let object = slot.object.as_ref()?;
                let index = u32::try_from(index).ok().and_then(NonZeroU32::new)?;
                Some((ObjectId::new(index, slot.generation), object))
            })
    }

    /// Number of live objects.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.live
    }

    /// Check if the heap holds no objects.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.live == 0
    }
}

impl Default for ManagedHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl GcHeap for ManagedHeap {
    fn object(&self, id: ObjectId) -> Option<&HeapObject> {
        self.slot(id).and_then(|slot| slot.object.as_ref())
    }

    fn is_marked(&self, id: ObjectId) -> bool {
        self.slot(id)
            .is_some_and(|slot| slot.marked.load(Ordering::Acquire))
    }

    fn is_in_non_movable_space(&self, id: ObjectId) -> bool {
        self.space_of(id) == Some(Space::NonMovable)
    }
}

impl Index<ObjectId> for ManagedHeap {
    type Output = HeapObject;

    #[track_caller]
    fn index(&self, id: ObjectId) -> &HeapObject {
        self.object(id)
            .unwrap_or_else(|| invariant::violated(Invariant::HandleOutsideHeap(id)))
    }
}

impl<T> Index<ObjectPointer<T>> for ManagedHeap {
    type Output = HeapObject;

    #[track_caller]
    fn index(&self, ptr: ObjectPointer<T>) -> &HeapObject {
        match ptr.get() {
            Some(id) => &self[id],
            None => invariant::violated(Invariant::NullHandle),
        }
    }
}
