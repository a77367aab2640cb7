//! Compressed object handles.
//!
//! Reference fields in the managed heap never store native pointers. They
//! store an [`ObjectId`]: a slot index into the heap arena plus the slot's
//! generation, packed into 64 bits. The width is the same on every target,
//! and a handle to a freed or reused slot can be detected instead of silently
//! aliasing a new object.
//!
//! [`ObjectPointer<T>`] is the typed handle used in APIs and [`AtomicObjectPointer<T>`]
//! is the heap-resident field form (referents, list links, ordinary fields).

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::heap::GcHeap;
use crate::invariant::{self, Invariant};

// ============================================================================
// ObjectId - untyped arena handle
// ============================================================================

/// Identity of a heap object: arena slot plus the slot's generation.
///
/// Slot 0 is never handed out, so the packed form `0` is free to mean null.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId {
    slot: NonZeroU32,
    generation: u32,
}

impl ObjectId {
    /// Create an id from its parts.
    #[must_use]
    pub const fn new(slot: NonZeroU32, generation: u32) -> Self {
        Self { slot, generation }
    }

    /// Arena slot index.
    #[must_use]
    pub const fn slot(self) -> usize {
        self.slot.get() as usize
    }

    /// Generation of the slot at the time this id was issued.
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }

    const fn to_raw(self) -> u64 {
        ((self.generation as u64) << 32) | self.slot.get() as u64
    }

    #[allow(clippy::cast_possible_truncation)]
    const fn from_raw(raw: u64) -> Option<Self> {
        match NonZeroU32::new(raw as u32) {
            Some(slot) => Some(Self {
                slot,
                generation: (raw >> 32) as u32,
            }),
            None => None,
        }
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({}v{})", self.slot, self.generation)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.slot, self.generation)
    }
}

// ============================================================================
// ObjectPointer<T> - typed compressed handle
// ============================================================================

/// A typed, fixed-width handle to a heap object, or null.
///
/// `T` only records what the handle is expected to point at (for example
/// [`FinalizableWeakRef`](crate::FinalizableWeakRef)); use [`cast`](Self::cast)
/// to reinterpret it. The handle never owns its target: the heap does.
///
/// # Examples
///
/// ```
/// use rudo_refproc::heap::{Class, HeapObject, ManagedHeap, Space};
/// use rudo_refproc::ObjectPointer;
///
/// let mut heap = ManagedHeap::new();
/// let id = heap.allocate(HeapObject::plain(Class::plain("Node"), Vec::new()), Space::Movable);
///
/// let ptr: ObjectPointer = ObjectPointer::new(&heap, id);
/// assert_eq!(ptr.get(), Some(id));
/// assert!(ObjectPointer::<()>::null().is_null());
/// ```
#[repr(transparent)]
pub struct ObjectPointer<T = ()> {
    raw: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ObjectPointer<T> {
    /// The null handle.
    #[must_use]
    pub const fn null() -> Self {
        Self {
            raw: 0,
            _marker: PhantomData,
        }
    }

    /// Create a handle to `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not name a live object of `heap`. A handle outside
    /// the heap means the heap is corrupted, so this is never recoverable.
    #[must_use]
    #[track_caller]
    pub fn new<H: GcHeap + ?Sized>(heap: &H, id: ObjectId) -> Self {
        if !heap.contains(id) {
            invariant::violated(Invariant::HandleOutsideHeap(id));
        }
        Self::from_id(id)
    }

    /// Create a handle from an optional id; `None` becomes null.
    ///
    /// # Panics
    ///
    /// Panics if `id` is `Some` and not a live object of `heap`.
    #[must_use]
    #[track_caller]
    pub fn from_option<H: GcHeap + ?Sized>(heap: &H, id: Option<ObjectId>) -> Self {
        id.map_or_else(Self::null, |id| Self::new(heap, id))
    }

    /// Wrap an id already known to be valid (loaded from a heap field,
    /// issued by the allocator, or produced by relocation).
    pub(crate) const fn from_id(id: ObjectId) -> Self {
        Self {
            raw: id.to_raw(),
            _marker: PhantomData,
        }
    }

    const fn from_raw(raw: u64) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    /// The target id, or `None` for null.
    #[must_use]
    pub const fn get(self) -> Option<ObjectId> {
        ObjectId::from_raw(self.raw)
    }

    /// Check if this handle is null.
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.raw == 0
    }

    /// Reinterpret the handle as pointing at a `U`.
    #[must_use]
    pub const fn cast<U>(self) -> ObjectPointer<U> {
        ObjectPointer::from_raw(self.raw)
    }
}

impl<T> Clone for ObjectPointer<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ObjectPointer<T> {}

impl<T> Default for ObjectPointer<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> PartialEq for ObjectPointer<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T> Eq for ObjectPointer<T> {}

impl<T> PartialEq<ObjectId> for ObjectPointer<T> {
    fn eq(&self, other: &ObjectId) -> bool {
        self.raw == other.to_raw()
    }
}

impl<T> Hash for ObjectPointer<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<T> fmt::Debug for ObjectPointer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(id) => write!(f, "ObjectPointer({id})"),
            None => f.write_str("ObjectPointer(null)"),
        }
    }
}

impl<T> From<ObjectPointer<T>> for Option<ObjectId> {
    fn from(ptr: ObjectPointer<T>) -> Self {
        ptr.get()
    }
}

// ============================================================================
// AtomicObjectPointer<T> - heap-resident field
// ============================================================================

/// A reference field stored inside a heap object.
///
/// Collector threads read these while mutators may write them, so every
/// access goes through an `AtomicU64`.
pub struct AtomicObjectPointer<T = ()> {
    raw: AtomicU64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> AtomicObjectPointer<T> {
    /// Create a field holding `ptr`.
    #[must_use]
    pub const fn new(ptr: ObjectPointer<T>) -> Self {
        Self {
            raw: AtomicU64::new(ptr.raw),
            _marker: PhantomData,
        }
    }

    /// Create a null field.
    #[must_use]
    pub const fn null() -> Self {
        Self::new(ObjectPointer::null())
    }

    /// Load the value with the given ordering.
    #[must_use]
    pub fn load(&self, ordering: Ordering) -> ObjectPointer<T> {
        ObjectPointer::from_raw(self.raw.load(ordering))
    }

    /// Store a value with the given ordering.
    pub fn store(&self, ptr: ObjectPointer<T>, ordering: Ordering) {
        self.raw.store(ptr.raw, ordering);
    }

    /// Store a value, returning the previous one.
    pub fn swap(&self, ptr: ObjectPointer<T>, ordering: Ordering) -> ObjectPointer<T> {
        ObjectPointer::from_raw(self.raw.swap(ptr.raw, ordering))
    }

    /// Store `new` if the field still holds `current`.
    ///
    /// # Errors
    ///
    /// Returns the value actually found when it differs from `current`.
    pub fn compare_exchange(
        &self,
        current: ObjectPointer<T>,
        new: ObjectPointer<T>,
        success: Ordering,
        failure: Ordering,
    ) -> Result<ObjectPointer<T>, ObjectPointer<T>> {
        self.raw
            .compare_exchange(current.raw, new.raw, success, failure)
            .map(ObjectPointer::from_raw)
            .map_err(ObjectPointer::from_raw)
    }
}

impl<T> Default for AtomicObjectPointer<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> fmt::Debug for AtomicObjectPointer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.load(Ordering::Relaxed), f)
    }
}
