//! Weak and finalizable reference objects.
//!
//! A [`WeakReference`] holds one referent that does not keep its target
//! alive. A [`FinalizableWeakRef`] adds intrusive list links, so the VM can
//! keep every live finalizable reference in a [`FinalizableWeakRefList`], and
//! a [`Finalizer`] that runs at most once after the referent dies.
//!
//! # Null versus undefined
//!
//! A null referent means "never populated". When the collector clears a
//! referent it writes the VM's "undefined" sentinel instead, so a cleared
//! reference can always be told apart from an uninitialized one.

use std::fmt;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;

use crate::heap::GcHeap;
use crate::invariant::{self, Invariant};
use crate::ptr::{AtomicObjectPointer, ObjectId, ObjectPointer};

pub mod list;
pub mod processor;

pub use list::FinalizableWeakRefList;
pub use processor::{ReferenceProcessor, ReferenceProcessorConfig, RelocationListener};

// ============================================================================
// WeakReference
// ============================================================================

/// A heap entity holding exactly one weak referent.
#[derive(Debug, Default)]
pub struct WeakReference {
    referent: AtomicObjectPointer,
}

impl WeakReference {
    /// Create a weak reference to `referent`.
    #[must_use]
    pub const fn new(referent: ObjectPointer) -> Self {
        Self {
            referent: AtomicObjectPointer::new(referent),
        }
    }

    /// The current referent: a live object, null, or the undefined sentinel.
    #[must_use]
    pub fn referent(&self) -> ObjectPointer {
        self.referent.load(Ordering::Acquire)
    }

    /// Overwrite the referent.
    pub fn set_referent(&self, referent: ObjectPointer) {
        self.referent.store(referent, Ordering::Release);
    }

    /// Mark the referent as collected by writing the undefined sentinel.
    ///
    /// # Panics
    ///
    /// Panics if `undefined` is null; null is reserved for "never populated".
    pub fn clear_referent(&self, undefined: ObjectPointer) {
        if undefined.is_null() {
            invariant::violated(Invariant::NullHandle);
        }
        self.referent.store(undefined, Ordering::Release);
    }

    pub(crate) const fn referent_field(&self) -> &AtomicObjectPointer {
        &self.referent
    }
}

// ============================================================================
// Finalizer
// ============================================================================

/// A native cleanup callback, consumed when run.
pub struct Finalizer {
    callback: Box<dyn FnOnce() + Send>,
}

impl Finalizer {
    /// Wrap a callback.
    pub fn new(callback: impl FnOnce() + Send + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }

    /// Run the callback.
    pub fn run(self) {
        (self.callback)();
    }
}

impl fmt::Debug for Finalizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Finalizer").finish_non_exhaustive()
    }
}

// ============================================================================
// FinalizableWeakRef
// ============================================================================

/// One of the two intrusive link fields of a [`FinalizableWeakRef`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkField {
    /// Link towards the list head.
    Prev,
    /// Link away from the list head.
    Next,
}

/// A weak reference with list links and an at-most-once finalizer.
#[derive(Debug)]
pub struct FinalizableWeakRef {
    weak: WeakReference,
    prev: AtomicObjectPointer<FinalizableWeakRef>,
    next: AtomicObjectPointer<FinalizableWeakRef>,
    finalizer: Mutex<Option<Finalizer>>,
}

impl FinalizableWeakRef {
    /// Create an unlinked finalizable reference.
    #[must_use]
    pub fn new(referent: ObjectPointer, finalizer: Option<Finalizer>) -> Self {
        Self {
            weak: WeakReference::new(referent),
            prev: AtomicObjectPointer::null(),
            next: AtomicObjectPointer::null(),
            finalizer: Mutex::new(finalizer),
        }
    }

    /// The weak reference part.
    #[must_use]
    pub const fn weak(&self) -> &WeakReference {
        &self.weak
    }

    /// Predecessor in the finalizable list.
    #[must_use]
    pub fn prev(&self) -> ObjectPointer<Self> {
        self.prev.load(Ordering::Acquire)
    }

    /// Successor in the finalizable list.
    #[must_use]
    pub fn next(&self) -> ObjectPointer<Self> {
        self.next.load(Ordering::Acquire)
    }

    /// The storage of a link field, as handed to the mark stack.
    #[must_use]
    pub const fn link(&self, field: LinkField) -> &AtomicObjectPointer<Self> {
        match field {
            LinkField::Prev => &self.prev,
            LinkField::Next => &self.next,
        }
    }

    pub(crate) fn set_prev(&self, prev: ObjectPointer<Self>) {
        self.prev.store(prev, Ordering::Release);
    }

    pub(crate) fn set_next(&self, next: ObjectPointer<Self>) {
        self.next.store(next, Ordering::Release);
    }

    /// Take the finalizer, leaving the payload empty.
    ///
    /// Only the first call returns `Some`, which is what makes finalization
    /// at-most-once.
    pub fn release_finalizer(&self) -> Option<Finalizer> {
        self.finalizer.lock().take()
    }

    /// Whether the finalizer is still attached.
    #[must_use]
    pub fn has_finalizer(&self) -> bool {
        self.finalizer.lock().is_some()
    }
}

/// Resolve `id` as a finalizable reference.
///
/// # Panics
///
/// Panics if `id` is stale or does not have the finalizable layout.
#[track_caller]
pub(crate) fn finalizable_node<H: GcHeap + ?Sized>(heap: &H, id: ObjectId) -> &FinalizableWeakRef {
    let Some(object) = heap.object(id) else {
        invariant::violated(Invariant::HandleOutsideHeap(id));
    };
    object
        .as_finalizable()
        .unwrap_or_else(|| invariant::violated(Invariant::InconsistentClassTags(id)))
}
