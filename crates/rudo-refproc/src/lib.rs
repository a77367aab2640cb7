//! Weak reference and finalizer processing for a moving garbage collector.
//!
//! `rudo-refproc` implements the part of a managed runtime's collector that
//! handles weak and finalizable references: deciding during marking which
//! objects hold weak edges, clearing dead referents afterwards, and deferring
//! native finalizers to a queue that is drained outside the collection pause.
//!
//! # Overview
//!
//! - [`ObjectPointer`]: fixed-width, generation-checked handle into the heap.
//! - [`WeakReference`]: one referent that does not keep its target alive.
//! - [`FinalizableWeakRef`]: a weak reference with list links and a
//!   [`Finalizer`] that runs at most once.
//! - [`FinalizableWeakRefList`]: intrusive list of live finalizable references.
//! - [`ReferenceProcessor`]: discovery, resolution and the finalizer queue.
//! - [`Runtime`]: a small VM context wiring a heap, roots and a
//!   stop-the-world collector to the processor.
//!
//! Cleared referents hold the runtime's "undefined" sentinel, never null, so
//! a cleared reference can always be told apart from an unpopulated one.
//!
//! # Quick Start
//!
//! ```
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! use rudo_refproc::heap::Class;
//! use rudo_refproc::{Finalizer, Runtime};
//!
//! let finalized = Arc::new(AtomicUsize::new(0));
//! let mut rt = Runtime::new();
//!
//! let resource = rt.allocate(Class::plain("Resource"), Vec::new());
//! let counter = Arc::clone(&finalized);
//! rt.new_finalizable_reference(
//!     resource,
//!     Finalizer::new(move || {
//!         counter.fetch_add(1, Ordering::SeqCst);
//!     }),
//! );
//!
//! // Nothing roots `resource`, so the cycle clears it and queues the finalizer.
//! rt.collect();
//! assert_eq!(finalized.load(Ordering::SeqCst), 0);
//!
//! rt.process_finalizers();
//! assert_eq!(finalized.load(Ordering::SeqCst), 1);
//! ```
//!
//! # Failure model
//!
//! Dead, already cleared and predicate-rejected references are skipped
//! silently. A broken invariant (movable sentinel, corrupted list, class tags
//! that disagree with the layout) panics through [`invariant::violated`];
//! build with `panic = "abort"` to make those process-fatal.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod gc;
pub mod heap;
pub mod invariant;
pub mod metrics;
pub mod ptr;
pub mod reference;
pub mod roots;
mod runtime;
mod tracing;

// Re-export public API
pub use gc::{collect, CollectInfo, CollectOptions, GcPhase, RootSet};
pub use invariant::Invariant;
pub use metrics::{global_reference_metrics, GlobalReferenceMetrics, ReferenceMetrics};
pub use ptr::{AtomicObjectPointer, ObjectId, ObjectPointer};
pub use reference::{
    FinalizableWeakRef, FinalizableWeakRefList, Finalizer, LinkField, ReferenceProcessor,
    ReferenceProcessorConfig, RelocationListener, WeakReference,
};
pub use roots::{RootSlot, ShadowStack};
pub use runtime::Runtime;

#[cfg(any(test, feature = "test-util"))]
#[doc(hidden)]
pub mod test_util {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use parking_lot::Mutex;

    use crate::Finalizer;

    /// A finalizer that increments `counter`.
    pub fn counting_finalizer(counter: &Arc<AtomicUsize>) -> Finalizer {
        let counter = Arc::clone(counter);
        Finalizer::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    /// A finalizer that appends `label` to `log`.
    pub fn recording_finalizer(log: &Arc<Mutex<Vec<&'static str>>>, label: &'static str) -> Finalizer {
        let log = Arc::clone(log);
        Finalizer::new(move || log.lock().push(label))
    }
}
