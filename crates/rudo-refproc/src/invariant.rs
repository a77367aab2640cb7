//! Fatal runtime-invariant violations.
//!
//! Nothing in this crate returns an error to the collector. Expected
//! situations (dead, already cleared, predicate rejected) are silent skips;
//! everything listed here means the GC state is corrupted and continuing is
//! unsafe. Embedders are expected to build with `panic = "abort"`.

use thiserror::Error;

use crate::ptr::ObjectId;

/// A broken GC invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Invariant {
    /// A handle names a slot that is not a live object of the heap.
    #[error("handle {0} is outside the managed heap")]
    HandleOutsideHeap(ObjectId),
    /// A null handle was dereferenced.
    #[error("null handle dereferenced")]
    NullHandle,
    /// The "undefined" sentinel lives in movable space.
    #[error("undefined sentinel {0} is not in non-movable space")]
    MovableSentinel(ObjectId),
    /// The processor was initialized twice with different sentinels.
    #[error("undefined sentinel already initialized to {current}, got {offered}")]
    SentinelReinitialized {
        /// Sentinel captured first.
        current: ObjectId,
        /// Sentinel offered later.
        offered: ObjectId,
    },
    /// Reference processing ran before `initialize`.
    #[error("reference processor used before initialize")]
    Uninitialized,
    /// Class tags disagree with the object layout.
    #[error("class tags of {0} disagree with its layout")]
    InconsistentClassTags(ObjectId),
    /// The same reference object was discovered twice in one cycle.
    #[error("reference {0} discovered twice in one cycle")]
    DuplicateDiscovery(ObjectId),
    /// A new cycle started while references from the last one were unresolved.
    #[error("{0} references left unresolved by the previous cycle")]
    PendingSetNotDrained(usize),
    /// A node with a cleared referent still owns its finalizer.
    #[error("cleared reference {0} still owns its finalizer")]
    FinalizerNotReleased(ObjectId),
    /// The first node of the finalizable list has a predecessor.
    #[error("finalizable list head {0} has a predecessor")]
    CorruptListHead(ObjectId),
    /// A node's neighbour does not link back to it.
    #[error("finalizable list links around {0} are broken")]
    BrokenListLinks(ObjectId),
    /// The node count disagrees with the list walk.
    #[error("finalizable list records {recorded} nodes but {walked} are linked")]
    ListLengthMismatch {
        /// Count kept by the list.
        recorded: usize,
        /// Count found by walking it.
        walked: usize,
    },
    /// A node was pushed while still linked.
    #[error("finalizable reference {0} is already linked")]
    NodeAlreadyLinked(ObjectId),
    /// The collector tried to move an object in non-movable space.
    #[error("cannot relocate non-movable object {0}")]
    RelocateNonMovable(ObjectId),
}

/// Report a broken invariant and stop.
///
/// # Panics
///
/// Always.
#[cold]
#[inline(never)]
#[track_caller]
pub fn violated(invariant: Invariant) -> ! {
    #[cfg(feature = "tracing")]
    tracing::error!(%invariant, "gc invariant violated");
    panic!("gc invariant violated: {invariant}");
}
