//! Stop-the-world collection driving the reference processor.
//!
//! A small mark/sweep/compact collector over
//! [`ManagedHeap`](crate::heap::ManagedHeap). It plays the collector side of
//! the reference processing protocol:
//!
//! - marking asks the processor about every reference-tagged object and
//!   defers weak edges to it,
//! - compaction reports every move through
//!   [`RelocationListener`](crate::reference::RelocationListener),
//! - resolution runs before sweeping, so cleared referents never dangle.

mod collector;
pub mod mark;

pub use collector::{collect, CollectInfo, CollectOptions, RootSet};
pub use mark::{MarkEntry, Marker};

/// Collector phase reported to the reference processor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum GcPhase {
    /// No collection in progress.
    #[default]
    Idle,
    /// Tracing the object graph.
    Mark,
    /// Final marking pause, where references are resolved.
    Remark,
    /// Relocating survivors.
    Compact,
    /// Reclaiming unmarked objects.
    Sweep,
}
