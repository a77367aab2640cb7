//! Root tracking using a shadow stack.
//!
//! Mutators keep strong references to heap objects through slots of a
//! [`ShadowStack`]. Slots are stable indices: compaction rewrites the id held
//! in a slot but never moves the slot itself.

use crate::gc::RootSet;
use crate::ptr::ObjectId;

// ============================================================================
// ShadowStack - Root tracking structure
// ============================================================================

/// Index of a root slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RootSlot(usize);

/// A shadow stack for tracking GC roots.
#[derive(Debug, Default)]
pub struct ShadowStack {
    /// Rooted ids; `None` marks a slot released with `clear_slot`.
    slots: Vec<Option<ObjectId>>,
    /// Slot counts at each `push_frame`.
    frame_markers: Vec<usize>,
}

impl ShadowStack {
    /// Create a new empty shadow stack.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            frame_markers: Vec::new(),
        }
    }

    /// Register a new root.
    pub fn push(&mut self, id: ObjectId) -> RootSlot {
        self.slots.push(Some(id));
        RootSlot(self.slots.len() - 1)
    }

    /// The id held by `slot`, or `None` if it was cleared or popped.
    #[must_use]
    pub fn get(&self, slot: RootSlot) -> Option<ObjectId> {
        self.slots.get(slot.0).copied().flatten()
    }

    /// Overwrite `slot`. Does nothing if the slot was popped.
    pub fn set(&mut self, slot: RootSlot, id: Option<ObjectId>) {
        if let Some(entry) = self.slots.get_mut(slot.0) {
            *entry = id;
        }
    }

    /// Unregister a root without disturbing other slot indices.
    pub fn clear_slot(&mut self, slot: RootSlot) {
        self.set(slot, None);
    }

    /// Get the number of live roots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Check if there are no live roots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over all live roots.
    pub fn iter(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.slots.iter().filter_map(|slot| *slot)
    }

    /// Clear all roots.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.frame_markers.clear();
    }

    /// Push a frame marker.
    pub fn push_frame(&mut self) {
        self.frame_markers.push(self.slots.len());
    }

    /// Pop a frame marker and remove all roots added since.
    pub fn pop_frame(&mut self) {
        if let Some(marker) = self.frame_markers.pop() {
            self.slots.truncate(marker);
        }
    }

    /// Retarget roots whose objects moved.
    pub fn update(&mut self, forward: &dyn Fn(ObjectId) -> Option<ObjectId>) {
        for id in self.slots.iter_mut().flatten() {
            if let Some(new) = forward(*id) {
                *id = new;
            }
        }
    }
}

impl RootSet for ShadowStack {
    fn visit_roots(&self, visit: &mut dyn FnMut(ObjectId)) {
        for id in self.iter() {
            visit(id);
        }
    }

    fn update_roots(&mut self, forward: &dyn Fn(ObjectId) -> Option<ObjectId>) {
        self.update(forward);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroU32;

    fn id(slot: u32) -> ObjectId {
        ObjectId::new(NonZeroU32::new(slot).unwrap(), 0)
    }

    #[test]
    fn test_slots_are_stable() {
        let mut stack = ShadowStack::new();
        let a = stack.push(id(1));
        let b = stack.push(id(2));

        stack.clear_slot(a);
        assert_eq!(stack.get(a), None);
        assert_eq!(stack.get(b), Some(id(2)));
        assert_eq!(stack.len(), 1);
        assert_eq!(stack.iter().collect::<Vec<_>>(), vec![id(2)]);
    }

    #[test]
    fn test_frames_truncate() {
        let mut stack = ShadowStack::new();
        stack.push(id(1));
        stack.push_frame();
        let inner = stack.push(id(2));
        stack.pop_frame();

        assert_eq!(stack.len(), 1);
        assert_eq!(stack.get(inner), None);
        stack.set(inner, Some(id(3)));
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn test_update_follows_forwarding() {
        let mut stack = ShadowStack::new();
        let a = stack.push(id(1));
        let b = stack.push(id(2));

        stack.update_roots(&|old| (old == id(1)).then_some(id(9)));
        assert_eq!(stack.get(a), Some(id(9)));
        assert_eq!(stack.get(b), Some(id(2)));

        let mut seen = Vec::new();
        stack.visit_roots(&mut |root| seen.push(root));
        assert_eq!(seen, vec![id(9), id(2)]);
    }
}
