/// A snapshot of the bookkeeping of a [`BlockPool`][crate::BlockPool].
///
/// All values are taken under the pool lock, so they are consistent with each other at the
/// moment of capture. They may be out of date by the time they are inspected if other threads
/// are using the pool.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct PoolStats {
    allocated_slots: usize,
    used_slots: usize,
    max_slots: usize,
    free_head: Option<usize>,
}

impl PoolStats {
    pub(crate) fn new(
        allocated_slots: usize,
        used_slots: usize,
        max_slots: usize,
        free_head: Option<usize>,
    ) -> Self {
        debug_assert!(used_slots <= allocated_slots);
        debug_assert!(allocated_slots <= max_slots);

        Self {
            allocated_slots,
            used_slots,
            max_slots,
            free_head,
        }
    }

    /// Number of slots ever carved out of the backing region.
    ///
    /// This never decreases: released slots go onto the free list rather than back
    /// into the uncarved part of the region.
    #[must_use]
    pub fn allocated_slots(&self) -> usize {
        self.allocated_slots
    }

    /// Number of slots currently handed out to callers.
    #[must_use]
    pub fn used_slots(&self) -> usize {
        self.used_slots
    }

    /// Number of slots waiting on the free list.
    #[must_use]
    pub fn free_slots(&self) -> usize {
        // Cannot underflow, the constructor checks the relation.
        self.allocated_slots.wrapping_sub(self.used_slots)
    }

    /// Number of slots that have not yet been carved out of the backing region.
    #[must_use]
    pub fn remaining_slots(&self) -> usize {
        // Cannot underflow, the constructor checks the relation.
        self.max_slots.wrapping_sub(self.allocated_slots)
    }

    /// The slot that the next allocation will reuse, if any.
    #[must_use]
    pub fn free_head(&self) -> Option<usize> {
        self.free_head
    }

    /// Whether an allocation would succeed right now.
    #[must_use]
    pub fn has_vacancy(&self) -> bool {
        self.free_head.is_some() || self.remaining_slots() > 0
    }
}
