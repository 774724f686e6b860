use std::ops::Range;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering::Relaxed;

use crate::header::SlotHeader;
use crate::layout::SlotLayout;
use crate::lock::LockGuard;
use crate::logging::{trace_event, warn_event};
use crate::{BlockPoolBuilder, Error, HeaderWidth, PoolStats, RawLock, Region, Result, SpinLock};

/// Marks an empty free list in `free_head`. Never a valid slot id, as every slot takes at least
/// two bytes of the region.
const NO_SLOT: usize = usize::MAX;

/// Hands out fixed-size slots of a caller-owned memory region, identified by zero-based ids.
///
/// The pool itself only holds bookkeeping. The memory is a separate [`Region`] that the caller
/// passes to every operation that touches slot headers. The region must be at least
/// [`total_size()`](Self::total_size) bytes long and must be the same region on every call.
///
/// Slots are carved out of the region in order (0, 1, 2, ...) until it is full. Released slots
/// go onto a free list that is threaded through the slot headers, and are reused
/// most-recently-released first before any new slot is carved out.
///
/// # Thread safety
///
/// The pool is thread-safe ([`Send`] and [`Sync`]). Allocation and release are serialized by a
/// [`RawLock`] (a [`SpinLock`] unless configured otherwise) and complete in constant time. The
/// offset conversions only read settings fixed at creation and need no lock.
///
/// # Example
///
/// ```
/// use block_pool::{BlockPool, Region, atomic_region};
///
/// let pool = BlockPool::new(4096, 64).unwrap();
/// let region = atomic_region(pool.total_size());
///
/// let id = pool.allocate(&*region).unwrap();
///
/// // The payload of the slot is ours to use until we release it.
/// region.write_bytes(pool.data_offset(id), b"hello");
///
/// pool.release(&*region, id).unwrap();
/// ```
#[derive(Debug)]
pub struct BlockPool<L: RawLock = SpinLock> {
    layout: SlotLayout,

    lock: L,

    // The counters are only accessed while holding `lock`, which orders all accesses. They are
    // atomic so that even a faulty lock implementation cannot cause a data race.
    /// Slots carved out of the region so far. Never decreases.
    allocated_slots: AtomicUsize,

    /// Slots currently handed out.
    used_slots: AtomicUsize,

    /// First slot of the free list, or `NO_SLOT`.
    free_head: AtomicUsize,
}

impl BlockPool {
    /// Creates a pool that divides `total_size` bytes into slots of `slot_size` payload bytes
    /// each, using the default settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RegionTooSmall`] if the region cannot hold a single header plus slot.
    pub fn new(total_size: usize, slot_size: usize) -> Result<Self> {
        Self::builder(total_size, slot_size).build()
    }

    /// Starts configuring a pool that divides `total_size` bytes into slots of `slot_size`
    /// payload bytes each.
    pub fn builder(total_size: usize, slot_size: usize) -> BlockPoolBuilder {
        BlockPoolBuilder::new(total_size, slot_size)
    }
}

impl<L: RawLock> BlockPool<L> {
    pub(crate) fn new_inner(layout: SlotLayout, lock: L) -> Self {
        Self {
            layout,
            lock,
            allocated_slots: AtomicUsize::new(0),
            used_slots: AtomicUsize::new(0),
            free_head: AtomicUsize::new(NO_SLOT),
        }
    }

    /// Capacity of the backing region in bytes.
    #[must_use]
    pub fn total_size(&self) -> usize {
        self.layout.total_size()
    }

    /// Payload bytes in each slot.
    #[must_use]
    pub fn slot_size(&self) -> usize {
        self.layout.slot_size()
    }

    /// Width of the header at the start of each slot.
    #[must_use]
    pub fn header_width(&self) -> HeaderWidth {
        self.layout.header_width()
    }

    /// Distance in bytes between the starts of neighboring slots (header plus payload).
    #[must_use]
    pub fn stride(&self) -> usize {
        self.layout.stride()
    }

    /// The most slots the backing region can hold.
    #[must_use]
    pub fn max_slots(&self) -> usize {
        self.layout.max_slots()
    }

    /// Byte offset of slot `id` within the backing region.
    ///
    /// # Panics
    ///
    /// Panics if the offset is not representable in `usize`.
    #[must_use]
    pub fn slot_offset(&self, id: usize) -> usize {
        self.layout.slot_offset(id)
    }

    /// Byte offset of the payload of slot `id` within the backing region.
    ///
    /// # Panics
    ///
    /// Panics if the offset is not representable in `usize`.
    #[must_use]
    pub fn data_offset(&self, id: usize) -> usize {
        self.layout.data_offset(id)
    }

    /// The bytes of the backing region that hold the payload of slot `id`.
    ///
    /// # Panics
    ///
    /// Panics if the range is not representable in `usize`.
    #[must_use]
    pub fn data_range(&self, id: usize) -> Range<usize> {
        self.layout.data_range(id)
    }

    /// The id of the slot that starts at byte `offset` of the backing region.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Misaligned`] if no slot starts at `offset`, or
    /// [`Error::OffsetOutOfRange`] if `offset` lies beyond the last slot that fits into the
    /// region.
    pub fn id_from_slot_offset(&self, offset: usize) -> Result<usize> {
        self.layout.id_from_slot_offset(offset)
    }

    /// The id of the slot whose payload starts at byte `offset` of the backing region.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Misaligned`] if no payload starts at `offset`, or
    /// [`Error::OffsetOutOfRange`] if `offset` lies beyond the last slot that fits into the
    /// region.
    pub fn id_from_data_offset(&self, offset: usize) -> Result<usize> {
        self.layout.id_from_data_offset(offset)
    }

    /// Takes a slot out of the pool and returns its id.
    ///
    /// The most recently released slot is reused if there is one. Otherwise, the next slot is
    /// carved out of the region.
    ///
    /// # Errors
    ///
    /// * [`Error::OutOfCapacity`] if no slot is free and the region has no room for another.
    /// * [`Error::InvalidArgument`] if the region is shorter than the pool.
    /// * [`Error::CorruptState`] if the header of the slot at the head of the free list is
    ///   inconsistent. The pool is left unchanged.
    pub fn allocate<R: Region + ?Sized>(&self, region: &R) -> Result<usize> {
        self.check_region(region)?;

        let _guard = LockGuard::acquire(&self.lock);

        let id = match self.load_free_head() {
            Some(id) => self.pop_free(region, id)?,
            None => self.grow(region)?,
        };

        self.debug_check_counts();

        Ok(id)
    }

    /// Returns slot `id` to the pool, making it the next slot to be reused.
    ///
    /// The pool does not touch the payload of the slot, which keeps whatever bytes the
    /// previous owner left in it.
    ///
    /// # Errors
    ///
    /// In every error case the pool is left unchanged.
    ///
    /// * [`Error::OutOfRange`] if the pool never handed out `id`.
    /// * [`Error::AlreadyFree`] if the slot was already released. Releasing twice is harmless.
    /// * [`Error::InvalidArgument`] if the region is shorter than the pool.
    /// * [`Error::CorruptState`] if the header of the slot is inconsistent.
    pub fn release<R: Region + ?Sized>(&self, region: &R, id: usize) -> Result<()> {
        self.check_region(region)?;

        let _guard = LockGuard::acquire(&self.lock);

        let header = self.read_allocated_header(region, id)?;

        if !header.used {
            warn_event!("slot {id} already free");
            return Err(Error::AlreadyFree { id });
        }

        if let Some(next) = header.free_next {
            return Err(corrupt(id, format!("used slot links to free slot {next}")));
        }

        let Some(used_slots) = self.used_slots.load(Relaxed).checked_sub(1) else {
            return Err(corrupt(id, "slot is marked used but no slots are in use".to_string()));
        };

        let free_head = self.load_free_head();
        self.write_header(region, id, SlotHeader::free(free_head));

        self.free_head.store(id, Relaxed);
        self.used_slots.store(used_slots, Relaxed);

        trace_event!(
            "slot {id} released, slots usage: {used_slots}/{}",
            self.allocated_slots.load(Relaxed)
        );

        self.debug_check_counts();

        Ok(())
    }

    /// Whether slot `id` is currently handed out.
    ///
    /// # Errors
    ///
    /// * [`Error::OutOfRange`] if the pool never handed out `id`.
    /// * [`Error::InvalidArgument`] if the region is shorter than the pool.
    /// * [`Error::CorruptState`] if the header of the slot cannot be decoded.
    pub fn is_used<R: Region + ?Sized>(&self, region: &R, id: usize) -> Result<bool> {
        self.check_region(region)?;

        let _guard = LockGuard::acquire(&self.lock);

        Ok(self.read_allocated_header(region, id)?.used)
    }

    /// Captures the current bookkeeping counters of the pool.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let _guard = LockGuard::acquire(&self.lock);
        self.stats_locked()
    }

    /// Verifies that the free list and every slot header agree with the pool counters, and
    /// returns the counters.
    ///
    /// This walks every allocated slot, so it takes time proportional to the number of slots.
    /// Other operations on the pool wait for it to complete.
    ///
    /// # Errors
    ///
    /// * [`Error::CorruptState`] if the free list is malformed (a cycle, a link beyond the
    ///   allocated slots, a used slot on the list) or the counters disagree with the headers.
    /// * [`Error::InvalidArgument`] if the region is shorter than the pool.
    pub fn check_integrity<R: Region + ?Sized>(&self, region: &R) -> Result<PoolStats> {
        self.check_region(region)?;

        let _guard = LockGuard::acquire(&self.lock);

        let allocated_slots = self.allocated_slots.load(Relaxed);
        let used_slots = self.used_slots.load(Relaxed);

        let mut on_free_list = vec![false; allocated_slots];
        let mut free_list_len: usize = 0;
        let mut cursor = self.load_free_head();

        while let Some(id) = cursor {
            let Some(seen) = on_free_list.get_mut(id) else {
                return Err(corrupt(
                    id,
                    format!("free list reaches beyond the {allocated_slots} allocated slots"),
                ));
            };

            if *seen {
                return Err(corrupt(id, "free list contains a cycle".to_string()));
            }
            *seen = true;

            let header = self.read_header(region, id)?;

            if header.used {
                return Err(corrupt(id, "used slot is on the free list".to_string()));
            }

            // Cannot overflow, every step visits a distinct slot.
            free_list_len = free_list_len.wrapping_add(1);
            cursor = header.free_next;
        }

        let mut used_headers: usize = 0;

        for (id, listed) in on_free_list.iter().enumerate() {
            let header = self.read_header(region, id)?;

            if header.used {
                // Cannot overflow, bounded by the number of slots.
                used_headers = used_headers.wrapping_add(1);
            } else if !listed {
                return Err(corrupt(id, "free slot is not on the free list".to_string()));
            }
        }

        let listed_as_used = allocated_slots.checked_sub(free_list_len);

        if used_headers != used_slots || listed_as_used != Some(used_slots) {
            return Err(Error::CorruptState {
                id: self.load_free_head().unwrap_or(0),
                detail: format!(
                    "{used_slots} slots counted as used but {used_headers} headers are used \
                     and {free_list_len} of {allocated_slots} slots are on the free list"
                ),
            });
        }

        Ok(self.stats_locked())
    }

    /// Pops the head of the free list. Must be called with the lock held.
    fn pop_free<R: Region + ?Sized>(&self, region: &R, id: usize) -> Result<usize> {
        let header = self.read_allocated_header(region, id)?;

        if header.used {
            return Err(corrupt(id, "used slot is on the free list".to_string()));
        }

        let allocated_slots = self.allocated_slots.load(Relaxed);

        if let Some(next) = header.free_next.filter(|next| *next >= allocated_slots) {
            return Err(corrupt(
                id,
                format!("free list links to slot {next} beyond the {allocated_slots} allocated"),
            ));
        }

        // Cannot overflow, there are fewer used slots than allocated slots.
        let used_slots = self.used_slots.load(Relaxed).wrapping_add(1);

        self.write_header(region, id, SlotHeader::USED);

        self.free_head
            .store(header.free_next.unwrap_or(NO_SLOT), Relaxed);
        self.used_slots.store(used_slots, Relaxed);

        trace_event!("reusing slot {id}, slots usage: {used_slots}/{allocated_slots}");

        Ok(id)
    }

    /// Carves the next slot out of the region. Must be called with the lock held.
    fn grow<R: Region + ?Sized>(&self, region: &R) -> Result<usize> {
        let id = self.allocated_slots.load(Relaxed);

        if !self.layout.fits(id) {
            warn_event!(
                "out of capacity, {} bytes used by {id} slots of {} bytes, total size {}",
                self.layout.slot_offset(id),
                self.layout.stride(),
                self.layout.total_size()
            );
            return Err(Error::OutOfCapacity {
                allocated_slots: id,
                total_size: self.layout.total_size(),
            });
        }

        // Cannot overflow, bounded by the slots that fit into the region.
        let allocated_slots = id.wrapping_add(1);
        let used_slots = self.used_slots.load(Relaxed).wrapping_add(1);

        self.write_header(region, id, SlotHeader::USED);

        self.allocated_slots.store(allocated_slots, Relaxed);
        self.used_slots.store(used_slots, Relaxed);

        trace_event!("append slot {id}, slots usage: {used_slots}/{allocated_slots}");

        Ok(id)
    }

    fn check_region<R: Region + ?Sized>(&self, region: &R) -> Result<()> {
        if region.size() < self.layout.total_size() {
            warn_event!(
                "region of {} bytes does not cover the {} byte pool",
                region.size(),
                self.layout.total_size()
            );
            return Err(Error::InvalidArgument {
                message: format!(
                    "region of {} bytes does not cover the {} byte pool",
                    region.size(),
                    self.layout.total_size()
                ),
            });
        }

        Ok(())
    }

    /// Reads the header of a slot that must already have been carved out of the region.
    fn read_allocated_header<R: Region + ?Sized>(&self, region: &R, id: usize) -> Result<SlotHeader> {
        let allocated_slots = self.allocated_slots.load(Relaxed);

        if id >= allocated_slots {
            warn_event!("slot {id} out of range, {allocated_slots} slots allocated");
            return Err(Error::OutOfRange {
                id,
                allocated_slots,
            });
        }

        self.read_header(region, id)
    }

    fn read_header<R: Region + ?Sized>(&self, region: &R, id: usize) -> Result<SlotHeader> {
        let width = self.layout.header_width();

        let mut buf = [0_u8; 8];
        let (bytes, _) = buf.split_at_mut(width.bytes());

        region.read_bytes(self.layout.slot_offset(id), bytes);

        width
            .decode(bytes)
            .ok_or_else(|| corrupt(id, format!("header bytes {bytes:02X?} are not valid")))
    }

    fn write_header<R: Region + ?Sized>(&self, region: &R, id: usize, header: SlotHeader) {
        let width = self.layout.header_width();

        let mut buf = [0_u8; 8];
        let (bytes, _) = buf.split_at_mut(width.bytes());

        width.encode(header, bytes);
        region.write_bytes(self.layout.slot_offset(id), bytes);
    }

    fn load_free_head(&self) -> Option<usize> {
        match self.free_head.load(Relaxed) {
            NO_SLOT => None,
            id => Some(id),
        }
    }

    fn stats_locked(&self) -> PoolStats {
        PoolStats::new(
            self.allocated_slots.load(Relaxed),
            self.used_slots.load(Relaxed),
            self.layout.max_slots(),
            self.load_free_head(),
        )
    }

    #[cfg_attr(test, mutants::skip)] // Only adds assertions, mutation is meaningless.
    fn debug_check_counts(&self) {
        let allocated_slots = self.allocated_slots.load(Relaxed);

        debug_assert!(self.used_slots.load(Relaxed) <= allocated_slots);
        debug_assert!(allocated_slots <= self.layout.max_slots());
        debug_assert!(self.load_free_head().is_none_or(|id| id < allocated_slots));
    }
}

fn corrupt(id: usize, detail: String) -> Error {
    warn_event!("slot {id} status invalid: {detail}");
    Error::CorruptState { id, detail }
}

#[cfg(test)]
#[allow(
    clippy::indexing_slicing,
    reason = "test code doesn't need the same rigor as production code"
)]
mod tests {
    use std::cell::Cell;
    use std::collections::HashSet;
    use std::iter;
    use std::sync::atomic::AtomicU8;
    use std::thread;

    use static_assertions::assert_impl_all;

    use super::*;
    use crate::lock::MockRawLock;
    use crate::{BlockingLock, atomic_region};

    assert_impl_all!(BlockPool: Send, Sync, std::fmt::Debug);
    assert_impl_all!(BlockPool<BlockingLock>: Send, Sync, std::fmt::Debug);

    fn pool_and_region() -> (BlockPool, Box<[AtomicU8]>) {
        let pool = BlockPool::new(4096, 64).unwrap();
        let region = atomic_region(pool.total_size());
        (pool, region)
    }

    /// A lock that expects to be taken and released exactly `times` times.
    fn counting_mock_lock(times: usize) -> MockRawLock {
        let mut lock = MockRawLock::new();

        lock.expect_lock().times(times).return_const(());
        lock.expect_unlock().times(times).return_const(());

        lock
    }

    #[test]
    fn new_pool_is_empty() {
        let (pool, region) = pool_and_region();

        let stats = pool.check_integrity(&*region).unwrap();

        assert_eq!(stats.allocated_slots(), 0);
        assert_eq!(stats.used_slots(), 0);
        assert_eq!(stats.free_head(), None);
        assert_eq!(stats.remaining_slots(), 62);
    }

    #[test]
    fn growth_assigns_ids_in_order() {
        let (pool, region) = pool_and_region();

        for expected in 0..10 {
            assert_eq!(pool.allocate(&*region), Ok(expected));
        }

        let stats = pool.check_integrity(&*region).unwrap();
        assert_eq!(stats.allocated_slots(), 10);
        assert_eq!(stats.used_slots(), 10);
    }

    #[test]
    fn release_then_allocate_reuses_slot() {
        let (pool, region) = pool_and_region();

        for _ in 0..10 {
            pool.allocate(&*region).unwrap();
        }

        pool.release(&*region, 9).unwrap();
        assert_eq!(pool.stats().free_head(), Some(9));

        assert_eq!(pool.allocate(&*region), Ok(9));
        assert_eq!(pool.stats().allocated_slots(), 10);
        pool.check_integrity(&*region).unwrap();
    }

    #[test]
    fn free_list_is_lifo() {
        let (pool, region) = pool_and_region();

        for _ in 0..6 {
            pool.allocate(&*region).unwrap();
        }

        pool.release(&*region, 1).unwrap();
        pool.release(&*region, 4).unwrap();
        pool.release(&*region, 2).unwrap();

        assert_eq!(pool.allocate(&*region), Ok(2));
        assert_eq!(pool.allocate(&*region), Ok(4));
        assert_eq!(pool.allocate(&*region), Ok(1));
        assert_eq!(pool.allocate(&*region), Ok(6));
    }

    #[test]
    fn free_list_is_threaded_through_headers() {
        let (pool, region) = pool_and_region();

        for _ in 0..3 {
            pool.allocate(&*region).unwrap();
        }

        pool.release(&*region, 0).unwrap();
        pool.release(&*region, 2).unwrap();

        // Slot 2 heads the list and links to slot 0, which ends it.
        assert_eq!(region[pool.slot_offset(2)].load(Relaxed), 0b0000_0010);
        assert_eq!(region[pool.slot_offset(0)].load(Relaxed), 0b0000_0000);
        assert_eq!(region[pool.slot_offset(1)].load(Relaxed), 0b0000_0001);
    }

    #[test]
    fn fills_region_then_reports_out_of_capacity() {
        let (pool, region) = pool_and_region();

        for expected in 0..62 {
            assert_eq!(pool.allocate(&*region), Ok(expected));
        }

        assert_eq!(
            pool.allocate(&*region),
            Err(Error::OutOfCapacity {
                allocated_slots: 62,
                total_size: 4096
            })
        );

        // The failed attempt changed nothing.
        let stats = pool.check_integrity(&*region).unwrap();
        assert_eq!(stats.allocated_slots(), 62);
        assert_eq!(stats.used_slots(), 62);
    }

    #[test]
    fn full_region_still_reuses_released_slots() {
        let (pool, region) = pool_and_region();

        for _ in 0..62 {
            pool.allocate(&*region).unwrap();
        }

        pool.release(&*region, 30).unwrap();

        assert_eq!(pool.allocate(&*region), Ok(30));
        assert!(matches!(
            pool.allocate(&*region),
            Err(Error::OutOfCapacity { .. })
        ));
    }

    #[test]
    fn release_beyond_allocated_is_out_of_range() {
        let (pool, region) = pool_and_region();

        pool.allocate(&*region).unwrap();

        assert_eq!(
            pool.release(&*region, 1),
            Err(Error::OutOfRange {
                id: 1,
                allocated_slots: 1
            })
        );
        assert_eq!(pool.stats().used_slots(), 1);
    }

    #[test]
    fn double_release_is_idempotent() {
        let (pool, region) = pool_and_region();

        for _ in 0..4 {
            pool.allocate(&*region).unwrap();
        }

        pool.release(&*region, 2).unwrap();
        pool.release(&*region, 1).unwrap();

        let stats_before = pool.stats();
        let header_before = region[pool.slot_offset(2)].load(Relaxed);

        assert_eq!(pool.release(&*region, 2), Err(Error::AlreadyFree { id: 2 }));

        assert_eq!(pool.stats(), stats_before);
        assert_eq!(region[pool.slot_offset(2)].load(Relaxed), header_before);
        pool.check_integrity(&*region).unwrap();
    }

    #[test]
    fn corrupt_header_is_reported_without_mutation() {
        let (pool, region) = pool_and_region();

        for _ in 0..3 {
            pool.allocate(&*region).unwrap();
        }

        // A link without the has-next flag.
        region[pool.slot_offset(1)].store(0b0000_0101, Relaxed);

        let stats_before = pool.stats();

        assert!(matches!(
            pool.release(&*region, 1),
            Err(Error::CorruptState { id: 1, .. })
        ));
        assert!(matches!(
            pool.is_used(&*region, 1),
            Err(Error::CorruptState { id: 1, .. })
        ));
        assert_eq!(pool.stats(), stats_before);
    }

    #[test]
    fn used_slot_with_successor_is_corrupt() {
        let (pool, region) = pool_and_region();

        for _ in 0..3 {
            pool.allocate(&*region).unwrap();
        }

        // Used, with a successor of slot 0.
        region[pool.slot_offset(2)].store(0b0000_0011, Relaxed);

        assert!(matches!(
            pool.release(&*region, 2),
            Err(Error::CorruptState { id: 2, .. })
        ));
        assert_eq!(pool.stats().used_slots(), 3);
    }

    #[test]
    fn corrupt_free_list_head_fails_allocation_without_mutation() {
        let (pool, region) = pool_and_region();

        for _ in 0..3 {
            pool.allocate(&*region).unwrap();
        }

        pool.release(&*region, 1).unwrap();

        // Free, linking to slot 40, which was never allocated.
        region[pool.slot_offset(1)].store(0b1010_0010, Relaxed);

        let stats_before = pool.stats();

        assert!(matches!(
            pool.allocate(&*region),
            Err(Error::CorruptState { id: 1, .. })
        ));
        assert_eq!(pool.stats(), stats_before);
        assert!(pool.check_integrity(&*region).is_err());
    }

    #[test]
    fn integrity_check_detects_cycle() {
        let (pool, region) = pool_and_region();

        for _ in 0..3 {
            pool.allocate(&*region).unwrap();
        }

        pool.release(&*region, 0).unwrap();
        pool.release(&*region, 1).unwrap();

        // Make slot 0 (the tail) link back to slot 1 (the head).
        region[pool.slot_offset(0)].store(0b0000_0110, Relaxed);

        assert!(matches!(
            pool.check_integrity(&*region),
            Err(Error::CorruptState { .. })
        ));
    }

    #[test]
    fn integrity_check_detects_orphaned_free_slot() {
        let (pool, region) = pool_and_region();

        for _ in 0..3 {
            pool.allocate(&*region).unwrap();
        }

        // Mark slot 2 free behind the pool's back.
        region[pool.slot_offset(2)].store(0, Relaxed);

        assert!(matches!(
            pool.check_integrity(&*region),
            Err(Error::CorruptState { id: 2, .. })
        ));
    }

    #[test]
    fn is_used_tracks_state() {
        let (pool, region) = pool_and_region();

        let id = pool.allocate(&*region).unwrap();
        assert_eq!(pool.is_used(&*region, id), Ok(true));

        pool.release(&*region, id).unwrap();
        assert_eq!(pool.is_used(&*region, id), Ok(false));

        assert!(matches!(
            pool.is_used(&*region, 5),
            Err(Error::OutOfRange { id: 5, .. })
        ));
    }

    #[test]
    fn short_region_is_invalid_argument() {
        let pool = BlockPool::new(4096, 64).unwrap();
        let region = atomic_region(4095);

        assert!(matches!(
            pool.allocate(&*region),
            Err(Error::InvalidArgument { .. })
        ));
        assert!(matches!(
            pool.release(&*region, 0),
            Err(Error::InvalidArgument { .. })
        ));
        assert_eq!(pool.stats().allocated_slots(), 0);
    }

    #[test]
    fn payload_is_untouched_by_pool() {
        let (pool, region) = pool_and_region();

        let a = pool.allocate(&*region).unwrap();
        let b = pool.allocate(&*region).unwrap();

        region.write_bytes(pool.data_offset(a), &[0xAA; 64]);
        region.write_bytes(pool.data_offset(b), &[0xBB; 64]);

        pool.release(&*region, a).unwrap();
        pool.release(&*region, b).unwrap();
        pool.allocate(&*region).unwrap();

        let mut payload = [0_u8; 64];
        region.read_bytes(pool.data_offset(a), &mut payload);
        assert_eq!(payload, [0xAA; 64]);
        region.read_bytes(pool.data_offset(b), &mut payload);
        assert_eq!(payload, [0xBB; 64]);
    }

    #[test]
    fn wide_headers_work_end_to_end() {
        // 10_000 slots of 2 + 4 bytes need 32-bit headers.
        let pool = BlockPool::new(60_000, 4).unwrap();
        assert_eq!(pool.header_width(), HeaderWidth::Bits32);

        let region = atomic_region(pool.total_size());

        for expected in 0..pool.max_slots() {
            assert_eq!(pool.allocate(&*region), Ok(expected));
        }

        let last = pool.max_slots() - 1;
        pool.release(&*region, last).unwrap();
        pool.release(&*region, 0).unwrap();

        assert_eq!(pool.allocate(&*region), Ok(0));
        assert_eq!(pool.allocate(&*region), Ok(last));
        pool.check_integrity(&*region).unwrap();
    }

    #[test]
    fn works_on_single_threaded_region() {
        let pool = BlockPool::new(256, 30).unwrap();
        let region: Vec<Cell<u8>> = iter::repeat_with(|| Cell::new(0)).take(256).collect();

        let a = pool.allocate(region.as_slice()).unwrap();
        let b = pool.allocate(region.as_slice()).unwrap();
        pool.release(region.as_slice(), a).unwrap();

        assert_eq!(pool.allocate(region.as_slice()), Ok(a));
        assert_eq!(b, 1);
        pool.check_integrity(region.as_slice()).unwrap();
    }

    #[test]
    fn every_path_releases_lock_exactly_once() {
        // new pool: grow, grow, out-of-range release, release, double release, reuse, stats.
        let pool = BlockPool::builder(132, 64)
            .lock(counting_mock_lock(7))
            .build()
            .unwrap();
        let region = atomic_region(pool.total_size());

        assert_eq!(pool.allocate(&*region), Ok(0));
        assert_eq!(pool.allocate(&*region), Ok(1));
        assert!(pool.release(&*region, 5).is_err());
        assert!(pool.release(&*region, 1).is_ok());
        assert!(pool.release(&*region, 1).is_err());
        assert_eq!(pool.allocate(&*region), Ok(1));
        assert_eq!(pool.stats().used_slots(), 2);
    }

    #[test]
    fn out_of_capacity_releases_lock() {
        let pool = BlockPool::builder(66, 64)
            .lock(counting_mock_lock(2))
            .build()
            .unwrap();
        let region = atomic_region(pool.total_size());

        assert_eq!(pool.allocate(&*region), Ok(0));
        assert!(matches!(
            pool.allocate(&*region),
            Err(Error::OutOfCapacity { .. })
        ));
    }

    #[test]
    fn invalid_region_does_not_take_lock() {
        let mut lock = MockRawLock::new();
        lock.expect_lock().never();
        lock.expect_unlock().never();

        let pool = BlockPool::builder(4096, 64).lock(lock).build().unwrap();
        let region = atomic_region(16);

        assert!(pool.allocate(&*region).is_err());
    }

    #[test]
    fn concurrent_allocations_are_distinct() {
        const THREADS: usize = 16;

        let (pool, region) = pool_and_region();

        let ids: Vec<usize> = thread::scope(|s| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| s.spawn(|| pool.allocate(&*region).unwrap()))
                .collect();

            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let distinct: HashSet<usize> = ids.iter().copied().collect();
        assert_eq!(distinct.len(), THREADS);
        assert_eq!(pool.check_integrity(&*region).unwrap().used_slots(), THREADS);
    }

    #[test]
    fn concurrent_churn_keeps_pool_consistent() {
        const THREADS: usize = 8;
        const ROUNDS: usize = 500;

        let (pool, region) = pool_and_region();

        thread::scope(|s| {
            for thread_index in 0..THREADS {
                let pool = &pool;
                let region = &region;

                s.spawn(move || {
                    let mut held = Vec::new();

                    for round in 0..ROUNDS {
                        let id = pool.allocate(&**region).unwrap();

                        // Stamp the payload and verify nobody else writes into it.
                        let stamp = u8::try_from(thread_index).unwrap();
                        region.write_bytes(pool.data_offset(id), &[stamp; 64]);
                        held.push(id);

                        if round % 3 != 0 {
                            let id = held.swap_remove(0);

                            let mut payload = [0_u8; 64];
                            region.read_bytes(pool.data_offset(id), &mut payload);
                            assert_eq!(payload, [stamp; 64]);

                            pool.release(&**region, id).unwrap();
                        }

                        if held.len() > 5 {
                            for id in held.drain(..) {
                                pool.release(&**region, id).unwrap();
                            }
                        }
                    }

                    for id in held {
                        pool.release(&**region, id).unwrap();
                    }
                });
            }
        });

        let stats = pool.check_integrity(&*region).unwrap();
        assert_eq!(stats.used_slots(), 0);
        assert_eq!(stats.free_slots(), stats.allocated_slots());
    }
}
