use std::cell::Cell;
use std::marker::PhantomData;
use std::num::NonZero;

use crate::header::DEFAULT_HEADROOM;
use crate::layout::SlotLayout;
use crate::{BlockPool, RawLock, Result, SpinLock};

/// Builder for creating an instance of [`BlockPool`].
///
/// The region size and slot size are mandatory and given up front, other settings are optional.
///
/// # Examples
///
/// Default settings:
///
/// ```
/// use block_pool::BlockPool;
///
/// let pool = BlockPool::builder(4096, 64).build().unwrap();
/// assert_eq!(pool.max_slots(), 62);
/// ```
///
/// Putting waiting threads to sleep instead of spinning:
///
/// ```
/// use block_pool::{BlockPool, BlockingLock};
///
/// let pool = BlockPool::builder(4096, 64)
///     .lock(BlockingLock::new())
///     .build()
///     .unwrap();
/// ```
///
/// # Thread safety
///
/// The builder is [`Send`] whenever its lock is, so a pool can be configured on one thread and
/// built on another. It is not [`Sync`]: every setter consumes the builder, so there is never a
/// reason to share one.
#[derive(Debug)]
#[must_use]
pub struct BlockPoolBuilder<L = SpinLock> {
    total_size: usize,
    slot_size: usize,
    headroom: NonZero<u32>,
    lock: L,

    // Settings are applied by value, a shared builder has no use.
    _not_sync: PhantomData<Cell<()>>,
}

impl BlockPoolBuilder {
    #[inline]
    pub(crate) fn new(total_size: usize, slot_size: usize) -> Self {
        Self {
            total_size,
            slot_size,
            headroom: DEFAULT_HEADROOM,
            lock: SpinLock::new(),
            _not_sync: PhantomData,
        }
    }
}

impl<L: RawLock> BlockPoolBuilder<L> {
    /// Sets the safety factor applied when choosing the [header width][crate::HeaderWidth].
    ///
    /// A width is only used if the pool needs at most `1 / headroom` of the range of the signed
    /// integer of that width. The default is 4. Larger values switch to wider headers sooner.
    ///
    /// Whatever the value, a width is never used for more slots than its headers can address.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::num::NonZero;
    ///
    /// use block_pool::{BlockPool, HeaderWidth};
    ///
    /// // 1000 slots fit, more than 32767 / 64.
    /// let pool = BlockPool::builder(66_000, 64)
    ///     .width_headroom(NonZero::new(64).unwrap())
    ///     .build()
    ///     .unwrap();
    ///
    /// assert_eq!(pool.header_width(), HeaderWidth::Bits32);
    /// ```
    #[inline]
    pub fn width_headroom(mut self, headroom: NonZero<u32>) -> Self {
        self.headroom = headroom;
        self
    }

    /// Sets the lock that serializes pool operations, replacing the default [`SpinLock`].
    #[inline]
    pub fn lock<L2: RawLock>(self, lock: L2) -> BlockPoolBuilder<L2> {
        BlockPoolBuilder {
            total_size: self.total_size,
            slot_size: self.slot_size,
            headroom: self.headroom,
            lock,
            _not_sync: PhantomData,
        }
    }

    /// Builds the pool with the specified configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RegionTooSmall`][crate::Error::RegionTooSmall] if the region cannot hold
    /// a single header plus slot.
    pub fn build(self) -> Result<BlockPool<L>> {
        let layout = SlotLayout::calculate(self.total_size, self.slot_size, self.headroom)?;
        Ok(BlockPool::new_inner(layout, self.lock))
    }
}
