use thiserror::Error;

/// Errors that can occur when operating a [`BlockPool`][crate::BlockPool].
///
/// None of these errors leave the pool in a modified state: an operation that fails
/// has made no change to the pool metadata or to any slot header.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The backing region cannot hold even a single header plus slot.
    #[error("region of {total_size} bytes is too small, at least {required} bytes are required")]
    RegionTooSmall {
        /// The region size the pool was configured with.
        total_size: usize,

        /// The minimum region size that can hold one slot.
        required: usize,
    },

    /// The caller passed an argument that cannot be used with this pool.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// A human-readable description of the problem.
        message: String,
    },

    /// Every byte of the backing region is already carved into slots and the free list is empty.
    #[error("out of capacity: {allocated_slots} slots already fill the {total_size} byte region")]
    OutOfCapacity {
        /// Number of slots carved out of the region when the allocation was attempted.
        allocated_slots: usize,

        /// Capacity of the backing region in bytes.
        total_size: usize,
    },

    /// The slot id has never been handed out by the pool.
    #[error("slot {id} is out of range, only {allocated_slots} slots have been allocated")]
    OutOfRange {
        /// The offending slot id.
        id: usize,

        /// Number of slots carved out of the region at the time of the call.
        allocated_slots: usize,
    },

    /// The byte offset lies beyond the last slot that fits into the backing region.
    #[error("offset {offset} is beyond the last slot of the {total_size} byte region")]
    OffsetOutOfRange {
        /// The offending byte offset.
        offset: usize,

        /// Capacity of the backing region in bytes.
        total_size: usize,
    },

    /// The byte offset does not fall on a slot boundary.
    #[error("offset {offset} is not aligned to the slot stride {stride}, nearest slot boundary is {suggested}")]
    Misaligned {
        /// The offending byte offset.
        offset: usize,

        /// Distance in bytes between the starts of two neighboring slots.
        stride: usize,

        /// The offset rounded down to the nearest slot boundary.
        suggested: usize,
    },

    /// The slot is already on the free list. Releasing it again has no effect.
    #[error("slot {id} is already free")]
    AlreadyFree {
        /// The slot that was released twice.
        id: usize,
    },

    /// A slot header holds a state the pool can never have written.
    ///
    /// This indicates that something other than the pool wrote into header bytes.
    #[error("slot {id} has a corrupt header: {detail}")]
    CorruptState {
        /// The slot whose header is corrupt.
        id: usize,

        /// A human-readable description of the inconsistency.
        detail: String,
    },
}

/// A specialized `Result` type for block pool operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;
