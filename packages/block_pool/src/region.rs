use std::cell::Cell;
use std::iter;
use std::ptr::NonNull;
use std::slice;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering::Relaxed;

/// A contiguous byte region that backs a [`BlockPool`][crate::BlockPool].
///
/// The region is owned by the caller and passed by reference to every pool operation that
/// touches slot headers. All methods take `&self`: the pool only reads and writes header bytes
/// while holding its lock, and callers only touch the payload bytes of slots they own, so the
/// two never overlap.
///
/// Implementations are provided for:
///
/// * `[AtomicU8]` - a region that can be shared between threads. Use [`atomic_region()`] to
///   allocate one on the heap or [`atomic_region_from_raw()`] to view memory that was obtained
///   elsewhere (shared memory, a memory-mapped file, a static buffer).
/// * `[Cell<u8>]` - a region for use on a single thread.
///
/// # Panics
///
/// Implementations panic if asked to access bytes beyond the end of the region. The pool never
/// does so, as it checks that the region covers its `total_size` before touching it.
pub trait Region {
    /// Length of the region in bytes.
    fn size(&self) -> usize;

    /// Copies `buf.len()` bytes starting at `offset` into `buf`.
    fn read_bytes(&self, offset: usize, buf: &mut [u8]);

    /// Copies `bytes` into the region, starting at `offset`.
    fn write_bytes(&self, offset: usize, bytes: &[u8]);
}

fn window<T>(region: &[T], offset: usize, len: usize) -> &[T] {
    offset
        .checked_add(len)
        .and_then(|end| region.get(offset..end))
        .unwrap_or_else(|| {
            panic!(
                "{len} bytes at offset {offset} do not fit into a region of {} bytes",
                region.len()
            )
        })
}

impl Region for [AtomicU8] {
    fn size(&self) -> usize {
        self.len()
    }

    fn read_bytes(&self, offset: usize, buf: &mut [u8]) {
        let len = buf.len();

        for (byte, cell) in buf.iter_mut().zip(window(self, offset, len)) {
            *byte = cell.load(Relaxed);
        }
    }

    fn write_bytes(&self, offset: usize, bytes: &[u8]) {
        for (byte, cell) in bytes.iter().zip(window(self, offset, bytes.len())) {
            cell.store(*byte, Relaxed);
        }
    }
}

impl Region for [Cell<u8>] {
    fn size(&self) -> usize {
        self.len()
    }

    fn read_bytes(&self, offset: usize, buf: &mut [u8]) {
        let len = buf.len();

        for (byte, cell) in buf.iter_mut().zip(window(self, offset, len)) {
            *byte = cell.get();
        }
    }

    fn write_bytes(&self, offset: usize, bytes: &[u8]) {
        for (byte, cell) in bytes.iter().zip(window(self, offset, bytes.len())) {
            cell.set(*byte);
        }
    }
}

/// Allocates a zero-filled region of `len` bytes that can be shared between threads.
///
/// # Example
///
/// ```
/// use block_pool::{BlockPool, atomic_region};
///
/// let pool = BlockPool::new(4096, 64).unwrap();
/// let region = atomic_region(pool.total_size());
///
/// let id = pool.allocate(&*region).unwrap();
/// assert_eq!(id, 0);
/// ```
#[must_use]
pub fn atomic_region(len: usize) -> Box<[AtomicU8]> {
    iter::repeat_with(|| AtomicU8::new(0)).take(len).collect()
}

/// Views `len` bytes of caller-owned memory starting at `ptr` as a shareable region.
///
/// This is how a pool is placed over memory that Rust did not allocate, such as a shared memory
/// mapping or a buffer handed over by foreign code. The owner of a slot id may access the
/// payload of that slot through `ptr` plus the slot's
/// [data offset][crate::BlockPool::data_offset], or through the returned slice.
///
/// # Safety
///
/// The caller must ensure that:
///
/// * `ptr` is valid for reads and writes of `len` bytes for the whole lifetime `'a`.
/// * For the whole lifetime `'a`, the memory is only accessed through atomic operations or through
///   the returned slice, except for payload bytes of slots that the accessing party owns.
#[must_use]
pub unsafe fn atomic_region_from_raw<'a>(ptr: NonNull<u8>, len: usize) -> &'a [AtomicU8] {
    // SAFETY: AtomicU8 has the same size and alignment as u8. The caller guarantees that the
    // memory is valid for `len` bytes for 'a and that all concurrent access is atomic.
    unsafe { slice::from_raw_parts(ptr.cast::<AtomicU8>().as_ptr(), len) }
}
