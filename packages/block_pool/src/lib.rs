//! A fixed-size block pool that hands out numbered slots of a caller-provided memory region.
//!
//! This crate provides [`BlockPool`], which divides a contiguous byte region into equally sized
//! slots. Each slot carries a small header followed by the payload, and is identified by a
//! zero-based id. Callers translate ids to byte offsets within the region and back.
//!
//! The pool never owns the memory it manages. The region is passed to every operation that
//! touches slot headers, which makes it possible to place a pool over memory that Rust did not
//! allocate, such as shared memory or a memory-mapped file.
//!
//! # Key Features
//!
//! - **Constant-time operations**: Allocation and release never scan the region
//! - **Embedded free list**: Released slots are linked through their own headers, so the pool
//!   needs no bookkeeping memory proportional to its size
//! - **Most-recently-released reuse**: A released slot is the next one handed out
//! - **Compact headers**: The header width (2, 4 or 8 bytes) is chosen from the region geometry
//! - **Error-reporting operations**: Invalid ids and double releases are reported, never fatal
//! - **Thread safety**: Pools are [`Send`] and [`Sync`], with mutations serialized by a
//!   pluggable [`RawLock`]
//! - **Optional logging**: With the `tracing` feature, state changes and rejected operations
//!   are reported through the [`tracing`](https://docs.rs/tracing) crate
//!
//! # Slot layout
//!
//! Slot `i` starts at byte `i * stride` of the region, where the stride is the header width
//! plus the slot size. The payload of the slot follows its header. Slots are carved out of the
//! region in order until it is full:
//!
//! ```text
//! | header 0 | payload 0 | header 1 | payload 1 | ... | unused tail |
//! ```
//!
//! # Examples
//!
//! ## Allocating and releasing slots
//!
//! ```rust
//! use block_pool::{BlockPool, atomic_region};
//!
//! let pool = BlockPool::new(4096, 64).unwrap();
//! let region = atomic_region(pool.total_size());
//!
//! let first = pool.allocate(&*region).unwrap();
//! let second = pool.allocate(&*region).unwrap();
//! assert_eq!((first, second), (0, 1));
//!
//! pool.release(&*region, first).unwrap();
//!
//! // Released slots are reused before new ones are carved out.
//! assert_eq!(pool.allocate(&*region).unwrap(), first);
//! ```
//!
//! ## Translating between ids and offsets
//!
//! ```rust
//! use block_pool::{BlockPool, Error};
//!
//! let pool = BlockPool::new(4096, 64).unwrap();
//!
//! assert_eq!(pool.stride(), 66);
//! assert_eq!(pool.slot_offset(10), 660);
//! assert_eq!(pool.data_offset(10), 662);
//!
//! assert_eq!(pool.id_from_data_offset(662).unwrap(), 10);
//! assert!(matches!(
//!     pool.id_from_slot_offset(100),
//!     Err(Error::Misaligned { suggested: 66, .. })
//! ));
//! ```
//!
//! ## Reporting misuse
//!
//! ```rust
//! use block_pool::{BlockPool, Error, atomic_region};
//!
//! let pool = BlockPool::new(4096, 64).unwrap();
//! let region = atomic_region(pool.total_size());
//!
//! let id = pool.allocate(&*region).unwrap();
//! pool.release(&*region, id).unwrap();
//!
//! // Releasing twice is reported and changes nothing.
//! assert_eq!(pool.release(&*region, id), Err(Error::AlreadyFree { id }));
//!
//! // So is releasing a slot that was never handed out.
//! assert!(matches!(
//!     pool.release(&*region, 40),
//!     Err(Error::OutOfRange { id: 40, .. })
//! ));
//! ```

mod builder;
mod error;
mod header;
mod layout;
mod lock;
mod logging;
mod pool;
mod region;
mod stats;

pub use builder::*;
pub use error::Error;
pub(crate) use error::Result;
pub use header::HeaderWidth;
pub use lock::{BlockingLock, RawLock, SpinLock};
pub use pool::BlockPool;
pub use region::*;
pub use stats::PoolStats;
