use std::fmt::Debug;
use std::hint;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};

use parking_lot::{Condvar, Mutex};

/// A mutual-exclusion primitive that serializes the mutating operations of a
/// [`BlockPool`][crate::BlockPool].
///
/// The pool acquires the lock once per operation and releases it on every exit path. An
/// implementation must give `lock()` acquire semantics and `unlock()` release semantics, so that
/// everything written to the pool metadata and to slot headers while holding the lock is visible
/// to the next thread that acquires it.
///
/// The lock is never held across blocking calls, so a spinning implementation such as
/// [`SpinLock`] is normally the right choice. Use [`BlockingLock`] where spinning is undesirable,
/// e.g. when there are more contending threads than processors.
#[cfg_attr(test, mockall::automock)]
pub trait RawLock: Debug + Send + Sync {
    /// Acquires the lock, waiting for as long as it takes.
    fn lock(&self);

    /// Acquires the lock if it is free, returning whether it was acquired.
    fn try_lock(&self) -> bool;

    /// Releases the lock.
    ///
    /// Must only be called by the party that acquired the lock. Calling it otherwise breaks
    /// mutual exclusion for whoever holds the lock (the pool state stays memory-safe but may
    /// become inconsistent).
    fn unlock(&self);
}

/// A busy-waiting lock built on a single atomic flag.
///
/// Acquiring is a compare-and-swap loop with a processor relax hint between attempts. There is
/// no fairness, no timeout and no priority inheritance.
///
/// # Example
///
/// ```
/// use block_pool::{RawLock, SpinLock};
///
/// let lock = SpinLock::new();
///
/// lock.lock();
/// assert!(!lock.try_lock());
/// lock.unlock();
///
/// assert!(lock.try_lock());
/// lock.unlock();
/// ```
#[derive(Debug, Default)]
pub struct SpinLock {
    locked: AtomicBool,
}

impl SpinLock {
    /// Creates a new lock in the unlocked state.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }
}

impl RawLock for SpinLock {
    fn lock(&self) {
        while self
            .locked
            .compare_exchange_weak(false, true, Acquire, Relaxed)
            .is_err()
        {
            // Only read while contended, so the cache line is not bounced around by failed swaps.
            while self.locked.load(Relaxed) {
                hint::spin_loop();
            }
        }
    }

    fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Acquire, Relaxed)
            .is_ok()
    }

    fn unlock(&self) {
        self.locked.store(false, Release);
    }
}

/// A lock that puts waiting threads to sleep instead of spinning.
#[derive(Debug, Default)]
pub struct BlockingLock {
    locked: Mutex<bool>,
    released: Condvar,
}

impl BlockingLock {
    /// Creates a new lock in the unlocked state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            locked: Mutex::new(false),
            released: Condvar::new(),
        }
    }
}

impl RawLock for BlockingLock {
    fn lock(&self) {
        let mut locked = self.locked.lock();

        while *locked {
            self.released.wait(&mut locked);
        }

        *locked = true;
    }

    fn try_lock(&self) -> bool {
        let mut locked = self.locked.lock();

        if *locked {
            false
        } else {
            *locked = true;
            true
        }
    }

    fn unlock(&self) {
        *self.locked.lock() = false;
        self.released.notify_one();
    }
}

/// Holds a [`RawLock`] for as long as the guard is alive.
///
/// Releasing through `Drop` guarantees that early returns and panics release the lock.
#[derive(Debug)]
pub(crate) struct LockGuard<'a, L: RawLock + ?Sized> {
    lock: &'a L,
}

impl<'a, L: RawLock + ?Sized> LockGuard<'a, L> {
    pub(crate) fn acquire(lock: &'a L) -> Self {
        lock.lock();
        Self { lock }
    }
}

impl<L: RawLock + ?Sized> Drop for LockGuard<'_, L> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(SpinLock: Send, Sync, Debug, Default);
    assert_impl_all!(BlockingLock: Send, Sync, Debug, Default);

    const THREADS: usize = 8;
    const ITERATIONS: usize = 1_000;

    /// Performs non-atomic read-modify-write cycles under the lock. Any lapse in mutual exclusion
    /// shows up as lost increments.
    fn hammer(lock: &impl RawLock) -> usize {
        let counter = AtomicUsize::new(0);

        thread::scope(|s| {
            for _ in 0..THREADS {
                s.spawn(|| {
                    for _ in 0..ITERATIONS {
                        let _guard = LockGuard::acquire(lock);

                        let value = counter.load(Relaxed);
                        hint::spin_loop();
                        counter.store(value + 1, Relaxed);
                    }
                });
            }
        });

        counter.load(Relaxed)
    }

    #[test]
    fn spin_lock_try_lock_fails_while_held() {
        let lock = SpinLock::new();

        assert!(lock.try_lock());
        assert!(!lock.try_lock());

        lock.unlock();
        assert!(lock.try_lock());
        lock.unlock();
    }

    #[test]
    fn spin_lock_is_mutually_exclusive() {
        let lock = SpinLock::new();
        assert_eq!(hammer(&lock), THREADS * ITERATIONS);
    }

    #[test]
    fn blocking_lock_try_lock_fails_while_held() {
        let lock = BlockingLock::new();

        lock.lock();
        assert!(!lock.try_lock());

        lock.unlock();
        assert!(lock.try_lock());
        lock.unlock();
    }

    #[test]
    fn blocking_lock_is_mutually_exclusive() {
        let lock = BlockingLock::new();
        assert_eq!(hammer(&lock), THREADS * ITERATIONS);
    }

    #[test]
    fn guard_releases_on_drop() {
        let lock = SpinLock::new();

        {
            let _guard = LockGuard::acquire(&lock);
            assert!(!lock.try_lock());
        }

        assert!(lock.try_lock());
        lock.unlock();
    }

    #[test]
    fn guard_releases_on_panic() {
        let lock = SpinLock::new();

        let result = std::panic::catch_unwind(|| {
            let _guard = LockGuard::acquire(&lock);
            panic!("released while unwinding");
        });

        assert!(result.is_err());
        assert!(lock.try_lock());
        lock.unlock();
    }

    #[test]
    fn guard_calls_lock_then_unlock_once() {
        let mut seq = mockall::Sequence::new();
        let mut lock = MockRawLock::new();

        lock.expect_lock()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        lock.expect_unlock()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());

        drop(LockGuard::acquire(&lock));
    }
}
