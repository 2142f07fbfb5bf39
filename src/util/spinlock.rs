//! Module `spinlock` implement read-write-spinlock, useful for
//! non-blocking concurrency.
//!
//! Blocking concurrency can have impact on latency. When operations
//! that require rw-exclusion are going to be quick and short, we can
//! use non-blocking primitives like latch-and-spin. Used here to guard
//! the global, read-mostly runtime tunables.

use std::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicU32, Ordering::SeqCst},
    thread,
};

/// Spinlock implements latch-and-spin mechanism for non-blocking
/// concurrency.
///
/// It uses AtomicU32 for:
/// * ref-count, bits [0-29].
/// * latch flag, bit 30.
/// * lock flag, bit 31.
pub struct Spinlock<T> {
    latchlock: AtomicU32,
    value: UnsafeCell<T>,
}

// Safe because access to `value` is serialized through latchlock.
unsafe impl<T: Send> Send for Spinlock<T> {}
unsafe impl<T: Send + Sync> Sync for Spinlock<T> {}

impl<T> Spinlock<T> {
    const LATCH_FLAG: u32 = 0x40000000;
    const LOCK_FLAG: u32 = 0x80000000;
    const LATCH_LOCK_FLAG: u32 = 0xC0000000;
    const READERS_FLAG: u32 = 0x3FFFFFFF;

    /// Create a new Spinlock over `value`.
    pub fn new(value: T) -> Spinlock<T> {
        Spinlock {
            latchlock: AtomicU32::new(0),
            value: UnsafeCell::new(value),
        }
    }

    /// Acquire read permission, spinning until the latch is clear.
    pub fn read(&self) -> ReadGuard<T> {
        loop {
            let c = self.latchlock.load(SeqCst);
            if (c & Self::LATCH_LOCK_FLAG) == 0 {
                // latch is not acquired by a writer
                if self.latchlock.compare_exchange(c, c + 1, SeqCst, SeqCst).is_ok() {
                    break ReadGuard { door: self };
                }
            }
            thread::yield_now();
        }
    }

    /// Acquire write permission, spinning until all readers drain.
    pub fn write(&self) -> WriteGuard<T> {
        // acquire latch
        loop {
            let c = self.latchlock.load(SeqCst);
            if (c & Self::LATCH_FLAG) == 0 {
                if (c & Self::LOCK_FLAG) != 0 {
                    panic!("if latch is flipped-off, lock can't be flipped-on");
                }
                let n = c | Self::LATCH_FLAG;
                if self.latchlock.compare_exchange(c, n, SeqCst, SeqCst).is_ok() {
                    break;
                }
            }
            thread::yield_now();
        }
        // acquire lock
        loop {
            let c = self.latchlock.load(SeqCst);
            if (c & Self::READERS_FLAG) == 0 {
                let n = c | Self::LOCK_FLAG;
                if self.latchlock.compare_exchange(c, n, SeqCst, SeqCst).is_ok() {
                    break WriteGuard { door: self };
                }
                panic!("latch is acquired, ZERO readers, but cannot lock");
            }
            thread::yield_now();
        }
    }
}

pub struct ReadGuard<'a, T> {
    door: &'a Spinlock<T>,
}

impl<'a, T> Deref for ReadGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.door.value.get() }
    }
}

impl<'a, T> Drop for ReadGuard<'a, T> {
    fn drop(&mut self) {
        self.door.latchlock.fetch_sub(1, SeqCst);
    }
}

pub struct WriteGuard<'a, T> {
    door: &'a Spinlock<T>,
}

impl<'a, T> Deref for WriteGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.door.value.get() }
    }
}

impl<'a, T> DerefMut for WriteGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.door.value.get() }
    }
}

impl<'a, T> Drop for WriteGuard<'a, T> {
    fn drop(&mut self) {
        let c = self.door.latchlock.load(SeqCst);
        if (c & Spinlock::<T>::LATCH_LOCK_FLAG) != Spinlock::<T>::LATCH_LOCK_FLAG {
            panic!("cannot release an unacquired write guard");
        }
        self.door.latchlock.fetch_and(!Spinlock::<T>::LATCH_LOCK_FLAG, SeqCst);
    }
}

#[cfg(test)]
#[path = "spinlock_test.rs"]
mod spinlock_test;
