// Copyright (c) 2024 Linaro LTD
// SPDX-License-Identifier: Apache-2.0

//! Spinlock-based Mutexes
//!
//! A blocking mutex can not be acquired from interrupt context.  The [`SpinMutex`] in this module
//! has an API close to [`std::sync::Mutex`], but waits by spinning, so it is usable from any
//! context, provided the critical sections it protects are short.
//!
//! The log pipeline uses one of these for each arena's bookkeeping, one for the multi-domain merge
//! cache, and the process lock that serializes consumers (and every producer, once in panic mode).
//!
//! Note that `SpinMutex` doesn't have anything comparable to `Condvar`.  Pair it with a
//! [`Semaphore`](crate::sys::sync::Semaphore) to let a waiter sleep.

use core::{
    cell::UnsafeCell,
    convert::Infallible,
    fmt,
    marker::PhantomData,
    ops::{Deref, DerefMut},
};

use crate::sync::atomic::{AtomicBool, Ordering};

/// Result from the lock call.  We keep the result for consistency of the API, but these can never
/// fail.
pub type SpinLockResult<Guard> = core::result::Result<Guard, Infallible>;

/// Result from the `try_lock` call.  There is only a single type of failure, indicating that this
/// would block.
pub type SpinTryLockResult<Guard> = core::result::Result<Guard, SpinTryLockError>;

/// The single error type that can be returned from `try_lock`.
#[derive(Debug, PartialEq, Eq)]
pub enum SpinTryLockError {
    /// The lock could not be acquired at this time because the operation would otherwise block.
    WouldBlock,
}

/// A lower-level mutual exclusion primitive for protecting data.
///
/// It is not reentrant: locking it twice from the same thread spins forever.
pub struct SpinMutex<T: ?Sized> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

/// As the data is protected by the lock, with RAII ensuring the lock is always released, this
/// satisfies Rust's requirements for Send and Sync, as long as the data itself is Send.
unsafe impl<T: ?Sized + Send> Send for SpinMutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for SpinMutex<T> {}

impl<T: ?Sized> fmt::Debug for SpinMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SpinMutex {{ locked: {} }}", self.locked.load(Ordering::Relaxed))
    }
}

/// An RAII implementation of a "scoped lock" of a SpinMutex.  When this structure is dropped (falls
/// out of scope), the lock will be unlocked.
///
/// This structure is created by the [`lock`] and [`try_lock`] methods on [`SpinMutex`].
///
/// [`lock`]: SpinMutex::lock
/// [`try_lock`]: SpinMutex::try_lock
pub struct SpinMutexGuard<'a, T: ?Sized + 'a> {
    lock: &'a SpinMutex<T>,
    // Mark as not Send.
    _nosend: PhantomData<*const ()>,
}

unsafe impl<T: ?Sized + Sync> Sync for SpinMutexGuard<'_, T> {}

impl<T> SpinMutex<T> {
    /// Construct a new wrapped Mutex.
    pub const fn new(t: T) -> SpinMutex<T> {
        SpinMutex {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(t),
        }
    }

    /// Consume the mutex, returning the data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> SpinMutex<T> {
    /// Acquire the mutex, spinning as needed.
    ///
    /// Returns an RAII guard; the SpinMutex is unlocked when the guard goes out of scope.
    pub fn lock(&self) -> SpinLockResult<SpinMutexGuard<'_, T>> {
        loop {
            if let Ok(guard) = self.try_lock() {
                return Ok(guard);
            }
            let mut spins = 0u32;
            while self.locked.load(Ordering::Relaxed) {
                spins += 1;
                if spins % 128 == 0 {
                    // A host thread holding the lock may have been preempted.
                    std::thread::yield_now();
                } else {
                    core::hint::spin_loop();
                }
            }
        }
    }

    /// Attempts to acquire this lock.
    ///
    /// If the lock could not be acquired at this time, then [`Err`] is returned.  This function
    /// does not spin.
    pub fn try_lock(&self) -> SpinTryLockResult<SpinMutexGuard<'_, T>> {
        match self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
        {
            Ok(_) => Ok(SpinMutexGuard {
                lock: self,
                _nosend: PhantomData,
            }),
            Err(_) => Err(SpinTryLockError::WouldBlock),
        }
    }

    /// Returns true if the lock is currently held.
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

impl<T: ?Sized> Deref for SpinMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard proves the lock is held.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard proves the lock is held, and we have it mutably.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for SpinMutexGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}
