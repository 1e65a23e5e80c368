// Copyright (c) 2024 Linaro LTD
// SPDX-License-Identifier: Apache-2.0

//! Semaphore support
//!
//! A counting semaphore with both an upper and lower bound on the count, following the kernel's
//! `k_sem`.  Note that calling 'give' on a semaphore that is at the maximum count will discard the
//! 'give' operation.  The pipeline relies on this: a wake up signal given many times before the
//! processing thread runs only wakes it once.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result, EAGAIN, EBUSY, EINVAL};
use crate::time::Timeout;

/// The largest count limit a semaphore can be created with.
pub const K_SEM_MAX_LIMIT: u32 = u32::MAX;

struct Inner {
    count: Mutex<u32>,
    cond: Condvar,
    limit: u32,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, u32> {
        self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A counting semaphore usable from any thread.
///
/// Clones refer to the same semaphore.
#[derive(Clone)]
pub struct Semaphore {
    inner: Arc<Inner>,
}

impl Semaphore {
    /// Create a new semaphore.
    ///
    /// `limit` must be non-zero and `initial_count` can not be above it.
    pub fn new(initial_count: u32, limit: u32) -> Result<Semaphore> {
        if limit == 0 || initial_count > limit {
            return Err(Error(EINVAL));
        }
        Ok(Semaphore {
            inner: Arc::new(Inner {
                count: Mutex::new(initial_count),
                cond: Condvar::new(),
                limit,
            }),
        })
    }

    /// Take a semaphore.
    ///
    /// Returns `Error(EBUSY)` if called with [`NoWait`] and the count is zero, and `Error(EAGAIN)`
    /// if the timeout expired first.
    ///
    /// [`NoWait`]: crate::time::NoWait
    pub fn take<T>(&self, timeout: T) -> Result<()>
    where
        T: Into<Timeout>,
    {
        let timeout: Timeout = timeout.into();
        let mut count = self.inner.lock();
        if *count > 0 {
            *count -= 1;
            return Ok(());
        }
        if timeout.is_no_wait() {
            return Err(Error(EBUSY));
        }

        match timeout.to_std() {
            None => {
                while *count == 0 {
                    count = self.inner.cond.wait(count).unwrap_or_else(PoisonError::into_inner);
                }
            }
            Some(wait) => {
                let (guard, _) = self
                    .inner
                    .cond
                    .wait_timeout_while(count, wait, |c| *c == 0)
                    .unwrap_or_else(PoisonError::into_inner);
                count = guard;
                if *count == 0 {
                    return Err(Error(EAGAIN));
                }
            }
        }
        *count -= 1;
        Ok(())
    }

    /// Give a semaphore.
    ///
    /// This routine gives to the semaphore, unless the semaphore is already at its maximum
    /// permitted count.
    pub fn give(&self) {
        let mut count = self.inner.lock();
        if *count < self.inner.limit {
            *count += 1;
            self.inner.cond.notify_one();
        }
    }

    /// Resets a semaphore's count to zero.
    pub fn reset(&self) {
        *self.inner.lock() = 0;
    }

    /// Get a semaphore's count.
    pub fn count_get(&self) -> usize {
        *self.inner.lock() as usize
    }
}

impl fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sys::Semaphore")
    }
}
