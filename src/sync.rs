// Copyright (c) 2024 Linaro LTD
// SPDX-License-Identifier: Apache-2.0

//! Higher level synchronization primitives.
//!
//! The log pipeline has to be usable from any context, including ones where sleeping is not
//! allowed.  Everything that producers touch is therefore either an atomic or protected by a
//! [`SpinMutex`].

pub mod atomic {
    //! Re-export portable atomic.
    //!
    //! The counters of the pipeline use these, so that targets without native atomic instructions
    //! for a given width still get a working implementation.

    pub use portable_atomic::*;
}

mod spinmutex;

pub use spinmutex::{SpinLockResult, SpinMutex, SpinMutexGuard, SpinTryLockError, SpinTryLockResult};
