// Copyright (c) 2024 Linaro LTD
// SPDX-License-Identifier: Apache-2.0

//! Kernel primitives used by the log pipeline.
//!
//! The pipeline is written against a small set of kernel services: a counting semaphore to wake
//! the processing thread, a timer to defer that wake up, and a monotonic clock.  This module
//! provides host implementations of them with the same shape as the Zephyr kernel calls
//! (`k_sem_*`, `k_timer_*`, `k_uptime_get`), so the pipeline code reads the same as it would on
//! the target.

pub mod sync;
pub mod timer;

/// The raw representation of a timeout, in system ticks.
///
/// `-1` means wait forever, and `0` means do not wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawTimeout {
    /// Tick count of the timeout.
    pub ticks: i64,
}

/// Represents a timeout with an infinite delay.
///
/// Calls using this value will wait as long as necessary to perform the requested operation.
pub const K_FOREVER: RawTimeout = RawTimeout { ticks: -1 };

/// Represents a null timeout delay.
///
/// Calls using this value will not wait if the operation cannot be performed immediately.
pub const K_NO_WAIT: RawTimeout = RawTimeout { ticks: 0 };

/// Return the current uptime of the system in ms.
#[inline]
pub fn uptime_get() -> i64 {
    crate::time::now().duration_since_epoch().to_millis() as i64
}
