// Copyright (c) 2024 Linaro LTD
// SPDX-License-Identifier: Apache-2.0

//! Time types for the log pipeline.
//!
//! The pipeline measures time in system ticks, using the [`fugit`] crate to give the tick counts a
//! type.  The host tick runs at [`SYS_FREQUENCY`], one tick per microsecond, so durations coming
//! from configuration (milliseconds or microseconds) convert without loss.
//!
//! Operations that can block take a [`Timeout`], which is built (through `Into`) from either a
//! [`Duration`], [`Forever`] to wait as long as necessary, or [`NoWait`] to never block.
//!
//! Log timestamps are a separate matter: they are raw counts from whatever timestamp source the
//! pipeline is configured with, at that source's own frequency.  The default source is [`now`].

use std::sync::OnceLock;

use crate::sys::{RawTimeout, K_FOREVER, K_NO_WAIT};

/// The unit of time used by the system clock.
pub type Tick = u64;

/// The system clock frequency, in ticks per second.
pub const SYS_FREQUENCY: u32 = 1_000_000;

/// A span of time, in system ticks.
pub type Duration = fugit::Duration<Tick, 1, SYS_FREQUENCY>;

/// A point in time, in system ticks since the clock was first read.
pub type Instant = fugit::Instant<Tick, 1, SYS_FREQUENCY>;

/// A timeout for a blocking operation.
///
/// Wraps the raw tick count, where `-1` waits forever and `0` does not wait at all.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timeout(pub RawTimeout);

impl Timeout {
    /// Returns true if this timeout will never block.
    pub fn is_no_wait(&self) -> bool {
        self.0.ticks == K_NO_WAIT.ticks
    }

    /// Returns true if this timeout waits indefinitely.
    pub fn is_forever(&self) -> bool {
        self.0.ticks == K_FOREVER.ticks
    }

    /// The wait as a std duration, or `None` for [`Forever`].
    pub(crate) fn to_std(self) -> Option<std::time::Duration> {
        if self.is_forever() {
            None
        } else {
            Some(std::time::Duration::from_micros(self.0.ticks.max(0) as u64))
        }
    }
}

impl From<Duration> for Timeout {
    fn from(value: Duration) -> Self {
        let ticks = i64::try_from(value.ticks()).unwrap_or(i64::MAX);
        Timeout(RawTimeout { ticks })
    }
}

/// A sentinel value that can be used as a [`Timeout`] to indicate an operation should wait as long
/// as necessary.
#[derive(Clone, Copy, Debug)]
pub struct Forever;

impl From<Forever> for Timeout {
    fn from(_value: Forever) -> Timeout {
        Timeout(K_FOREVER)
    }
}

/// A sentinel value that can be used as a [`Timeout`] to indicate an operation should not wait.
#[derive(Clone, Copy, Debug)]
pub struct NoWait;

impl From<NoWait> for Timeout {
    fn from(_value: NoWait) -> Timeout {
        Timeout(K_NO_WAIT)
    }
}

fn epoch() -> std::time::Instant {
    static EPOCH: OnceLock<std::time::Instant> = OnceLock::new();
    *EPOCH.get_or_init(std::time::Instant::now)
}

/// Read the current system time.
pub fn now() -> Instant {
    Instant::from_ticks(epoch().elapsed().as_micros() as Tick)
}

/// Convert a count at `freq` Hz into system ticks.
///
/// Used to turn a distance measured in log timestamp units into something a timer can wait for.
pub fn ticks_from_freq(count: u64, freq: u32) -> Duration {
    if freq == SYS_FREQUENCY || freq == 0 {
        Duration::from_ticks(count)
    } else {
        let ticks = (count as u128 * SYS_FREQUENCY as u128) / freq as u128;
        Duration::from_ticks(ticks.min(Tick::MAX as u128) as Tick)
    }
}

/// Put the current thread to sleep for the given timeout.
///
/// [`Forever`] parks the thread for good, which is rarely what is wanted.
pub fn sleep<T>(timeout: T)
where
    T: Into<Timeout>,
{
    let timeout: Timeout = timeout.into();
    match timeout.to_std() {
        Some(d) => std::thread::sleep(d),
        None => loop {
            std::thread::park();
        },
    }
}
