// Copyright (c) 2024 Linaro LTD
// SPDX-License-Identifier: Apache-2.0

//! # Log pipeline errors
//!
//! This module contains an `Error` and `Result` type for the operations of the log pipeline that
//! can fail in a way the caller is expected to see.  Following the convention of the Zephyr
//! kernel, the error simply wraps an errno value.
//!
//! Note that very few operations return errors.  Posting a log message never does: a message that
//! cannot be buffered is counted as dropped and reported to the backends later, in aggregate.  The
//! errors here are for configuration misuse and for the kernel primitives in [`crate::sys`].

use core::fmt;

/// Try again (a timed wait expired).
pub const EAGAIN: u32 = 11;
/// Not enough space.
pub const ENOMEM: u32 = 12;
/// Resource busy (a no-wait operation could not be completed).
pub const EBUSY: u32 = 16;
/// No such device (unknown backend or link).
pub const ENODEV: u32 = 19;
/// Invalid argument.
pub const EINVAL: u32 = 22;

/// A log pipeline error.
///
/// Represents an errno-style error result.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Error(pub u32);

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "log error errno:{}", self.0)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "log error errno:{}", self.0)
    }
}

/// Wraps a value with a possible log pipeline error.
pub type Result<T> = core::result::Result<T, Error>;
