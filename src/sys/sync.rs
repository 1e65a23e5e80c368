// Copyright (c) 2024 Linaro LTD
// SPDX-License-Identifier: Apache-2.0

//! # Low-level synchronization primitives.
//!
//! These are direct counterparts of the kernel's own primitives, kept as unchanged in shape as
//! possible.  The pipeline uses the semaphore both to wake its processing thread and to let a
//! blocked producer know that arena space was returned.

pub mod semaphore;

pub use semaphore::{Semaphore, K_SEM_MAX_LIMIT};
