// Copyright (c) 2024 Linaro LTD
// SPDX-License-Identifier: Apache-2.0

//! A backend writing text to a console.
//!
//! The console is anything implementing [`std::io::Write`]: `stdout`, a serial port, or a `Vec<u8>`
//! in tests.  Each message is formatted into a line buffer first, and written with a single call,
//! so lines from this backend do not interleave.

use core::fmt::{self, Write as _};
use std::io::Write;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::backend::{Backend, DispatchCtx};
use crate::msg::LogMsg;

/// Line buffer, grown as needed but reused between messages.
struct Context<W> {
    out: W,
    line: String,
}

/// A console log backend.
pub struct ConsoleBackend<W: Write + Send> {
    inner: Mutex<Context<W>>,
}

impl<W: Write + Send> ConsoleBackend<W> {
    /// Create a backend writing to `out`.
    pub fn new(out: W) -> ConsoleBackend<W> {
        ConsoleBackend {
            inner: Mutex::new(Context {
                out,
                line: String::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Context<W>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the console back.
    pub fn into_inner(self) -> W {
        self.inner.into_inner().unwrap_or_else(PoisonError::into_inner).out
    }

    /// Run `f` on the console.
    pub fn with_output<R>(&self, f: impl FnOnce(&mut W) -> R) -> R {
        f(&mut self.lock().out)
    }

    fn emit(&self, args: fmt::Arguments<'_>) {
        let mut ctx = self.lock();
        let Context { out, line } = &mut *ctx;
        line.clear();
        if line.write_fmt(args).is_ok() {
            // There is nowhere to report a console failure to.
            let _ = out.write_all(line.as_bytes());
        }
    }
}

impl<W: Write + Send> Backend for ConsoleBackend<W> {
    fn process(&self, msg: &LogMsg, ctx: &DispatchCtx<'_>) {
        let mut guard = self.lock();
        let Context { out, line } = &mut *guard;
        line.clear();
        if ctx.format(line, msg).is_ok() {
            let _ = out.write_all(line.as_bytes());
        }
    }

    fn panic(&self) {
        let _ = self.lock().out.flush();
    }

    fn dropped(&self, count: u32) {
        self.emit(format_args!("--- {} messages dropped ---\n", count));
    }
}
