// Copyright (c) 2024 Linaro LTD
// SPDX-License-Identifier: Apache-2.0

//! The producer side of the pipeline.
//!
//! Code that logs does so through a [`Producer`], which fixes the source the messages come from,
//! and the context the code runs in.  The context is a type parameter: [`Thread`] code may block
//! waiting for arena space, if the pipeline is configured to allow it, while [`Isr`] code never
//! blocks.  Since this is part of the type, an interrupt handler cannot end up blocking by
//! accident.
//!
//! Posting never fails from the caller's point of view.  A message that cannot be buffered is
//! counted as dropped, and the drop is reported to the backends later.

use std::fmt;
use core::marker::PhantomData;

use crate::msg::{Level, MsgContent, MsgDesc, SourceId, DOMAIN_LOCAL};
use crate::pipeline::LogPipeline;

mod sealed {
    pub trait Sealed {}
}

/// The kind of context a producer runs in.
pub trait CallContext: sealed::Sealed {
    /// Whether code in this context is allowed to block.
    const MAY_BLOCK: bool;
}

/// Thread context.  May block waiting for arena space.
#[derive(Clone, Copy, Debug)]
pub struct Thread;

/// Interrupt context.  Never blocks.
#[derive(Clone, Copy, Debug)]
pub struct Isr;

impl sealed::Sealed for Thread {}
impl sealed::Sealed for Isr {}

impl CallContext for Thread {
    const MAY_BLOCK: bool = true;
}

impl CallContext for Isr {
    const MAY_BLOCK: bool = false;
}

/// Posts messages from one source.
pub struct Producer<'a, C: CallContext> {
    pipeline: &'a LogPipeline,
    source: SourceId,
    _context: PhantomData<C>,
}

impl<'a, C: CallContext> Producer<'a, C> {
    pub(crate) fn new(pipeline: &'a LogPipeline, source: SourceId) -> Producer<'a, C> {
        Producer {
            pipeline,
            source,
            _context: PhantomData,
        }
    }

    /// The source messages are posted from.
    pub fn source(&self) -> SourceId {
        self.source
    }

    /// Would a message at `level` be kept?
    pub fn enabled(&self, level: Level) -> bool {
        level <= self.pipeline.config().max_level
    }

    /// Post a message at `level`.
    pub fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        let desc = MsgDesc::log(DOMAIN_LOCAL, self.source, level);
        self.pipeline.post::<C>(MsgContent::new(desc, fmt::format(args)));
    }

    /// Post a message followed by a dump of `data`.
    pub fn hexdump(&self, level: Level, data: &[u8], args: fmt::Arguments<'_>) {
        let desc = MsgDesc::log(DOMAIN_LOCAL, self.source, level);
        self.pipeline
            .post::<C>(MsgContent::new(desc, fmt::format(args)).with_data(data));
    }

    /// Post raw text.  Raw text has no level, and is never filtered.
    pub fn printk(&self, args: fmt::Arguments<'_>) {
        self.pipeline
            .post::<C>(MsgContent::new(MsgDesc::raw(), fmt::format(args)));
    }

    /// Post an error.
    pub fn err(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Err, args);
    }

    /// Post a warning.
    pub fn wrn(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Wrn, args);
    }

    /// Post an informational message.
    pub fn inf(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Inf, args);
    }

    /// Post a debug message.
    pub fn dbg(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Dbg, args);
    }
}

/// Post a formatted message through a [`Producer`].
///
/// ```ignore
/// log_msg!(producer, Level::Inf, "link up after {} ms", elapsed);
/// ```
///
/// The message is only formatted if the level is enabled in the pipeline configuration.
#[macro_export]
macro_rules! log_msg {
    ($producer:expr, $level:expr, $($arg:tt)*) => {{
        let producer = &$producer;
        let level: $crate::msg::Level = $level;
        if producer.enabled(level) {
            producer.log(level, format_args!($($arg)*));
        }
    }};
}
