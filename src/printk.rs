// Copyright (c) 2024 Linaro LTD
// SPDX-License-Identifier: Apache-2.0

//! Printk style output.
//!
//! Raw text posted through a pipeline, with no level and no source.  It goes through the same
//! arena, and is processed in order with the log messages, but is never filtered.  Posting raw text
//! never blocks.

use core::fmt::{Arguments, Write};

use crate::msg::{MsgContent, MsgDesc};
use crate::pipeline::LogPipeline;
use crate::producer::Isr;

/// Print to a pipeline, without a newline.
///
/// The first argument is the pipeline.  The rest uses the same syntax as std's [`format!`].
///
/// [`format!`]: std::format
#[macro_export]
macro_rules! printk {
    ($pipeline:expr, $($arg:tt)*) => {{
        $crate::printk::printk(&$pipeline, format_args!($($arg)*));
    }};
}

/// Print to a pipeline, with a newline.
///
/// The first argument is the pipeline.  The rest uses the same syntax as std's [`format!`].
///
/// [`format!`]: std::format
#[macro_export]
macro_rules! printkln {
    ($pipeline:expr, $($arg:tt)*) => {{
        $crate::printk::printkln(&$pipeline, format_args!($($arg)*));
    }};
}

fn post(pipeline: &LogPipeline, args: Arguments<'_>, newline: bool) {
    let mut text = String::new();
    if text.write_fmt(args).is_err() {
        return;
    }
    if newline {
        text.push('\n');
    }
    pipeline.post::<Isr>(MsgContent::new(MsgDesc::raw(), text));
}

#[doc(hidden)]
pub fn printk(pipeline: &LogPipeline, args: Arguments<'_>) {
    post(pipeline, args, false);
}

#[doc(hidden)]
pub fn printkln(pipeline: &LogPipeline, args: Arguments<'_>) {
    post(pipeline, args, true);
}
