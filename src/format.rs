// Copyright (c) 2024 Linaro LTD
// SPDX-License-Identifier: Apache-2.0

//! Message formatting.
//!
//! Backends declare the format they expect, and look up the matching formatter when a message is
//! dispatched to them.  Only the text format is implemented in this crate; the dictionary and
//! MIPI SyS-T encoders, and custom formats, are supplied by whoever provides such a backend.
//!
//! Text output of a log message looks like:
//!
//! ```text
//! [00:00:01.250,000] <inf> net: link up
//! ```
//!
//! Raw messages are written as they are.

use core::fmt;

use crate::msg::{LogMsg, MsgType};

/// The formats a backend can ask for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FormatType {
    /// Human readable text.
    Text,
    /// Dictionary based binary output.
    Dictionary,
    /// MIPI SyS-T.
    Syst,
    /// Backend specific format.
    Custom(u32),
}

/// What a formatter needs besides the message itself.
#[derive(Clone, Copy, Debug)]
pub struct FormatCtx<'a> {
    /// Name of the message's source, if it has one.
    pub source_name: Option<&'a str>,
    /// Frequency of the timestamps, in Hz.
    pub timestamp_freq: u32,
}

/// A message formatter.
pub type FormatFn = fn(&mut dyn fmt::Write, &LogMsg, &FormatCtx<'_>) -> fmt::Result;

/// Get the formatter for a format type, if this crate has one.
pub fn format_func_get(format: FormatType) -> Option<FormatFn> {
    match format {
        FormatType::Text => Some(format_text),
        _ => None,
    }
}

const HEXDUMP_BYTES_IN_LINE: usize = 16;

/// Format a message as text.
pub fn format_text(out: &mut dyn fmt::Write, msg: &LogMsg, ctx: &FormatCtx<'_>) -> fmt::Result {
    if msg.msg_type() == MsgType::Raw {
        return out.write_str(msg.package());
    }

    write_timestamp(out, msg.timestamp(), ctx.timestamp_freq)?;
    let prefix = msg.level().as_str();
    if !prefix.is_empty() {
        write!(out, "<{}> ", prefix)?;
    }
    match ctx.source_name {
        Some(name) => write!(out, "{}: ", name)?,
        None if msg.source() >= 0 => write!(out, "{}/{}: ", msg.domain(), msg.source())?,
        None => (),
    }
    out.write_str(msg.package())?;

    for line in msg.data().chunks(HEXDUMP_BYTES_IN_LINE) {
        out.write_str("\n                      ")?;
        for i in 0..HEXDUMP_BYTES_IN_LINE {
            match line.get(i) {
                Some(b) => write!(out, "{:02x} ", b)?,
                None => out.write_str("   ")?,
            }
        }
        out.write_str("|")?;
        for b in line {
            let c = if b.is_ascii_graphic() || *b == b' ' { *b as char } else { '.' };
            out.write_char(c)?;
        }
    }
    out.write_str("\n")
}

fn write_timestamp(out: &mut dyn fmt::Write, timestamp: u64, freq: u32) -> fmt::Result {
    if freq == 0 {
        return write!(out, "[{:010}] ", timestamp);
    }
    let total_us = (timestamp as u128 * 1_000_000) / freq as u128;
    let us = total_us % 1000;
    let ms = (total_us / 1000) % 1000;
    let secs = total_us / 1_000_000;
    write!(
        out,
        "[{:02}:{:02}:{:02}.{:03},{:03}] ",
        secs / 3600,
        (secs / 60) % 60,
        secs % 60,
        ms,
        us
    )
}
