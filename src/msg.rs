// Copyright (c) 2024 Linaro LTD
// SPDX-License-Identifier: Apache-2.0

//! Log messages.
//!
//! A log message is a self describing record: a small header ([`MsgDesc`] plus a timestamp)
//! followed by a variable length payload.  The payload of a structured log message is its
//! formatted text (the "package"), optionally followed by a binary blob for hexdumps.  Raw
//! messages, as produced by `printk`, carry only text and are never filtered.
//!
//! A message is built by the producer as a [`MsgContent`], which knows how much arena space it
//! will take.  It becomes a [`LogMsg`] when it is committed, and that is the point at which it
//! receives its timestamp.

/// A raw timestamp, in units of the timestamp source that produced it.
pub type Timestamp = u64;

/// Identifier of a log source (a module) within a domain.
pub type SourceId = i16;

/// Source id of a message that does not belong to any source, and so can not be filtered.
pub const SOURCE_NONE: SourceId = -1;

/// The domain id of messages created locally.
pub const DOMAIN_LOCAL: u8 = 0;

/// Size of the encoded message header: descriptor, lengths and timestamp.
pub const HDR_SIZE: usize = 16;

/// Arena allocations are rounded up to this many bytes.
pub const WORD_SIZE: usize = core::mem::size_of::<usize>();

/// Severity of a message.
///
/// Lower values are more severe.  A message passes a filter set to some level when its own level
/// is less than or equal to it.  [`Level::None`] is reserved for messages that are not subject to
/// filtering at all.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    /// Not a severity: administrative and raw output.
    None = 0,
    /// Error.
    Err = 1,
    /// Warning.
    Wrn = 2,
    /// Informational.
    Inf = 3,
    /// Debug.
    Dbg = 4,
}

impl Level {
    /// Convert from the numeric level.
    pub const fn from_u8(val: u8) -> Option<Level> {
        match val {
            0 => Some(Level::None),
            1 => Some(Level::Err),
            2 => Some(Level::Wrn),
            3 => Some(Level::Inf),
            4 => Some(Level::Dbg),
            _ => None,
        }
    }

    /// The short tag used in text output.
    pub const fn as_str(self) -> &'static str {
        match self {
            Level::None => "",
            Level::Err => "err",
            Level::Wrn => "wrn",
            Level::Inf => "inf",
            Level::Dbg => "dbg",
        }
    }

    /// The `log` crate filter admitting the same messages as this level.
    pub const fn to_level_filter(self) -> log::LevelFilter {
        match self {
            Level::None => log::LevelFilter::Off,
            Level::Err => log::LevelFilter::Error,
            Level::Wrn => log::LevelFilter::Warn,
            Level::Inf => log::LevelFilter::Info,
            // Trace is folded into debug, so it is admitted too.
            Level::Dbg => log::LevelFilter::Trace,
        }
    }
}

impl From<log::Level> for Level {
    fn from(level: log::Level) -> Level {
        match level {
            log::Level::Error => Level::Err,
            log::Level::Warn => Level::Wrn,
            log::Level::Info => Level::Inf,
            log::Level::Debug => Level::Dbg,
            // There is no separate trace level, so fold that into debug.
            log::Level::Trace => Level::Dbg,
        }
    }
}

/// Discriminates structured log messages from raw (printk style) output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MsgType {
    /// A structured log message, with a level and a source.
    Log,
    /// Raw text.
    Raw,
}

/// The descriptor part of the message header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MsgDesc {
    /// Kind of message.
    pub msg_type: MsgType,
    /// Domain the message was created in.
    pub domain: u8,
    /// Source within the domain, or [`SOURCE_NONE`].
    pub source: SourceId,
    /// Severity.
    pub level: Level,
}

impl MsgDesc {
    /// Descriptor of a structured log message.
    pub const fn log(domain: u8, source: SourceId, level: Level) -> MsgDesc {
        MsgDesc {
            msg_type: MsgType::Log,
            domain,
            source,
            level,
        }
    }

    /// Descriptor of a raw message.
    pub const fn raw() -> MsgDesc {
        MsgDesc {
            msg_type: MsgType::Raw,
            domain: DOMAIN_LOCAL,
            source: SOURCE_NONE,
            level: Level::None,
        }
    }
}

/// Number of arena bytes a message with the given payload sizes takes.
pub const fn encoded_len(package_len: usize, data_len: usize) -> usize {
    (HDR_SIZE + package_len + data_len + WORD_SIZE - 1) & !(WORD_SIZE - 1)
}

/// A message that has been built, but not yet committed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MsgContent {
    /// Header descriptor.
    pub desc: MsgDesc,
    /// Formatted text.
    pub package: String,
    /// Hexdump data.
    pub data: Vec<u8>,
}

impl MsgContent {
    /// Build message content with no hexdump data.
    pub fn new(desc: MsgDesc, package: impl Into<String>) -> MsgContent {
        MsgContent {
            desc,
            package: package.into(),
            data: Vec::new(),
        }
    }

    /// Attach hexdump data.
    pub fn with_data(mut self, data: impl Into<Vec<u8>>) -> MsgContent {
        self.data = data.into();
        self
    }

    /// Arena space needed to hold this message.
    pub fn encoded_len(&self) -> usize {
        encoded_len(self.package.len(), self.data.len())
    }
}

/// A committed log message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogMsg {
    desc: MsgDesc,
    timestamp: Timestamp,
    package: String,
    data: Vec<u8>,
}

impl LogMsg {
    /// Stamp content with its timestamp.
    ///
    /// Local messages are stamped by the pipeline at commit time.  This is public for remote
    /// links, whose messages arrive already stamped in their own domain's clock.
    pub fn new(content: MsgContent, timestamp: Timestamp) -> LogMsg {
        LogMsg {
            desc: content.desc,
            timestamp,
            package: content.package,
            data: content.data,
        }
    }

    /// The header descriptor.
    pub fn desc(&self) -> MsgDesc {
        self.desc
    }

    /// Kind of message.
    pub fn msg_type(&self) -> MsgType {
        self.desc.msg_type
    }

    /// Domain id.
    pub fn domain(&self) -> u8 {
        self.desc.domain
    }

    /// Source id.
    pub fn source(&self) -> SourceId {
        self.desc.source
    }

    /// Severity.
    pub fn level(&self) -> Level {
        self.desc.level
    }

    /// Timestamp assigned at commit.
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Formatted text.
    pub fn package(&self) -> &str {
        &self.package
    }

    /// Hexdump data, empty if there is none.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Arena space taken by this message.
    pub fn encoded_len(&self) -> usize {
        encoded_len(self.package.len(), self.data.len())
    }

    /// Move the ids of a message received over a link into the local numbering space.
    pub(crate) fn remap(&mut self, offset: u8) {
        self.desc.domain = self.desc.domain.saturating_add(offset);
        if self.desc.source >= 0 {
            self.desc.source = self.desc.source.saturating_add(offset as SourceId);
        }
    }
}
