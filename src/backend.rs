// Copyright (c) 2024 Linaro LTD
// SPDX-License-Identifier: Apache-2.0

//! Log backends.
//!
//! A backend is where messages end up: a console, a file, a transport to a host.  The pipeline only
//! sees the [`Backend`] call contract.  All calls are synchronous, and nothing a backend does is
//! retried or re-queued by the pipeline.
//!
//! Backends are registered while the pipeline is built, and live as long as it does.  A registered
//! backend receives messages only while it is active.  Backends marked `autostart` are activated
//! when the pipeline initializes; one that is not ready at that point stays
//! [`BackendStatus::ReadyPending`] and is polled again by the processing thread until it is.  A
//! backend that never becomes ready simply never receives anything.

pub mod console;

use core::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::filter::FilterTable;
use crate::format::{format_func_get, FormatCtx, FormatType};
use crate::msg::{Level, LogMsg};
use crate::source::SourceRegistry;
use crate::sync::atomic::{AtomicU32, AtomicU8, Ordering};

/// Events a backend can be notified of.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendEvent {
    /// The processing thread ran out of messages after processing some.
    ProcessThreadDone,
    /// The timestamp source changed; timestamps are now at this frequency.
    TimestampFreq(u32),
}

/// The backend call contract.
pub trait Backend: Send + Sync {
    /// One-time initialization, before the backend is first enabled.
    fn init(&self) {}

    /// Is the backend able to take messages?  Autostart backends are only enabled once this
    /// returns `Ok`.
    fn is_ready(&self) -> Result<()> {
        Ok(())
    }

    /// Handle one message.
    fn process(&self, msg: &LogMsg, ctx: &DispatchCtx<'_>);

    /// The system is going down.  Switch to synchronous operation and flush.
    fn panic(&self);

    /// `count` messages were dropped since the last report.
    fn dropped(&self, _count: u32) {}

    /// Something happened that the backend may care about.
    fn notify(&self, _event: BackendEvent) {}
}

/// Context handed to [`Backend::process`].
pub struct DispatchCtx<'a> {
    pub(crate) sources: &'a SourceRegistry,
    pub(crate) timestamp_freq: u32,
    pub(crate) format: FormatType,
}

impl DispatchCtx<'_> {
    /// Name of the source of `msg`, if known.
    pub fn source_name(&self, msg: &LogMsg) -> Option<&str> {
        self.sources.source_name(msg.domain(), msg.source())
    }

    /// Frequency of message timestamps, in Hz.
    pub fn timestamp_freq(&self) -> u32 {
        self.timestamp_freq
    }

    /// The format this backend was registered with.
    pub fn format_type(&self) -> FormatType {
        self.format
    }

    /// Format `msg` with the backend's formatter.
    ///
    /// Fails if this crate has no formatter for the backend's format type.
    pub fn format(&self, out: &mut dyn fmt::Write, msg: &LogMsg) -> fmt::Result {
        let func = format_func_get(self.format).ok_or(fmt::Error)?;
        let ctx = FormatCtx {
            source_name: self.source_name(msg),
            timestamp_freq: self.timestamp_freq,
        };
        func(out, msg, &ctx)
    }
}

/// Handle to a registered backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BackendId(pub(crate) usize);

impl BackendId {
    /// Position of the backend in registration order.
    pub fn index(self) -> usize {
        self.0
    }
}

/// Activation state of a backend.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendStatus {
    /// Registered, never initialized.
    Uninitialized = 0,
    /// Initialized, waiting to report ready.
    ReadyPending = 1,
    /// Receiving messages.
    Active = 2,
    /// Explicitly disabled.
    Disabled = 3,
}

impl BackendStatus {
    fn from_u8(val: u8) -> BackendStatus {
        match val {
            1 => BackendStatus::ReadyPending,
            2 => BackendStatus::Active,
            3 => BackendStatus::Disabled,
            _ => BackendStatus::Uninitialized,
        }
    }
}

/// Registration of a backend with the pipeline builder.
pub struct BackendDesc {
    pub(crate) name: String,
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) autostart: bool,
    pub(crate) format: FormatType,
}

impl BackendDesc {
    /// Describe a backend.  It defaults to autostart, with text output.
    pub fn new(name: impl Into<String>, backend: Arc<dyn Backend>) -> BackendDesc {
        BackendDesc {
            name: name.into(),
            backend,
            autostart: true,
            format: FormatType::Text,
        }
    }

    /// Whether to activate the backend when the pipeline initializes.
    pub fn autostart(mut self, autostart: bool) -> BackendDesc {
        self.autostart = autostart;
        self
    }

    /// The format the backend wants.
    pub fn format(mut self, format: FormatType) -> BackendDesc {
        self.format = format;
        self
    }
}

/// A backend as the pipeline holds it.
pub(crate) struct BackendEntry {
    pub(crate) name: String,
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) autostart: bool,
    pub(crate) format: FormatType,
    pub(crate) filters: FilterTable,
    state: AtomicU8,
    pending_polls: AtomicU32,
}

impl BackendEntry {
    pub(crate) fn new(desc: BackendDesc, level: Level) -> BackendEntry {
        BackendEntry {
            name: desc.name,
            backend: desc.backend,
            autostart: desc.autostart,
            format: desc.format,
            filters: FilterTable::new(level),
            state: AtomicU8::new(BackendStatus::Uninitialized as u8),
            pending_polls: AtomicU32::new(0),
        }
    }

    pub(crate) fn status(&self) -> BackendStatus {
        BackendStatus::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_status(&self, status: BackendStatus) {
        self.state.store(status as u8, Ordering::Release);
    }

    pub(crate) fn is_active(&self) -> bool {
        self.status() == BackendStatus::Active
    }

    /// Initialize the backend if that has not been done yet.
    pub(crate) fn ensure_init(&self) {
        if self
            .state
            .compare_exchange(
                BackendStatus::Uninitialized as u8,
                BackendStatus::ReadyPending as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            self.backend.init();
        }
    }

    /// Count a failed readiness check.
    pub(crate) fn poll_failed(&self) {
        self.pending_polls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn pending_polls(&self) -> u32 {
        self.pending_polls.load(Ordering::Relaxed)
    }
}
