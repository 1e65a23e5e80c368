// Copyright (c) 2024 Linaro LTD
// SPDX-License-Identifier: Apache-2.0

//! Runtime filtering.
//!
//! Each backend has its own filter table, mapping (domain, source) to the least severe level the
//! backend accepts from that source.  Sources without an entry use the backend's default, which is
//! set when the backend is enabled.

use std::collections::HashMap;

use crate::msg::{Level, LogMsg, MsgType, SourceId};
use crate::sync::atomic::{AtomicU8, Ordering};
use crate::sync::{SpinMutex, SpinMutexGuard};

pub(crate) struct FilterTable {
    default: AtomicU8,
    overrides: SpinMutex<HashMap<(u8, SourceId), Level>>,
}

impl FilterTable {
    pub(crate) fn new(level: Level) -> FilterTable {
        FilterTable {
            default: AtomicU8::new(level as u8),
            overrides: SpinMutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> SpinMutexGuard<'_, HashMap<(u8, SourceId), Level>> {
        match self.overrides.lock() {
            Ok(guard) => guard,
            Err(never) => match never {},
        }
    }

    /// Apply `level` to every source, discarding per source settings.
    pub(crate) fn reset(&self, level: Level) {
        let mut overrides = self.lock();
        overrides.clear();
        self.default.store(level as u8, Ordering::Release);
    }

    pub(crate) fn set(&self, domain: u8, source: SourceId, level: Level) {
        self.lock().insert((domain, source), level);
    }

    pub(crate) fn get(&self, domain: u8, source: SourceId) -> Level {
        if let Some(level) = self.lock().get(&(domain, source)) {
            return *level;
        }
        Level::from_u8(self.default.load(Ordering::Acquire)).unwrap_or(Level::None)
    }

    /// Should `msg` be handed to the backend owning this table?
    ///
    /// Raw messages and messages at [`Level::None`] always pass, as do messages that have no
    /// source to filter on.
    pub(crate) fn check(&self, msg: &LogMsg) -> bool {
        if msg.msg_type() != MsgType::Log {
            return true;
        }
        let level = msg.level();
        if level == Level::None {
            return true;
        }
        if msg.source() >= 0 {
            level <= self.get(msg.domain(), msg.source())
        } else {
            true
        }
    }
}
