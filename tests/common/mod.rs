// Copyright (c) 2024 Linaro LTD
// SPDX-License-Identifier: Apache-2.0

//! Helpers shared by the pipeline tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use zephyr_log::error::EAGAIN;
use zephyr_log::msg::SourceId;
use zephyr_log::{
    Backend, BackendEvent, DispatchCtx, Error, Level, LogMsg, MsgContent, MsgDesc, Result,
};

/// A backend that remembers everything it is given.
pub struct RecordingBackend {
    ready: AtomicBool,
    inits: AtomicU32,
    panics: AtomicU32,
    dropped: AtomicU32,
    records: Mutex<Vec<LogMsg>>,
    events: Mutex<Vec<BackendEvent>>,
}

impl RecordingBackend {
    pub fn new() -> Arc<RecordingBackend> {
        Self::with_ready(true)
    }

    /// A backend that fails its readiness check until told otherwise.
    pub fn not_ready() -> Arc<RecordingBackend> {
        Self::with_ready(false)
    }

    fn with_ready(ready: bool) -> Arc<RecordingBackend> {
        Arc::new(RecordingBackend {
            ready: AtomicBool::new(ready),
            inits: AtomicU32::new(0),
            panics: AtomicU32::new(0),
            dropped: AtomicU32::new(0),
            records: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<LogMsg> {
        self.records.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn packages(&self) -> Vec<String> {
        self.records()
            .iter()
            .map(|m| m.package().to_owned())
            .collect()
    }

    pub fn timestamps(&self) -> Vec<u64> {
        self.records().iter().map(LogMsg::timestamp).collect()
    }

    pub fn inits(&self) -> u32 {
        self.inits.load(Ordering::SeqCst)
    }

    pub fn panics(&self) -> u32 {
        self.panics.load(Ordering::SeqCst)
    }

    /// Total of all the drop reports received.
    pub fn dropped_total(&self) -> u32 {
        self.dropped.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<BackendEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl Backend for RecordingBackend {
    fn init(&self) {
        self.inits.fetch_add(1, Ordering::SeqCst);
    }

    fn is_ready(&self) -> Result<()> {
        if self.ready.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error(EAGAIN))
        }
    }

    fn process(&self, msg: &LogMsg, _ctx: &DispatchCtx<'_>) {
        self.records.lock().unwrap().push(msg.clone());
    }

    fn panic(&self) {
        self.panics.fetch_add(1, Ordering::SeqCst);
    }

    fn dropped(&self, count: u32) {
        self.dropped.fetch_add(count, Ordering::SeqCst);
    }

    fn notify(&self, event: BackendEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// A timestamp source the test moves by hand.
#[derive(Clone, Default)]
pub struct ManualClock(Arc<AtomicU64>);

impl ManualClock {
    pub fn new(start: u64) -> ManualClock {
        ManualClock(Arc::new(AtomicU64::new(start)))
    }

    pub fn set(&self, now: u64) {
        self.0.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, ticks: u64) {
        self.0.fetch_add(ticks, Ordering::SeqCst);
    }

    pub fn now(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn getter(&self) -> impl Fn() -> u64 + Send + Sync + 'static {
        let inner = self.0.clone();
        move || inner.load(Ordering::SeqCst)
    }
}

/// A local log message.
pub fn content(source: SourceId, level: Level, text: &str) -> MsgContent {
    MsgContent::new(MsgDesc::log(0, source, level), text)
}
