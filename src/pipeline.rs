// Copyright (c) 2024 Linaro LTD
// SPDX-License-Identifier: Apache-2.0

//! The log pipeline.
//!
//! A [`LogPipeline`] ties everything together: the message arenas, the registered backends and
//! sources, the counters, and the signalling between producers and the consumer.  It is built once
//! with a [`LogPipelineBuilder`], and then shared (it is handed out in an [`Arc`]).  Nothing here is
//! global, so any number of independent pipelines can exist, which the tests make use of.
//!
//! ## Producers
//!
//! A message is posted in two steps: [`msg_alloc`] reserves arena space, and [`msg_commit`] stamps
//! the message and makes it visible.  [`post`] does both.  In immediate mode there is no arena, and
//! the commit dispatches to the backends directly.
//!
//! After a deferred commit, the consumer is woken according to the trigger policy.  With `T` the
//! configured trigger threshold and `N` the number of messages buffered before this one:
//!
//! | condition   | action                                        |
//! |-------------|-----------------------------------------------|
//! | `T == 1`    | wake the consumer                             |
//! | `N == 0`    | start the one-shot sleep timer                |
//! | `N + 1 == T`| stop the timer, wake the consumer             |
//! | otherwise   | nothing, the timer or the threshold will come |
//!
//! The policy only applies while a consumer thread is attached.  Without one, messages stay
//! buffered until someone calls [`process`] or [`flush`].
//!
//! ## The consumer
//!
//! [`process_one`] claims the oldest message, hands it to every active backend whose filter lets it
//! through, then frees it.  [`process`] also sends the periodic failure report.  Consumer steps are
//! serialized by the process lock.
//!
//! ## Panic
//!
//! [`panic`] switches the pipeline to synchronous operation: every buffered message is processed
//! before it returns, and from then on every commit is processed in place.
//!
//! [`msg_alloc`]: LogPipeline::msg_alloc
//! [`msg_commit`]: LogPipeline::msg_commit
//! [`post`]: LogPipeline::post
//! [`process`]: LogPipeline::process
//! [`process_one`]: LogPipeline::process_one
//! [`flush`]: LogPipeline::flush
//! [`panic`]: LogPipeline::panic

use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use crate::arena::{Grant, PacketBuffer};
use crate::backend::{BackendDesc, BackendEntry, BackendEvent, BackendId, BackendStatus, DispatchCtx};
use crate::config::{LogConfig, Mode};
use crate::error::{Error, Result, EINVAL, ENODEV, ENOMEM};
use crate::merge::{ClaimResult, MergeState};
use crate::msg::{Level, LogMsg, MsgContent, MsgDesc, SourceId, Timestamp, DOMAIN_LOCAL};
use crate::producer::{CallContext, Isr, Producer};
use crate::source::{SourceRegistry, CORE_SOURCE_NAME};
use crate::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use crate::sync::{SpinMutex, SpinMutexGuard};
use crate::sys::sync::Semaphore;
use crate::sys::timer::Timer;
use crate::sys::uptime_get;
use crate::time::{self, NoWait, Timeout, SYS_FREQUENCY};

/// Reads the current timestamp.
pub type TimestampGetter = Arc<dyn Fn() -> Timestamp + Send + Sync>;

/// Source id of the pipeline's own messages.
const CORE_SOURCE: SourceId = 0;

/// Handle to a link registered with the builder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LinkId(usize);

struct Link {
    offset: u8,
    /// Index of the arena messages from this link go to.  `None` in immediate mode.
    arena: Option<usize>,
}

struct TimestampSource {
    getter: TimestampGetter,
    freq: u32,
}

/// State reachable from the arena drop notifier, as well as from the pipeline.
struct Shared {
    buffered: AtomicU32,
    dropped: AtomicU32,
    thread_attached: AtomicBool,
    /// Wakes the consumer.
    sem: Semaphore,
}

impl Shared {
    /// Count a dropped message.  `buffered` if the message had been counted as buffered.
    fn dropped(&self, buffered: bool) {
        self.dropped.fetch_add(1, Ordering::AcqRel);
        if buffered {
            self.buffered_dec();
        }
        if self.thread_attached.load(Ordering::Acquire) {
            self.sem.give();
        }
    }

    fn buffered_dec(&self) {
        let _ = self
            .buffered
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }
}

/// Space for one message, from [`LogPipeline::msg_alloc`].
///
/// Dropping the slot without committing gives the space back.
pub struct MsgSlot<'a> {
    inner: SlotInner<'a>,
}

enum SlotInner<'a> {
    Buffered(Grant<'a>),
    Immediate(usize),
}

impl MsgSlot<'_> {
    /// Bytes available for the message.
    pub fn len(&self) -> usize {
        match &self.inner {
            SlotInner::Buffered(grant) => grant.len(),
            SlotInner::Immediate(len) => *len,
        }
    }

    /// True if the slot has no room at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Is the slot in an arena, as opposed to being dispatched at commit?
    pub fn is_buffered(&self) -> bool {
        matches!(self.inner, SlotInner::Buffered(_))
    }
}

/// What would currently wake the consumer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TriggerState {
    /// Wake ups given and not yet taken.
    pub pending_wakes: usize,
    /// Whether the sleep (or back-off) timer is armed.
    pub timer_armed: bool,
}

/// Result of one consumer step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Step {
    Processed,
    Idle,
    Backoff,
}

/// Marks the current thread as a consumer of a pipeline until dropped.
///
/// While marked, allocations from the thread do not block, and commits do not wait for the process
/// lock: the space or the lock they would wait for can only be released by this same thread.
pub(crate) struct ConsumerMark<'a> {
    pipeline: &'a LogPipeline,
    id: ThreadId,
}

impl Drop for ConsumerMark<'_> {
    fn drop(&mut self) {
        let mut consumers = lock(&self.pipeline.consumers);
        if let Some(pos) = consumers.iter().position(|id| *id == self.id) {
            consumers.swap_remove(pos);
        }
    }
}

/// Outcome of a consumer round.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Round {
    /// A message was handed to the backends.
    pub(crate) processed: bool,
    /// More messages can be processed right away.
    pub(crate) pending: bool,
}

/// Builds a [`LogPipeline`].
///
/// Backends, sources and links can only be registered here.  Once built, the set is fixed.
pub struct LogPipelineBuilder {
    config: LogConfig,
    sources: SourceRegistry,
    backends: Vec<BackendDesc>,
    links: Vec<(u8, Option<usize>)>,
}

impl LogPipelineBuilder {
    /// Start building a pipeline with the given configuration.
    pub fn new(config: LogConfig) -> LogPipelineBuilder {
        let mut sources = SourceRegistry::default();
        let _ = sources.register(CORE_SOURCE_NAME);
        LogPipelineBuilder {
            config,
            sources,
            backends: Vec::new(),
            links: Vec::new(),
        }
    }

    /// Register a backend.  Backends are called in registration order.
    pub fn register_backend(&mut self, desc: BackendDesc) -> BackendId {
        self.backends.push(desc);
        BackendId(self.backends.len() - 1)
    }

    /// Register a local source, returning its id.  Registering a name twice returns the same id.
    pub fn register_source(&mut self, name: &str) -> Result<SourceId> {
        self.sources.register(name).ok_or(Error(ENOMEM))
    }

    /// Register a link to another domain.
    ///
    /// Messages from the link have `offset` added to their domain and source ids.  With an
    /// `arena_size`, they are buffered in an arena of their own, and merged with the local messages
    /// by timestamp.  Otherwise they share the local arena.
    pub fn register_link(&mut self, offset: u8, arena_size: Option<usize>) -> LinkId {
        self.links.push((offset, arena_size));
        LinkId(self.links.len() - 1)
    }

    /// Build the pipeline.
    ///
    /// Fails with `EINVAL` if the configuration is not usable, or a link arena has no space.
    pub fn build(self) -> Result<Arc<LogPipeline>> {
        let config = self.config;
        config.validate()?;

        let shared = Arc::new(Shared {
            buffered: AtomicU32::new(0),
            dropped: AtomicU32::new(0),
            thread_attached: AtomicBool::new(false),
            sem: Semaphore::new(0, 1)?,
        });

        let new_arena = |size: usize| -> Result<PacketBuffer> {
            let shared = shared.clone();
            PacketBuffer::new(
                size,
                config.overwrite,
                Some(Box::new(move |_: &LogMsg| shared.dropped(true))),
            )
        };

        let mut arenas = Vec::new();
        if config.mode == Mode::Deferred {
            arenas.push(new_arena(config.buffer_size)?);
        }
        let mut links = Vec::with_capacity(self.links.len());
        for (offset, arena_size) in self.links {
            let arena = match (config.mode, arena_size) {
                (Mode::Immediate, _) => None,
                (Mode::Deferred, None) => Some(0),
                (Mode::Deferred, Some(size)) => {
                    arenas.push(new_arena(size)?);
                    Some(arenas.len() - 1)
                }
            };
            links.push(Link { offset, arena });
        }

        let timer = {
            let sem = shared.sem.clone();
            Timer::new(move || sem.give())?
        };

        let backends = self
            .backends
            .into_iter()
            .map(|desc| BackendEntry::new(desc, config.max_level))
            .collect();

        let mut merge = MergeState::new(arenas.len());
        merge.set_latency(config.processing_latency_us, SYS_FREQUENCY);

        Ok(Arc::new(LogPipeline {
            sources: self.sources,
            backends,
            arenas,
            links,
            shared,
            timer,
            process_lock: SpinMutex::new(()),
            consumers: SpinMutex::new(Vec::new()),
            merge: SpinMutex::new(merge),
            timestamp: SpinMutex::new(TimestampSource {
                getter: Arc::new(|| time::now().ticks()),
                freq: SYS_FREQUENCY,
            }),
            initialized: AtomicBool::new(false),
            panic_entered: AtomicBool::new(false),
            panic_mode: AtomicBool::new(false),
            backend_attached: AtomicBool::new(false),
            last_failure_report: AtomicI64::new(i64::MIN),
            config,
        }))
    }
}

/// A deferred logging pipeline.
pub struct LogPipeline {
    config: LogConfig,
    sources: SourceRegistry,
    backends: Vec<BackendEntry>,
    /// The local arena first, then link arenas.  Empty in immediate mode.
    arenas: Vec<PacketBuffer>,
    links: Vec<Link>,
    shared: Arc<Shared>,
    timer: Timer,
    process_lock: SpinMutex<()>,
    /// Threads currently consuming.  Posts from them never wait for the consumer.
    consumers: SpinMutex<Vec<ThreadId>>,
    merge: SpinMutex<MergeState>,
    timestamp: SpinMutex<TimestampSource>,
    initialized: AtomicBool,
    panic_entered: AtomicBool,
    panic_mode: AtomicBool,
    backend_attached: AtomicBool,
    /// Uptime of the last failure report, in ms.
    last_failure_report: AtomicI64,
}

fn lock<T>(mutex: &SpinMutex<T>) -> SpinMutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(never) => match never {},
    }
}

impl LogPipeline {
    /// Start building a pipeline.
    pub fn builder(config: LogConfig) -> LogPipelineBuilder {
        LogPipelineBuilder::new(config)
    }

    /// The configuration the pipeline was built with.
    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// The registered local sources.
    pub fn sources(&self) -> &SourceRegistry {
        &self.sources
    }

    /// A producer posting as `source`.
    pub fn producer<C: CallContext>(&self, source: SourceId) -> Producer<'_, C> {
        Producer::new(self, source)
    }

    /// Has [`panic`](LogPipeline::panic) completed?
    pub fn is_panic(&self) -> bool {
        self.panic_mode.load(Ordering::Acquire)
    }

    // Backends.

    fn entry(&self, id: BackendId) -> Result<&BackendEntry> {
        self.backends.get(id.0).ok_or(Error(ENODEV))
    }

    /// Number of registered backends.
    pub fn backend_count(&self) -> usize {
        self.backends.len()
    }

    /// Find a backend by name.
    pub fn backend_id(&self, name: &str) -> Option<BackendId> {
        self.backends
            .iter()
            .position(|b| b.name == name)
            .map(BackendId)
    }

    /// Initialize the autostart backends, and enable those that are ready.
    ///
    /// Returns the number of autostart backends that are not ready yet.  The processing thread
    /// keeps polling those.  Calling this again only retries the pending ones.
    pub fn init(&self) -> usize {
        if !self.initialized.swap(true, Ordering::AcqRel) {
            for entry in self.backends.iter().filter(|b| b.autostart) {
                entry.ensure_init();
            }
        }
        self.activate_pending()
    }

    /// Try to enable the autostart backends still waiting to become ready.
    pub(crate) fn activate_pending(&self) -> usize {
        let mut pending = 0;
        for (idx, entry) in self.backends.iter().enumerate() {
            if entry.autostart
                && entry.status() == BackendStatus::ReadyPending
                && !self.try_activate(idx)
            {
                pending += 1;
            }
        }
        pending
    }

    fn try_activate(&self, idx: usize) -> bool {
        let entry = &self.backends[idx];
        match entry.backend.is_ready() {
            Ok(()) => {
                self.enable_entry(entry, self.config.max_level);
                true
            }
            Err(e) => {
                entry.poll_failed();
                if entry.pending_polls() == 1 {
                    log::debug!("backend {} not ready: {}", entry.name, e);
                }
                false
            }
        }
    }

    fn enable_entry(&self, entry: &BackendEntry, level: Level) {
        entry.ensure_init();
        entry.filters.reset(level.min(self.config.max_level));
        entry.set_status(BackendStatus::Active);
        log::debug!("backend {} enabled", entry.name);
        self.notify_backend_enabled();
    }

    /// Enable a backend, accepting messages up to `max_level` from every source.
    ///
    /// The level is capped at the configured maximum.  Per source filters set before are
    /// discarded.
    pub fn backend_enable(&self, id: BackendId, max_level: Level) -> Result<()> {
        let entry = self.entry(id)?;
        self.enable_entry(entry, max_level);
        Ok(())
    }

    /// Stop a backend from receiving messages.
    pub fn backend_disable(&self, id: BackendId) -> Result<()> {
        let entry = self.entry(id)?;
        entry.set_status(BackendStatus::Disabled);
        entry.filters.reset(Level::None);
        Ok(())
    }

    /// Activation state of a backend.
    pub fn backend_status(&self, id: BackendId) -> Result<BackendStatus> {
        Ok(self.entry(id)?.status())
    }

    /// Is the backend receiving messages?
    pub fn backend_is_active(&self, id: BackendId) -> bool {
        self.entry(id).map_or(false, BackendEntry::is_active)
    }

    /// How many times the backend failed its readiness check.
    ///
    /// A backend that never gets ready is not an error, it just never receives anything.  This
    /// makes one that is stuck visible.
    pub fn backend_pending_polls(&self, id: BackendId) -> Result<u32> {
        Ok(self.entry(id)?.pending_polls())
    }

    /// Note that a backend became active.
    ///
    /// The first time, this wakes the consumer, which does not process anything while no backend
    /// is attached.
    pub fn notify_backend_enabled(&self) {
        if !self.backend_attached.swap(true, Ordering::AcqRel) {
            self.shared.sem.give();
        }
    }

    pub(crate) fn notify_backends(&self, event: BackendEvent) {
        for entry in self.backends.iter().filter(|b| b.is_active()) {
            entry.backend.notify(event);
        }
    }

    /// Set the filter level of `source` in `domain`, for one backend, or all of them.
    ///
    /// Returns the level actually set, which is capped at the configured maximum.  For all
    /// backends, that is the highest level any of them got.
    pub fn filter_set(
        &self,
        backend: Option<BackendId>,
        domain: u8,
        source: SourceId,
        level: Level,
    ) -> Result<Level> {
        let level = level.min(self.config.max_level);
        match backend {
            Some(id) => {
                self.entry(id)?.filters.set(domain, source, level);
            }
            None => {
                for entry in &self.backends {
                    entry.filters.set(domain, source, level);
                }
            }
        }
        Ok(level)
    }

    /// Get the filter level of `source` in `domain` for a backend.
    pub fn filter_get(&self, id: BackendId, domain: u8, source: SourceId) -> Result<Level> {
        Ok(self.entry(id)?.filters.get(domain, source))
    }

    /// Would `msg` get through the backend's filter?
    pub fn filter_check(&self, id: BackendId, msg: &LogMsg) -> bool {
        self.entry(id).map_or(false, |e| e.filters.check(msg))
    }

    // Timestamps.

    /// Use `getter` for message timestamps, counting at `freq` Hz.
    ///
    /// Messages already buffered keep the timestamps they have.  Fails with `EINVAL` for a zero
    /// frequency.
    pub fn set_timestamp_func<F>(&self, getter: F, freq: u32) -> Result<()>
    where
        F: Fn() -> Timestamp + Send + Sync + 'static,
    {
        if freq == 0 {
            return Err(Error(EINVAL));
        }
        {
            let mut ts = lock(&self.timestamp);
            ts.getter = Arc::new(getter);
            ts.freq = freq;
        }
        lock(&self.merge).set_latency(self.config.processing_latency_us, freq);
        self.notify_backends(BackendEvent::TimestampFreq(freq));
        Ok(())
    }

    /// Frequency of message timestamps, in Hz.
    pub fn timestamp_freq(&self) -> u32 {
        lock(&self.timestamp).freq
    }

    /// Read the current timestamp.
    pub fn timestamp(&self) -> Timestamp {
        let getter = lock(&self.timestamp).getter.clone();
        getter()
    }

    // Producer side.

    /// Allocate space for a message of `len` bytes.
    ///
    /// In thread context this may block, as configured.  Interrupt context, a thread that is
    /// processing messages, and any context once in panic mode, never block.  On failure the message is counted as dropped.
    pub fn msg_alloc<C: CallContext>(&self, len: usize) -> Option<MsgSlot<'_>> {
        let Some(arena) = self.arenas.first() else {
            return Some(MsgSlot {
                inner: SlotInner::Immediate(len),
            });
        };
        let may_block = C::MAY_BLOCK
            && !self.config.block_in_thread_timeout.is_no_wait()
            && !self.panic_entered.load(Ordering::Acquire)
            && !self.is_consumer();
        let timeout: Timeout = if may_block {
            self.config.block_in_thread_timeout
        } else {
            NoWait.into()
        };
        match arena.alloc(len, timeout) {
            Some(grant) => Some(MsgSlot {
                inner: SlotInner::Buffered(grant),
            }),
            None => {
                self.shared.dropped(false);
                None
            }
        }
    }

    /// Timestamp a message and publish it.
    ///
    /// Content that does not fit the slot is dropped.
    pub fn msg_commit(&self, slot: MsgSlot<'_>, content: MsgContent) {
        if content.encoded_len() > slot.len() {
            drop(slot);
            self.shared.dropped(false);
            return;
        }
        let msg = LogMsg::new(content, self.timestamp());
        match slot.inner {
            SlotInner::Immediate(_) => self.dispatch_immediate(&msg),
            SlotInner::Buffered(grant) => {
                grant.commit(msg);
                self.post_finalize();
            }
        }
    }

    /// Post a message.  Messages above the configured maximum level are discarded.
    pub fn post<C: CallContext>(&self, content: MsgContent) {
        if content.desc.level > self.config.max_level {
            return;
        }
        if let Some(slot) = self.msg_alloc::<C>(content.encoded_len()) {
            self.msg_commit(slot, content);
        }
    }

    /// Post a message from the pipeline itself.
    fn post_core(&self, level: Level, args: fmt::Arguments<'_>) {
        let desc = MsgDesc::log(DOMAIN_LOCAL, CORE_SOURCE, level);
        self.post::<Isr>(MsgContent::new(desc, fmt::format(args)));
    }

    /// Hand over a message received from another domain.
    ///
    /// The message keeps its timestamp.  Its domain and source ids are moved by the link's offset.
    /// This never blocks: if there is no space, the message is dropped.
    pub fn link_enqueue(&self, link: LinkId, mut msg: LogMsg) -> Result<()> {
        let link = self.links.get(link.0).ok_or(Error(ENODEV))?;
        msg.remap(link.offset);
        let Some(arena) = link.arena.and_then(|idx| self.arenas.get(idx)) else {
            self.dispatch_immediate(&msg);
            return Ok(());
        };
        match arena.alloc(msg.encoded_len(), NoWait) {
            Some(grant) => {
                grant.commit(msg);
                self.post_finalize();
            }
            None => self.shared.dropped(false),
        }
        Ok(())
    }

    fn post_finalize(&self) {
        let cnt = self.shared.buffered.fetch_add(1, Ordering::AcqRel);

        if self.is_panic() {
            self.drain_inline();
            return;
        }
        if !self.shared.thread_attached.load(Ordering::Acquire) {
            return;
        }

        let threshold = self.config.process_trigger_threshold;
        if threshold == 1 {
            self.shared.sem.give();
        } else if cnt == 0 {
            self.timer.start(self.config.process_thread_sleep, NoWait);
        } else if threshold != 0 && cnt + 1 == threshold {
            self.timer.stop();
            self.shared.sem.give();
        }
    }

    /// Process everything buffered, from a panic mode commit.
    fn drain_inline(&self) {
        // A backend logging from its own dispatch: the drain it is called from picks this up.
        if self.is_consumer() {
            return;
        }
        loop {
            if let Ok(_guard) = self.process_lock.try_lock() {
                let _mark = self.consumer_enter();
                while self.process_one_locked(true) == Step::Processed {}
                return;
            }
            // Another thread is draining.  It may already be past this message, so keep trying
            // until somebody has taken it.
            if !self.msg_pending() {
                return;
            }
            core::hint::spin_loop();
        }
    }

    fn dispatch_immediate(&self, msg: &LogMsg) {
        let serialize = self.config.immediate_clean_output || self.is_panic();
        if serialize && !self.is_consumer() {
            let _guard = lock(&self.process_lock);
            let _mark = self.consumer_enter();
            self.dispatch(msg);
        } else {
            self.dispatch(msg);
        }
    }

    fn dispatch(&self, msg: &LogMsg) {
        let freq = self.timestamp_freq();
        for entry in &self.backends {
            if entry.is_active() && entry.filters.check(msg) {
                let ctx = DispatchCtx {
                    sources: &self.sources,
                    timestamp_freq: freq,
                    format: entry.format,
                };
                entry.backend.process(msg, &ctx);
            }
        }
    }

    // Consumer side.

    fn process_one_locked(&self, bypass_latency: bool) -> Step {
        if !self.backend_attached.load(Ordering::Acquire) || self.arenas.is_empty() {
            return Step::Idle;
        }
        let freq = self.timestamp_freq();
        let claim =
            lock(&self.merge).claim_oldest(&self.arenas, || self.timestamp(), freq, bypass_latency);
        match claim {
            ClaimResult::Msg { arena, claimed } => {
                self.shared.buffered_dec();
                self.dispatch(claimed.msg());
                self.arenas[arena].free(claimed);
                Step::Processed
            }
            ClaimResult::Backoff(delay) => {
                self.timer.start(delay, NoWait);
                Step::Backoff
            }
            ClaimResult::Empty => Step::Idle,
        }
    }

    fn step(&self) -> Step {
        let _guard = lock(&self.process_lock);
        self.process_one_locked(self.is_panic())
    }

    /// Process the oldest message.
    ///
    /// Returns false if there was nothing to process: no message, no backend attached yet, or the
    /// oldest message has to be held back a while.  In the last case the timer is armed to wake
    /// the consumer when it may go.
    pub fn process_one(&self) -> bool {
        let _mark = self.consumer_enter();
        self.step() == Step::Processed
    }

    /// Process one message, and send the failure report if one is due.
    ///
    /// Returns true if more messages are waiting.
    pub fn process(&self) -> bool {
        self.round().pending
    }

    /// One consumer round, as [`process`](LogPipeline::process).
    pub(crate) fn round(&self) -> Round {
        if !self.backend_attached.load(Ordering::Acquire) {
            return Round::default();
        }
        let _mark = self.consumer_enter();
        let step = self.step();
        self.report_failures();
        Round {
            processed: step == Step::Processed,
            pending: step != Step::Backoff && self.msg_pending(),
        }
    }

    fn report_failures(&self) {
        let dropped_pending = self.shared.dropped.load(Ordering::Acquire) > 0;
        let unordered_pending = self.unordered_cnt() > 0;
        if !dropped_pending && !unordered_pending {
            return;
        }

        let now = uptime_get();
        let last = self.last_failure_report.load(Ordering::Acquire);
        let period = self.config.failure_report_period.to_millis() as i64;
        if now.saturating_sub(last) < period {
            return;
        }
        if self
            .last_failure_report
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        if dropped_pending {
            let dropped = self.shared.dropped.swap(0, Ordering::AcqRel);
            for entry in self.backends.iter().filter(|b| b.is_active()) {
                entry.backend.dropped(dropped);
            }
        }
        if unordered_pending {
            let unordered = lock(&self.merge).take_unordered();
            self.post_core(
                Level::Wrn,
                format_args!("{} unordered messages since last report", unordered),
            );
        }
    }

    /// Are there messages waiting to be processed?
    pub fn msg_pending(&self) -> bool {
        self.arenas.iter().any(PacketBuffer::is_pending) || lock(&self.merge).has_cached()
    }

    /// Process everything that is buffered.
    ///
    /// With a processing thread attached, this wakes it and waits until it is done.  Otherwise the
    /// messages are processed by the caller.  Returns at once if no backend is attached, since
    /// nothing would be processed.
    pub fn flush(&self) {
        if !self.backend_attached.load(Ordering::Acquire) {
            return;
        }
        if self.shared.thread_attached.load(Ordering::Acquire) {
            while self.buffered_cnt() > 0 {
                self.thread_trigger();
                time::sleep(self.config.flush_sleep);
            }
        } else {
            while self.process() {}
        }
    }

    /// Attach a consumer.
    ///
    /// From now on commits wake the consumer through the semaphore and timer, see
    /// [`wait_for_work`](LogPipeline::wait_for_work).
    pub fn thread_set(&self) {
        self.shared.thread_attached.store(true, Ordering::Release);
        let threshold = self.config.process_trigger_threshold;
        if threshold != 0 && self.buffered_cnt() >= threshold {
            self.shared.sem.give();
        }
    }

    /// Is a consumer attached?
    pub fn thread_attached(&self) -> bool {
        self.shared.thread_attached.load(Ordering::Acquire)
    }

    pub(crate) fn thread_clear(&self) {
        self.shared.thread_attached.store(false, Ordering::Release);
    }

    /// Wake the consumer now, instead of when the timer expires.
    pub fn thread_trigger(&self) {
        self.timer.stop();
        self.shared.sem.give();
    }

    /// Mark the calling thread as consuming, until the mark is dropped.
    pub(crate) fn consumer_enter(&self) -> ConsumerMark<'_> {
        let id = thread::current().id();
        lock(&self.consumers).push(id);
        ConsumerMark { pipeline: self, id }
    }

    /// Is the calling thread consuming?
    fn is_consumer(&self) -> bool {
        let id = thread::current().id();
        lock(&self.consumers).contains(&id)
    }

    /// Block until the consumer is woken, or `timeout` expires.
    ///
    /// Returns true if woken.
    pub fn wait_for_work<T>(&self, timeout: T) -> bool
    where
        T: Into<Timeout>,
    {
        self.shared.sem.take(timeout).is_ok()
    }

    /// What would currently wake the consumer.
    pub fn trigger_state(&self) -> TriggerState {
        TriggerState {
            pending_wakes: self.shared.sem.count_get(),
            timer_armed: self.timer.is_running(),
        }
    }

    // Panic.

    /// Switch to panic mode.
    ///
    /// Backends that are not ready yet get a few more chances.  Then every active backend is told
    /// about the panic, and every buffered message is processed before this returns.  Does not
    /// block otherwise, so can be used from any context.  Calling this again does nothing.
    pub fn panic(&self) {
        if self.panic_entered.swap(true, Ordering::AcqRel) {
            return;
        }

        self.initialized.store(true, Ordering::Release);
        for (idx, entry) in self.backends.iter().enumerate() {
            if !entry.autostart {
                continue;
            }
            entry.ensure_init();
            for _ in 0..self.config.panic_activation_attempts {
                if entry.status() != BackendStatus::ReadyPending || self.try_activate(idx) {
                    break;
                }
                core::hint::spin_loop();
            }
        }

        for entry in self.backends.iter().filter(|b| b.is_active()) {
            entry.backend.panic();
        }

        // Commits from here on drain in place, so nothing is left behind once this drain ends.
        self.panic_mode.store(true, Ordering::Release);
        {
            let _guard = lock(&self.process_lock);
            let _mark = self.consumer_enter();
            while self.process_one_locked(true) == Step::Processed {}
        }
        self.report_failures();
    }

    // Statistics.

    /// Messages committed and not yet processed.
    pub fn buffered_cnt(&self) -> u32 {
        self.shared.buffered.load(Ordering::Acquire)
    }

    /// Messages dropped since the last failure report.
    pub fn dropped_cnt(&self) -> u32 {
        self.shared.dropped.load(Ordering::Acquire)
    }

    /// Messages processed out of timestamp order since the last failure report.
    pub fn unordered_cnt(&self) -> u32 {
        lock(&self.merge).unordered()
    }

    /// Size and current usage of the local arena, in bytes.
    ///
    /// Fails with `EINVAL` in immediate mode, which has no arena.
    pub fn mem_get_usage(&self) -> Result<(usize, usize)> {
        let arena = self.arenas.first().ok_or(Error(EINVAL))?;
        Ok((arena.size(), arena.usage()))
    }

    /// Highest usage of the local arena, in bytes.
    ///
    /// Fails with `EINVAL` in immediate mode.
    pub fn mem_get_max_usage(&self) -> Result<usize> {
        Ok(self.arenas.first().ok_or(Error(EINVAL))?.max_usage())
    }
}

impl fmt::Debug for LogPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogPipeline")
            .field("mode", &self.config.mode)
            .field("backends", &self.backends.len())
            .field("arenas", &self.arenas)
            .field("buffered", &self.buffered_cnt())
            .finish()
    }
}
