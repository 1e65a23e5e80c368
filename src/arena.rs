// Copyright (c) 2024 Linaro LTD
// SPDX-License-Identifier: Apache-2.0

//! Message arena.
//!
//! A [`PacketBuffer`] is a fixed size byte arena holding variable length messages, used by any
//! number of producers and a single consumer.  Each message goes through a two phase protocol on
//! both sides:
//!
//! - a producer [`alloc`]s space, then [`commit`]s the finished message into it (dropping the
//!   [`Grant`] instead gives the space back);
//! - the consumer [`claim`]s the oldest committed message, and later [`free`]s it.
//!
//! Messages are claimed strictly in the order their space was allocated.  A message that has been
//! allocated but not yet committed holds back everything behind it.  Claimed messages can be freed
//! in any order; space is returned once everything in front of it has been freed.
//!
//! When the arena is full, an overwrite arena evicts the oldest committed messages that nobody has
//! claimed yet, skipping over claimed ones, and reports them through the drop notifier.  Otherwise
//! the allocation fails at once, or waits for the consumer to free space if a timeout was given.
//!
//! [`alloc`]: PacketBuffer::alloc
//! [`commit`]: Grant::commit
//! [`claim`]: PacketBuffer::claim
//! [`free`]: PacketBuffer::free

use std::collections::VecDeque;
use std::fmt;
use std::time::Instant;

use crate::error::{Error, Result, EINVAL};
use crate::msg::LogMsg;
use crate::sync::atomic::{AtomicUsize, Ordering};
use crate::sync::{SpinMutex, SpinMutexGuard};
use crate::sys::sync::Semaphore;
use crate::time::{Duration, Forever, Timeout};

/// Called for every message evicted to make space in an overwrite arena.
pub type DropNotify = Box<dyn Fn(&LogMsg) + Send + Sync>;

static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

enum SlotState {
    /// Space handed to a producer, message not written yet.
    Allocated,
    /// Message visible to the consumer.
    Committed(LogMsg),
    /// Message handed to the consumer.
    Claimed,
    /// Space waiting to be reclaimed.
    Freed,
}

struct Slot {
    len: usize,
    state: SlotState,
}

struct State {
    slots: VecDeque<Slot>,
    /// Sequence number of `slots[0]`.
    head_seq: u64,
    used: usize,
    max_used: usize,
}

impl State {
    fn slot_mut(&mut self, seq: u64) -> Option<&mut Slot> {
        let idx = seq.checked_sub(self.head_seq)?;
        self.slots.get_mut(idx as usize)
    }

    /// Evict the oldest committed message nobody has claimed.
    ///
    /// Claimed messages, and allocations still being written, are skipped.  The evicted slot keeps
    /// its place in the sequence as a freed slot of no length, its space is returned at once.
    fn evict_oldest(&mut self) -> Option<LogMsg> {
        let slot = self
            .slots
            .iter_mut()
            .find(|s| matches!(s.state, SlotState::Committed(_)))?;
        let state = core::mem::replace(&mut slot.state, SlotState::Freed);
        let len = core::mem::take(&mut slot.len);
        self.used -= len;
        self.reclaim();
        match state {
            SlotState::Committed(msg) => Some(msg),
            _ => None,
        }
    }

    /// Return the space of freed slots at the head.
    fn reclaim(&mut self) {
        while let Some(Slot { state: SlotState::Freed, len }) = self.slots.front() {
            self.used -= *len;
            self.slots.pop_front();
            self.head_seq += 1;
        }
    }
}

/// A fixed size arena of log messages.
pub struct PacketBuffer {
    id: usize,
    size: usize,
    overwrite: bool,
    state: SpinMutex<State>,
    /// Given each time space is returned, to wake blocked producers.
    space: Semaphore,
    notify_drop: Option<DropNotify>,
}

/// Space allocated in a [`PacketBuffer`], waiting for its message.
///
/// Dropping a grant without committing it returns the space.
pub struct Grant<'a> {
    buf: &'a PacketBuffer,
    seq: u64,
    len: usize,
    done: bool,
}

/// A message claimed from a [`PacketBuffer`].
///
/// Must be given back with [`PacketBuffer::free`] once processed.  This is consumed by `free`, so
/// a message can not be freed twice.
pub struct Claimed {
    owner: usize,
    seq: u64,
    msg: LogMsg,
}

impl Claimed {
    /// The claimed message.
    pub fn msg(&self) -> &LogMsg {
        &self.msg
    }
}

impl fmt::Debug for Claimed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Claimed")
            .field("seq", &self.seq)
            .field("msg", &self.msg)
            .finish()
    }
}

impl PacketBuffer {
    /// Create an arena of `size` bytes.
    pub fn new(size: usize, overwrite: bool, notify_drop: Option<DropNotify>) -> Result<PacketBuffer> {
        if size == 0 {
            return Err(Error(EINVAL));
        }
        Ok(PacketBuffer {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            size,
            overwrite,
            state: SpinMutex::new(State {
                slots: VecDeque::new(),
                head_seq: 0,
                used: 0,
                max_used: 0,
            }),
            // A limit of 1 is enough; a woken producer rechecks for space anyway.
            space: Semaphore::new(0, 1)?,
            notify_drop,
        })
    }

    fn lock(&self) -> SpinMutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(never) => match never {},
        }
    }

    /// Allocate `len` bytes.
    ///
    /// Returns `None` if the space could not be found before `timeout` expired.  A request larger
    /// than the whole arena fails at once.
    pub fn alloc<T>(&self, len: usize, timeout: T) -> Option<Grant<'_>>
    where
        T: Into<Timeout>,
    {
        let timeout: Timeout = timeout.into();
        if len == 0 || len > self.size {
            return None;
        }
        let deadline = timeout.to_std().map(|d| Instant::now() + d);

        loop {
            let mut evicted = Vec::new();
            let grant = {
                let mut st = self.lock();
                if self.overwrite {
                    while st.used + len > self.size {
                        match st.evict_oldest() {
                            Some(msg) => evicted.push(msg),
                            None => break,
                        }
                    }
                }

                if st.used + len <= self.size {
                    let seq = st.head_seq + st.slots.len() as u64;
                    st.slots.push_back(Slot {
                        len,
                        state: SlotState::Allocated,
                    });
                    st.used += len;
                    st.max_used = st.max_used.max(st.used);
                    Some(Grant {
                        buf: self,
                        seq,
                        len,
                        done: false,
                    })
                } else {
                    None
                }
            };

            if let Some(notify) = &self.notify_drop {
                for msg in &evicted {
                    notify(msg);
                }
            }

            if grant.is_some() || timeout.is_no_wait() {
                return grant;
            }

            let waited = match deadline {
                None => self.space.take(Forever),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    let left = (deadline - now).as_micros() as u64;
                    self.space.take(Duration::from_ticks(left.max(1)))
                }
            };
            if waited.is_err() {
                return None;
            }
        }
    }

    fn commit(&self, seq: u64, msg: LogMsg) {
        let mut st = self.lock();
        if let Some(slot) = st.slot_mut(seq) {
            debug_assert!(msg.encoded_len() <= slot.len);
            slot.state = SlotState::Committed(msg);
        }
    }

    fn release(&self, seq: u64) {
        {
            let mut st = self.lock();
            if let Some(slot) = st.slot_mut(seq) {
                slot.state = SlotState::Freed;
            }
            st.reclaim();
        }
        self.space.give();
    }

    /// Claim the oldest committed message.
    ///
    /// Returns `None` if there is nothing to claim, including when the oldest allocation has not
    /// been committed yet.  Never blocks.
    pub fn claim(&self) -> Option<Claimed> {
        let mut st = self.lock();
        let head_seq = st.head_seq;
        for (i, slot) in st.slots.iter_mut().enumerate() {
            match slot.state {
                SlotState::Claimed | SlotState::Freed => continue,
                SlotState::Allocated => return None,
                SlotState::Committed(_) => {
                    let state = core::mem::replace(&mut slot.state, SlotState::Claimed);
                    if let SlotState::Committed(msg) = state {
                        return Some(Claimed {
                            owner: self.id,
                            seq: head_seq + i as u64,
                            msg,
                        });
                    }
                }
            }
        }
        None
    }

    /// Give back the space of a claimed message.
    pub fn free(&self, claimed: Claimed) {
        debug_assert_eq!(claimed.owner, self.id, "message freed to the wrong arena");
        self.release(claimed.seq);
    }

    /// Is there a message ready to be claimed?
    pub fn is_pending(&self) -> bool {
        let st = self.lock();
        let ready = st
            .slots
            .iter()
            .find(|s| !matches!(s.state, SlotState::Claimed | SlotState::Freed));
        matches!(ready, Some(Slot { state: SlotState::Committed(_), .. }))
    }

    /// Total size of the arena, in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Bytes currently in use.
    pub fn usage(&self) -> usize {
        self.lock().used
    }

    /// Highest number of bytes ever in use at once.
    pub fn max_usage(&self) -> usize {
        self.lock().max_used
    }
}

impl fmt::Debug for PacketBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PacketBuffer {{ id: {}, size: {} }}", self.id, self.size)
    }
}

impl Grant<'_> {
    /// Bytes reserved by this grant.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false: a grant holds at least one byte.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Publish the message, making it visible to the consumer.
    pub fn commit(mut self, msg: LogMsg) {
        self.done = true;
        self.buf.commit(self.seq, msg);
    }
}

impl Drop for Grant<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.buf.release(self.seq);
        }
    }
}
