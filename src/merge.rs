// Copyright (c) 2024 Linaro LTD
// SPDX-License-Identifier: Apache-2.0

//! Oldest message selection across arenas.
//!
//! When messages from other domains arrive through links, each link has its own arena, and the
//! consumer has to pick which one to read from.  It keeps one claimed message per arena in a cache,
//! and hands out the one with the smallest timestamp.
//!
//! A remote domain may still be about to deliver something older than what is cached.  To give it
//! the chance, a message younger than the processing latency window is held back, and the consumer
//! told how long to wait before trying again.  A message that still arrives too late is handed out
//! anyway, and counted as unordered.

use crate::arena::{Claimed, PacketBuffer};
use crate::msg::Timestamp;
use crate::time::{ticks_from_freq, Duration};

/// Outcome of a claim.
#[derive(Debug)]
pub(crate) enum ClaimResult {
    /// A message, claimed from the arena with this index.
    Msg { arena: usize, claimed: Claimed },
    /// The oldest message is too recent.  Try again after this long.
    Backoff(Duration),
    /// Nothing to claim.
    Empty,
}

pub(crate) struct MergeState {
    cache: Vec<Option<Claimed>>,
    prev_timestamp: Timestamp,
    /// Processing latency, in timestamp units.
    latency: Timestamp,
    unordered: u32,
}

impl MergeState {
    pub(crate) fn new(arenas: usize) -> MergeState {
        MergeState {
            cache: (0..arenas).map(|_| None).collect(),
            prev_timestamp: 0,
            latency: 0,
            unordered: 0,
        }
    }

    /// Set the latency window from microseconds and the timestamp frequency.
    pub(crate) fn set_latency(&mut self, latency_us: u32, freq: u32) {
        self.latency = (freq as u64 * latency_us as u64) / 1_000_000;
    }

    /// Read and clear the count of messages handed out of order.
    pub(crate) fn take_unordered(&mut self) -> u32 {
        core::mem::take(&mut self.unordered)
    }

    pub(crate) fn unordered(&self) -> u32 {
        self.unordered
    }

    /// Is there a message in the cache?
    pub(crate) fn has_cached(&self) -> bool {
        self.cache.iter().any(Option::is_some)
    }

    /// Claim the oldest message over all `arenas`.
    ///
    /// `now` is the current timestamp, at `freq`.  In `panic` mode the latency window is ignored.
    pub(crate) fn claim_oldest(
        &mut self,
        arenas: &[PacketBuffer],
        now: impl FnOnce() -> Timestamp,
        freq: u32,
        panic: bool,
    ) -> ClaimResult {
        if arenas.len() == 1 {
            return match arenas[0].claim() {
                Some(claimed) => ClaimResult::Msg { arena: 0, claimed },
                None => ClaimResult::Empty,
            };
        }

        let mut oldest: Option<(usize, Timestamp)> = None;
        for (i, (slot, arena)) in self.cache.iter_mut().zip(arenas).enumerate() {
            if slot.is_none() {
                *slot = arena.claim();
            }
            if let Some(claimed) = slot {
                let ts = claimed.msg().timestamp();
                // Strictly smaller: on a tie the first arena keeps it.
                if oldest.map_or(true, |(_, min)| ts < min) {
                    oldest = Some((i, ts));
                }
            }
        }

        let Some((idx, ts)) = oldest else {
            return ClaimResult::Empty;
        };

        if self.latency != 0 && !panic {
            let threshold = now().saturating_sub(self.latency);
            if ts > threshold {
                return ClaimResult::Backoff(ticks_from_freq(ts - threshold, freq));
            }
        }

        let Some(claimed) = self.cache[idx].take() else {
            return ClaimResult::Empty;
        };
        if ts < self.prev_timestamp {
            self.unordered = self.unordered.saturating_add(1);
        }
        self.prev_timestamp = ts;
        ClaimResult::Msg { arena: idx, claimed }
    }
}
