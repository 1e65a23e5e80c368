// Copyright (c) 2024 EOVE SAS
// Copyright (c) 2024 Linaro LTD
// SPDX-License-Identifier: Apache-2.0

//! Kernel style timer.
//!
//! A [`Timer`] calls its expiry function once `delay` has elapsed after [`start`], and then every
//! `period` after that.  If `period` is [`NoWait`] or [`Forever`] the timer is one-shot.  Starting
//! a running timer restarts it with the new settings, and [`stop`] cancels any pending expiry.
//!
//! The expiry function runs on a thread owned by the timer, and should do as little as the
//! equivalent IRQ context callback would: giving a semaphore is the intended use.
//!
//! [`start`]: Timer::start
//! [`stop`]: Timer::stop
//! [`NoWait`]: crate::time::NoWait
//! [`Forever`]: crate::time::Forever

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Instant;

use crate::error::{Error, Result, ENOMEM};
use crate::time::Timeout;

#[derive(Default)]
struct State {
    /// When the next expiry is due.  `None` while stopped.
    deadline: Option<Instant>,
    period: Option<std::time::Duration>,
    /// Expiries since the status was last read.
    status: u32,
    shutdown: bool,
}

struct Shared {
    state: Mutex<State>,
    cond: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A timer with an expiry callback.
pub struct Timer {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl Timer {
    /// Create a new, stopped, timer that calls `expiry` each time it fires.
    pub fn new<F>(expiry: F) -> Result<Timer>
    where
        F: Fn() + Send + 'static,
    {
        let shared = Arc::new(Shared {
            state: Mutex::new(State::default()),
            cond: Condvar::new(),
        });
        let child = shared.clone();
        let thread = std::thread::Builder::new()
            .name("log_timer".into())
            .spawn(move || run(&child, expiry))
            .map_err(|_| Error(ENOMEM))?;
        Ok(Timer {
            shared,
            thread: Some(thread),
        })
    }

    /// Start the timer after a given `delay` and repeat every `period`.
    ///
    /// A `delay` of [`Forever`](crate::time::Forever) leaves the timer stopped.
    pub fn start(&self, delay: impl Into<Timeout>, period: impl Into<Timeout>) {
        let delay: Timeout = delay.into();
        let period: Timeout = period.into();
        let mut state = self.shared.lock();
        state.status = 0;
        state.deadline = delay.to_std().map(|d| Instant::now() + d);
        state.period = if period.is_no_wait() { None } else { period.to_std() };
        self.shared.cond.notify_one();
    }

    /// Stop the timer.
    ///
    /// No expiry is started after this returns.  An expiry function that was already running is
    /// allowed to finish.
    pub fn stop(&self) {
        let mut state = self.shared.lock();
        state.deadline = None;
        self.shared.cond.notify_one();
    }

    /// Is the timer waiting to expire?
    pub fn is_running(&self) -> bool {
        self.shared.lock().deadline.is_some()
    }

    /// Read and clear the number of times the timer has fired since the last read (or start).
    pub fn status_get(&self) -> u32 {
        let mut state = self.shared.lock();
        core::mem::take(&mut state.status)
    }
}

fn run<F: Fn()>(shared: &Shared, expiry: F) {
    let mut state = shared.lock();
    loop {
        if state.shutdown {
            break;
        }
        match state.deadline {
            None => {
                state = shared.cond.wait(state).unwrap_or_else(PoisonError::into_inner);
            }
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    state.status = state.status.saturating_add(1);
                    state.deadline = state.period.map(|p| deadline + p);
                    drop(state);
                    expiry();
                    state = shared.lock();
                } else {
                    state = shared
                        .cond
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        {
            let mut state = self.shared.lock();
            state.shutdown = true;
            state.deadline = None;
            self.shared.cond.notify_one();
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sys::Timer")
    }
}
