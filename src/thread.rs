// Copyright (c) 2024 Linaro LTD
// SPDX-License-Identifier: Apache-2.0

//! The log processing thread.
//!
//! The processing thread is the consumer of a deferred pipeline.  It initializes the backends, and
//! then loops, processing messages until there are none left, and sleeping on the pipeline's
//! semaphore in between.  Producers wake it according to the trigger policy.
//!
//! While some autostart backends are not ready yet, the thread does not sleep longer than the
//! backend poll period, and checks them again each time it wakes.  Once all are active, it sleeps
//! until woken.
//!
//! On the target, this thread runs for the lifetime of the system.  On the host it can be stopped,
//! which [`ProcessThread`] does when dropped.

use std::sync::Arc;
use std::thread::JoinHandle;

use crate::backend::BackendEvent;
use crate::error::{Error, Result, EBUSY, ENOMEM};
use crate::pipeline::LogPipeline;
use crate::sync::atomic::{AtomicBool, Ordering};
use crate::time::{self, Forever, Timeout};

/// Handle to a running processing thread.
pub struct ProcessThread {
    pipeline: Arc<LogPipeline>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ProcessThread {
    /// Start the processing thread of `pipeline`.
    ///
    /// Fails with `EBUSY` if the pipeline already has a consumer attached.
    pub fn start(pipeline: Arc<LogPipeline>) -> Result<ProcessThread> {
        if pipeline.thread_attached() {
            return Err(Error(EBUSY));
        }
        pipeline.thread_set();

        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let pipeline = pipeline.clone();
            let stop = stop.clone();
            std::thread::Builder::new()
                .name("logging".into())
                .spawn(move || run(&pipeline, &stop))
        };
        let handle = match handle {
            Ok(handle) => handle,
            Err(e) => {
                pipeline.thread_clear();
                log::warn!("unable to start log thread: {}", e);
                return Err(Error(ENOMEM));
            }
        };

        Ok(ProcessThread {
            pipeline,
            stop,
            handle: Some(handle),
        })
    }

    /// The pipeline this thread is processing.
    pub fn pipeline(&self) -> &Arc<LogPipeline> {
        &self.pipeline
    }

    /// Stop the thread, and wait for it to finish.
    ///
    /// Messages still buffered are left in the pipeline.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.stop.store(true, Ordering::Release);
        self.pipeline.thread_trigger();
        let _ = handle.join();
        self.pipeline.thread_clear();
    }
}

impl Drop for ProcessThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(pipeline: &LogPipeline, stop: &AtomicBool) {
    let _mark = pipeline.consumer_enter();
    let poll_period = pipeline.config().backend_poll_period;
    let mut pending = pipeline.init();
    let mut last_poll = time::now();
    let mut processed_any = false;

    log::debug!("log thread started, {} backends pending", pending);

    while !stop.load(Ordering::Acquire) {
        if pending > 0 && time::now() - last_poll >= poll_period {
            pending = pipeline.activate_pending();
            last_poll = time::now();
        }

        let round = pipeline.round();
        processed_any |= round.processed;
        if round.pending {
            continue;
        }

        if processed_any {
            processed_any = false;
            pipeline.notify_backends(BackendEvent::ProcessThreadDone);
        }

        let timeout: Timeout = if pending > 0 {
            poll_period.into()
        } else {
            Forever.into()
        };
        pipeline.wait_for_work(timeout);
    }

    log::debug!("log thread stopped");
}
