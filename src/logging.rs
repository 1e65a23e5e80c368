// Copyright (c) 2024 Linaro LTD
// SPDX-License-Identifier: Apache-2.0

//! Routing the `log` crate into a pipeline.
//!
//! Most Rust code logs through the [`log`] crate facade.  [`set_logger`] installs a handler for it
//! that posts each record to a [`LogPipeline`].  The record's target is looked up among the
//! pipeline's registered sources, so `log::info!(target: "net", ...)` is filtered like any other
//! message from the `net` source.  Records from targets that are not registered have no source;
//! they carry the target in their text instead, and are not subject to per source filtering.
//!
//! The `log` crate has no separate place for a trace level, so trace records are posted as debug.

use std::sync::Arc;

use log::{Log, Metadata, Record, SetLoggerError};

use crate::msg::{Level, MsgContent, MsgDesc, DOMAIN_LOCAL, SOURCE_NONE};
use crate::pipeline::LogPipeline;
use crate::producer::Thread;

struct PipelineLogger {
    pipeline: Arc<LogPipeline>,
}

impl Log for PipelineLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        Level::from(metadata.level()) <= self.pipeline.config().max_level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let source = self
            .pipeline
            .sources()
            .source_id(record.target())
            .unwrap_or(SOURCE_NONE);
        let package = if source == SOURCE_NONE {
            format!("{}: {}", record.target(), record.args())
        } else {
            record.args().to_string()
        };
        let desc = MsgDesc::log(DOMAIN_LOCAL, source, record.level().into());
        self.pipeline.post::<Thread>(MsgContent::new(desc, package));
    }

    fn flush(&self) {
        self.pipeline.flush();
    }
}

// The `log` crate has different entry points based on whether or not the target has atomic
// pointers.  Without them, installing the logger races with any other thread logging, so it is
// only safe before other threads run.
cfg_if::cfg_if! {
    if #[cfg(target_has_atomic = "ptr")] {
        /// Send `log` crate records to `pipeline`.
        ///
        /// The maximum level of the `log` crate is set from the pipeline's configuration.  This can
        /// only be done once per process.
        pub fn set_logger(pipeline: Arc<LogPipeline>) -> Result<(), SetLoggerError> {
            let max_level = pipeline.config().max_level.to_level_filter();
            let logger: &'static PipelineLogger = Box::leak(Box::new(PipelineLogger { pipeline }));
            log::set_logger(logger)?;
            log::set_max_level(max_level);
            Ok(())
        }
    } else {
        /// Send `log` crate records to `pipeline`.
        ///
        /// The maximum level of the `log` crate is set from the pipeline's configuration.  This can
        /// only be done once per process.
        ///
        /// # Safety
        ///
        /// This target has no atomic pointers.  As long as this is called before any other thread
        /// runs, it is safe to use.
        pub unsafe fn set_logger(pipeline: Arc<LogPipeline>) -> Result<(), SetLoggerError> {
            let max_level = pipeline.config().max_level.to_level_filter();
            let logger: &'static PipelineLogger = Box::leak(Box::new(PipelineLogger { pipeline }));
            log::set_logger_racy(logger)?;
            log::set_max_level_racy(max_level);
            Ok(())
        }
    }
}
