// Copyright (c) 2024 Linaro LTD
// SPDX-License-Identifier: Apache-2.0

//! Deferred logging for Rust
//!
//! This crate provides the core of a deferred logging system, following the design of Zephyr's
//! logging subsystem.  Producers (threads and interrupt handlers) post messages into a bounded
//! byte arena.  A consumer, normally a low priority processing thread, claims them in order and
//! hands them to the backends.  Messages from other domains (cores, or firmware images) arrive over
//! links, and are merged with the local ones by timestamp.  When the system goes down, [`panic`]
//! switches everything to synchronous operation so the last messages make it out.
//!
//! ```ignore
//! let mut builder = LogPipeline::builder(LogConfig::default());
//! let net = builder.register_source("net")?;
//! builder.register_backend(BackendDesc::new("console", Arc::new(ConsoleBackend::new(stdout()))));
//! let pipeline = builder.build()?;
//! let thread = ProcessThread::start(pipeline.clone())?;
//!
//! pipeline.producer::<Thread>(net).inf(format_args!("link up"));
//! ```
//!
//! [`panic`]: LogPipeline::panic

#![deny(missing_docs)]

pub mod arena;
pub mod backend;
pub mod config;
pub mod error;
mod filter;
pub mod format;
pub mod logging;
mod merge;
pub mod msg;
pub mod pipeline;
pub mod printk;
pub mod producer;
pub mod source;
pub mod sync;
pub mod sys;
pub mod thread;
pub mod time;

pub use backend::{Backend, BackendDesc, BackendEvent, BackendId, BackendStatus, DispatchCtx};
pub use config::{LogConfig, Mode};
pub use error::{Error, Result};
pub use logging::set_logger;
pub use msg::{Level, LogMsg, MsgContent, MsgDesc, MsgType};
pub use pipeline::{LinkId, LogPipeline, LogPipelineBuilder, MsgSlot, TriggerState};
pub use producer::{CallContext, Isr, Producer, Thread};
pub use thread::ProcessThread;
