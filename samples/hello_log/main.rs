// Copyright (c) 2024 Linaro LTD
// SPDX-License-Identifier: Apache-2.0

use std::io::stdout;
use std::sync::Arc;

use log::info;
use zephyr_log::backend::console::ConsoleBackend;
use zephyr_log::{printkln, BackendDesc, Level, LogConfig, LogPipeline, ProcessThread, Thread};

fn main() -> anyhow::Result<()> {
    let config = match std::env::var("DOTCONFIG") {
        Ok(path) => LogConfig::from_dotconfig(path)?,
        Err(_) => LogConfig::default(),
    };

    let mut builder = LogPipeline::builder(config);
    let app = builder.register_source("hello_log")?;
    builder.register_backend(BackendDesc::new(
        "console",
        Arc::new(ConsoleBackend::new(stdout())),
    ));
    let pipeline = builder.build()?;
    zephyr_log::set_logger(pipeline.clone())?;

    let thread = ProcessThread::start(pipeline.clone())?;

    info!(target: "hello_log", "Hello world from Rust");
    printkln!(pipeline, "raw output, never filtered");

    let producer = pipeline.producer::<Thread>(app);
    producer.hexdump(Level::Dbg, b"deferred logging", format_args!("some bytes"));
    for i in 0..3 {
        producer.wrn(format_args!("warning {}", i));
    }

    pipeline.flush();
    thread.stop();
    Ok(())
}
