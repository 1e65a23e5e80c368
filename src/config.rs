// Copyright (c) 2024 Linaro LTD
// SPDX-License-Identifier: Apache-2.0

//! Pipeline configuration.
//!
//! On the target, the log core is configured through Kconfig, and these settings are fixed at
//! build time.  [`LogConfig`] carries the same settings as plain values, with the same defaults.
//! It can also be read from a generated `.config` file, so a host build can run with the
//! configuration of a given target build.
//!
//! | field                        | Kconfig symbol                            |
//! |------------------------------|-------------------------------------------|
//! | `mode`                       | `CONFIG_LOG_MODE_DEFERRED`, `_IMMEDIATE`  |
//! | `buffer_size`                | `CONFIG_LOG_BUFFER_SIZE`                  |
//! | `overwrite`                  | `CONFIG_LOG_MODE_OVERFLOW`                |
//! | `block_in_thread_timeout`    | `CONFIG_LOG_BLOCK_IN_THREAD_TIMEOUT_MS`   |
//! | `process_trigger_threshold`  | `CONFIG_LOG_PROCESS_TRIGGER_THRESHOLD`    |
//! | `process_thread_sleep`       | `CONFIG_LOG_PROCESS_THREAD_SLEEP_MS`      |
//! | `processing_latency_us`      | `CONFIG_LOG_PROCESSING_LATENCY_US`        |
//! | `failure_report_period`      | `CONFIG_LOG_FAILURE_REPORT_PERIOD`        |
//! | `flush_sleep`                | `CONFIG_LOG_FLUSH_SLEEP_US`               |
//! | `max_level`                  | `CONFIG_LOG_MAX_LEVEL`                    |
//! | `immediate_clean_output`     | `CONFIG_LOG_IMMEDIATE_CLEAN_OUTPUT`       |

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context};
use regex::Regex;

use crate::error::{Error, Result, EINVAL};
use crate::msg::{Level, HDR_SIZE};
use crate::time::{Duration, Forever, NoWait, Timeout};

/// How messages get from producers to backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Producers buffer messages, and a consumer dispatches them later.
    Deferred,
    /// Producers dispatch messages to the backends themselves, at commit.
    Immediate,
}

/// Settings of a log pipeline.
#[derive(Clone, Debug)]
pub struct LogConfig {
    /// Deferred or immediate.
    pub mode: Mode,
    /// Size of the local message arena, in bytes.
    pub buffer_size: usize,
    /// Evict the oldest messages when the arena is full, instead of dropping the new one.
    pub overwrite: bool,
    /// How long a thread may block waiting for arena space.  Interrupt context never blocks.
    pub block_in_thread_timeout: Timeout,
    /// Number of buffered messages that wakes the processing thread at once.  Zero disables the
    /// threshold.
    pub process_trigger_threshold: u32,
    /// Delay before the processing thread is woken for messages below the threshold.
    pub process_thread_sleep: Duration,
    /// How long messages are held back, waiting for older ones from other domains.
    pub processing_latency_us: u32,
    /// Minimum time between two reports of dropped or unordered messages.
    pub failure_report_period: Duration,
    /// How often the processing thread checks backends that were not ready.
    pub backend_poll_period: Duration,
    /// How many times each pending backend is checked for readiness on panic.
    pub panic_activation_attempts: u32,
    /// Sleep between checks while flushing.
    pub flush_sleep: Duration,
    /// Least severe level compiled in.  Backend filters can not go beyond it.
    pub max_level: Level,
    /// In immediate mode, hold the process lock while dispatching so output of concurrent messages
    /// does not interleave.
    pub immediate_clean_output: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            mode: Mode::Deferred,
            buffer_size: 1024,
            overwrite: true,
            block_in_thread_timeout: NoWait.into(),
            process_trigger_threshold: 10,
            process_thread_sleep: Duration::millis(1000),
            processing_latency_us: 0,
            failure_report_period: Duration::millis(1000),
            backend_poll_period: Duration::millis(50),
            panic_activation_attempts: 10,
            flush_sleep: Duration::millis(10),
            max_level: Level::Dbg,
            immediate_clean_output: false,
        }
    }
}

/// A value from a `.config` file.  Strings are of no interest here.
enum Value {
    Bool(bool),
    Int(i64),
}

impl LogConfig {
    /// Check that the configuration can be used.
    pub fn validate(&self) -> Result<()> {
        if self.mode == Mode::Deferred && self.buffer_size < HDR_SIZE {
            return Err(Error(EINVAL));
        }
        if self.max_level == Level::None {
            return Err(Error(EINVAL));
        }
        Ok(())
    }

    /// Read the log settings from a `.config` file.
    pub fn from_dotconfig(path: impl AsRef<Path>) -> anyhow::Result<LogConfig> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        LogConfig::from_kconfig_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    /// Read the log settings from the text of a `.config` file.
    ///
    /// Symbols that do not concern logging are ignored, and settings that are not mentioned keep
    /// their defaults.
    pub fn from_kconfig_str(text: &str) -> anyhow::Result<LogConfig> {
        let values = parse_kconfig(text)?;
        let mut config = LogConfig::default();

        let get_bool = |name: &str| match values.get(name) {
            Some(Value::Bool(b)) => Some(*b),
            _ => None,
        };
        let get_int = |name: &str| -> anyhow::Result<Option<i64>> {
            match values.get(name) {
                None => Ok(None),
                Some(Value::Int(v)) => Ok(Some(*v)),
                Some(_) => Err(anyhow!("{} is not a number", name)),
            }
        };

        if get_bool("CONFIG_LOG_MODE_IMMEDIATE") == Some(true) {
            config.mode = Mode::Immediate;
        }
        if get_bool("CONFIG_LOG_MODE_DEFERRED") == Some(true) {
            config.mode = Mode::Deferred;
        }
        if let Some(size) = get_int("CONFIG_LOG_BUFFER_SIZE")? {
            config.buffer_size = usize::try_from(size).context("CONFIG_LOG_BUFFER_SIZE")?;
        }
        if let Some(overwrite) = get_bool("CONFIG_LOG_MODE_OVERFLOW") {
            config.overwrite = overwrite;
        }
        if get_bool("CONFIG_LOG_BLOCK_IN_THREAD") == Some(true) {
            config.block_in_thread_timeout = match get_int("CONFIG_LOG_BLOCK_IN_THREAD_TIMEOUT_MS")? {
                Some(-1) | None => Forever.into(),
                Some(ms) => {
                    let ms = u64::try_from(ms).context("CONFIG_LOG_BLOCK_IN_THREAD_TIMEOUT_MS")?;
                    Duration::millis(ms).into()
                }
            };
        }
        if let Some(t) = get_int("CONFIG_LOG_PROCESS_TRIGGER_THRESHOLD")? {
            config.process_trigger_threshold =
                u32::try_from(t).context("CONFIG_LOG_PROCESS_TRIGGER_THRESHOLD")?;
        }
        if let Some(ms) = get_int("CONFIG_LOG_PROCESS_THREAD_SLEEP_MS")? {
            let ms = u64::try_from(ms).context("CONFIG_LOG_PROCESS_THREAD_SLEEP_MS")?;
            config.process_thread_sleep = Duration::millis(ms);
        }
        if let Some(us) = get_int("CONFIG_LOG_PROCESSING_LATENCY_US")? {
            config.processing_latency_us =
                u32::try_from(us).context("CONFIG_LOG_PROCESSING_LATENCY_US")?;
        }
        if let Some(ms) = get_int("CONFIG_LOG_FAILURE_REPORT_PERIOD")? {
            let ms = u64::try_from(ms).context("CONFIG_LOG_FAILURE_REPORT_PERIOD")?;
            config.failure_report_period = Duration::millis(ms);
        }
        if let Some(us) = get_int("CONFIG_LOG_FLUSH_SLEEP_US")? {
            let us = u64::try_from(us).context("CONFIG_LOG_FLUSH_SLEEP_US")?;
            config.flush_sleep = Duration::micros(us);
        }
        if let Some(level) = get_int("CONFIG_LOG_MAX_LEVEL")? {
            config.max_level = u8::try_from(level)
                .ok()
                .and_then(Level::from_u8)
                .ok_or_else(|| anyhow!("CONFIG_LOG_MAX_LEVEL out of range: {}", level))?;
        }
        if let Some(clean) = get_bool("CONFIG_LOG_IMMEDIATE_CLEAN_OUTPUT") {
            config.immediate_clean_output = clean;
        }
        config
            .validate()
            .map_err(|e| anyhow!("invalid log configuration: {}", e))?;
        Ok(config)
    }
}

fn parse_kconfig(text: &str) -> anyhow::Result<HashMap<String, Value>> {
    let config_y = Regex::new(r"^(CONFIG_.*)=y$")?;
    let config_unset = Regex::new(r"^# (CONFIG_.*) is not set$")?;
    // The assumption is that hex values are unsigned, and decimal are signed.
    let config_hex = Regex::new(r"^(CONFIG_.*)=0x([0-9a-fA-F]+)$")?;
    let config_int = Regex::new(r"^(CONFIG_.*)=(-?[0-9]+)$")?;

    let mut values = HashMap::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim_end();
        if let Some(caps) = config_y.captures(line) {
            values.insert(caps[1].to_owned(), Value::Bool(true));
        } else if let Some(caps) = config_unset.captures(line) {
            values.insert(caps[1].to_owned(), Value::Bool(false));
        } else if let Some(caps) = config_hex.captures(line) {
            let v = i64::from_str_radix(&caps[2], 16)
                .with_context(|| format!("line {}: bad hex value", lineno + 1))?;
            values.insert(caps[1].to_owned(), Value::Int(v));
        } else if let Some(caps) = config_int.captures(line) {
            let v = caps[2]
                .parse()
                .with_context(|| format!("line {}: bad number", lineno + 1))?;
            values.insert(caps[1].to_owned(), Value::Int(v));
        }
    }
    Ok(values)
}
