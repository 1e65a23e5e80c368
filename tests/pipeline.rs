// Copyright (c) 2024 Linaro LTD
// SPDX-License-Identifier: Apache-2.0

mod common;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{mpsc, Arc, Mutex, OnceLock, Weak};

use rand::Rng;
use rand_pcg::Pcg32;
use zephyr_log::error::EINVAL;
use zephyr_log::msg::{encoded_len, LogMsg, MsgContent, MsgDesc, SOURCE_NONE};
use zephyr_log::time::{Duration, Forever, NoWait};
use zephyr_log::{
    Backend, BackendDesc, BackendEvent, BackendId, BackendStatus, DispatchCtx, Error, Isr, Level,
    LogConfig, LogPipeline, Mode, Thread, TriggerState,
};

use common::{content, ManualClock, RecordingBackend};

fn build(
    config: LogConfig,
    backends: &[(&Arc<RecordingBackend>, bool)],
) -> (Arc<LogPipeline>, Vec<BackendId>) {
    let mut builder = LogPipeline::builder(config);
    let ids = backends
        .iter()
        .enumerate()
        .map(|(i, (b, autostart))| {
            let backend: Arc<RecordingBackend> = Arc::clone(b);
            builder.register_backend(
                BackendDesc::new(format!("rec{}", i), backend).autostart(*autostart),
            )
        })
        .collect();
    (builder.build().unwrap(), ids)
}

#[test]
fn buffered_until_backend_attaches() {
    let backend = RecordingBackend::new();
    let (pipeline, ids) = build(LogConfig::default(), &[(&backend, false)]);
    let producer = pipeline.producer::<Thread>(0);

    for i in 0..5 {
        producer.inf(format_args!("{}", i));
    }
    assert_eq!(pipeline.dropped_cnt(), 0);
    assert_eq!(pipeline.buffered_cnt(), 5);

    // Nothing is claimed while no backend can take it.
    assert!(!pipeline.process());
    pipeline.flush();
    assert_eq!(pipeline.buffered_cnt(), 5);
    assert_eq!(backend.count(), 0);

    pipeline.backend_enable(ids[0], Level::Dbg).unwrap();
    pipeline.flush();
    assert_eq!(backend.packages(), ["0", "1", "2", "3", "4"]);
    assert_eq!(pipeline.buffered_cnt(), 0);
    assert_eq!(backend.inits(), 1);
}

#[test]
fn full_arena_drops_without_waiting() {
    let config = LogConfig {
        buffer_size: encoded_len(1, 0),
        overwrite: false,
        ..LogConfig::default()
    };
    let backend = RecordingBackend::new();
    let (pipeline, _) = build(config, &[(&backend, true)]);
    assert_eq!(pipeline.init(), 0);

    pipeline.producer::<Thread>(0).inf(format_args!("A"));
    assert_eq!(pipeline.buffered_cnt(), 1);

    std::thread::scope(|s| {
        s.spawn(|| pipeline.producer::<Thread>(0).inf(format_args!("B")))
            .join()
            .unwrap();
    });
    assert_eq!(pipeline.dropped_cnt(), 1);
    assert_eq!(pipeline.buffered_cnt(), 1);

    assert!(pipeline.process_one());
    std::thread::scope(|s| {
        s.spawn(|| pipeline.producer::<Thread>(0).inf(format_args!("B")))
            .join()
            .unwrap();
    });
    assert_eq!(pipeline.dropped_cnt(), 1);
    assert_eq!(pipeline.buffered_cnt(), 1);

    assert!(pipeline.process_one());
    assert_eq!(backend.packages(), ["A", "B"]);
}

#[test]
fn runtime_filter_per_source() {
    let backend = RecordingBackend::new();
    let (pipeline, ids) = build(LogConfig::default(), &[(&backend, true)]);
    pipeline.init();

    assert_eq!(pipeline.filter_set(Some(ids[0]), 0, 7, Level::Wrn), Ok(Level::Wrn));
    assert_eq!(pipeline.filter_get(ids[0], 0, 7), Ok(Level::Wrn));
    assert_eq!(pipeline.filter_get(ids[0], 0, 8), Ok(Level::Dbg));

    pipeline.post::<Thread>(content(7, Level::Dbg, "debug"));
    pipeline.post::<Thread>(content(7, Level::Err, "error"));
    pipeline.flush();

    assert_eq!(backend.packages(), ["error"]);
    assert_eq!(pipeline.buffered_cnt(), 0);
    assert_eq!(pipeline.mem_get_usage().unwrap().1, 0);
}

#[test]
fn level_none_is_never_filtered() {
    let backend = RecordingBackend::new();
    let (pipeline, ids) = build(LogConfig::default(), &[(&backend, true)]);
    pipeline.init();
    pipeline.backend_enable(ids[0], Level::Err).unwrap();
    pipeline.filter_set(Some(ids[0]), 0, 3, Level::None).unwrap();

    let mut rng = Pcg32::new(7, 3);
    for _ in 0..200 {
        let source = rng.gen_range(-1..10);
        let desc = MsgDesc::log(0, source, Level::None);
        let msg = LogMsg::new(MsgContent::new(desc, "admin"), 0);
        assert!(pipeline.filter_check(ids[0], &msg));
    }

    let raw = LogMsg::new(MsgContent::new(MsgDesc::raw(), "raw"), 0);
    assert!(pipeline.filter_check(ids[0], &raw));
    let unsourced = LogMsg::new(content(SOURCE_NONE, Level::Dbg, "x"), 0);
    assert!(pipeline.filter_check(ids[0], &unsourced));
    let debug = LogMsg::new(content(3, Level::Dbg, "x"), 0);
    assert!(!pipeline.filter_check(ids[0], &debug));
    let error = LogMsg::new(content(3, Level::Err, "x"), 0);
    assert!(!pipeline.filter_check(ids[0], &error));
    let other = LogMsg::new(content(4, Level::Err, "x"), 0);
    assert!(pipeline.filter_check(ids[0], &other));
}

#[test]
fn filter_level_is_capped() {
    let backend = RecordingBackend::new();
    let other = RecordingBackend::new();
    let config = LogConfig {
        max_level: Level::Inf,
        ..LogConfig::default()
    };
    let (pipeline, ids) = build(config, &[(&backend, true), (&other, true)]);
    assert_eq!(pipeline.filter_set(None, 0, 1, Level::Dbg), Ok(Level::Inf));
    assert_eq!(pipeline.filter_get(ids[1], 0, 1), Ok(Level::Inf));

    pipeline.init();
    assert_eq!(pipeline.filter_get(ids[0], 0, 5), Ok(Level::Inf));

    // Above the maximum level, messages are not even buffered.
    pipeline.producer::<Thread>(1).dbg(format_args!("dropped at the source"));
    assert_eq!(pipeline.buffered_cnt(), 0);
    assert_eq!(pipeline.dropped_cnt(), 0);
}

#[test]
fn panic_drains_to_every_backend() {
    let first = RecordingBackend::new();
    let second = RecordingBackend::new();
    let (pipeline, _) = build(LogConfig::default(), &[(&first, true), (&second, true)]);
    pipeline.init();

    let isr = pipeline.producer::<Isr>(0);
    for text in ["one", "two", "three"] {
        isr.err(format_args!("{}", text));
    }
    assert_eq!(pipeline.buffered_cnt(), 3);

    pipeline.panic();
    assert!(pipeline.is_panic());
    assert_eq!(pipeline.buffered_cnt(), 0);
    for backend in [&first, &second] {
        assert_eq!(backend.packages(), ["one", "two", "three"]);
        assert_eq!(backend.panics(), 1);
    }

    // A second panic changes nothing.
    pipeline.panic();
    for backend in [&first, &second] {
        assert_eq!(backend.count(), 3);
        assert_eq!(backend.panics(), 1);
    }

    // From now on, commits are processed in place.
    isr.wrn(format_args!("after"));
    assert_eq!(pipeline.buffered_cnt(), 0);
    assert_eq!(first.packages().last().map(String::as_str), Some("after"));
    assert_eq!(second.count(), 4);
}

#[test]
fn panic_activates_pending_backends() {
    let late = RecordingBackend::not_ready();
    let never = RecordingBackend::not_ready();
    let config = LogConfig {
        panic_activation_attempts: 3,
        ..LogConfig::default()
    };
    let (pipeline, ids) = build(config, &[(&late, true), (&never, true)]);
    assert_eq!(pipeline.init(), 2);
    pipeline.producer::<Thread>(0).inf(format_args!("pending"));

    late.set_ready(true);
    pipeline.panic();

    assert_eq!(pipeline.backend_status(ids[0]), Ok(BackendStatus::Active));
    assert_eq!(pipeline.backend_status(ids[1]), Ok(BackendStatus::ReadyPending));
    assert_eq!(pipeline.backend_pending_polls(ids[1]), Ok(4));
    assert_eq!(late.packages(), ["pending"]);
    assert_eq!(never.count(), 0);
    assert_eq!(never.panics(), 0);
}

#[test]
fn trigger_threshold() {
    let config = LogConfig {
        process_trigger_threshold: 4,
        process_thread_sleep: Duration::secs(60),
        ..LogConfig::default()
    };
    let backend = RecordingBackend::new();
    let (pipeline, _) = build(config, &[(&backend, true)]);
    pipeline.thread_set();
    pipeline.init();
    // Attaching the first backend wakes the consumer once.
    assert!(pipeline.wait_for_work(NoWait));

    let producer = pipeline.producer::<Thread>(0);
    for i in 1..=3 {
        producer.inf(format_args!("{}", i));
        assert_eq!(
            pipeline.trigger_state(),
            TriggerState {
                pending_wakes: 0,
                timer_armed: true
            },
            "after commit {}",
            i
        );
    }

    producer.inf(format_args!("4"));
    assert_eq!(
        pipeline.trigger_state(),
        TriggerState {
            pending_wakes: 1,
            timer_armed: false
        }
    );
}

#[test]
fn threshold_of_one_wakes_on_every_commit() {
    let config = LogConfig {
        process_trigger_threshold: 1,
        ..LogConfig::default()
    };
    let backend = RecordingBackend::new();
    let (pipeline, _) = build(config, &[(&backend, true)]);
    pipeline.thread_set();
    pipeline.init();
    pipeline.wait_for_work(NoWait);

    for i in 0..3 {
        pipeline.producer::<Thread>(0).inf(format_args!("{}", i));
        assert!(pipeline.wait_for_work(NoWait));
        assert!(!pipeline.trigger_state().timer_armed);
    }
}

#[test]
fn no_trigger_without_consumer() {
    let backend = RecordingBackend::new();
    let (pipeline, _) = build(LogConfig::default(), &[(&backend, true)]);
    pipeline.init();
    pipeline.wait_for_work(NoWait);

    for i in 0..20 {
        pipeline.producer::<Thread>(0).inf(format_args!("{}", i));
    }
    assert_eq!(
        pipeline.trigger_state(),
        TriggerState {
            pending_wakes: 0,
            timer_armed: false
        }
    );
}

// Every attempt to post ends up either committed or dropped.
#[test]
fn drop_accounting() {
    let config = LogConfig {
        buffer_size: 256,
        overwrite: false,
        ..LogConfig::default()
    };
    let backend = RecordingBackend::new();
    let (pipeline, _) = build(config, &[(&backend, true)]);
    pipeline.init();

    let mut rng = Pcg32::new(3, 9);
    let producer = pipeline.producer::<Isr>(1);
    let mut attempts = 0;
    for _ in 0..5_000 {
        if rng.gen_ratio(2, 3) {
            let len = rng.gen_range(0..48);
            producer.inf(format_args!("{}", "y".repeat(len)));
            attempts += 1;
        } else {
            pipeline.process();
        }
    }
    pipeline.flush();

    let delivered = backend
        .records()
        .iter()
        .filter(|m| m.source() == 1)
        .count() as u32;
    let dropped = backend.dropped_total() + pipeline.dropped_cnt();
    assert!(dropped > 0);
    assert_eq!(delivered + dropped, attempts);
    assert_eq!(pipeline.buffered_cnt(), 0);
    assert_eq!(pipeline.mem_get_usage().unwrap().1, 0);
    assert!(pipeline.mem_get_max_usage().unwrap() <= 256);
}

#[test]
fn overwrite_reports_drops_once_per_period() {
    let len = encoded_len(1, 0);
    let config = LogConfig {
        buffer_size: len * 2,
        overwrite: true,
        failure_report_period: Duration::secs(60),
        ..LogConfig::default()
    };
    let backend = RecordingBackend::new();
    let (pipeline, _) = build(config, &[(&backend, true)]);
    pipeline.init();

    let producer = pipeline.producer::<Thread>(0);
    for text in ["a", "b", "c", "d", "e"] {
        producer.inf(format_args!("{}", text));
    }
    assert_eq!(pipeline.dropped_cnt(), 3);
    assert_eq!(pipeline.buffered_cnt(), 2);

    assert!(pipeline.process());
    assert_eq!(backend.dropped_total(), 3);
    assert_eq!(pipeline.dropped_cnt(), 0);
    pipeline.flush();
    assert_eq!(backend.packages(), ["d", "e"]);

    // More drops within the period are counted, but not reported yet.
    for text in ["f", "g", "h"] {
        producer.inf(format_args!("{}", text));
    }
    pipeline.flush();
    assert_eq!(pipeline.dropped_cnt(), 1);
    assert_eq!(backend.dropped_total(), 3);
}

#[test]
fn oversized_content_is_dropped() {
    let backend = RecordingBackend::new();
    let (pipeline, _) = build(LogConfig::default(), &[(&backend, true)]);
    pipeline.init();

    let slot = pipeline.msg_alloc::<Thread>(encoded_len(1, 0)).unwrap();
    assert!(slot.is_buffered());
    pipeline.msg_commit(slot, content(0, Level::Inf, "far too long for the slot"));
    assert_eq!(pipeline.dropped_cnt(), 1);
    assert_eq!(pipeline.buffered_cnt(), 0);
    assert_eq!(pipeline.mem_get_usage().unwrap().1, 0);
}

#[test]
fn immediate_mode_dispatches_at_commit() {
    let config = LogConfig {
        mode: Mode::Immediate,
        immediate_clean_output: true,
        ..LogConfig::default()
    };
    let backend = RecordingBackend::new();
    let (pipeline, _) = build(config, &[(&backend, true)]);
    pipeline.init();

    let slot = pipeline.msg_alloc::<Isr>(64).unwrap();
    assert!(!slot.is_buffered());
    pipeline.msg_commit(slot, content(0, Level::Inf, "now"));
    assert_eq!(backend.packages(), ["now"]);
    assert_eq!(pipeline.buffered_cnt(), 0);
    assert!(!pipeline.msg_pending());
    assert_eq!(pipeline.mem_get_usage(), Err(Error(EINVAL)));
    assert_eq!(pipeline.mem_get_max_usage(), Err(Error(EINVAL)));
}

#[test]
fn timestamps_come_from_the_configured_source() {
    let backend = RecordingBackend::new();
    let (pipeline, _) = build(LogConfig::default(), &[(&backend, true)]);
    pipeline.init();

    assert_eq!(pipeline.set_timestamp_func(|| 5, 0), Err(Error(EINVAL)));
    assert_eq!(pipeline.timestamp_freq(), zephyr_log::time::SYS_FREQUENCY);

    let clock = ManualClock::new(1234);
    pipeline.producer::<Thread>(0).inf(format_args!("old regime"));
    pipeline.set_timestamp_func(clock.getter(), 32768).unwrap();
    assert_eq!(pipeline.timestamp_freq(), 32768);
    assert!(backend.events().contains(&BackendEvent::TimestampFreq(32768)));

    pipeline.producer::<Thread>(0).inf(format_args!("new regime"));
    clock.set(2000);
    pipeline.producer::<Thread>(0).inf(format_args!("later"));
    pipeline.flush();

    let stamps = backend.timestamps();
    assert_eq!(stamps.len(), 3);
    assert_eq!(&stamps[1..], [1234, 2000]);
}

#[test]
fn disabled_backend_receives_nothing() {
    let kept = RecordingBackend::new();
    let gone = RecordingBackend::new();
    let (pipeline, ids) = build(LogConfig::default(), &[(&kept, true), (&gone, true)]);
    pipeline.init();
    assert!(pipeline.backend_is_active(ids[1]));

    pipeline.backend_disable(ids[1]).unwrap();
    assert_eq!(pipeline.backend_status(ids[1]), Ok(BackendStatus::Disabled));
    pipeline.producer::<Thread>(0).inf(format_args!("x"));
    pipeline.flush();
    assert_eq!(kept.count(), 1);
    assert_eq!(gone.count(), 0);

    // Not retried like a pending backend.
    assert_eq!(pipeline.init(), 0);
    assert!(!pipeline.backend_is_active(ids[1]));
    assert_eq!(pipeline.backend_id("rec1"), Some(ids[1]));
    assert_eq!(pipeline.backend_count(), 2);
}

#[test]
fn never_ready_backend_stays_pending() {
    let stuck = RecordingBackend::not_ready();
    let (pipeline, ids) = build(LogConfig::default(), &[(&stuck, true)]);
    assert_eq!(pipeline.backend_status(ids[0]), Ok(BackendStatus::Uninitialized));

    for polls in 1..=5 {
        assert_eq!(pipeline.init(), 1);
        assert_eq!(pipeline.backend_pending_polls(ids[0]), Ok(polls));
    }
    assert_eq!(pipeline.backend_status(ids[0]), Ok(BackendStatus::ReadyPending));
    assert_eq!(stuck.inits(), 1);

    pipeline.producer::<Thread>(0).inf(format_args!("waiting"));
    pipeline.flush();
    assert_eq!(pipeline.buffered_cnt(), 1);

    stuck.set_ready(true);
    assert_eq!(pipeline.init(), 0);
    pipeline.flush();
    assert_eq!(stuck.packages(), ["waiting"]);
}

#[test]
fn raw_and_hexdump_messages() {
    let backend = RecordingBackend::new();
    let (pipeline, ids) = build(LogConfig::default(), &[(&backend, true)]);
    pipeline.init();
    pipeline.backend_enable(ids[0], Level::Err).unwrap();

    let producer = pipeline.producer::<Thread>(0);
    producer.printk(format_args!("raw {}", 1));
    producer.hexdump(Level::Err, &[1, 2, 3], format_args!("dump"));
    producer.hexdump(Level::Dbg, &[4], format_args!("filtered"));
    zephyr_log::printkln!(pipeline, "line {}", 2);
    pipeline.flush();

    let records = backend.records();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].package(), "raw 1");
    assert_eq!(records[1].data(), [1, 2, 3]);
    assert_eq!(records[2].package(), "line 2\n");
}

#[test]
fn log_msg_macro_skips_disabled_levels() {
    let config = LogConfig {
        max_level: Level::Wrn,
        ..LogConfig::default()
    };
    let backend = RecordingBackend::new();
    let (pipeline, _) = build(config, &[(&backend, true)]);
    pipeline.init();

    let producer = pipeline.producer::<Thread>(0);
    assert!(!producer.enabled(Level::Inf));
    zephyr_log::log_msg!(producer, Level::Inf, "skipped {}", 1);
    zephyr_log::log_msg!(producer, Level::Wrn, "kept {}", 2);
    pipeline.flush();
    assert_eq!(backend.packages(), ["kept 2"]);
}

#[test]
fn flush_without_backend_returns() {
    let backend = RecordingBackend::new();
    let (pipeline, _) = build(LogConfig::default(), &[(&backend, false)]);
    pipeline.producer::<Thread>(0).inf(format_args!("kept"));
    pipeline.flush();
    assert!(pipeline.msg_pending());
    assert_eq!(pipeline.buffered_cnt(), 1);
}

/// A backend that logs "echo" itself when it is given "ping".
struct EchoBackend {
    pipeline: OnceLock<Weak<LogPipeline>>,
    packages: Mutex<Vec<String>>,
}

impl EchoBackend {
    fn attach(config: LogConfig) -> (Arc<LogPipeline>, Arc<EchoBackend>) {
        let backend = Arc::new(EchoBackend {
            pipeline: OnceLock::new(),
            packages: Mutex::new(Vec::new()),
        });
        let mut builder = LogPipeline::builder(config);
        builder.register_backend(BackendDesc::new("echo", backend.clone()));
        let pipeline = builder.build().unwrap();
        backend.pipeline.set(Arc::downgrade(&pipeline)).unwrap();
        assert_eq!(pipeline.init(), 0);
        (pipeline, backend)
    }

    fn packages(&self) -> Vec<String> {
        self.packages.lock().unwrap().clone()
    }
}

impl Backend for EchoBackend {
    fn process(&self, msg: &LogMsg, _ctx: &DispatchCtx<'_>) {
        self.packages.lock().unwrap().push(msg.package().to_owned());
        if msg.package() != "ping" {
            return;
        }
        if let Some(pipeline) = self.pipeline.get().and_then(Weak::upgrade) {
            pipeline.producer::<Thread>(0).inf(format_args!("echo"));
        }
    }

    fn panic(&self) {}
}

#[test]
fn backend_logging_into_a_full_arena_does_not_wait() {
    let config = LogConfig {
        buffer_size: encoded_len(4, 0),
        overwrite: false,
        block_in_thread_timeout: Forever.into(),
        ..LogConfig::default()
    };
    let (pipeline, backend) = EchoBackend::attach(config);
    pipeline.producer::<Thread>(0).inf(format_args!("ping"));

    // "ping" holds the only slot while it is dispatched, so "echo" has nowhere to go.
    let (tx, rx) = mpsc::channel();
    let worker = Arc::clone(&pipeline);
    std::thread::spawn(move || {
        let processed = worker.process_one();
        let _ = tx.send(processed);
    });
    assert_eq!(rx.recv_timeout(std::time::Duration::from_secs(3)), Ok(true));

    assert_eq!(backend.packages(), ["ping"]);
    assert_eq!(pipeline.dropped_cnt(), 1);
    assert_eq!(pipeline.buffered_cnt(), 0);
}

#[test]
fn backend_logging_in_panic_mode() {
    let (pipeline, backend) = EchoBackend::attach(LogConfig::default());
    pipeline.panic();

    pipeline.producer::<Isr>(0).err(format_args!("ping"));
    assert_eq!(backend.packages(), ["ping", "echo"]);
    assert_eq!(pipeline.buffered_cnt(), 0);
    assert!(!pipeline.msg_pending());
}

#[test]
fn panic_mode_commits_from_many_threads() {
    let config = LogConfig {
        buffer_size: 64 * 1024,
        overwrite: false,
        ..LogConfig::default()
    };
    let backend = RecordingBackend::new();
    let (pipeline, _) = build(config, &[(&backend, true)]);
    pipeline.init();
    pipeline.panic();

    std::thread::scope(|s| {
        for t in 0..4 {
            let pipeline = &pipeline;
            s.spawn(move || {
                let isr = pipeline.producer::<Isr>(t);
                for i in 0..500 {
                    isr.inf(format_args!("{}", i));
                }
            });
        }
    });

    // Every commit is either processed before its poster returns, or picked up by the thread
    // that was draining at the time.
    assert_eq!(pipeline.buffered_cnt(), 0);
    assert!(!pipeline.msg_pending());
    assert_eq!(backend.count() as u32 + pipeline.dropped_cnt(), 2000);
}

/// A backend that counts calls made while another call was still running.
#[derive(Default)]
struct ExclusiveBackend {
    busy: AtomicBool,
    overlaps: AtomicU32,
    calls: AtomicU32,
}

impl Backend for ExclusiveBackend {
    fn process(&self, _msg: &LogMsg, _ctx: &DispatchCtx<'_>) {
        if self.busy.swap(true, Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        for _ in 0..200 {
            core::hint::spin_loop();
        }
        self.busy.store(false, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn panic(&self) {}
}

#[test]
fn immediate_dispatch_is_serialized_in_panic_mode() {
    let config = LogConfig {
        mode: Mode::Immediate,
        immediate_clean_output: false,
        ..LogConfig::default()
    };
    let backend = Arc::new(ExclusiveBackend::default());
    let mut builder = LogPipeline::builder(config);
    builder.register_backend(BackendDesc::new("exclusive", backend.clone()));
    let pipeline = builder.build().unwrap();
    pipeline.init();
    pipeline.panic();

    std::thread::scope(|s| {
        for t in 0..4 {
            let pipeline = &pipeline;
            s.spawn(move || {
                for i in 0..200 {
                    pipeline.producer::<Isr>(t).err(format_args!("{}", i));
                }
            });
        }
    });

    assert_eq!(backend.calls.load(Ordering::SeqCst), 800);
    assert_eq!(backend.overlaps.load(Ordering::SeqCst), 0);
}
