//! End-to-end scheduler behavior: ordering, lifecycle, variants.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tickstream::{
    CancelSource, CancelToken, ErrorKind, Flow, Runtime, SchedulerConfig, StreamState,
};

mod common;

fn runtime() -> Runtime {
    common::init_tracing();
    Runtime::with_config(SchedulerConfig::new().with_worker_threads(2))
}

fn order_log() -> (Arc<Mutex<Vec<u32>>>, impl Fn(u32) -> Box<dyn Fn() + Send + Sync>) {
    let log: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
    let writer = {
        let log = Arc::clone(&log);
        move |tag: u32| -> Box<dyn Fn() + Send + Sync> {
            let log = Arc::clone(&log);
            Box::new(move || log.lock().unwrap().push(tag))
        }
    };
    (log, writer)
}

#[test]
fn distinct_priorities_run_in_ascending_order_every_tick() {
    let rt = runtime();
    let stream = rt.stream("priorities");
    let (log, tag) = order_log();

    for (priority, label) in [(30, 30), (10, 10), (20, 20)] {
        let write = tag(label);
        stream
            .add(
                move |_dt, _cx| {
                    write();
                    Flow::next()
                },
                CancelToken::none(),
                priority,
            )
            .unwrap();
    }

    stream.tick(0.1).unwrap();
    stream.tick(0.1).unwrap();
    assert_eq!(log.lock().unwrap().as_slice(), &[10, 20, 30, 10, 20, 30]);
}

#[test]
fn equal_priorities_preserve_insertion_order_across_ticks() {
    let rt = runtime();
    let stream = rt.stream("fifo");
    let (log, tag) = order_log();

    for label in [1, 2, 3, 4] {
        let write = tag(label);
        stream
            .add(
                move |_dt, _cx| {
                    write();
                    Flow::next()
                },
                CancelToken::none(),
                5,
            )
            .unwrap();
    }

    stream.tick(0.1).unwrap();
    stream.tick(0.1).unwrap();
    assert_eq!(log.lock().unwrap().as_slice(), &[1, 2, 3, 4, 1, 2, 3, 4]);
}

#[test]
fn priority_change_reorders_from_the_next_tick() {
    let rt = runtime();
    let stream = rt.stream("reorder");
    let (log, tag) = order_log();

    let first = tag(1);
    let handle = stream
        .add(
            move |_dt, _cx| {
                first();
                Flow::next()
            },
            CancelToken::none(),
            1,
        )
        .unwrap();
    let second = tag(2);
    stream
        .add(
            move |_dt, _cx| {
                second();
                Flow::next()
            },
            CancelToken::none(),
            2,
        )
        .unwrap();

    stream.tick(0.1).unwrap();
    handle.set_priority(9);
    stream.tick(0.1).unwrap();
    assert_eq!(log.lock().unwrap().as_slice(), &[1, 2, 2, 1]);
}

#[test]
fn three_once_actions_run_by_priority_then_stream_is_idle() {
    let rt = runtime();
    let stream = rt.stream("once-trio");
    let (log, tag) = order_log();

    for (priority, label) in [(3, 3), (1, 1), (2, 2)] {
        let write = tag(label);
        stream
            .add_once(move || write(), CancelToken::none(), priority)
            .unwrap();
    }

    stream.tick(0.1).unwrap();
    assert_eq!(log.lock().unwrap().as_slice(), &[1, 2, 3]);
    assert_eq!(stream.state(), StreamState::Idle);

    // Each fired exactly once: a second tick adds nothing.
    stream.tick(0.1).unwrap();
    assert_eq!(log.lock().unwrap().as_slice(), &[1, 2, 3]);
}

#[test]
fn action_added_during_tick_is_not_visited_until_next_tick() {
    let rt = runtime();
    let stream = rt.stream("same-tick");
    let late_fired = Arc::new(AtomicUsize::new(0));

    let adder_stream = stream.clone();
    let late = Arc::clone(&late_fired);
    stream
        .add_once(
            move || {
                let late = Arc::clone(&late);
                // Added mid-tick; must not run until the next tick even
                // though the tick is still iterating.
                adder_stream
                    .add_once(
                        move || {
                            late.fetch_add(1, Ordering::SeqCst);
                        },
                        CancelToken::none(),
                        0,
                    )
                    .unwrap();
            },
            CancelToken::none(),
            0,
        )
        .unwrap();

    stream.tick(0.1).unwrap();
    assert_eq!(late_fired.load(Ordering::SeqCst), 0);
    stream.tick(0.1).unwrap();
    assert_eq!(late_fired.load(Ordering::SeqCst), 1);
}

#[test]
fn temporal_action_consumes_its_duration_then_retires() {
    let rt = runtime();
    let stream = rt.stream("temporal");
    let fires = Arc::new(AtomicUsize::new(0));
    let completions = Arc::new(AtomicUsize::new(0));

    let f = Arc::clone(&fires);
    let handle = stream
        .add_temporary(
            0.5,
            move |_dt, _cx| {
                f.fetch_add(1, Ordering::SeqCst);
                Flow::next()
            },
            CancelToken::none(),
            0,
        )
        .unwrap();
    let done = Arc::clone(&completions);
    handle.on_dispose(move || {
        done.fetch_add(1, Ordering::SeqCst);
    });

    // Fires on every tick until cumulative elapsed time reaches 0.5.
    for _ in 0..5 {
        stream.tick(0.1).unwrap();
    }
    assert_eq!(fires.load(Ordering::SeqCst), 5);
    assert_eq!(completions.load(Ordering::SeqCst), 1);

    // Removed: further ticks never fire it again.
    stream.tick(0.1).unwrap();
    assert_eq!(fires.load(Ordering::SeqCst), 5);
    assert_eq!(completions.load(Ordering::SeqCst), 1);
}

#[test]
fn conditional_expires_on_first_false_predicate() {
    let rt = runtime();
    let stream = rt.stream("conditional");
    let alive = Arc::new(AtomicBool::new(true));
    let fires = Arc::new(AtomicUsize::new(0));

    let gate = Arc::clone(&alive);
    let f = Arc::clone(&fires);
    let handle = stream
        .add_conditional(
            move || gate.load(Ordering::SeqCst),
            move |_dt, _cx| {
                f.fetch_add(1, Ordering::SeqCst);
                Flow::next()
            },
            CancelToken::none(),
            0,
        )
        .unwrap();

    stream.tick(0.1).unwrap();
    stream.tick(0.1).unwrap();
    assert_eq!(fires.load(Ordering::SeqCst), 2);
    assert!(!handle.is_retired());

    alive.store(false, Ordering::SeqCst);
    stream.tick(0.1).unwrap();
    assert!(handle.is_retired());
    assert_eq!(fires.load(Ordering::SeqCst), 2);

    // One-shot expiry, not skip-and-retry: flipping the flag back does
    // nothing.
    alive.store(true, Ordering::SeqCst);
    stream.tick(0.1).unwrap();
    assert_eq!(fires.load(Ordering::SeqCst), 2);
}

#[test]
fn reentrant_tick_raises_and_leaves_the_stream_disposed() {
    let rt = runtime();
    let stream = rt.stream("reentrant");
    let observed = Arc::new(Mutex::new(None));

    let target = stream.clone();
    let seen = Arc::clone(&observed);
    stream
        .add(
            move |_dt, _cx| {
                *seen.lock().unwrap() = Some(target.tick(0.1).unwrap_err().kind());
                Flow::next()
            },
            CancelToken::none(),
            0,
        )
        .unwrap();

    stream.tick(0.1).unwrap();
    assert_eq!(
        observed.lock().unwrap().take(),
        Some(ErrorKind::ReentrantTick)
    );
    assert_eq!(stream.state(), StreamState::Disposed);
    assert!(stream.tick(0.1).is_err());
}

#[test]
fn token_release_stops_every_bound_action() {
    let rt = runtime();
    let stream = rt.stream("token");
    let source = CancelSource::new();
    let fires = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
        let f = Arc::clone(&fires);
        stream
            .add(
                move |_dt, _cx| {
                    f.fetch_add(1, Ordering::SeqCst);
                    Flow::next()
                },
                source.token(),
                0,
            )
            .unwrap();
    }

    stream.tick(0.1).unwrap();
    assert_eq!(fires.load(Ordering::SeqCst), 3);

    source.release();
    stream.tick(0.1).unwrap();
    stream.tick(0.1).unwrap();
    // No new invocation observed after release.
    assert_eq!(fires.load(Ordering::SeqCst), 3);
}

#[test]
fn fixed_delta_override_drains_accumulated_time() {
    let rt = runtime();
    let stream = rt.stream("fixed-delta");
    let deltas = Arc::new(Mutex::new(Vec::new()));

    let log = Arc::clone(&deltas);
    let handle = stream
        .add(
            move |dt, _cx| {
                log.lock().unwrap().push(dt);
                Flow::next()
            },
            CancelToken::none(),
            0,
        )
        .unwrap();
    handle.set_delta(0.1).unwrap();

    stream.tick(0.05).unwrap(); // accumulated 0.05: no fire
    stream.tick(0.28).unwrap(); // accumulated 0.33: three fires
    let log = deltas.lock().unwrap();
    assert_eq!(log.len(), 3);
    assert!(log.iter().all(|dt| (*dt - 0.1).abs() < 1e-9));
}

#[test]
fn coroutine_completes_when_steps_are_exhausted() {
    let rt = runtime();
    let stream = rt.stream("coroutine");
    let steps = Arc::new(AtomicUsize::new(0));

    let s = Arc::clone(&steps);
    let handle = stream
        .add_coroutine(
            move |_dt| {
                let n = s.fetch_add(1, Ordering::SeqCst) + 1;
                if n >= 3 {
                    tickstream::CoroStep::Complete
                } else {
                    tickstream::CoroStep::Yield
                }
            },
            CancelToken::none(),
            0,
        )
        .unwrap();

    for _ in 0..5 {
        stream.tick(0.1).unwrap();
    }
    assert_eq!(steps.load(Ordering::SeqCst), 3);
    assert!(handle.is_retired());
}

#[test]
fn sleeping_action_skips_ticks_until_the_countdown_ends() {
    let rt = runtime();
    let stream = rt.stream("sleepy");
    let fires = Arc::new(AtomicUsize::new(0));

    let f = Arc::clone(&fires);
    stream
        .add(
            move |_dt, cx| {
                f.fetch_add(1, Ordering::SeqCst);
                cx.sleep(0.3)
            },
            CancelToken::none(),
            0,
        )
        .unwrap();

    stream.tick(0.1).unwrap(); // fires, then sleeps 0.3
    stream.tick(0.1).unwrap(); // sleeping (0.1 elapsed)
    stream.tick(0.1).unwrap(); // sleeping (0.2 elapsed)
    stream.tick(0.1).unwrap(); // 0.3 elapsed: fires again, sleeps again
    assert_eq!(fires.load(Ordering::SeqCst), 2);
}
