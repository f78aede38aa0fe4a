//! Integration tests for tick pacing and the processing loop.
//!
//! Time is paused, so sleeps resolve as soon as the runtime is idle and
//! every measured span is exact.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use devlink_dispatch::{Dispatcher, InboundQueue, TickConfig, TickMetrics, TickScheduler};
use devlink_protocol::TextNote;

// =========================================================================
// Helpers
// =========================================================================

fn scheduler_10hz() -> TickScheduler {
    TickScheduler::with_rate(10)
}

fn recording_dispatcher() -> (Dispatcher, Arc<Mutex<Vec<String>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut dispatcher = Dispatcher::new(InboundQueue::new());
    let sink = Arc::clone(&seen);
    dispatcher.on(move |note: TextNote| {
        sink.lock().unwrap().push(note.text);
        Ok(())
    });
    (dispatcher, seen)
}

// =========================================================================
// TickConfig
// =========================================================================

#[test]
fn test_default_config() {
    let cfg = TickConfig::default();
    assert_eq!(cfg.tick_rate_hz, 60);
    assert!((cfg.budget_warn_threshold - 0.80).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_rate_is_clamped() {
    assert_eq!(TickConfig::with_rate(0).validated().tick_rate_hz, 1);
    assert_eq!(
        TickConfig::with_rate(10_000).validated().tick_rate_hz,
        TickConfig::MAX_TICK_RATE_HZ
    );
    assert_eq!(TickConfig::with_rate(30).validated().tick_rate_hz, 30);

    assert_eq!(TickScheduler::with_rate(0).tick_rate_hz(), 1);
    assert_eq!(TickScheduler::with_rate(0).tick_duration(), Duration::from_secs(1));
}

#[test]
fn test_budget_threshold_is_clamped() {
    let clamp = |threshold: f64| {
        TickConfig {
            budget_warn_threshold: threshold,
            ..TickConfig::default()
        }
        .validated()
        .budget_warn_threshold
    };
    assert_eq!(clamp(2.5), 1.0);
    assert_eq!(clamp(-0.5), 0.0);
    assert_eq!(clamp(f64::NAN), 1.0);
    assert_eq!(clamp(0.5), 0.5);
}

#[test]
fn test_tick_duration() {
    assert_eq!(TickConfig::with_rate(10).tick_duration(), Duration::from_millis(100));
    assert_eq!(TickConfig::with_rate(20).tick_duration(), Duration::from_millis(50));
}

// =========================================================================
// TickScheduler
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_on_time_ticks_count_up() {
    let mut scheduler = scheduler_10hz();
    for expected in 1..=3 {
        let info = scheduler.wait_for_tick().await;
        assert_eq!(info.tick, expected);
        assert!(!info.overrun);
        assert_eq!(info.ticks_skipped, 0);
        scheduler.record_tick_end();
    }
    assert_eq!(scheduler.tick_count(), 3);
    assert_eq!(scheduler.metrics().total_ticks, 3);
    assert_eq!(scheduler.metrics().total_overruns, 0);
}

#[tokio::test(start_paused = true)]
async fn test_first_tick_waits_one_period() {
    let mut scheduler = scheduler_10hz();
    let start = tokio::time::Instant::now();
    scheduler.wait_for_tick().await;
    let waited = start.elapsed();
    assert!(waited >= Duration::from_millis(100), "waited {waited:?}");
    assert!(waited < Duration::from_millis(102), "waited {waited:?}");
}

#[tokio::test(start_paused = true)]
async fn test_late_tick_skips_missed_periods() {
    let mut scheduler = scheduler_10hz();

    // The first deadline is at 100ms; arriving at 350ms misses two more.
    tokio::time::sleep(Duration::from_millis(350)).await;
    let info = scheduler.wait_for_tick().await;
    assert_eq!(info.tick, 1);
    assert!(info.overrun);
    assert_eq!(info.ticks_skipped, 2);

    // The schedule resumes on the next period boundary without a burst.
    let start = tokio::time::Instant::now();
    let info = scheduler.wait_for_tick().await;
    assert_eq!(info.tick, 2);
    assert!(!info.overrun);
    assert!(start.elapsed() > Duration::ZERO);

    let metrics = scheduler.metrics();
    assert_eq!(metrics.total_ticks, 2);
    assert_eq!(metrics.total_overruns, 1);
    assert_eq!(metrics.total_skipped, 2);
}

#[tokio::test(start_paused = true)]
async fn test_record_tick_end_without_tick_is_noop() {
    let mut scheduler = scheduler_10hz();
    scheduler.record_tick_end();
    assert_eq!(*scheduler.metrics(), TickMetrics::default());

    scheduler.wait_for_tick().await;
    scheduler.record_tick_end();
    let after_first = scheduler.metrics().clone();
    scheduler.record_tick_end();
    assert_eq!(*scheduler.metrics(), after_first);
}

#[tokio::test(start_paused = true)]
async fn test_tick_time_is_measured() {
    let mut scheduler = scheduler_10hz();

    scheduler.wait_for_tick().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    scheduler.record_tick_end();
    let longest = scheduler.metrics().max_tick_time;
    assert!(longest >= Duration::from_millis(50), "measured {longest:?}");
    assert!(longest < Duration::from_millis(52), "measured {longest:?}");
    assert!((scheduler.metrics().budget_utilization - 0.5).abs() < 0.02);

    scheduler.wait_for_tick().await;
    scheduler.record_tick_end();
    assert_eq!(scheduler.metrics().max_tick_time, longest);
    assert_eq!(scheduler.metrics().budget_utilization, 0.0);
}

// =========================================================================
// Dispatcher::run
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_run_drains_on_ticks_until_shutdown() {
    let (mut dispatcher, seen) = recording_dispatcher();
    let queue = dispatcher.queue().clone();
    queue.enqueue(TextNote { text: "first".into() }.into());

    let mut scheduler = scheduler_10hz();
    dispatcher
        .run(&mut scheduler, tokio::time::sleep(Duration::from_millis(350)))
        .await;

    assert_eq!(scheduler.tick_count(), 3);
    assert_eq!(*seen.lock().unwrap(), vec!["first"]);

    // Nothing drains once the loop has stopped.
    queue.enqueue(TextNote { text: "late".into() }.into());
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(*seen.lock().unwrap(), vec!["first"]);
    assert_eq!(queue.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_run_stops_before_first_tick_on_ready_shutdown() {
    let (mut dispatcher, seen) = recording_dispatcher();
    dispatcher
        .queue()
        .enqueue(TextNote { text: "never".into() }.into());

    let mut scheduler = scheduler_10hz();
    dispatcher.run(&mut scheduler, std::future::ready(())).await;

    assert_eq!(scheduler.tick_count(), 0);
    assert!(seen.lock().unwrap().is_empty());
}
