use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::sample::{CpuUsage, LoadAverage, Sample};

const WARMUP: Duration = Duration::from_secs(5);
const INTERVAL: Duration = Duration::from_secs(2);

fn load_sample(one: f64, five: f64, fifteen: f64) -> Sample {
    Sample::new(SystemTime::now()).with_load_average(LoadAverage::new(one, five, fifteen))
}

fn assert_close(actual: f64, expected: f64) {
    assert!((actual - expected).abs() < 1e-4, "expected {expected}, got {actual}");
}

#[test]
fn test_single_sample_is_returned_unchanged() {
    let aggregator = Aggregator::new(WARMUP, INTERVAL);
    aggregator.push(&load_sample(1.5, 2.0, 3.0));

    let snapshot = aggregator.close_window().unwrap();
    assert_eq!(snapshot.samples, 1);
    assert_eq!(snapshot.metrics.load_average, Some(LoadAverage::new(1.5, 2.0, 3.0)));
}

#[test]
fn test_three_samples_are_averaged() {
    let aggregator = Aggregator::new(WARMUP, INTERVAL);
    aggregator.push(&load_sample(1.5, 2.0, 3.0));
    aggregator.push(&load_sample(1.0, 3.0, 4.0));
    aggregator.push(&load_sample(3.5, 10.0, 33.0));

    let load = aggregator.close_window().unwrap().metrics.load_average.unwrap();
    assert_close(load.one, 2.0);
    assert_close(load.five, 5.0);
    assert_close(load.fifteen, 13.333333);
}

#[test]
fn test_consecutive_windows_do_not_mix() {
    let aggregator = Aggregator::new(WARMUP, INTERVAL);

    aggregator.push(&load_sample(1.2, 2.3, 3.3));
    let first = aggregator.close_window().unwrap().metrics.load_average.unwrap();
    assert_close(first.one, 1.2);
    assert_close(first.five, 2.3);
    assert_close(first.fifteen, 3.3);

    aggregator.push(&load_sample(1.6, 2.7, 3.8));
    aggregator.push(&load_sample(10.2, 19.3, 22.3));
    aggregator.push(&load_sample(4.5, 7.7, 6.8));
    let second = aggregator.close_window().unwrap().metrics.load_average.unwrap();
    assert_close(second.one, 5.433333);
    assert_close(second.five, 9.9);
    assert_close(second.fifteen, 10.966666);
}

#[test]
fn test_concurrent_pushes_are_all_counted() {
    let aggregator = Arc::new(Aggregator::new(WARMUP, INTERVAL));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let aggregator = Arc::clone(&aggregator);
            std::thread::spawn(move || {
                for _ in 0..100 {
                    aggregator.push(&Sample::new(SystemTime::now()).with_cpu_usage(CpuUsage::from_busy(50.0)));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(aggregator.pending(), 800);
    let snapshot = aggregator.close_window().unwrap();
    assert_eq!(snapshot.samples, 800);
    assert_eq!(snapshot.metrics.cpu_usage.unwrap().busy_percent, 50.0);
}

#[tokio::test(start_paused = true)]
async fn test_warmup_then_steady_cadence() {
    let aggregator = Arc::new(Aggregator::new(WARMUP, INTERVAL));
    let shutdown = CancellationToken::new();
    let start = Instant::now();
    let (mut rx, _handle) = aggregator.spawn(1, shutdown.clone());

    aggregator.push(&load_sample(1.0, 1.0, 1.0));
    let first = rx.recv().await.unwrap();
    assert_eq!(start.elapsed(), WARMUP);
    assert_eq!(first.samples, 1);
    assert_eq!(aggregator.phase(), WindowPhase::Steady);

    aggregator.push(&load_sample(3.0, 3.0, 3.0));
    let second = rx.recv().await.unwrap();
    assert_eq!(start.elapsed(), WARMUP + INTERVAL);
    assert_eq!(second.metrics.load_average, Some(LoadAverage::new(3.0, 3.0, 3.0)));

    aggregator.push(&load_sample(5.0, 5.0, 5.0));
    rx.recv().await.unwrap();
    assert_eq!(start.elapsed(), WARMUP + INTERVAL * 2);

    shutdown.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_empty_warmup_repeats_warmup_window() {
    let aggregator = Arc::new(Aggregator::new(WARMUP, INTERVAL));
    let shutdown = CancellationToken::new();
    let start = Instant::now();
    let (mut rx, _handle) = aggregator.spawn(1, shutdown.clone());

    tokio::time::sleep(WARMUP + Duration::from_secs(1)).await;
    assert_eq!(aggregator.phase(), WindowPhase::Warmup);

    aggregator.push(&load_sample(2.0, 2.0, 2.0));
    let snapshot = rx.recv().await.unwrap();
    assert_eq!(start.elapsed(), WARMUP * 2);
    assert_eq!(snapshot.samples, 1);
    assert_eq!(aggregator.phase(), WindowPhase::Steady);

    shutdown.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_empty_steady_window_is_skipped_without_stale_count() {
    let aggregator = Arc::new(Aggregator::new(WARMUP, INTERVAL));
    let shutdown = CancellationToken::new();
    let start = Instant::now();
    let (mut rx, _handle) = aggregator.spawn(1, shutdown.clone());

    aggregator.push(&load_sample(1.0, 1.0, 1.0));
    aggregator.push(&load_sample(3.0, 3.0, 3.0));
    assert_eq!(rx.recv().await.unwrap().samples, 2);

    // Window [5s, 7s) stays empty, the sample lands in [7s, 9s).
    tokio::time::sleep_until(start + Duration::from_secs(8)).await;
    aggregator.push(&load_sample(7.0, 7.0, 7.0));

    let snapshot = rx.recv().await.unwrap();
    assert_eq!(start.elapsed(), WARMUP + INTERVAL * 2);
    assert_eq!(snapshot.samples, 1);
    assert_eq!(snapshot.metrics.load_average, Some(LoadAverage::new(7.0, 7.0, 7.0)));

    shutdown.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_closes_output() {
    let aggregator = Arc::new(Aggregator::new(WARMUP, INTERVAL));
    let shutdown = CancellationToken::new();
    let (mut rx, handle) = aggregator.spawn(1, shutdown.clone());

    aggregator.push(&load_sample(1.0, 1.0, 1.0));
    shutdown.cancel();
    handle.await.unwrap();

    assert!(rx.recv().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_push_does_not_block_on_stalled_consumer() {
    let aggregator = Arc::new(Aggregator::new(WARMUP, INTERVAL));
    let shutdown = CancellationToken::new();
    let (mut rx, _handle) = aggregator.spawn(1, shutdown.clone());

    // Nobody reads: the first snapshot fills the buffer, the second blocks the
    // timer loop in its send.
    aggregator.push(&load_sample(1.0, 1.0, 1.0));
    tokio::time::sleep(WARMUP + Duration::from_millis(500)).await;
    aggregator.push(&load_sample(2.0, 2.0, 2.0));
    tokio::time::sleep(INTERVAL * 3).await;

    for _ in 0..10 {
        aggregator.push(&load_sample(4.0, 4.0, 4.0));
    }
    assert_eq!(aggregator.pending(), 10);

    assert_eq!(rx.recv().await.unwrap().samples, 1);
    assert_eq!(rx.recv().await.unwrap().samples, 1);
    shutdown.cancel();
}
