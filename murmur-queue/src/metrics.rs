//! Write-path counters, latency average and throughput.

use murmur_core::MetricsConfig;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Smoothing factor of the latency moving average.
pub const LATENCY_EMA_ALPHA: f64 = 0.2;

/// Point-in-time copy of the write metrics.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Submission attempts, retries included
    pub total_submitted: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Attempts that ended in a requeue
    pub retried: u64,
    /// Exponential moving average of successful-submission latency
    pub avg_latency_ms: f64,
    /// Terminal outcomes per second over the sliding window
    pub current_throughput: f64,
    pub peak_throughput: f64,
}

#[derive(Debug, Default)]
struct Window {
    completions: VecDeque<Instant>,
    avg_latency_ms: Option<f64>,
    peak_throughput: f64,
}

/// Running write metrics. Cheap to update from concurrent attempts.
#[derive(Debug)]
pub struct MetricsTracker {
    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    window_len: Duration,
    window: Mutex<Window>,
}

impl MetricsTracker {
    /// Create a tracker measuring throughput over `window_len`.
    pub fn new(window_len: Duration) -> Self {
        Self {
            submitted: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            retried: AtomicU64::new(0),
            window_len,
            window: Mutex::new(Window::default()),
        }
    }

    /// Create a tracker using `metrics.throughput_window_ms`.
    pub fn from_config(config: &MetricsConfig) -> Self {
        Self::new(Duration::from_millis(config.throughput_window_ms))
    }

    /// Count one submission attempt.
    pub fn record_submission(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a terminal success and fold its latency into the moving average.
    pub fn record_success(&self, latency_ms: u64) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
        let mut window = self.lock();
        let sample = latency_ms as f64;
        window.avg_latency_ms = Some(match window.avg_latency_ms {
            Some(avg) => LATENCY_EMA_ALPHA * sample + (1.0 - LATENCY_EMA_ALPHA) * avg,
            None => sample,
        });
        self.push_completion(&mut window, Instant::now());
    }

    /// Count a terminal failure.
    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        let mut window = self.lock();
        self.push_completion(&mut window, Instant::now());
    }

    /// Count one requeue after a retryable failure.
    pub fn record_retry(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut window = self.lock();
        let current = self.throughput(&mut window, Instant::now());
        MetricsSnapshot {
            total_submitted: self.submitted.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            avg_latency_ms: window.avg_latency_ms.unwrap_or(0.0),
            current_throughput: current,
            peak_throughput: window.peak_throughput,
        }
    }

    fn push_completion(&self, window: &mut Window, now: Instant) {
        window.completions.push_back(now);
        let current = self.throughput(window, now);
        if current > window.peak_throughput {
            window.peak_throughput = current;
        }
    }

    fn throughput(&self, window: &mut Window, now: Instant) -> f64 {
        while let Some(oldest) = window.completions.front() {
            if now.duration_since(*oldest) > self.window_len {
                window.completions.pop_front();
            } else {
                break;
            }
        }
        let secs = self.window_len.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        window.completions.len() as f64 / secs
    }

    fn lock(&self) -> MutexGuard<'_, Window> {
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MetricsTracker {
    fn default() -> Self {
        Self::from_config(&MetricsConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = MetricsTracker::default();
        metrics.record_submission();
        metrics.record_submission();
        metrics.record_retry();
        metrics.record_submission();
        metrics.record_success(10);
        metrics.record_failure();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_submitted, 3);
        assert_eq!(snapshot.succeeded, 1);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.retried, 1);
    }

    #[test]
    fn test_latency_ema() {
        let metrics = MetricsTracker::default();
        assert_eq!(metrics.snapshot().avg_latency_ms, 0.0);

        metrics.record_success(100);
        assert!((metrics.snapshot().avg_latency_ms - 100.0).abs() < 1e-9);

        metrics.record_success(200);
        // 0.2 * 200 + 0.8 * 100
        assert!((metrics.snapshot().avg_latency_ms - 120.0).abs() < 1e-9);

        // Failures do not move the average.
        metrics.record_failure();
        assert!((metrics.snapshot().avg_latency_ms - 120.0).abs() < 1e-9);
    }

    #[test]
    fn test_throughput_window_and_peak() {
        let metrics = MetricsTracker::new(Duration::from_millis(100));
        for _ in 0..5 {
            metrics.record_success(1);
        }
        let busy = metrics.snapshot();
        // 5 completions in a 0.1s window
        assert!((busy.current_throughput - 50.0).abs() < 1e-9);
        assert!((busy.peak_throughput - 50.0).abs() < 1e-9);

        std::thread::sleep(Duration::from_millis(150));
        let quiet = metrics.snapshot();
        assert_eq!(quiet.current_throughput, 0.0);
        assert!((quiet.peak_throughput - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_field_names() {
        let json = serde_json::to_value(MetricsSnapshot::default()).unwrap();
        assert!(json.get("total_submitted").is_some());
        assert!(json.get("peak_throughput").is_some());
    }
}
