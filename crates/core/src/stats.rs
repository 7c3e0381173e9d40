//! Throughput statistics sink.
//!
//! A [`Stats`] accumulates amounts (bytes, packets) as they happen. Each
//! relay owns one for forwarded bytes; the load handler owns two for
//! received and missed packets. Counters are atomic so the hot path never
//! takes a lock.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Named accumulator of amounts recorded over time.
#[derive(Debug)]
pub struct Stats {
    name: String,
    total: AtomicU64,
    samples: AtomicU64,
    started: Instant,
    stopped_at: Mutex<Option<Instant>>,
    stopped: AtomicBool,
}

/// Point-in-time copy of a [`Stats`] sink.
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub name: String,
    /// Sum of every recorded amount.
    pub total: u64,
    /// Number of `record_now` calls that were counted.
    pub samples: u64,
    /// Time between creation and the snapshot (or the stop, if stopped).
    pub elapsed: Duration,
}

impl StatsSnapshot {
    /// Average rate of the recorded amount per second.
    pub fn per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            0.0
        } else {
            self.total as f64 / secs
        }
    }
}

impl Stats {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            total: AtomicU64::new(0),
            samples: AtomicU64::new(0),
            started: Instant::now(),
            stopped_at: Mutex::new(None),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Record `amount` at the current instant. Ignored once stopped.
    pub fn record_now(&self, amount: u64) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        self.total.fetch_add(amount, Ordering::Relaxed);
        self.samples.fetch_add(1, Ordering::Relaxed);
    }

    /// Freeze the sink. Later calls are no-ops.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        *self.stopped_at.lock() = Some(Instant::now());

        let snapshot = self.snapshot();
        tracing::debug!(
            name = %snapshot.name,
            total = snapshot.total,
            samples = snapshot.samples,
            per_second = snapshot.per_second(),
            "stats stopped"
        );
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Sum of all recorded amounts so far.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let end = (*self.stopped_at.lock()).unwrap_or_else(Instant::now);
        StatsSnapshot {
            name: self.name.clone(),
            total: self.total.load(Ordering::Relaxed),
            samples: self.samples.load(Ordering::Relaxed),
            elapsed: end.saturating_duration_since(self.started),
        }
    }
}
