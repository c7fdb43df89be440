use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Snapshot of pool counters at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub pool_name: String,
    pub acquired: u64,
    pub released: u64,
    pub invalidated: u64,
    pub acquire_failures: u64,
    pub exhausted: u64,
    pub connection_attempts: u64,
    pub connection_successes: u64,
    pub connection_failures: u64,
    pub average_acquire_ms: f64,
    pub p95_acquire_ms: f64,
    pub p99_acquire_ms: f64,
    pub last_acquire_time: Option<Instant>,
}

/// Thread-safe counters for one pool
#[derive(Debug)]
pub struct PoolMetrics {
    pool_name: String,

    // Handle lifecycle
    acquired: AtomicU64,
    released: AtomicU64,
    invalidated: AtomicU64,
    acquire_failures: AtomicU64,
    exhausted: AtomicU64,

    // Factory activity
    connection_attempts: AtomicU64,
    connection_successes: AtomicU64,
    connection_failures: AtomicU64,

    latency_tracker: Mutex<LatencyTracker>,
    last_acquire_time: Mutex<Option<Instant>>,
}

impl PoolMetrics {
    pub fn new(pool_name: String) -> Self {
        Self {
            pool_name,
            acquired: AtomicU64::new(0),
            released: AtomicU64::new(0),
            invalidated: AtomicU64::new(0),
            acquire_failures: AtomicU64::new(0),
            exhausted: AtomicU64::new(0),
            connection_attempts: AtomicU64::new(0),
            connection_successes: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            latency_tracker: Mutex::new(LatencyTracker::new()),
            last_acquire_time: Mutex::new(None),
        }
    }

    pub fn pool_name(&self) -> &str {
        &self.pool_name
    }

    pub fn record_acquire(&self, waited: Duration) {
        self.acquired.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last_acquire_time.lock() {
            *last = Some(Instant::now());
        }
        if let Ok(mut tracker) = self.latency_tracker.lock() {
            tracker.record_latency(waited);
        }
    }

    pub fn record_acquire_failure(&self) {
        self.acquire_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_exhausted(&self) {
        self.exhausted.fetch_add(1, Ordering::Relaxed);
        self.record_acquire_failure();
    }

    pub fn record_release(&self) {
        self.released.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidate(&self) {
        self.invalidated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_success(&self) {
        self.connection_successes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_failure(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let (average_acquire_ms, p95_acquire_ms, p99_acquire_ms) = match self.latency_tracker.lock()
        {
            Ok(tracker) => (
                tracker.average_latency_ms(),
                tracker.percentile_latency_ms(95.0),
                tracker.percentile_latency_ms(99.0),
            ),
            Err(_) => (0.0, 0.0, 0.0),
        };
        let last_acquire_time = self.last_acquire_time.lock().ok().and_then(|t| *t);

        MetricsSnapshot {
            pool_name: self.pool_name.clone(),
            acquired: self.acquired.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            invalidated: self.invalidated.load(Ordering::Relaxed),
            acquire_failures: self.acquire_failures.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
            connection_successes: self.connection_successes.load(Ordering::Relaxed),
            connection_failures: self.connection_failures.load(Ordering::Relaxed),
            average_acquire_ms,
            p95_acquire_ms,
            p99_acquire_ms,
            last_acquire_time,
        }
    }

    /// Reset all counters (pre-warm traffic is cleared this way)
    pub fn reset(&self) {
        self.acquired.store(0, Ordering::Relaxed);
        self.released.store(0, Ordering::Relaxed);
        self.invalidated.store(0, Ordering::Relaxed);
        self.acquire_failures.store(0, Ordering::Relaxed);
        self.exhausted.store(0, Ordering::Relaxed);
        self.connection_attempts.store(0, Ordering::Relaxed);
        self.connection_successes.store(0, Ordering::Relaxed);
        self.connection_failures.store(0, Ordering::Relaxed);
        if let Ok(mut tracker) = self.latency_tracker.lock() {
            tracker.reset();
        }
        if let Ok(mut last) = self.last_acquire_time.lock() {
            *last = None;
        }
    }
}

/// Sliding window of acquire latencies for percentiles
#[derive(Debug)]
struct LatencyTracker {
    latencies: Vec<Duration>,
    max_samples: usize,
    next_index: usize,
}

impl LatencyTracker {
    fn new() -> Self {
        Self {
            latencies: Vec::with_capacity(1000),
            max_samples: 1000,
            next_index: 0,
        }
    }

    fn record_latency(&mut self, latency: Duration) {
        if self.latencies.len() < self.max_samples {
            self.latencies.push(latency);
        } else {
            self.latencies[self.next_index] = latency;
            self.next_index = (self.next_index + 1) % self.max_samples;
        }
    }

    fn average_latency_ms(&self) -> f64 {
        if self.latencies.is_empty() {
            return 0.0;
        }

        let total_ms: f64 = self
            .latencies
            .iter()
            .map(|d| d.as_secs_f64() * 1000.0)
            .sum();

        total_ms / self.latencies.len() as f64
    }

    fn percentile_latency_ms(&self, percentile: f64) -> f64 {
        if self.latencies.is_empty() {
            return 0.0;
        }

        let mut sorted = self.latencies.clone();
        sorted.sort();

        let index = ((percentile / 100.0) * sorted.len() as f64) as usize;
        let index = index.min(sorted.len() - 1);

        sorted[index].as_secs_f64() * 1000.0
    }

    fn reset(&mut self) {
        self.latencies.clear();
        self.next_index = 0;
    }
}
