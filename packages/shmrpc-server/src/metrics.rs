//! Request metrics for the RPC server
//!
//! Lightweight, thread-safe counters collected server-wide:
//! - Request latencies with percentiles (p50, p95, p99) over a rolling window
//! - Slow request tracking
//! - Per-method counts, latency sums and error counts
//! - Epoch publication count
//!
//! All counters are atomics; the latency window and slow-request buffer
//! are bounded and mutex-protected.
//!
//! # Example
//!
//! ```
//! use shmrpc::metrics::{Metrics, Method};
//!
//! let metrics = Metrics::new(100);
//! metrics.record_request(Method::Request, 3, true);
//!
//! let stats = metrics.snapshot();
//! assert_eq!(stats.request_count, 1);
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use serde::Serialize;

/// Rolling window of request latencies used for percentiles.
const LATENCY_WINDOW_SIZE: usize = 1000;

/// Most recent slow requests kept for reporting.
const MAX_SLOW_REQUESTS: usize = 10;

/// RPC methods tracked individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    GetServerInfo,
    GetAlgorithms,
    GetDataDescription,
    GetDataArrayRange,
    GetDataArraySet,
    Register,
    Request,
    Unregister,
    PublishEpoch,
    Other,
}

impl Method {
    pub const ALL: [Method; 10] = [
        Method::GetServerInfo,
        Method::GetAlgorithms,
        Method::GetDataDescription,
        Method::GetDataArrayRange,
        Method::GetDataArraySet,
        Method::Register,
        Method::Request,
        Method::Unregister,
        Method::PublishEpoch,
        Method::Other,
    ];

    pub fn from_name(name: &str) -> Self {
        match name {
            "get_server_info" => Method::GetServerInfo,
            "get_algorithms" => Method::GetAlgorithms,
            "get_data_description" => Method::GetDataDescription,
            "get_data_array_range" => Method::GetDataArrayRange,
            "get_data_array_set" => Method::GetDataArraySet,
            "register" => Method::Register,
            "request" => Method::Request,
            "unregister" => Method::Unregister,
            "publish_epoch" => Method::PublishEpoch,
            _ => Method::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GetServerInfo => "get_server_info",
            Method::GetAlgorithms => "get_algorithms",
            Method::GetDataDescription => "get_data_description",
            Method::GetDataArrayRange => "get_data_array_range",
            Method::GetDataArraySet => "get_data_array_set",
            Method::Register => "register",
            Method::Request => "request",
            Method::Unregister => "unregister",
            Method::PublishEpoch => "publish_epoch",
            Method::Other => "other",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

#[derive(Default)]
struct MethodCounters {
    count: AtomicU64,
    latency_sum_ms: AtomicU64,
    errors: AtomicU64,
}

/// Thread-safe request metrics collector.
///
/// Create one per server and share it (wrapped in `Arc`) with every
/// connection handler.
pub struct Metrics {
    request_count: AtomicU64,
    error_count: AtomicU64,
    slow_request_count: AtomicU64,
    epochs_published: AtomicU64,
    slow_threshold_ms: u64,

    /// Recent latencies for percentile calculation
    latencies_ms: Mutex<VecDeque<u64>>,

    /// Sum of latencies currently in the window
    latency_sum_ms: AtomicU64,

    methods: [MethodCounters; Method::ALL.len()],

    slow_requests: Mutex<VecDeque<SlowRequest>>,

    started_at: Instant,
}

/// A request that took at least the slow threshold.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SlowRequest {
    pub method: String,
    pub duration_ms: u64,
    /// Milliseconds since metrics started
    pub timestamp_ms: u64,
}

/// Per-method statistics.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MethodStat {
    pub method: String,
    pub count: u64,
    pub errors: u64,
    pub avg_ms: u64,
}

/// Point-in-time copy of all metrics, ready for the wire.
#[derive(Clone, Debug, Default, Serialize)]
pub struct MetricsSnapshot {
    pub request_count: u64,
    pub error_count: u64,
    pub slow_request_count: u64,
    pub epochs_published: u64,
    pub request_p50_ms: u64,
    pub request_p95_ms: u64,
    pub request_p99_ms: u64,
    pub request_avg_ms: u64,
    pub slow_requests: Vec<SlowRequest>,
    /// Methods called at least once, busiest first
    pub methods: Vec<MethodStat>,
    pub uptime_secs: u64,
}

impl Metrics {
    /// Create a collector that treats requests of at least
    /// `slow_threshold_ms` as slow.
    pub fn new(slow_threshold_ms: u64) -> Self {
        Self {
            request_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            slow_request_count: AtomicU64::new(0),
            epochs_published: AtomicU64::new(0),
            slow_threshold_ms,
            latencies_ms: Mutex::new(VecDeque::with_capacity(LATENCY_WINDOW_SIZE)),
            latency_sum_ms: AtomicU64::new(0),
            methods: Default::default(),
            slow_requests: Mutex::new(VecDeque::with_capacity(MAX_SLOW_REQUESTS)),
            started_at: Instant::now(),
        }
    }

    pub fn slow_threshold_ms(&self) -> u64 {
        self.slow_threshold_ms
    }

    /// Record one completed request. Returns whether it was slow.
    pub fn record_request(&self, method: Method, duration_ms: u64, ok: bool) -> bool {
        self.request_count.fetch_add(1, Ordering::Relaxed);

        let counters = &self.methods[method.index()];
        counters.count.fetch_add(1, Ordering::Relaxed);
        counters.latency_sum_ms.fetch_add(duration_ms, Ordering::Relaxed);
        if !ok {
            counters.errors.fetch_add(1, Ordering::Relaxed);
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }
        if method == Method::PublishEpoch && ok {
            self.epochs_published.fetch_add(1, Ordering::Relaxed);
        }

        {
            let mut latencies = self.latencies_ms.lock().unwrap_or_else(PoisonError::into_inner);
            if latencies.len() >= LATENCY_WINDOW_SIZE {
                if let Some(old) = latencies.pop_front() {
                    self.latency_sum_ms.fetch_sub(old, Ordering::Relaxed);
                }
            }
            latencies.push_back(duration_ms);
            self.latency_sum_ms.fetch_add(duration_ms, Ordering::Relaxed);
        }

        if duration_ms < self.slow_threshold_ms {
            return false;
        }

        self.slow_request_count.fetch_add(1, Ordering::Relaxed);
        let slow = SlowRequest {
            method: method.as_str().to_string(),
            duration_ms,
            timestamp_ms: self.started_at.elapsed().as_millis() as u64,
        };
        let mut slow_requests = self.slow_requests.lock().unwrap_or_else(PoisonError::into_inner);
        if slow_requests.len() >= MAX_SLOW_REQUESTS {
            slow_requests.pop_front();
        }
        slow_requests.push_back(slow);
        true
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let (p50, p95, p99, avg) = {
            let latencies = self.latencies_ms.lock().unwrap_or_else(PoisonError::into_inner);
            if latencies.is_empty() {
                (0, 0, 0, 0)
            } else {
                let mut sorted: Vec<u64> = latencies.iter().copied().collect();
                sorted.sort_unstable();

                let len = sorted.len();
                let at = |pct: usize| sorted[(len * pct / 100).min(len - 1)];
                let avg = self.latency_sum_ms.load(Ordering::Relaxed) / len as u64;
                (at(50), at(95), at(99), avg)
            }
        };

        let slow_requests = self
            .slow_requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();

        let mut methods: Vec<MethodStat> = Method::ALL
            .iter()
            .filter_map(|m| {
                let c = &self.methods[m.index()];
                let count = c.count.load(Ordering::Relaxed);
                (count > 0).then(|| MethodStat {
                    method: m.as_str().to_string(),
                    count,
                    errors: c.errors.load(Ordering::Relaxed),
                    avg_ms: c.latency_sum_ms.load(Ordering::Relaxed) / count,
                })
            })
            .collect();
        methods.sort_by(|a, b| b.count.cmp(&a.count));

        MetricsSnapshot {
            request_count: self.request_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            slow_request_count: self.slow_request_count.load(Ordering::Relaxed),
            epochs_published: self.epochs_published.load(Ordering::Relaxed),
            request_p50_ms: p50,
            request_p95_ms: p95,
            request_p99_ms: p99,
            request_avg_ms: avg,
            slow_requests,
            methods,
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }
}
