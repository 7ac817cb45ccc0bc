// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// How many latency samples the percentile window keeps.
const LATENCY_WINDOW: usize = 1024;

/// Counters published by a running server. All counters are monotonic
/// except `active_connections`; latency percentiles are computed over a
/// bounded window of recent exchanges.
#[derive(Debug, Default)]
pub struct ServerMetrics {
    active_connections: AtomicU64,
    total_requests: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    latencies_ms: Mutex<Vec<u64>>,
    started: Mutex<Option<Instant>>,
}

/// A point-in-time copy of the counters.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricsSnapshot {
    pub active_connections: u64,
    pub total_requests: u64,
    pub requests_per_second: f64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub latency_p50_ms: u64,
    pub latency_p95_ms: u64,
}

impl ServerMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_started(&self) {
        *self.started.lock().unwrap() = Some(Instant::now());
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_exchange(&self, bytes_in: u64, bytes_out: u64, elapsed_ms: u64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.bytes_in.fetch_add(bytes_in, Ordering::Relaxed);
        self.bytes_out.fetch_add(bytes_out, Ordering::Relaxed);

        let mut latencies = self.latencies_ms.lock().unwrap();
        if latencies.len() == LATENCY_WINDOW {
            latencies.remove(0);
        }
        latencies.push(elapsed_ms);
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let total_requests = self.total_requests.load(Ordering::Relaxed);

        let requests_per_second = match *self.started.lock().unwrap() {
            Some(started) => {
                let seconds = started.elapsed().as_secs_f64();
                if seconds > 0.0 {
                    total_requests as f64 / seconds
                } else {
                    0.0
                }
            }
            None => 0.0,
        };

        let (latency_p50_ms, latency_p95_ms) = {
            let mut latencies = self.latencies_ms.lock().unwrap().clone();
            latencies.sort_unstable();
            (percentile(&latencies, 50), percentile(&latencies, 95))
        };

        MetricsSnapshot {
            active_connections: self.active_connections.load(Ordering::Relaxed),
            total_requests,
            requests_per_second,
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
            latency_p50_ms,
            latency_p95_ms,
        }
    }
}

fn percentile(sorted: &[u64], percent: usize) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (sorted.len() - 1) * percent / 100;
    sorted[rank]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = ServerMetrics::new();
        metrics.connection_opened();
        metrics.connection_opened();
        metrics.connection_closed();
        metrics.record_exchange(100, 2000, 5);
        metrics.record_exchange(50, 1000, 15);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.active_connections, 1);
        assert_eq!(snapshot.total_requests, 2);
        assert_eq!(snapshot.bytes_in, 150);
        assert_eq!(snapshot.bytes_out, 3000);
    }

    #[test]
    fn percentiles_over_the_window() {
        let metrics = ServerMetrics::new();
        for elapsed in 1..=100 {
            metrics.record_exchange(0, 0, elapsed);
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.latency_p50_ms, 50);
        assert_eq!(snapshot.latency_p95_ms, 95);
    }

    #[test]
    fn empty_window_reports_zero() {
        let snapshot = ServerMetrics::new().snapshot();
        assert_eq!(snapshot.latency_p50_ms, 0);
        assert_eq!(snapshot.latency_p95_ms, 0);
    }
}
