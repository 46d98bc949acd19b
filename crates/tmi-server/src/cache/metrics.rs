//! Hit/miss/latency counters behind a single mutex, matching the teacher's
//! synchronous-mutex-around-plain-data style rather than lock-free
//! structures at this scale. Counts are mirrored into `prometheus_client`
//! gauges/counters so the admin `/metrics` surface can export them.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::gauge::Gauge;
use serde::Serialize;

const TIMING_WINDOW_CAP: usize = 1000;

#[derive(Debug, Clone, Copy)]
pub enum ErrorKind {
    Connection,
    Timeout,
    Generic,
}

impl ErrorKind {
    pub fn from_kv(e: &crate::kv::KvError) -> Self {
        match e {
            crate::kv::KvError::Cancelled => ErrorKind::Timeout,
            crate::kv::KvError::Redis(re) => {
                if re.is_timeout() {
                    ErrorKind::Timeout
                } else if re.is_connection_dropped() || re.is_connection_refusal() {
                    ErrorKind::Connection
                } else {
                    ErrorKind::Generic
                }
            },
        }
    }
}

#[derive(Default)]
struct Counters {
    hits_total: u64,
    hits_by_class: std::collections::HashMap<&'static str, u64>,
    misses_total: u64,
    misses_by_class: std::collections::HashMap<&'static str, u64>,
    writes: u64,
    deletes: u64,
    invalidations: u64,
    errors_total: u64,
    errors_connection: u64,
    errors_timeout: u64,
    errors_generic: u64,
}

struct TimingWindows {
    by_kind: std::collections::HashMap<&'static str, VecDeque<Duration>>,
}

impl TimingWindows {
    fn record(&mut self, kind: &'static str, d: Duration) {
        let buf = self.by_kind.entry(kind).or_default();
        if buf.len() >= TIMING_WINDOW_CAP {
            buf.pop_front();
        }
        buf.push_back(d);
    }
}

#[derive(Serialize)]
pub struct StatsSnapshot {
    pub hits_total: u64,
    pub misses_total: u64,
    pub writes: u64,
    pub deletes: u64,
    pub invalidations: u64,
    pub errors_total: u64,
    pub hit_ratio: f64,
}

#[derive(Serialize)]
pub struct Health {
    pub status: &'static str,
    pub reason: Option<&'static str>,
}

struct PromGauges {
    hits: Counter,
    misses: Counter,
    writes: Counter,
    errors: Counter,
    hit_ratio: Gauge<f64, std::sync::atomic::AtomicU64>,
}

/// `enabled = false` makes `stats()`/`export()` return the documented error
/// while `health()` still reports `unhealthy`.
#[derive(Clone)]
pub struct CacheMetrics {
    enabled: bool,
    counters: std::sync::Arc<Mutex<Counters>>,
    timings: std::sync::Arc<Mutex<TimingWindows>>,
    prom: std::sync::Arc<PromGauges>,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::with_enabled(true)
    }

    pub fn disabled() -> Self {
        Self::with_enabled(false)
    }

    fn with_enabled(enabled: bool) -> Self {
        Self {
            enabled,
            counters: std::sync::Arc::new(Mutex::new(Counters::default())),
            timings: std::sync::Arc::new(Mutex::new(TimingWindows { by_kind: Default::default() })),
            prom: std::sync::Arc::new(PromGauges {
                hits: Counter::default(),
                misses: Counter::default(),
                writes: Counter::default(),
                errors: Counter::default(),
                hit_ratio: Gauge::default(),
            }),
        }
    }

    pub fn record_hit(&self, class: &'static str) {
        let mut c = self.counters.lock();
        c.hits_total += 1;
        *c.hits_by_class.entry(class).or_default() += 1;
        drop(c);
        self.prom.hits.inc();
        self.refresh_ratio();
    }

    pub fn record_miss(&self, class: &'static str) {
        let mut c = self.counters.lock();
        c.misses_total += 1;
        *c.misses_by_class.entry(class).or_default() += 1;
        drop(c);
        self.prom.misses.inc();
        self.refresh_ratio();
    }

    pub fn record_write(&self) {
        self.counters.lock().writes += 1;
        self.prom.writes.inc();
    }

    pub fn record_delete(&self) {
        self.counters.lock().deletes += 1;
    }

    pub fn record_invalidation(&self) {
        self.counters.lock().invalidations += 1;
    }

    pub fn record_error(&self, kind: ErrorKind) {
        let mut c = self.counters.lock();
        c.errors_total += 1;
        match kind {
            ErrorKind::Connection => c.errors_connection += 1,
            ErrorKind::Timeout => c.errors_timeout += 1,
            ErrorKind::Generic => c.errors_generic += 1,
        }
        drop(c);
        self.prom.errors.inc();
    }

    pub fn record_timing(&self, kind: &'static str, d: Duration) {
        self.timings.lock().record(kind, d);
    }

    fn refresh_ratio(&self) {
        let c = self.counters.lock();
        let total = c.hits_total + c.misses_total;
        let ratio = if total == 0 { 0.0 } else { c.hits_total as f64 / total as f64 };
        drop(c);
        self.prom.hit_ratio.set(ratio);
    }

    pub fn stats(&self) -> Result<StatsSnapshot, &'static str> {
        if !self.enabled {
            return Err("metrics disabled");
        }
        Ok(self.snapshot())
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let c = self.counters.lock();
        let total = c.hits_total + c.misses_total;
        let hit_ratio = if total == 0 { 0.0 } else { c.hits_total as f64 / total as f64 };
        StatsSnapshot {
            hits_total: c.hits_total,
            misses_total: c.misses_total,
            writes: c.writes,
            deletes: c.deletes,
            invalidations: c.invalidations,
            errors_total: c.errors_total,
            hit_ratio,
        }
    }

    pub fn export(&self) -> Result<StatsSnapshot, &'static str> {
        self.stats()
    }

    /// `healthy` iff hit-ratio ≥ 0.70 and total errors < 100; otherwise
    /// `degraded`. Disabled metrics always report `unhealthy`.
    pub fn health(&self) -> Health {
        if !self.enabled {
            return Health { status: "unhealthy", reason: Some("metrics disabled") };
        }
        let c = self.counters.lock();
        let total = c.hits_total + c.misses_total;
        let hit_ratio = if total == 0 { 1.0 } else { c.hits_total as f64 / total as f64 };
        if hit_ratio >= 0.70 && c.errors_total < 100 {
            Health { status: "healthy", reason: None }
        } else {
            Health { status: "degraded", reason: Some("warning") }
        }
    }
}

impl Default for CacheMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timing_window_caps_at_1000() {
        let metrics = CacheMetrics::new();
        for _ in 0..1500 {
            metrics.record_timing("get", Duration::from_millis(1));
        }
        let timings = metrics.timings.lock();
        assert_eq!(timings.by_kind.get("get").unwrap().len(), TIMING_WINDOW_CAP);
    }

    #[test]
    fn disabled_metrics_rejects_stats_but_reports_unhealthy() {
        let metrics = CacheMetrics::disabled();
        assert!(metrics.stats().is_err());
        assert_eq!(metrics.health().status, "unhealthy");
    }

    #[test]
    fn health_degrades_below_threshold() {
        let metrics = CacheMetrics::new();
        for _ in 0..3 {
            metrics.record_miss("threat");
        }
        metrics.record_hit("threat");
        assert_eq!(metrics.health().status, "degraded");
    }
}
