//! Per-backend health tracking.
//!
//! One long-lived [`HealthRecord`] per backend, fed passively by every
//! completed attempt and actively by periodic liveness probes. Sliding
//! windows are maintained by discarding samples older than the window
//! bound at read time; there is no background sweep. Locking is per
//! backend so unrelated backends never serialize each other.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::backends::BackendDescriptor;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    pub short_window_secs: u64,
    pub long_window_secs: u64,
    pub probe_interval_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            short_window_secs: 3_600,
            long_window_secs: 86_400,
            probe_interval_secs: 300,
        }
    }
}

impl HealthConfig {
    pub fn short_window(&self) -> Duration {
        Duration::from_secs(self.short_window_secs)
    }

    pub fn long_window(&self) -> Duration {
        Duration::from_secs(self.long_window_secs)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: Instant,
    latency: Duration,
    failed: bool,
}

/// Usage counter over a fixed window, reset lazily on rollover.
#[derive(Debug, Clone, Copy, Default)]
struct WindowCounter {
    window_start: u64,
    count: u64,
}

impl WindowCounter {
    fn record(&mut self, now: u64, window_secs: u64) {
        if now.saturating_sub(self.window_start) >= window_secs {
            self.window_start = now;
            self.count = 0;
        }
        self.count += 1;
    }

    fn current(&self, now: u64, window_secs: u64) -> u64 {
        if now.saturating_sub(self.window_start) >= window_secs {
            0
        } else {
            self.count
        }
    }
}

/// Rolling counters and latency samples for one backend.
#[derive(Debug, Default)]
pub struct HealthRecord {
    samples: std::collections::VecDeque<Sample>,
    minute: WindowCounter,
    day: WindowCounter,
    probe_ok: Option<bool>,
    last_probe_at: Option<Instant>,
}

impl HealthRecord {
    fn prune(&mut self, long_window: Duration) {
        let now = Instant::now();
        while let Some(front) = self.samples.front() {
            if now.duration_since(front.at) > long_window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn window_stats(&self, window: Duration) -> (u64, u64, Vec<Duration>) {
        let now = Instant::now();
        let mut total = 0;
        let mut failed = 0;
        let mut latencies = Vec::new();
        for sample in self.samples.iter().rev() {
            if now.duration_since(sample.at) > window {
                break;
            }
            total += 1;
            if sample.failed {
                failed += 1;
            } else {
                latencies.push(sample.latency);
            }
        }
        (total, failed, latencies)
    }
}

/// Read-only view of one backend's health, for the router and the
/// external status surface.
#[derive(Debug, Clone, Serialize)]
pub struct BackendHealth {
    pub name: String,
    pub available: bool,
    pub error_rate_short: f64,
    pub error_rate_long: f64,
    pub latency_p50_ms: Option<u64>,
    pub latency_p95_ms: Option<u64>,
    pub quota_minute_used: u64,
    pub quota_minute_limit: Option<u64>,
    pub quota_day_used: u64,
    pub quota_day_limit: Option<u64>,
    pub last_probe_ok: Option<bool>,
}

/// Signals the routing engine scores candidates with.
#[derive(Debug, Clone, Copy)]
pub struct RouteSignals {
    pub error_rate_short: f64,
    pub latency_p95: Option<Duration>,
    /// Fraction of quota still unused across the configured windows,
    /// 1.0 when no limits apply.
    pub quota_headroom: f64,
}

pub struct HealthMonitor {
    records: HashMap<String, Mutex<HealthRecord>>,
    descriptors: HashMap<String, BackendDescriptor>,
    config: HealthConfig,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig, descriptors: &[BackendDescriptor]) -> Self {
        let records = descriptors
            .iter()
            .map(|d| (d.name.clone(), Mutex::new(HealthRecord::default())))
            .collect();
        let descriptors = descriptors
            .iter()
            .map(|d| (d.name.clone(), d.clone()))
            .collect();
        Self {
            records,
            descriptors,
            config,
        }
    }

    /// Passive update: one completed adapter attempt.
    pub async fn record_attempt(&self, backend: &str, latency: Duration, failed: bool) {
        let Some(record) = self.records.get(backend) else {
            tracing::warn!(backend, "attempt recorded for unknown backend");
            return;
        };
        let now = current_epoch_secs();
        let mut record = record.lock().await;
        record.prune(self.config.long_window());
        record.samples.push_back(Sample {
            at: Instant::now(),
            latency,
            failed,
        });
        record.minute.record(now, 60);
        record.day.record(now, 86_400);
    }

    /// Active update: result of a liveness probe.
    pub async fn record_probe(&self, backend: &str, ok: bool) {
        let Some(record) = self.records.get(backend) else {
            return;
        };
        let mut record = record.lock().await;
        record.probe_ok = Some(ok);
        record.last_probe_at = Some(Instant::now());
        if !ok {
            tracing::warn!(backend, "liveness probe failed");
        }
    }

    /// Quota and liveness gate consulted before routing to a backend.
    pub async fn has_capacity(&self, backend: &str) -> bool {
        let (Some(record), Some(descriptor)) =
            (self.records.get(backend), self.descriptors.get(backend))
        else {
            return false;
        };
        let now = current_epoch_secs();
        let record = record.lock().await;
        if record.probe_ok == Some(false) {
            return false;
        }
        if let Some(limit) = descriptor.requests_per_minute {
            if record.minute.current(now, 60) >= limit {
                return false;
            }
        }
        if let Some(limit) = descriptor.requests_per_day {
            if record.day.current(now, 86_400) >= limit {
                return false;
            }
        }
        true
    }

    pub async fn signals(&self, backend: &str) -> RouteSignals {
        let Some(record) = self.records.get(backend) else {
            return RouteSignals {
                error_rate_short: 0.0,
                latency_p95: None,
                quota_headroom: 1.0,
            };
        };
        let descriptor = self.descriptors.get(backend);
        let now = current_epoch_secs();
        let mut record = record.lock().await;
        record.prune(self.config.long_window());
        let (total, failed, mut latencies) = record.window_stats(self.config.short_window());
        latencies.sort_unstable();

        let headroom = |used: u64, limit: Option<u64>| match limit {
            Some(limit) if limit > 0 => 1.0 - (used.min(limit) as f64 / limit as f64),
            _ => 1.0,
        };
        let quota_headroom = descriptor
            .map(|d| {
                headroom(record.minute.current(now, 60), d.requests_per_minute)
                    .min(headroom(record.day.current(now, 86_400), d.requests_per_day))
            })
            .unwrap_or(1.0);

        RouteSignals {
            error_rate_short: error_rate(total, failed),
            latency_p95: percentile(&latencies, 0.95),
            quota_headroom,
        }
    }

    /// Read-only snapshot for the external status surface.
    pub async fn snapshot(&self) -> Vec<BackendHealth> {
        let now = current_epoch_secs();
        let mut out = Vec::with_capacity(self.records.len());
        for (name, record) in &self.records {
            let descriptor = self.descriptors.get(name);
            let mut record = record.lock().await;
            record.prune(self.config.long_window());
            let (short_total, short_failed, mut short_latencies) =
                record.window_stats(self.config.short_window());
            let (long_total, long_failed, _) = record.window_stats(self.config.long_window());
            short_latencies.sort_unstable();

            let minute_used = record.minute.current(now, 60);
            let day_used = record.day.current(now, 86_400);
            let minute_limit = descriptor.and_then(|d| d.requests_per_minute);
            let day_limit = descriptor.and_then(|d| d.requests_per_day);
            let over_quota = minute_limit.is_some_and(|l| minute_used >= l)
                || day_limit.is_some_and(|l| day_used >= l);

            out.push(BackendHealth {
                name: name.clone(),
                available: record.probe_ok != Some(false) && !over_quota,
                error_rate_short: error_rate(short_total, short_failed),
                error_rate_long: error_rate(long_total, long_failed),
                latency_p50_ms: percentile(&short_latencies, 0.50).map(|d| d.as_millis() as u64),
                latency_p95_ms: percentile(&short_latencies, 0.95).map(|d| d.as_millis() as u64),
                quota_minute_used: minute_used,
                quota_minute_limit: minute_limit,
                quota_day_used: day_used,
                quota_day_limit: day_limit,
                last_probe_ok: record.probe_ok,
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}

fn error_rate(total: u64, failed: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        failed as f64 / total as f64
    }
}

fn percentile(sorted: &[Duration], p: f64) -> Option<Duration> {
    if sorted.is_empty() {
        return None;
    }
    let idx = ((sorted.len() - 1) as f64 * p).round() as usize;
    Some(sorted[idx])
}

fn current_epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ComplexityTier;

    fn descriptor(name: &str, per_minute: Option<u64>) -> BackendDescriptor {
        BackendDescriptor {
            name: name.to_string(),
            priority: 10,
            supported_tiers: ComplexityTier::all(),
            requests_per_minute: per_minute,
            requests_per_day: None,
            cost_factor: 1.0,
        }
    }

    fn monitor(per_minute: Option<u64>) -> HealthMonitor {
        HealthMonitor::new(HealthConfig::default(), &[descriptor("b1", per_minute)])
    }

    #[tokio::test]
    async fn test_error_rate_reflects_attempts() {
        let monitor = monitor(None);
        monitor
            .record_attempt("b1", Duration::from_millis(100), false)
            .await;
        monitor
            .record_attempt("b1", Duration::from_millis(100), true)
            .await;
        let signals = monitor.signals("b1").await;
        assert!((signals.error_rate_short - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_error_rate_stays_in_unit_interval() {
        let monitor = monitor(None);
        for _ in 0..5 {
            monitor
                .record_attempt("b1", Duration::from_millis(10), true)
                .await;
        }
        let signals = monitor.signals("b1").await;
        assert!(signals.error_rate_short >= 0.0 && signals.error_rate_short <= 1.0);
        assert!((signals.error_rate_short - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_latency_percentiles() {
        let monitor = monitor(None);
        for ms in [100u64, 200, 300, 400, 1_000] {
            monitor
                .record_attempt("b1", Duration::from_millis(ms), false)
                .await;
        }
        let snapshot = monitor.snapshot().await;
        let health = &snapshot[0];
        assert_eq!(health.latency_p50_ms, Some(300));
        assert_eq!(health.latency_p95_ms, Some(1_000));
    }

    #[tokio::test]
    async fn test_quota_exhaustion_blocks_capacity() {
        let monitor = monitor(Some(2));
        assert!(monitor.has_capacity("b1").await);
        monitor
            .record_attempt("b1", Duration::from_millis(10), false)
            .await;
        monitor
            .record_attempt("b1", Duration::from_millis(10), false)
            .await;
        assert!(!monitor.has_capacity("b1").await);

        let snapshot = monitor.snapshot().await;
        assert!(!snapshot[0].available);
        assert_eq!(snapshot[0].quota_minute_used, 2);
        assert_eq!(snapshot[0].quota_minute_limit, Some(2));
    }

    #[tokio::test]
    async fn test_quota_headroom_shrinks_with_use() {
        let monitor = monitor(Some(4));
        assert!((monitor.signals("b1").await.quota_headroom - 1.0).abs() < f64::EPSILON);
        monitor
            .record_attempt("b1", Duration::from_millis(10), false)
            .await;
        let headroom = monitor.signals("b1").await.quota_headroom;
        assert!((headroom - 0.75).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_failed_probe_marks_unavailable() {
        let monitor = monitor(None);
        assert!(monitor.has_capacity("b1").await);
        monitor.record_probe("b1", false).await;
        assert!(!monitor.has_capacity("b1").await);
        monitor.record_probe("b1", true).await;
        assert!(monitor.has_capacity("b1").await);
    }

    #[tokio::test]
    async fn test_old_samples_fall_out_of_window() {
        let config = HealthConfig {
            short_window_secs: 0,
            long_window_secs: 0,
            probe_interval_secs: 300,
        };
        let monitor = HealthMonitor::new(config, &[descriptor("b1", None)]);
        monitor
            .record_attempt("b1", Duration::from_millis(10), true)
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        let signals = monitor.signals("b1").await;
        assert_eq!(signals.error_rate_short, 0.0);
    }

    #[tokio::test]
    async fn test_unknown_backend_is_ignored() {
        let monitor = monitor(None);
        monitor
            .record_attempt("nope", Duration::from_millis(10), true)
            .await;
        assert!(!monitor.has_capacity("nope").await);
    }
}
