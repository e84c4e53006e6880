//! Processing statistics and health model
//!
//! Process-wide counters and rolling windows backing `/stats` and
//! `/health`. Counters are atomics; the ring buffers sit behind small
//! mutexes since every writer touches them briefly.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

/// Samples kept for the events/sec estimate.
const RATE_SAMPLES: usize = 60;
/// Alert timestamps retained (one day at one per minute).
const ALERT_WINDOW_CAP: usize = 1440;
/// Recently-seen event ids retained for deduplication.
const DEDUP_CAPACITY: usize = 1000;

/// Engine lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    Starting,
    Operational,
    Degraded,
}

impl std::fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            EngineStatus::Starting => "starting",
            EngineStatus::Operational => "operational",
            EngineStatus::Degraded => "degraded",
        };
        f.write_str(label)
    }
}

/// Bounded FIFO of recently processed event ids.
struct DedupRing {
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl DedupRing {
    fn new() -> Self {
        DedupRing {
            order: VecDeque::with_capacity(DEDUP_CAPACITY),
            seen: HashSet::with_capacity(DEDUP_CAPACITY),
        }
    }

    /// True if the id was already present; otherwise records it,
    /// evicting the oldest entry at capacity.
    fn check_and_insert(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return true;
        }
        if self.order.len() == DEDUP_CAPACITY {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        self.order.push_back(id.to_string());
        self.seen.insert(id.to_string());
        false
    }
}

/// Process-wide statistics for the detection engine.
pub struct ProcessingStats {
    started_at: Instant,
    processed_logs: AtomicU64,
    processing_rate: AtomicU64,
    total_rules: AtomicUsize,
    enabled_rules: AtomicUsize,
    rules_loaded: AtomicBool,
    status: Mutex<EngineStatus>,
    rate_samples: Mutex<VecDeque<(Instant, u64)>>,
    alert_times: Mutex<VecDeque<DateTime<Utc>>>,
    recent_ids: Mutex<DedupRing>,
}

impl ProcessingStats {
    pub fn new() -> Self {
        ProcessingStats {
            started_at: Instant::now(),
            processed_logs: AtomicU64::new(0),
            processing_rate: AtomicU64::new(0),
            total_rules: AtomicUsize::new(0),
            enabled_rules: AtomicUsize::new(0),
            rules_loaded: AtomicBool::new(false),
            status: Mutex::new(EngineStatus::Starting),
            rate_samples: Mutex::new(VecDeque::with_capacity(RATE_SAMPLES)),
            alert_times: Mutex::new(VecDeque::with_capacity(ALERT_WINDOW_CAP)),
            recent_ids: Mutex::new(DedupRing::new()),
        }
    }

    /// True if the event id was seen recently; records it otherwise.
    pub fn seen_recently(&self, id: &str) -> bool {
        self.recent_ids.lock().check_and_insert(id)
    }

    /// Count one processed event and refresh the rate estimate from the
    /// oldest and newest samples in the window.
    pub fn record_processed(&self) {
        let count = self.processed_logs.fetch_add(1, Ordering::Relaxed) + 1;
        let mut samples = self.rate_samples.lock();
        if samples.len() == RATE_SAMPLES {
            samples.pop_front();
        }
        samples.push_back((Instant::now(), count));

        if let (Some((oldest_t, oldest_n)), Some((newest_t, newest_n))) =
            (samples.front().copied(), samples.back().copied())
        {
            let elapsed = newest_t.duration_since(oldest_t).as_secs_f64();
            if elapsed > 0.0 {
                let rate = ((newest_n - oldest_n) as f64 / elapsed) as u64;
                self.processing_rate.store(rate, Ordering::Relaxed);
            }
        }
    }

    /// Push an alert timestamp onto the 24h window.
    pub fn record_alert(&self) {
        let mut alerts = self.alert_times.lock();
        if alerts.len() == ALERT_WINDOW_CAP {
            alerts.pop_front();
        }
        alerts.push_back(Utc::now());
    }

    /// Alerts raised in the last 24 hours; prunes expired entries.
    pub fn alerts_last_24h(&self) -> usize {
        let cutoff = Utc::now() - ChronoDuration::hours(24);
        let mut alerts = self.alert_times.lock();
        while alerts.front().map(|t| *t < cutoff).unwrap_or(false) {
            alerts.pop_front();
        }
        alerts.len()
    }

    pub fn set_rule_counts(&self, total: usize, enabled: usize) {
        self.total_rules.store(total, Ordering::Relaxed);
        self.enabled_rules.store(enabled, Ordering::Relaxed);
    }

    /// Flip the "at least one load has completed" marker. Never reset:
    /// health uses it to tell "never started" from "started but degraded".
    pub fn set_rules_loaded(&self) {
        self.rules_loaded.store(true, Ordering::Relaxed);
    }

    pub fn set_enabled_rules(&self, enabled: usize) {
        self.enabled_rules.store(enabled, Ordering::Relaxed);
    }

    pub fn rules_loaded(&self) -> bool {
        self.rules_loaded.load(Ordering::Relaxed)
    }

    pub fn total_rules(&self) -> usize {
        self.total_rules.load(Ordering::Relaxed)
    }

    pub fn enabled_rules(&self) -> usize {
        self.enabled_rules.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> EngineStatus {
        *self.status.lock()
    }

    pub fn set_status(&self, status: EngineStatus) {
        *self.status.lock() = status;
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn processed_logs(&self) -> u64 {
        self.processed_logs.load(Ordering::Relaxed)
    }

    pub fn processing_rate(&self) -> u64 {
        self.processing_rate.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            enabled_rules: self.enabled_rules(),
            total_rules: self.total_rules(),
            alerts_last_24h: self.alerts_last_24h(),
            processing_rate: self.processing_rate(),
            status: self.status(),
            uptime: self.uptime_secs(),
        }
    }
}

impl Default for ProcessingStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot returned by `/stats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub enabled_rules: usize,
    pub total_rules: usize,
    pub alerts_last_24h: usize,
    pub processing_rate: u64,
    pub status: EngineStatus,
    pub uptime: u64,
}

/// Report returned by `/health`. The details distinguish "never started"
/// from "started but degraded" independent of the status field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: EngineStatus,
    pub rules_loaded: usize,
    pub timestamp: DateTime<Utc>,
    pub details: HealthDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthDetails {
    pub rules_dir_exists: bool,
    pub rules_loaded: bool,
    pub enabled_rules: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let stats = ProcessingStats::new();
        assert_eq!(stats.status(), EngineStatus::Starting);
        assert_eq!(stats.processed_logs(), 0);
        assert!(!stats.rules_loaded());
        assert_eq!(stats.alerts_last_24h(), 0);
    }

    #[test]
    fn test_dedup_ring_detects_repeats() {
        let stats = ProcessingStats::new();
        assert!(!stats.seen_recently("log-1"));
        assert!(stats.seen_recently("log-1"));
        assert!(!stats.seen_recently("log-2"));
    }

    #[test]
    fn test_dedup_ring_evicts_oldest() {
        let mut ring = DedupRing::new();
        for i in 0..DEDUP_CAPACITY {
            assert!(!ring.check_and_insert(&format!("id-{i}")));
        }
        // Capacity reached: inserting one more evicts id-0.
        assert!(!ring.check_and_insert("overflow"));
        assert!(!ring.check_and_insert("id-0"));
        assert!(ring.check_and_insert("overflow"));
    }

    #[test]
    fn test_processed_counter_and_rate() {
        let stats = ProcessingStats::new();
        for _ in 0..5 {
            stats.record_processed();
        }
        assert_eq!(stats.processed_logs(), 5);
        // Samples land within microseconds of each other, so the rate may
        // round to anything; only the counter is asserted here.
    }

    #[test]
    fn test_alert_window_counts_recent() {
        let stats = ProcessingStats::new();
        stats.record_alert();
        stats.record_alert();
        assert_eq!(stats.alerts_last_24h(), 2);
    }

    #[test]
    fn test_alert_window_prunes_expired() {
        let stats = ProcessingStats::new();
        stats
            .alert_times
            .lock()
            .push_back(Utc::now() - ChronoDuration::hours(25));
        stats.record_alert();
        assert_eq!(stats.alerts_last_24h(), 1);
    }

    #[test]
    fn test_status_transitions() {
        let stats = ProcessingStats::new();
        stats.set_rule_counts(10, 3);
        stats.set_rules_loaded();
        stats.set_status(EngineStatus::Operational);
        assert_eq!(stats.status(), EngineStatus::Operational);
        assert_eq!(stats.total_rules(), 10);
        assert_eq!(stats.enabled_rules(), 3);
        assert!(stats.rules_loaded());

        stats.set_status(EngineStatus::Degraded);
        assert_eq!(stats.status(), EngineStatus::Degraded);
    }

    #[test]
    fn test_snapshot_reflects_counters() {
        let stats = ProcessingStats::new();
        stats.set_rule_counts(4, 2);
        stats.set_status(EngineStatus::Operational);
        stats.record_alert();

        let snap = stats.snapshot();
        assert_eq!(snap.total_rules, 4);
        assert_eq!(snap.enabled_rules, 2);
        assert_eq!(snap.alerts_last_24h, 1);
        assert_eq!(snap.status, EngineStatus::Operational);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&EngineStatus::Degraded).unwrap(),
            "\"degraded\""
        );
    }
}
