// Process-wide counters read by the health endpoint.
//
// Writers are the feed supervisors (one per feed) and the dedup store; the only reader
// is `snapshot()`. A single mutex is plenty at this write rate.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

/// Per-feed progress.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeedMetrics {
    pub processed: u64,
    pub last_processed_at: Option<DateTime<Utc>>,
    pub last_item_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LastError {
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Point-in-time copy handed to observers.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub started_at: DateTime<Utc>,
    pub uptime_seconds: f64,
    pub feeds: BTreeMap<String, FeedMetrics>,
    pub actions_taken: u64,
    pub rules_triggered: BTreeMap<String, u64>,
    pub last_error: Option<LastError>,
}

#[derive(Debug, Default)]
struct MetricsData {
    feeds: BTreeMap<String, FeedMetrics>,
    actions_taken: u64,
    rules_triggered: BTreeMap<String, u64>,
    last_error: Option<LastError>,
}

pub struct MetricsCollector {
    started_at: DateTime<Utc>,
    started: Instant,
    data: Mutex<MetricsData>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            started: Instant::now(),
            data: Mutex::new(MetricsData::default()),
        }
    }

    fn data(&self) -> MutexGuard<'_, MetricsData> {
        // Counters stay meaningful even if a writer panicked mid-update.
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Count one processed item for `feed`.
    pub fn record_item(&self, feed: &str, item_id: &str) {
        let mut data = self.data();
        let entry = data.feeds.entry(feed.to_string()).or_default();
        entry.processed += 1;
        entry.last_processed_at = Some(Utc::now());
        entry.last_item_id = Some(item_id.to_string());
    }

    /// Count one successful mutating call (approve, remove or reply).
    pub fn record_action(&self) {
        self.data().actions_taken += 1;
    }

    pub fn record_rule_trigger(&self, rule_name: &str) {
        *self
            .data()
            .rules_triggered
            .entry(rule_name.to_string())
            .or_insert(0) += 1;
    }

    pub fn record_error(&self, message: impl Into<String>) {
        self.data().last_error = Some(LastError {
            message: message.into(),
            at: Utc::now(),
        });
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let data = self.data();
        MetricsSnapshot {
            started_at: self.started_at,
            uptime_seconds: self.started.elapsed().as_secs_f64(),
            feeds: data.feeds.clone(),
            actions_taken: data.actions_taken,
            rules_triggered: data.rules_triggered.clone(),
            last_error: data.last_error.clone(),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_record_item_per_feed() {
        let metrics = MetricsCollector::new();
        metrics.record_item("rust", "a1");
        metrics.record_item("rust", "a2");
        metrics.record_item("golang", "b1");

        let snap = metrics.snapshot();
        assert_eq!(snap.feeds["rust"].processed, 2);
        assert_eq!(snap.feeds["rust"].last_item_id.as_deref(), Some("a2"));
        assert_eq!(snap.feeds["golang"].processed, 1);
        assert!(snap.feeds["golang"].last_processed_at.is_some());
    }

    #[test]
    fn test_rule_triggers_and_errors() {
        let metrics = MetricsCollector::new();
        metrics.record_rule_trigger("require_ad_flair");
        metrics.record_rule_trigger("require_ad_flair");
        metrics.record_action();
        metrics.record_error("stream_rust: 503");

        let snap = metrics.snapshot();
        assert_eq!(snap.rules_triggered["require_ad_flair"], 2);
        assert_eq!(snap.actions_taken, 1);
        assert_eq!(snap.last_error.unwrap().message, "stream_rust: 503");
    }

    #[test]
    fn test_snapshot_is_detached_copy() {
        let metrics = MetricsCollector::new();
        metrics.record_item("rust", "a1");
        let snap = metrics.snapshot();
        metrics.record_item("rust", "a2");
        assert_eq!(snap.feeds["rust"].processed, 1);
    }

    #[test]
    fn test_concurrent_writers() {
        let metrics = Arc::new(MetricsCollector::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let metrics = Arc::clone(&metrics);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        metrics.record_item("rust", &format!("{}-{}", t, i));
                        metrics.record_action();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let snap = metrics.snapshot();
        assert_eq!(snap.feeds["rust"].processed, 800);
        assert_eq!(snap.actions_taken, 800);
    }

    #[test]
    fn test_snapshot_serializes_to_json() {
        let metrics = MetricsCollector::new();
        metrics.record_item("rust", "a1");
        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["feeds"]["rust"]["processed"], 1);
        assert!(json["uptime_seconds"].as_f64().unwrap() >= 0.0);
    }
}
