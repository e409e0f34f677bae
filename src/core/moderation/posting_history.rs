// When each author last posted on each feed, for frequency rules.
//
// Shared by every feed supervisor. DashMap shards the keys so feeds don't contend, and
// timestamps older than the retention window are evicted so memory stays bounded by
// recent activity.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

/// Retention when no configured rule declares a window.
pub const DEFAULT_RETENTION_HOURS: i64 = 24;

/// Run a full sweep for stale keys every this many records.
const SWEEP_EVERY: u64 = 256;

#[derive(Hash, Eq, PartialEq, Clone, Debug)]
struct AuthorFeedKey {
    author: String,
    feed: String,
}

pub struct PostingHistory {
    entries: DashMap<AuthorFeedKey, VecDeque<DateTime<Utc>>>,
    retention: Duration,
    records: AtomicU64,
}

impl PostingHistory {
    pub fn new(retention: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            retention,
            records: AtomicU64::new(0),
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Append a post time for `(author, feed)` and evict what has aged out.
    pub fn record(&self, author: &str, feed: &str, at: DateTime<Utc>) {
        let cutoff = at - self.retention;
        {
            let mut times = self
                .entries
                .entry(AuthorFeedKey {
                    author: author.to_string(),
                    feed: feed.to_string(),
                })
                .or_default();
            times.push_back(at);
            while times.front().is_some_and(|t| *t <= cutoff) {
                times.pop_front();
            }
        }

        if self.records.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            let removed = self.prune_expired(at);
            if removed > 0 {
                tracing::debug!(removed, "Swept stale posting history entries");
            }
        }
    }

    /// Posts by `author` on `feed` strictly after `since`.
    pub fn count_since(&self, author: &str, feed: &str, since: DateTime<Utc>) -> usize {
        let key = AuthorFeedKey {
            author: author.to_string(),
            feed: feed.to_string(),
        };
        self.entries
            .get(&key)
            .map(|times| times.iter().filter(|t| **t > since).count())
            .unwrap_or(0)
    }

    /// Drop every timestamp older than the retention window, and keys left empty.
    /// Returns the number of timestamps removed.
    pub fn prune_expired(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.retention;
        let mut removed = 0;
        self.entries.retain(|_, times| {
            let before = times.len();
            times.retain(|t| *t > cutoff);
            removed += before - times.len();
            !times.is_empty()
        });
        removed
    }

    #[allow(dead_code)]
    pub fn tracked_keys(&self) -> usize {
        self.entries.len()
    }
}

impl Default for PostingHistory {
    fn default() -> Self {
        Self::new(Duration::hours(DEFAULT_RETENTION_HOURS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_count_is_per_author_and_feed() {
        let history = PostingHistory::default();
        let now = Utc::now();
        history.record("alice", "rust", now - Duration::minutes(10));
        history.record("alice", "rust", now - Duration::minutes(5));
        history.record("alice", "golang", now);
        history.record("bob", "rust", now);

        let since = now - Duration::hours(1);
        assert_eq!(history.count_since("alice", "rust", since), 2);
        assert_eq!(history.count_since("alice", "golang", since), 1);
        assert_eq!(history.count_since("carol", "rust", since), 0);
    }

    #[test]
    fn test_window_boundary_is_exclusive() {
        let history = PostingHistory::default();
        let now = Utc::now();
        let edge = now - Duration::hours(1);
        history.record("alice", "rust", edge);
        assert_eq!(history.count_since("alice", "rust", edge), 0);
    }

    #[test]
    fn test_record_evicts_beyond_retention() {
        let history = PostingHistory::new(Duration::hours(1));
        let now = Utc::now();
        history.record("alice", "rust", now - Duration::hours(3));
        history.record("alice", "rust", now);

        let far_past = now - Duration::days(30);
        assert_eq!(history.count_since("alice", "rust", far_past), 1);
    }

    #[test]
    fn test_prune_drops_stale_keys() {
        let history = PostingHistory::new(Duration::minutes(30));
        let now = Utc::now();
        history.record("alice", "rust", now - Duration::hours(2));
        history.record("bob", "rust", now);

        let removed = history.prune_expired(now);
        assert_eq!(removed, 1);
        assert_eq!(history.tracked_keys(), 1);
    }

    #[test]
    fn test_concurrent_records_from_many_feeds() {
        let history = Arc::new(PostingHistory::default());
        let now = Utc::now();

        let handles: Vec<_> = ["rust", "golang", "python", "zig"]
            .into_iter()
            .map(|feed| {
                let history = Arc::clone(&history);
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        history.record("alice", feed, now);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let since = now - Duration::minutes(1);
        for feed in ["rust", "golang", "python", "zig"] {
            assert_eq!(history.count_since("alice", feed, since), 500);
        }
    }
}
