//! Time-bounded index of build, release and rollback events keyed by source commit.
//!
//! Every insert refreshes the bucket of its commit and then sweeps every bucket
//! that has not been refreshed within the TTL. There is no background timer:
//! eviction only happens as a side effect of new events arriving.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, TimeDelta, Utc};
use shared::domain::CommitEvent;

pub const DEFAULT_COMMIT_EVENT_TTL_SECS: i64 = 60 * 60;

#[derive(Debug, Clone, PartialEq)]
pub struct CommitBucket {
    pub events: BTreeMap<String, CommitEvent>,
    pub updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommitEventWindow {
    ttl: TimeDelta,
    buckets: HashMap<String, CommitBucket>,
}

impl Default for CommitEventWindow {
    fn default() -> Self {
        Self::with_ttl(TimeDelta::seconds(DEFAULT_COMMIT_EVENT_TTL_SECS))
    }
}

impl CommitEventWindow {
    pub fn with_ttl(ttl: TimeDelta) -> Self {
        Self {
            ttl,
            buckets: HashMap::new(),
        }
    }

    pub fn ttl(&self) -> TimeDelta {
        self.ttl
    }

    /// Stores `event` under its commit and returns how many stale buckets were evicted.
    pub fn insert(&mut self, event: CommitEvent, now: DateTime<Utc>) -> usize {
        let bucket = self
            .buckets
            .entry(event.sha.clone())
            .or_insert_with(|| CommitBucket {
                events: BTreeMap::new(),
                updated: now,
            });
        bucket.events.insert(event.id.clone(), event);
        bucket.updated = now;
        self.sweep(now)
    }

    pub fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let ttl = self.ttl;
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.signed_duration_since(bucket.updated) <= ttl);
        before - self.buckets.len()
    }

    pub fn bucket(&self, sha: &str) -> Option<&CommitBucket> {
        self.buckets.get(sha)
    }

    pub fn contains(&self, sha: &str) -> bool {
        self.buckets.contains_key(sha)
    }

    /// Events recorded for `sha`, oldest first.
    pub fn events_for(&self, sha: &str) -> Vec<&CommitEvent> {
        let mut events: Vec<_> = self
            .buckets
            .get(sha)
            .map(|bucket| bucket.events.values().collect())
            .unwrap_or_default();
        events.sort_by_key(|event| event.created);
        events
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
