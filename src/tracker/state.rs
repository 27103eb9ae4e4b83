//! In-memory keyed state for the engine.
//!
//! Three small stores keep the hot paths off the database: last activity
//! per user, last computed score per user, and the roster of users the
//! background sweeps visit. Absence of a key means "never seen", which is
//! distinct from a zero value. All of them are rebuildable caches; the
//! relational store stays the source of truth.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

/// Last recorded activity time per user.
#[derive(Default)]
pub struct ActivityCache {
    inner: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl ActivityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn touch(&self, user_id: &str, at: DateTime<Utc>) {
        self.inner.write().await.insert(user_id.to_string(), at);
    }

    pub async fn last_activity(&self, user_id: &str) -> Option<DateTime<Utc>> {
        self.inner.read().await.get(user_id).copied()
    }
}

/// Last computed engagement score per user.
#[derive(Default)]
pub struct ScoreCache {
    inner: RwLock<HashMap<String, f64>>,
}

impl ScoreCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, user_id: &str, score: f64) {
        self.inner.write().await.insert(user_id.to_string(), score);
    }

    pub async fn get(&self, user_id: &str) -> Option<f64> {
        self.inner.read().await.get(user_id).copied()
    }
}

/// Users the background sweeps should visit, keyed by the last time real
/// activity marked them. Sweep visits do not refresh the mark, so idle
/// users age out.
#[derive(Default)]
pub struct ActiveRoster {
    inner: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl ActiveRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn mark(&self, user_id: &str, at: DateTime<Utc>) {
        self.inner.write().await.insert(user_id.to_string(), at);
    }

    /// The users currently eligible for sweeping.
    pub async fn snapshot(&self) -> Vec<String> {
        self.inner.read().await.keys().cloned().collect()
    }

    /// Drop users whose last mark is older than `ttl`. Returns how many
    /// were evicted.
    pub async fn evict_idle(&self, ttl: Duration) -> usize {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(24));
        let cutoff = Utc::now() - ttl;
        let mut inner = self.inner.write().await;
        let before = inner.len();
        inner.retain(|_, marked| *marked > cutoff);
        before - inner.len()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn activity_cache_roundtrip() {
        let cache = ActivityCache::new();
        assert!(cache.last_activity("u1").await.is_none());

        let t1 = Utc::now() - chrono::Duration::minutes(10);
        cache.touch("u1", t1).await;
        assert_eq!(cache.last_activity("u1").await, Some(t1));

        let t2 = Utc::now();
        cache.touch("u1", t2).await;
        assert_eq!(cache.last_activity("u1").await, Some(t2));
        assert!(cache.last_activity("u2").await.is_none());
    }

    #[tokio::test]
    async fn score_cache_zero_is_not_absence() {
        let cache = ScoreCache::new();
        assert_eq!(cache.get("u1").await, None);

        cache.put("u1", 0.0).await;
        assert_eq!(cache.get("u1").await, Some(0.0));

        cache.put("u1", 72.5).await;
        assert_eq!(cache.get("u1").await, Some(72.5));
    }

    #[tokio::test]
    async fn roster_snapshot_and_eviction() {
        let roster = ActiveRoster::new();
        roster.mark("stale", Utc::now() - chrono::Duration::hours(48)).await;
        roster.mark("fresh", Utc::now()).await;
        assert_eq!(roster.len().await, 2);

        let mut users = roster.snapshot().await;
        users.sort();
        assert_eq!(users, vec!["fresh".to_string(), "stale".to_string()]);

        let evicted = roster.evict_idle(Duration::from_secs(24 * 3600)).await;
        assert_eq!(evicted, 1);
        assert_eq!(roster.snapshot().await, vec!["fresh".to_string()]);
    }

    #[tokio::test]
    async fn roster_remark_resets_age() {
        let roster = ActiveRoster::new();
        roster.mark("u1", Utc::now() - chrono::Duration::hours(48)).await;
        roster.mark("u1", Utc::now()).await;

        let evicted = roster.evict_idle(Duration::from_secs(24 * 3600)).await;
        assert_eq!(evicted, 0);
        assert_eq!(roster.len().await, 1);
    }
}
