//! Skill cache: candidate id -> ordered skill names, with per-entry TTL.

use crate::cache_validator::ValidatedSkills;
use crate::errors::AppError;
use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Result of a batch cache read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheLookup {
    pub hits: HashMap<i64, Vec<String>>,
    /// Ids that were absent or held an undecodable entry, in request order.
    pub misses: Vec<i64>,
}

#[async_trait]
pub trait SkillCache: Send + Sync {
    async fn get_batch(&self, ids: &[i64]) -> Result<CacheLookup, AppError>;

    async fn set_batch(
        &self,
        entries: &HashMap<i64, Vec<String>>,
        ttl: Duration,
    ) -> Result<(), AppError>;

    /// Drops the entry for a candidate whose skill set changed.
    async fn invalidate(&self, candidate_id: i64) -> Result<(), AppError>;
}

/// Sealed payload plus the TTL it was written with.
#[derive(Debug, Clone)]
struct CachedSkills {
    payload: String,
    ttl: Duration,
}

struct PerEntryTtl;

impl Expiry<i64, CachedSkills> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &i64,
        value: &CachedSkills,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &i64,
        value: &CachedSkills,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process skill cache backed by moka.
#[derive(Clone)]
pub struct MokaSkillCache {
    inner: Cache<i64, CachedSkills>,
}

impl MokaSkillCache {
    pub fn new(max_capacity: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(PerEntryTtl)
            .build();
        Self { inner }
    }

    async fn insert_payload(&self, candidate_id: i64, payload: String, ttl: Duration) {
        self.inner
            .insert(candidate_id, CachedSkills { payload, ttl })
            .await;
    }
}

#[async_trait]
impl SkillCache for MokaSkillCache {
    async fn get_batch(&self, ids: &[i64]) -> Result<CacheLookup, AppError> {
        let mut lookup = CacheLookup {
            hits: HashMap::with_capacity(ids.len()),
            misses: Vec::new(),
        };

        for &id in ids {
            match self.inner.get(&id).await {
                Some(cached) => match ValidatedSkills::open(&cached.payload) {
                    Some(skills) => {
                        lookup.hits.insert(id, skills);
                    }
                    None => lookup.misses.push(id),
                },
                None => lookup.misses.push(id),
            }
        }

        Ok(lookup)
    }

    async fn set_batch(
        &self,
        entries: &HashMap<i64, Vec<String>>,
        ttl: Duration,
    ) -> Result<(), AppError> {
        for (&id, skills) in entries {
            self.insert_payload(id, ValidatedSkills::seal(skills), ttl)
                .await;
        }
        Ok(())
    }

    async fn invalidate(&self, candidate_id: i64) -> Result<(), AppError> {
        self.inner.invalidate(&candidate_id).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(pairs: &[(i64, &[&str])]) -> HashMap<i64, Vec<String>> {
        pairs
            .iter()
            .map(|(id, names)| (*id, names.iter().map(|s| s.to_string()).collect()))
            .collect()
    }

    #[tokio::test]
    async fn test_batch_round_trip_reports_misses() {
        let cache = MokaSkillCache::new(100);
        cache
            .set_batch(&entries(&[(1, &["rust"]), (2, &[])]), Duration::from_secs(60))
            .await
            .unwrap();

        let lookup = cache.get_batch(&[1, 2, 3]).await.unwrap();
        assert_eq!(lookup.hits.get(&1), Some(&vec!["rust".to_string()]));
        assert_eq!(lookup.hits.get(&2), Some(&vec![]));
        assert_eq!(lookup.misses, vec![3]);
    }

    #[tokio::test]
    async fn test_corrupt_payload_is_a_miss() {
        let cache = MokaSkillCache::new(100);
        cache
            .insert_payload(9, "{\"skills\":[\"x\"],\"checksum\":\"bad\"}".into(), Duration::from_secs(60))
            .await;
        cache
            .insert_payload(10, "garbage".into(), Duration::from_secs(60))
            .await;

        let lookup = cache.get_batch(&[9, 10]).await.unwrap();
        assert!(lookup.hits.is_empty());
        assert_eq!(lookup.misses, vec![9, 10]);
    }

    #[tokio::test]
    async fn test_invalidate_removes_entry() {
        let cache = MokaSkillCache::new(100);
        cache
            .set_batch(&entries(&[(4, &["go"])]), Duration::from_secs(60))
            .await
            .unwrap();
        cache.invalidate(4).await.unwrap();

        let lookup = cache.get_batch(&[4]).await.unwrap();
        assert_eq!(lookup.misses, vec![4]);
    }

    #[tokio::test]
    async fn test_entries_expire_after_their_ttl() {
        let cache = MokaSkillCache::new(100);
        cache
            .set_batch(&entries(&[(5, &["sql"])]), Duration::from_millis(50))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let lookup = cache.get_batch(&[5]).await.unwrap();
        assert_eq!(lookup.misses, vec![5]);
    }
}
