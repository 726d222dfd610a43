//! Cache-aside resolution of candidate skills.
//!
//! One batch cache read, one batch store query for the misses, one batch
//! cache write. Cache failures never fail a read; store failures do.

use crate::errors::AppError;
use crate::skill_cache::{CacheLookup, SkillCache};
use crate::store::CandidateStore;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

type SkillMap = HashMap<i64, Vec<String>>;
type Slot = watch::Receiver<Option<Arc<Vec<String>>>>;

#[derive(Clone)]
pub struct SkillResolver {
    store: Arc<dyn CandidateStore>,
    cache: Arc<dyn SkillCache>,
    ttl: Duration,
    in_flight: Option<Arc<InFlight>>,
}

impl SkillResolver {
    pub fn new(store: Arc<dyn CandidateStore>, cache: Arc<dyn SkillCache>, ttl: Duration) -> Self {
        Self {
            store,
            cache,
            ttl,
            in_flight: None,
        }
    }

    /// Collapses concurrent misses for the same id into one store query.
    pub fn with_single_flight(mut self) -> Self {
        self.in_flight = Some(Arc::new(InFlight::default()));
        self
    }

    pub async fn resolve_skills(&self, ids: &[i64]) -> Result<SkillMap, AppError> {
        let mut seen = HashSet::with_capacity(ids.len());
        let ids: Vec<i64> = ids.iter().copied().filter(|id| seen.insert(*id)).collect();
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let CacheLookup { mut hits, misses } = match self.cache.get_batch(&ids).await {
            Ok(lookup) => lookup,
            Err(e) => {
                tracing::warn!("Skill cache read failed, falling back to store: {}", e);
                CacheLookup {
                    hits: HashMap::new(),
                    misses: ids.clone(),
                }
            }
        };

        if misses.is_empty() {
            return Ok(hits);
        }

        tracing::debug!(
            "Skill cache: {} hit(s), {} miss(es)",
            hits.len(),
            misses.len()
        );

        let resolved = match self.in_flight {
            Some(ref in_flight) => self.resolve_single_flight(in_flight, &misses).await?,
            None => self.load_and_backfill(&misses).await?,
        };
        hits.extend(resolved);
        Ok(hits)
    }

    /// Queries the store for `ids`, backfills the cache and returns the result.
    /// Every id is present in the output, empty when it has no skills.
    async fn load_and_backfill(&self, ids: &[i64]) -> Result<SkillMap, AppError> {
        let rows = self.store.list_skills(ids).await?;

        let mut resolved: SkillMap = ids.iter().map(|&id| (id, Vec::new())).collect();
        for row in rows {
            if let Some(skills) = resolved.get_mut(&row.candidate_id) {
                skills.push(row.name);
            }
        }

        if let Err(e) = self.cache.set_batch(&resolved, self.ttl).await {
            tracing::warn!(
                "Skill cache write failed for {} candidate(s): {}",
                resolved.len(),
                e
            );
        }

        Ok(resolved)
    }

    async fn resolve_single_flight(
        &self,
        in_flight: &Arc<InFlight>,
        misses: &[i64],
    ) -> Result<SkillMap, AppError> {
        let Claim { leader, followers } = in_flight.claim(misses);

        let mut resolved = SkillMap::with_capacity(misses.len());
        if !leader.ids.is_empty() {
            let loaded = self.load_and_backfill(&leader.ids).await?;
            leader.publish(&loaded);
            resolved.extend(loaded);
        }
        // Release our slots before waiting on other loads. A miss that arrives
        // later, e.g. after an invalidation, must query the store itself.
        drop(leader);

        let mut orphaned = Vec::new();
        for (id, mut slot) in followers {
            let published = slot
                .wait_for(Option::is_some)
                .await
                .map(|value| value.as_deref().cloned().unwrap_or_default());
            match published {
                Ok(skills) => {
                    resolved.insert(id, skills);
                }
                // The leader gave up without publishing.
                Err(_) => orphaned.push(id),
            }
        }

        if !orphaned.is_empty() {
            resolved.extend(self.load_and_backfill(&orphaned).await?);
        }
        Ok(resolved)
    }
}

/// Ids currently being loaded from the store, each with a slot that receives
/// the loaded skills.
#[derive(Default)]
struct InFlight {
    slots: Mutex<HashMap<i64, Slot>>,
}

struct Claim {
    leader: LeaderGuard,
    followers: Vec<(i64, Slot)>,
}

impl InFlight {
    /// Registers the ids nobody is loading yet and returns the slots of the
    /// ones already being loaded.
    fn claim(self: &Arc<Self>, ids: &[i64]) -> Claim {
        let mut slots = self
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut leader_ids = Vec::new();
        let mut senders = HashMap::new();
        let mut followers = Vec::new();
        for &id in ids {
            match slots.get(&id) {
                Some(slot) => followers.push((id, slot.clone())),
                None => {
                    let (tx, rx) = watch::channel(None);
                    slots.insert(id, rx);
                    senders.insert(id, tx);
                    leader_ids.push(id);
                }
            }
        }

        Claim {
            leader: LeaderGuard {
                owner: Arc::clone(self),
                ids: leader_ids,
                senders,
            },
            followers,
        }
    }

    fn release(&self, ids: &[i64]) {
        let mut slots = self
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for id in ids {
            slots.remove(id);
        }
    }
}

/// Owns the slots this request registered. Dropping it, published or not,
/// removes them so later misses start a fresh load.
struct LeaderGuard {
    owner: Arc<InFlight>,
    ids: Vec<i64>,
    senders: HashMap<i64, watch::Sender<Option<Arc<Vec<String>>>>>,
}

impl LeaderGuard {
    fn publish(&self, loaded: &SkillMap) {
        for (id, tx) in &self.senders {
            let skills = loaded.get(id).cloned().unwrap_or_default();
            // send_replace stores the value even when no follower is waiting.
            tx.send_replace(Some(Arc::new(skills)));
        }
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        self.owner.release(&self.ids);
    }
}
