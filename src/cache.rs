use crate::models::{CacheEntry, ResourceId};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Process-wide image cache shared by every coordinator and region.
///
/// Each operation is a single atomic step per resource id.
#[derive(Clone, Default)]
pub struct CacheStore {
    entries: Arc<DashMap<ResourceId, CacheEntry>>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, resource: &ResourceId) -> Option<CacheEntry> {
        self.entries.get(resource).map(|entry| entry.clone())
    }

    pub fn contains(&self, resource: &ResourceId) -> bool {
        self.entries.contains_key(resource)
    }

    /// Inserts or replaces the entry for `entry.resource`, marking it as used now.
    pub fn put(&self, mut entry: CacheEntry) {
        entry.last_used_at = Instant::now();
        self.entries.insert(entry.resource.clone(), entry);
    }

    pub fn touch(&self, resource: &ResourceId) {
        if let Some(mut entry) = self.entries.get_mut(resource) {
            entry.last_used_at = Instant::now();
        }
    }

    /// Returns whether an entry was present.
    pub fn remove(&self, resource: &ResourceId) -> bool {
        self.entries.remove(resource).is_some()
    }

    /// Drops every entry idle for longer than `ttl` at `now`, returning how many went away.
    pub fn evict_expired(&self, now: Instant, ttl: Duration) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.last_used_at) <= ttl);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Runs [`evict_expired`](Self::evict_expired) right away and then every `every`.
    ///
    /// `every` is raised to one second if it is shorter.
    pub fn spawn_sweeper(&self, ttl: Duration, every: Duration) -> JoinHandle<()> {
        if every < MIN_SWEEP_INTERVAL {
            warn!(?every, "Cache sweep interval too short, using {:?}", MIN_SWEEP_INTERVAL);
        }
        let every = every.max(MIN_SWEEP_INTERVAL);
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let evicted = store.evict_expired(Instant::now(), ttl);
                if evicted > 0 {
                    info!(evicted, remaining = store.len(), "Evicted idle images");
                } else {
                    debug!(remaining = store.len(), "Cache sweep found nothing to evict");
                }
            }
        })
    }
}
