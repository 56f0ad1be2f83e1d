use crate::cache::CacheStore;
use crate::client::ImageClient;
use crate::error::ImageError;
use crate::models::{CacheEntry, Payload, ResourceId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Result of a finished cycle. Failures are reported as values, never raised.
pub type FetchOutcome = Result<Freshness, ImageError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// A new body was fetched and stored.
    Updated,
    /// The cached entry is still current; no body was fetched.
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Success,
    NotFound,
    Error,
}

impl Settlement {
    fn of(outcome: &FetchOutcome) -> Self {
        match outcome {
            Ok(_) => Settlement::Success,
            Err(ImageError::NotFound) => Settlement::NotFound,
            Err(_) => Settlement::Error,
        }
    }
}

/// Where the fetch of a resource currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    Idle,
    Checking,
    Fetching,
    Settled(Settlement),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchRequest {
    /// Ask the server for the content hash before downloading the body.
    pub check_hash: bool,
    /// Download the body even if the hash matches the cached entry.
    pub force: bool,
}

impl FetchRequest {
    pub fn revalidate(check_hash: bool) -> Self {
        Self {
            check_hash,
            force: false,
        }
    }

    pub fn forced(check_hash: bool) -> Self {
        Self {
            check_hash,
            force: true,
        }
    }
}

type SharedFetch = Shared<BoxFuture<'static, FetchOutcome>>;

struct InFlight {
    id: u64,
    forced: bool,
    fetch: SharedFetch,
}

/// Removes the in-flight marker of a fetch however its task ends.
struct FlightGuard<C: ImageClient> {
    coordinator: FetchCoordinator<C>,
    resource: ResourceId,
    id: u64,
}

impl<C: ImageClient> Drop for FlightGuard<C> {
    fn drop(&mut self) {
        let id = self.id;
        self.coordinator.transition(&self.resource, FetchState::Idle);
        self.coordinator
            .in_flight
            .remove_if(&self.resource, |_, flight| flight.id == id);
    }
}

/// Fetches images into a [`CacheStore`], at most one request chain per resource at a time.
///
/// Every fetch runs as its own task, so it completes and fills the cache even when all of the
/// callers waiting for it have gone away.
pub struct FetchCoordinator<C> {
    client: Arc<C>,
    store: CacheStore,
    in_flight: Arc<DashMap<ResourceId, InFlight>>,
    states: Arc<DashMap<ResourceId, FetchState>>,
    next_flight: Arc<AtomicU64>,
}

impl<C> Clone for FetchCoordinator<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            store: self.store.clone(),
            in_flight: Arc::clone(&self.in_flight),
            states: Arc::clone(&self.states),
            next_flight: Arc::clone(&self.next_flight),
        }
    }
}

impl<C: ImageClient> FetchCoordinator<C> {
    pub fn new(client: C, store: CacheStore) -> Self {
        Self {
            client: Arc::new(client),
            store,
            in_flight: Default::default(),
            states: Default::default(),
            next_flight: Default::default(),
        }
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn current_entry_for(&self, resource: &ResourceId) -> Option<Payload> {
        self.store.get(resource).map(|entry| entry.payload)
    }

    pub fn is_loading(&self, resource: &ResourceId) -> bool {
        self.in_flight.contains_key(resource)
    }

    pub fn state(&self, resource: &ResourceId) -> FetchState {
        self.states
            .get(resource)
            .map(|state| *state)
            .unwrap_or(FetchState::Idle)
    }

    /// Downloads the body even when the server hash matches the cached one.
    pub async fn force_refresh(&self, resource: &ResourceId, check_hash: bool) -> FetchOutcome {
        self.run_cycle(resource, FetchRequest::forced(check_hash)).await
    }

    /// Runs one revalidation cycle, joining the fetch already in flight for `resource` if any.
    ///
    /// A forced request that joined a revalidation which skipped the body starts its own fetch
    /// once that one has settled.
    pub async fn run_cycle(&self, resource: &ResourceId, request: FetchRequest) -> FetchOutcome {
        self.store.touch(resource);

        if !request.check_hash && !request.force && self.store.contains(resource) {
            return Ok(Freshness::Unchanged);
        }

        loop {
            let (fetch, forced) = self.join_or_start(resource, request);
            let outcome = fetch.await;
            if request.force && !forced && matches!(outcome, Ok(Freshness::Unchanged)) {
                debug!(resource = %resource, "Joined fetch skipped the body, fetching again");
                continue;
            }
            return outcome;
        }
    }

    /// Waits for the fetch currently in flight for `resource`, if there is one.
    pub async fn settled(&self, resource: &ResourceId) {
        let fetch = self
            .in_flight
            .get(resource)
            .map(|flight| flight.fetch.clone());
        if let Some(fetch) = fetch {
            let _ = fetch.await;
        }
    }

    /// Returns the shared fetch for `resource` and whether it downloads the body unconditionally.
    fn join_or_start(&self, resource: &ResourceId, request: FetchRequest) -> (SharedFetch, bool) {
        match self.in_flight.entry(resource.clone()) {
            Entry::Occupied(flight) => {
                debug!(resource = %resource, "Joining in-flight fetch");
                let flight = flight.get();
                (flight.fetch.clone(), flight.forced)
            }
            Entry::Vacant(slot) => {
                let id = self.next_flight.fetch_add(1, Ordering::Relaxed);
                let guard = FlightGuard {
                    coordinator: self.clone(),
                    resource: resource.clone(),
                    id,
                };
                let coordinator = self.clone();
                let resource = resource.clone();
                let task = tokio::spawn(async move {
                    let _guard = guard;
                    coordinator.fetch(&resource, request).await
                });
                let fetch = task
                    .map(|joined| {
                        joined.unwrap_or_else(|e| {
                            Err(ImageError::Transport(format!("fetch task failed: {}", e)))
                        })
                    })
                    .boxed()
                    .shared();
                slot.insert(InFlight {
                    id,
                    forced: request.force,
                    fetch: fetch.clone(),
                });
                (fetch, request.force)
            }
        }
    }

    async fn fetch(&self, resource: &ResourceId, request: FetchRequest) -> FetchOutcome {
        let outcome = self.check_then_fetch(resource, request).await;

        match &outcome {
            Ok(Freshness::Updated) => debug!(resource = %resource, "Image fetched"),
            Ok(Freshness::Unchanged) => debug!(resource = %resource, "Image unchanged"),
            Err(ImageError::NotFound) => {
                if self.store.remove(resource) {
                    info!(resource = %resource, "Image gone, removed from cache");
                }
            }
            Err(e) => debug!(resource = %resource, error = %e, "Image fetch failed"),
        }

        self.transition(resource, FetchState::Settled(Settlement::of(&outcome)));
        outcome
    }

    async fn check_then_fetch(
        &self,
        resource: &ResourceId,
        request: FetchRequest,
    ) -> FetchOutcome {
        let mut content_hash = None;

        if request.check_hash {
            self.transition(resource, FetchState::Checking);
            let hash = self.client.fetch_hash(resource).await?;
            let cached = self.store.get(resource);
            if !request.force
                && cached.is_some_and(|entry| entry.content_hash.as_deref() == Some(hash.as_str()))
            {
                self.store.touch(resource);
                return Ok(Freshness::Unchanged);
            }
            content_hash = Some(hash);
        }

        self.transition(resource, FetchState::Fetching);
        let body = self.client.fetch_body(resource).await?;
        let payload = Payload::decode(body)?;

        let previous = self.store.get(resource);
        let changed = previous.map_or(true, |p| p.payload.digest() != payload.digest());
        debug!(
            resource = %resource,
            bytes = payload.len(),
            changed,
            "Storing fetched image"
        );
        self.store
            .put(CacheEntry::new(resource.clone(), payload, content_hash));
        Ok(Freshness::Updated)
    }

    fn transition(&self, resource: &ResourceId, state: FetchState) {
        debug!(resource = %resource, state = ?state, "Fetch state");
        match state {
            FetchState::Idle => {
                self.states.remove(resource);
            }
            state => {
                self.states.insert(resource.clone(), state);
            }
        }
    }
}
