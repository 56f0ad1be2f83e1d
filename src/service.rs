use crate::cache::CacheStore;
use crate::client::ImageClient;
use crate::config::Config;
use crate::coordinator::FetchCoordinator;
use crate::models::ResourceId;
use crate::region::{ImageOptions, ImageRegion};
use crate::visibility::{PageVisibility, VisibilityTracker};
use tokio::task::JoinHandle;
use tracing::info;

/// Owns everything shared between image regions: the cache, the coordinator, the page
/// visibility and the cache sweeper.
///
/// Create one per process inside a tokio runtime and hand out regions from it. Dropping the
/// service stops the sweeper.
pub struct ImageService<C> {
    config: Config,
    store: CacheStore,
    coordinator: FetchCoordinator<C>,
    page: PageVisibility,
    sweeper: JoinHandle<()>,
}

impl<C: ImageClient> ImageService<C> {
    pub fn new(config: Config, client: C) -> Self {
        let store = CacheStore::new();
        let coordinator = FetchCoordinator::new(client, store.clone());
        let sweeper = store.spawn_sweeper(config.cache_ttl(), config.cache_sweep_interval());

        info!(
            ttl_secs = config.cache_ttl_secs,
            sweep_secs = config.cache_sweep_interval_secs,
            refresh_secs = config.refresh_interval_secs,
            "Image cache started"
        );

        Self {
            config,
            store,
            coordinator,
            page: PageVisibility::new(true),
            sweeper,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn coordinator(&self) -> &FetchCoordinator<C> {
        &self.coordinator
    }

    pub fn page(&self) -> &PageVisibility {
        &self.page
    }

    /// Options derived from the service configuration, without callbacks.
    pub fn default_options(&self) -> ImageOptions {
        ImageOptions::from_config(&self.config)
    }

    /// Creates an unmounted region for `resource`. Nothing is fetched until it becomes active.
    pub fn region(
        &self,
        resource: impl Into<ResourceId>,
        options: ImageOptions,
    ) -> ImageRegion<C> {
        let tracker = VisibilityTracker::new(&self.page, self.config.visibility_threshold);
        ImageRegion::spawn(resource.into(), self.coordinator.clone(), tracker, options)
    }
}

impl<C> Drop for ImageService<C> {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}
