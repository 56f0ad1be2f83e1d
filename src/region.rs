use crate::client::ImageClient;
use crate::config::{Config, NotInViewHandling, ProblemHandling};
use crate::coordinator::{FetchCoordinator, FetchOutcome, FetchRequest, Freshness};
use crate::error::ImageError;
use crate::models::{Payload, ResourceId};
use crate::visibility::{ActiveSignal, VisibilityTracker};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

const MIN_CYCLE_DELAY: Duration = Duration::from_millis(100);

type ReadyCallback = Arc<dyn Fn(&ResourceId) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&ResourceId, &ImageError) + Send + Sync>;

/// The ready/error pair invoked once per settled cycle.
#[derive(Clone, Default)]
pub struct Callbacks {
    on_ready: Option<ReadyCallback>,
    on_error: Option<ErrorCallback>,
}

impl Callbacks {
    pub fn on_ready(mut self, f: impl Fn(&ResourceId) + Send + Sync + 'static) -> Self {
        self.on_ready = Some(Arc::new(f));
        self
    }

    pub fn on_error(
        mut self,
        f: impl Fn(&ResourceId, &ImageError) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    fn dispatch(&self, resource: &ResourceId, outcome: &FetchOutcome) {
        match outcome {
            Ok(Freshness::Updated) => {
                if let Some(on_ready) = &self.on_ready {
                    on_ready(resource);
                }
            }
            Ok(Freshness::Unchanged) => {}
            Err(e) => {
                if let Some(on_error) = &self.on_error {
                    on_error(resource, e);
                }
            }
        }
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_ready", &self.on_ready.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct ImageOptions {
    pub check_hash: bool,
    pub refresh_interval: Duration,
    pub retry_delay: Duration,
    pub problem_handling: ProblemHandling,
    pub not_in_view: NotInViewHandling,
    /// Substitute source handed to the rendering layer with [`RenderState::Fallback`].
    pub fallback: Option<ResourceId>,
    pub callbacks: Callbacks,
}

impl ImageOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            check_hash: config.check_hash,
            refresh_interval: config.refresh_interval(),
            retry_delay: config.retry_delay(),
            problem_handling: config.problem_handling,
            not_in_view: config.not_in_view,
            fallback: config.fallback.as_deref().map(ResourceId::from),
            callbacks: Callbacks::default(),
        }
    }

    pub fn with_callbacks(mut self, callbacks: Callbacks) -> Self {
        self.callbacks = callbacks;
        self
    }
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// What the rendering layer should draw for a region right now.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderState {
    Image(Payload),
    /// Nothing to show yet, a fetch is outstanding or has not happened.
    Loading,
    /// Draw the configured substitute source, or a built-in placeholder without one.
    Fallback(Option<ResourceId>),
    Hidden,
    Failed(ImageError),
}

struct RegionShared<C> {
    id: Uuid,
    resource: ResourceId,
    coordinator: FetchCoordinator<C>,
    options: ImageOptions,
    last_error: Mutex<Option<ImageError>>,
    settled_once: AtomicBool,
}

impl<C: ImageClient> RegionShared<C> {
    async fn cycle(&self, request: FetchRequest) -> FetchOutcome {
        let outcome = self.coordinator.run_cycle(&self.resource, request).await;
        self.record(&outcome);
        self.options.callbacks.dispatch(&self.resource, &outcome);
        outcome
    }

    fn record(&self, outcome: &FetchOutcome) {
        self.settled_once.store(true, Ordering::Release);
        let mut last_error = self.last_error.lock().unwrap_or_else(|e| e.into_inner());
        *last_error = outcome.as_ref().err().cloned();
    }

    fn next_delay(&self, outcome: &FetchOutcome) -> Duration {
        let delay = match outcome {
            Err(e) if e.is_retryable() => self.options.retry_delay,
            _ => self.options.refresh_interval,
        };
        delay.max(MIN_CYCLE_DELAY)
    }

    async fn went_inactive(&self, signal: &ActiveSignal) {
        debug!("Region left the viewport");
        if self.options.not_in_view != NotInViewHandling::RemoveFromCache {
            return;
        }

        // a fetch still running would store the image again after the removal
        self.coordinator.settled(&self.resource).await;
        if !signal.peek() && self.coordinator.store().remove(&self.resource) {
            debug!("Removed image from cache because it is not in view");
        }
    }

    /// Refresh loop: runs only between an inactive→active and the next active→inactive edge.
    async fn run(self: Arc<Self>, mut signal: ActiveSignal) {
        if self.resource.is_empty() {
            return;
        }

        loop {
            while !signal.is_active() {
                if signal.changed().await.is_none() {
                    return;
                }
            }

            loop {
                let outcome = self
                    .cycle(FetchRequest::revalidate(self.options.check_hash))
                    .await;
                let delay = self.next_delay(&outcome);

                tokio::select! {
                    _ = time::sleep(delay) => {}
                    changed = signal.changed() => match changed {
                        Some(true) => {}
                        Some(false) => {
                            self.went_inactive(&signal).await;
                            break;
                        }
                        None => return,
                    },
                }
            }
        }
    }
}

/// One rendered image element.
///
/// Dropping the region stops its refresh loop. Fetches already started keep running and still
/// fill the shared cache.
pub struct ImageRegion<C> {
    shared: Arc<RegionShared<C>>,
    tracker: VisibilityTracker,
    task: JoinHandle<()>,
}

impl<C: ImageClient> ImageRegion<C> {
    pub(crate) fn spawn(
        resource: ResourceId,
        coordinator: FetchCoordinator<C>,
        tracker: VisibilityTracker,
        options: ImageOptions,
    ) -> Self {
        let shared = Arc::new(RegionShared {
            id: Uuid::new_v4(),
            resource,
            coordinator,
            options,
            last_error: Mutex::new(None),
            settled_once: AtomicBool::new(false),
        });
        let span = info_span!(
            "region",
            region = %shared.id,
            resource = %shared.resource
        );
        let task = tokio::spawn(Arc::clone(&shared).run(tracker.signal()).instrument(span));

        Self {
            shared,
            tracker,
            task,
        }
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn resource(&self) -> &ResourceId {
        &self.shared.resource
    }

    pub fn tracker(&self) -> &VisibilityTracker {
        &self.tracker
    }

    pub fn is_active(&self) -> bool {
        self.tracker.is_active()
    }

    pub fn is_loading(&self) -> bool {
        self.shared.coordinator.is_loading(&self.shared.resource)
    }

    /// Forced refresh, bypassing the hash comparison. Works while the region is inactive too.
    pub async fn refresh(&self) -> FetchOutcome {
        let span = info_span!(
            "refresh",
            region = %self.shared.id,
            resource = %self.shared.resource
        );
        self.shared
            .cycle(FetchRequest::forced(self.shared.options.check_hash))
            .instrument(span)
            .await
    }

    pub fn last_error(&self) -> Option<ImageError> {
        self.shared
            .last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Reads the cached image for drawing, which counts as a use of the entry.
    pub fn render(&self) -> RenderState {
        let shared = &self.shared;
        if !self.is_active() && shared.options.not_in_view == NotInViewHandling::Hide {
            return RenderState::Hidden;
        }

        if let Some(payload) = shared.coordinator.current_entry_for(&shared.resource) {
            shared.coordinator.store().touch(&shared.resource);
            return RenderState::Image(payload);
        }

        let settled = shared.settled_once.load(Ordering::Acquire);
        if !shared.resource.is_empty() && (self.is_loading() || !settled) {
            return RenderState::Loading;
        }

        match shared.options.problem_handling {
            ProblemHandling::Fallback => RenderState::Fallback(shared.options.fallback.clone()),
            ProblemHandling::Hide => RenderState::Hidden,
            ProblemHandling::Error => {
                RenderState::Failed(self.last_error().unwrap_or(ImageError::NotFound))
            }
        }
    }
}

impl<C> Drop for ImageRegion<C> {
    fn drop(&mut self) {
        self.task.abort();
    }
}
