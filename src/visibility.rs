//! Derives the `active` signal that gates all network activity of a region.
//!
//! A region is active while it is mounted, intersects the viewport by at least the configured
//! threshold and the host page is in the foreground.

use std::sync::Arc;
use tokio::sync::watch;

/// Foreground state of the host page, shared by every tracker of a service.
#[derive(Clone, Debug)]
pub struct PageVisibility {
    tx: Arc<watch::Sender<bool>>,
}

impl PageVisibility {
    pub fn new(visible: bool) -> Self {
        let (tx, _) = watch::channel(visible);
        Self { tx: Arc::new(tx) }
    }

    pub fn set_visible(&self, visible: bool) {
        self.tx.send_if_modified(|current| {
            let changed = *current != visible;
            *current = visible;
            changed
        });
    }

    pub fn is_visible(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for PageVisibility {
    fn default() -> Self {
        Self::new(true)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct RegionState {
    mounted: bool,
    intersection_ratio: f32,
}

fn derive_active(region: &RegionState, page_visible: bool, threshold: f32) -> bool {
    region.mounted
        && region.intersection_ratio > 0.0
        && region.intersection_ratio >= threshold
        && page_visible
}

/// Visibility of a single rendered region.
#[derive(Debug)]
pub struct VisibilityTracker {
    threshold: f32,
    region: watch::Sender<RegionState>,
    page: watch::Receiver<bool>,
}

impl VisibilityTracker {
    pub fn new(page: &PageVisibility, threshold: f32) -> Self {
        let (region, _) = watch::channel(RegionState::default());
        Self {
            threshold: threshold.clamp(0.0, 1.0),
            region,
            page: page.subscribe(),
        }
    }

    pub fn mount(&self) {
        self.update(|state| state.mounted = true);
    }

    pub fn unmount(&self) {
        self.update(|state| {
            state.mounted = false;
            state.intersection_ratio = 0.0;
        });
    }

    /// Records the fraction of the region currently inside the viewport.
    pub fn set_intersection(&self, ratio: f32) {
        let ratio = if ratio.is_nan() { 0.0 } else { ratio.clamp(0.0, 1.0) };
        self.update(|state| state.intersection_ratio = ratio);
    }

    pub fn is_active(&self) -> bool {
        derive_active(&self.region.borrow(), *self.page.borrow(), self.threshold)
    }

    pub fn signal(&self) -> ActiveSignal {
        let region = self.region.subscribe();
        let page = self.page.clone();
        let last = derive_active(&region.borrow(), *page.borrow(), self.threshold);
        ActiveSignal {
            threshold: self.threshold,
            region,
            page,
            last,
        }
    }

    fn update(&self, f: impl FnOnce(&mut RegionState)) {
        self.region.send_if_modified(|state| {
            let before = *state;
            f(state);
            before != *state
        });
    }
}

/// Observer side of a [`VisibilityTracker`].
#[derive(Debug)]
pub struct ActiveSignal {
    threshold: f32,
    region: watch::Receiver<RegionState>,
    page: watch::Receiver<bool>,
    last: bool,
}

impl ActiveSignal {
    /// The value as of the last observed transition.
    pub fn is_active(&self) -> bool {
        self.last
    }

    /// The derived value right now, including flips [`changed`](Self::changed) has not
    /// reported yet.
    pub fn peek(&self) -> bool {
        derive_active(&self.region.borrow(), *self.page.borrow(), self.threshold)
    }

    /// Waits for the derived value to flip and returns the new value.
    ///
    /// Changes of the inputs that leave the derived value untouched are swallowed. Returns
    /// `None` once the tracker or the page visibility has been dropped.
    pub async fn changed(&mut self) -> Option<bool> {
        loop {
            tokio::select! {
                res = self.region.changed() => res.ok()?,
                res = self.page.changed() => res.ok()?,
            }
            let active = derive_active(&self.region.borrow(), *self.page.borrow(), self.threshold);
            if active != self.last {
                self.last = active;
                return Some(active);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[test]
    fn requires_mount_intersection_and_foreground() {
        let page = PageVisibility::new(true);
        let tracker = VisibilityTracker::new(&page, 0.1);
        assert!(!tracker.is_active());

        tracker.mount();
        assert!(!tracker.is_active());

        tracker.set_intersection(0.05);
        assert!(!tracker.is_active());

        tracker.set_intersection(0.1);
        assert!(tracker.is_active());

        page.set_visible(false);
        assert!(!tracker.is_active());

        page.set_visible(true);
        tracker.unmount();
        assert!(!tracker.is_active());
    }

    #[test]
    fn zero_threshold_still_needs_some_intersection() {
        let page = PageVisibility::default();
        let tracker = VisibilityTracker::new(&page, 0.0);
        tracker.mount();
        assert!(!tracker.is_active());
        tracker.set_intersection(0.01);
        assert!(tracker.is_active());
    }

    #[tokio::test]
    async fn signal_reports_transitions_only() {
        let page = PageVisibility::new(true);
        let tracker = VisibilityTracker::new(&page, 0.1);
        let mut signal = tracker.signal();
        assert!(!signal.is_active());

        tracker.mount();
        tracker.set_intersection(0.5);
        assert_eq!(signal.changed().await, Some(true));

        // still active, nothing to report
        tracker.set_intersection(0.8);
        assert!(timeout(Duration::from_millis(20), signal.changed())
            .await
            .is_err());

        page.set_visible(false);
        assert_eq!(signal.changed().await, Some(false));
        assert!(!signal.is_active());
    }

    #[tokio::test]
    async fn signal_ends_with_tracker() {
        let page = PageVisibility::new(true);
        let tracker = VisibilityTracker::new(&page, 0.1);
        let mut signal = tracker.signal();
        drop(tracker);
        assert_eq!(signal.changed().await, None);
    }
}
