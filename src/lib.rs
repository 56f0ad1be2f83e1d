//! Client-side image cache with visibility-gated revalidation.
//!
//! An [`ImageService`] owns a process-wide [`CacheStore`] and a [`FetchCoordinator`] that keeps
//! at most one fetch per image in flight. Each rendered image is an [`ImageRegion`]: while its
//! [`VisibilityTracker`] reports it as active, the region periodically asks the server for the
//! image hash and downloads the body only when the hash changed.

pub mod cache;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod models;
pub mod region;
pub mod service;
pub mod visibility;

#[cfg(test)]
mod test_utils;

pub use cache::CacheStore;
pub use client::{HttpClient, ImageClient};
pub use config::{Config, NotInViewHandling, ProblemHandling};
pub use coordinator::{FetchCoordinator, FetchOutcome, FetchRequest, FetchState, Freshness};
pub use error::ImageError;
pub use models::{CacheEntry, Payload, RawBody, ResourceId};
pub use region::{Callbacks, ImageOptions, ImageRegion, RenderState};
pub use service::ImageService;
pub use visibility::{ActiveSignal, PageVisibility, VisibilityTracker};
