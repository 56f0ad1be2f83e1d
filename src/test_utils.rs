use crate::client::ImageClient;
use crate::error::ImageError;
use crate::models::{RawBody, ResourceId};
use futures_util::future::{BoxFuture, FutureExt};
use image::{DynamicImage, ImageOutputFormat};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut data = Vec::new();
    DynamicImage::new_rgba8(width, height)
        .write_to(&mut Cursor::new(&mut data), ImageOutputFormat::Png)
        .unwrap();
    data
}

pub fn png_body(width: u32, height: u32) -> RawBody {
    RawBody {
        data: png_bytes(width, height).into(),
        content_type: Some("image/png".into()),
    }
}

struct Script {
    hash: Result<String, ImageError>,
    body: Result<RawBody, ImageError>,
}

/// An [`ImageClient`] answering every request from a mutable script.
///
/// Body requests can be held back with [`FakeClient::hold_bodies`] until
/// [`FakeClient::release_bodies`] is called.
#[derive(Clone)]
pub struct FakeClient {
    script: Arc<Mutex<Script>>,
    hash_hits: Arc<AtomicUsize>,
    body_hits: Arc<AtomicUsize>,
    active_bodies: Arc<AtomicUsize>,
    max_active_bodies: Arc<AtomicUsize>,
    gate: Arc<Mutex<Option<Arc<Semaphore>>>>,
}

impl FakeClient {
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                hash: Ok("h1".into()),
                body: Ok(png_body(2, 2)),
            })),
            hash_hits: Default::default(),
            body_hits: Default::default(),
            active_bodies: Default::default(),
            max_active_bodies: Default::default(),
            gate: Default::default(),
        }
    }

    pub fn set_hash(&self, hash: Result<&str, ImageError>) {
        self.script.lock().unwrap().hash = hash.map(str::to_owned);
    }

    pub fn set_body(&self, body: Result<RawBody, ImageError>) {
        self.script.lock().unwrap().body = body;
    }

    pub fn hash_hits(&self) -> usize {
        self.hash_hits.load(Ordering::SeqCst)
    }

    pub fn body_hits(&self) -> usize {
        self.body_hits.load(Ordering::SeqCst)
    }

    /// Highest number of body requests that were ever outstanding at once.
    pub fn max_concurrent_bodies(&self) -> usize {
        self.max_active_bodies.load(Ordering::SeqCst)
    }

    pub fn hold_bodies(&self) {
        *self.gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_bodies(&self) {
        if let Some(gate) = self.gate.lock().unwrap().take() {
            gate.close();
        }
    }
}

impl ImageClient for FakeClient {
    fn fetch_hash<'a>(
        &'a self,
        _resource: &'a ResourceId,
    ) -> BoxFuture<'a, Result<String, ImageError>> {
        self.hash_hits.fetch_add(1, Ordering::SeqCst);
        let hash = self.script.lock().unwrap().hash.clone();
        async move { hash }.boxed()
    }

    fn fetch_body<'a>(
        &'a self,
        _resource: &'a ResourceId,
    ) -> BoxFuture<'a, Result<RawBody, ImageError>> {
        self.body_hits.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().clone();
        async move {
            let active = self.active_bodies.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active_bodies.fetch_max(active, Ordering::SeqCst);
            if let Some(gate) = gate {
                // closing the semaphore wakes every waiter
                let _ = gate.acquire().await;
            }
            self.active_bodies.fetch_sub(1, Ordering::SeqCst);
            self.script.lock().unwrap().body.clone()
        }
        .boxed()
    }
}
