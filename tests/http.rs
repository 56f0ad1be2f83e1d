use cached_image::{
    CacheStore, FetchCoordinator, FetchRequest, Freshness, HttpClient, ImageClient, ImageError,
    ResourceId,
};
use image::{DynamicImage, ImageOutputFormat};
use serde_json::json;
use std::collections::HashMap;
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

fn png(width: u32, height: u32) -> Vec<u8> {
    let mut data = Vec::new();
    DynamicImage::new_rgb8(width, height)
        .write_to(&mut Cursor::new(&mut data), ImageOutputFormat::Png)
        .unwrap();
    data
}

/// Images served by the test server, keyed by file name, with their hash.
#[derive(Clone, Default)]
struct Images {
    files: Arc<Mutex<HashMap<String, (String, Vec<u8>)>>>,
    hash_hits: Arc<AtomicUsize>,
    body_hits: Arc<AtomicUsize>,
}

impl Images {
    fn insert(&self, name: &str, hash: &str, data: Vec<u8>) {
        self.files
            .lock()
            .unwrap()
            .insert(name.to_owned(), (hash.to_owned(), data));
    }

    fn body_hits(&self) -> usize {
        self.body_hits.load(Ordering::SeqCst)
    }

    fn hash_hits(&self) -> usize {
        self.hash_hits.load(Ordering::SeqCst)
    }

    fn respond(&self, name: &str, query: &HashMap<String, String>) -> Response {
        if name == "broken.png" {
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
        let Some((hash, data)) = self.files.lock().unwrap().get(name).cloned() else {
            return StatusCode::NOT_FOUND.into_response();
        };
        if query.contains_key("hash") {
            self.hash_hits.fetch_add(1, Ordering::SeqCst);
            warp::reply::json(&json!({ "hash": hash })).into_response()
        } else {
            self.body_hits.fetch_add(1, Ordering::SeqCst);
            warp::reply::with_header(data, "content-type", "image/png").into_response()
        }
    }
}

fn routes(images: Images) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::get()
        .and(warp::path!("img" / String))
        .and(warp::query::<HashMap<String, String>>())
        .map(move |name: String, query: HashMap<String, String>| images.respond(&name, &query))
}

/// Serves `images` on an ephemeral port until dropped.
struct Server {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
}

impl Server {
    fn new(images: Images) -> Self {
        let (socket, future) = warp::serve(routes(images)).bind_ephemeral(([127, 0, 0, 1], 0));
        let handle = tokio::spawn(future);
        Self { handle, socket }
    }

    fn url(&self, path: &str) -> String {
        format!(
            "http://127.0.0.1:{}/{}",
            self.socket.port(),
            path.trim_start_matches('/')
        )
    }

    fn base_url(&self) -> url::Url {
        self.url("/").parse().unwrap()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn client() -> HttpClient {
    HttpClient::new(None).unwrap()
}

#[tokio::test]
async fn fetches_hash_and_body() {
    let images = Images::default();
    images.insert("a.png", "h1", png(3, 2));
    let server = Server::new(images.clone());
    let client = client();
    let id = ResourceId::from(server.url("/img/a.png"));

    assert_eq!(client.fetch_hash(&id).await.unwrap(), "h1");
    let body = client.fetch_body(&id).await.unwrap();
    assert_eq!(body.content_type.as_deref(), Some("image/png"));
    assert_eq!(&body.data[..], &png(3, 2)[..]);
    assert_eq!(images.hash_hits(), 1);
    assert_eq!(images.body_hits(), 1);
}

#[tokio::test]
async fn maps_statuses_to_errors() {
    let server = Server::new(Images::default());
    let client = client();

    let missing = ResourceId::from(server.url("/img/missing.png"));
    assert_eq!(client.fetch_hash(&missing).await, Err(ImageError::NotFound));
    assert!(matches!(
        client.fetch_body(&missing).await,
        Err(ImageError::NotFound)
    ));

    let broken = ResourceId::from(server.url("/img/broken.png"));
    assert_eq!(client.fetch_hash(&broken).await, Err(ImageError::Status(500)));
}

#[tokio::test]
async fn unreachable_server_is_a_transport_error() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let client = client();
    let id = ResourceId::from(format!("http://127.0.0.1:{}/img/a.png", port));

    let err = client.fetch_body(&id).await.unwrap_err();
    assert!(err.is_retryable());
    assert!(!err.is_not_found());
}

#[tokio::test]
async fn coordinator_revalidates_over_http() {
    let images = Images::default();
    images.insert("a.png", "h1", png(4, 4));
    let server = Server::new(images.clone());
    let client = HttpClient::new(Some(server.base_url())).unwrap();
    let coordinator = FetchCoordinator::new(client, CacheStore::new());
    let id = ResourceId::from("/img/a.png");

    let first = coordinator.run_cycle(&id, FetchRequest::revalidate(true)).await;
    assert_eq!(first, Ok(Freshness::Updated));
    let second = coordinator.run_cycle(&id, FetchRequest::revalidate(true)).await;
    assert_eq!(second, Ok(Freshness::Unchanged));
    assert_eq!(images.body_hits(), 1);

    images.insert("a.png", "h2", png(8, 8));
    let third = coordinator.run_cycle(&id, FetchRequest::revalidate(true)).await;
    assert_eq!(third, Ok(Freshness::Updated));
    let payload = coordinator.current_entry_for(&id).unwrap();
    assert_eq!(payload.dimensions(), Some((8, 8)));
    assert_eq!(images.body_hits(), 2);
}

#[tokio::test]
async fn coordinator_drops_images_the_server_lost() {
    let images = Images::default();
    images.insert("a.png", "h1", png(4, 4));
    let server = Server::new(images.clone());
    let client = HttpClient::new(Some(server.base_url())).unwrap();
    let coordinator = FetchCoordinator::new(client, CacheStore::new());
    let id = ResourceId::from("/img/a.png");

    coordinator
        .run_cycle(&id, FetchRequest::revalidate(true))
        .await
        .unwrap();
    images.files.lock().unwrap().clear();

    let outcome = coordinator.run_cycle(&id, FetchRequest::revalidate(true)).await;
    assert_eq!(outcome, Err(ImageError::NotFound));
    assert!(coordinator.current_entry_for(&id).is_none());
    assert!(coordinator.store().is_empty());
}
