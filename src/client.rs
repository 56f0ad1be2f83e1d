use crate::error::ImageError;
use crate::models::{HashResponse, RawBody, ResourceId};
use futures_util::future::{BoxFuture, FutureExt};
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use url::Url;

/// The network collaborator of the [`FetchCoordinator`](crate::coordinator::FetchCoordinator).
///
/// Implementations map a 404 to [`ImageError::NotFound`] and every other non-200 answer to
/// [`ImageError::Status`].
pub trait ImageClient: Send + Sync + 'static {
    /// `GET {resource}?hash`, answering `{"hash": "..."}`.
    fn fetch_hash<'a>(
        &'a self,
        resource: &'a ResourceId,
    ) -> BoxFuture<'a, Result<String, ImageError>>;

    /// `GET {resource}`, answering the image bytes.
    fn fetch_body<'a>(
        &'a self,
        resource: &'a ResourceId,
    ) -> BoxFuture<'a, Result<RawBody, ImageError>>;
}

#[derive(Clone, Debug)]
pub struct HttpClient {
    client: reqwest::Client,
    base_url: Option<Url>,
}

impl HttpClient {
    pub fn new(base_url: Option<Url>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: Option<Url>) -> Self {
        Self { client, base_url }
    }

    fn resolve(&self, resource: &ResourceId) -> Result<Url, ImageError> {
        let parsed = match &self.base_url {
            Some(base) => base.join(resource.as_str()),
            None => Url::parse(resource.as_str()),
        };
        parsed.map_err(|e| ImageError::Transport(format!("invalid url {}: {}", resource, e)))
    }

    /// The body URL with a bare `hash` flag added to its query.
    pub fn hash_url(&self, resource: &ResourceId) -> Result<Url, ImageError> {
        let mut url = self.resolve(resource)?;
        let query = match url.query() {
            Some(query) if !query.is_empty() => format!("{}&hash", query),
            _ => "hash".to_string(),
        };
        url.set_query(Some(&query));
        Ok(url)
    }

    async fn get(&self, url: Url) -> Result<reqwest::Response, ImageError> {
        let response = self.client.get(url).send().await?;
        match response.status() {
            StatusCode::OK => Ok(response),
            StatusCode::NOT_FOUND => Err(ImageError::NotFound),
            status => Err(ImageError::Status(status.as_u16())),
        }
    }
}

impl ImageClient for HttpClient {
    fn fetch_hash<'a>(
        &'a self,
        resource: &'a ResourceId,
    ) -> BoxFuture<'a, Result<String, ImageError>> {
        async move {
            let url = self.hash_url(resource)?;
            let body = self.get(url).await?.bytes().await?;
            let parsed: HashResponse = serde_json::from_slice(&body)?;
            Ok(parsed.hash)
        }
        .boxed()
    }

    fn fetch_body<'a>(
        &'a self,
        resource: &'a ResourceId,
    ) -> BoxFuture<'a, Result<RawBody, ImageError>> {
        async move {
            let url = self.resolve(resource)?;
            let response = self.get(url).await?;
            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|h| h.to_str().ok())
                .map(str::to_owned);
            let data = response.bytes().await?;
            Ok(RawBody { data, content_type })
        }
        .boxed()
    }
}
