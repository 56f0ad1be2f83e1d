use thiserror::Error;

/// Failure of a single fetch cycle.
///
/// Errors never leave the coordinator as panics; they are reported through
/// [`FetchOutcome`](crate::coordinator::FetchOutcome) and the region callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    /// The remote confirmed the resource does not exist.
    #[error("image not found")]
    NotFound,
    /// The remote answered with a status other than 200 or 404.
    #[error("unexpected status {0}")]
    Status(u16),
    /// Connection, protocol or response body failure.
    #[error("transport error: {0}")]
    Transport(String),
    /// The body was fetched but is not a displayable image.
    #[error("failed to decode image: {0}")]
    Decode(String),
}

impl ImageError {
    /// Whether the region loop should come back after the short retry delay.
    ///
    /// A missing resource is only revisited on the regular refresh interval.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ImageError::NotFound)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ImageError::NotFound)
    }
}

impl From<reqwest::Error> for ImageError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return ImageError::Status(status.as_u16());
        }
        ImageError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for ImageError {
    fn from(err: serde_json::Error) -> Self {
        ImageError::Transport(format!("malformed hash response: {}", err))
    }
}

impl From<image::ImageError> for ImageError {
    fn from(err: image::ImageError) -> Self {
        ImageError::Decode(err.to_string())
    }
}
