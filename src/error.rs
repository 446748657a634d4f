use thiserror::Error;

/// Failures from the embedding provider.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding provider is not configured")]
    NotConfigured,

    #[error("embedding request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("embedding provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed embedding response: {0}")]
    Malformed(String),
}

/// A single sponsor lookup that could not complete. Callers recover from this
/// by falling back to local data; it never fails a whole request.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("sponsor provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("sponsor provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed sponsor provider payload: {0}")]
    Malformed(String),

    #[error("sponsor storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl ResolveError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ResolveError::Http(e) if e.is_timeout())
    }
}
