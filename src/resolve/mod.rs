//! Resolve logical model identifiers to fetchable GGUF URLs.
//!
//! - [`hf`]: HuggingFace and ModelScope repositories
//! - [`ollama`]: Ollama registries (OCI manifest + blobs)
//!
//! Resolvers never download model bytes; they only produce the URL (and
//! optional bearer token) the byte-range reader will use.

pub mod hf;
pub mod ollama;

use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("invalid model reference '{0}'")]
    InvalidReference(String),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("registry answered with HTTP status {0}")]
    Status(u16),

    #[error("manifest has no layer with media type '{0}'")]
    MissingLayer(&'static str),
}

/// A fetchable location plus the credential to present to it.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub url: Url,
    pub token: Option<String>,
}
