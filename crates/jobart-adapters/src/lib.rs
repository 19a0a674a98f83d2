//! Source adapter contracts, field mapping and value normalization.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobart_core::{CanonicalListing, RawListing, Source};
use jobart_storage::FetchError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod france_travail;
pub mod links;
pub mod mapper;
pub mod normalize;
pub mod wttj;

pub use france_travail::{Credentials, FranceTravailAdapter, FranceTravailEndpoints};
pub use links::{LinkHarvester, LinksFileHarvester};
pub use wttj::WttjAdapter;

pub const CRATE_NAME: &str = "jobart-adapters";

/// Optional creation-date bounds; both ends are always sent together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreationWindow {
    pub min: DateTime<Utc>,
    pub max: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub keywords: String,
    pub creation_window: Option<CreationWindow>,
}

impl SearchQuery {
    pub fn keywords(keywords: impl Into<String>) -> Self {
        Self {
            keywords: keywords.into(),
            creation_window: None,
        }
    }

    pub fn with_creation_window(mut self, window: Option<CreationWindow>) -> Self {
        self.creation_window = window;
        self
    }
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("missing credential {0}")]
    MissingCredential(&'static str),
    #[error(transparent)]
    Http(#[from] FetchError),
    #[error("http status {status} for {url}")]
    Status { status: u16, url: String },
    #[error("invalid response from {url}: {message}")]
    Decode { url: String, message: String },
    #[error("link harvest failed: {0}")]
    Harvest(String),
    #[error("pagination aborted after {} records: {source}", .partial.len())]
    PaginationAborted {
        partial: Vec<RawListing>,
        #[source]
        source: Box<AdapterError>,
    },
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl AdapterError {
    /// Records gathered before a recoverable failure, if any.
    pub fn into_partial(self) -> Result<Vec<RawListing>, AdapterError> {
        match self {
            Self::PaginationAborted { partial, .. } => Ok(partial),
            other => Err(other),
        }
    }
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> Source;

    async fn fetch(&self, query: &SearchQuery) -> Result<Vec<RawListing>, AdapterError>;

    fn normalize(&self, raw: &RawListing) -> CanonicalListing {
        normalize::normalize(raw)
    }
}
