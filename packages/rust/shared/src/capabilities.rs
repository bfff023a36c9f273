//! Capabilities the pipelines consume from the outside world.
//!
//! Every collaborator is injected as a trait object so tests can swap in fakes.

use async_trait::async_trait;
use url::Url;

use crate::error::Result;
use crate::types::PortalState;

/// Searches one knowledge partition.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Return text snippets from `partition_id` relevant to `query`.
    async fn search(&self, partition_id: &str, query: &str) -> Result<Vec<String>>;
}

/// Text completion from a language model.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Fetches remote pages.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch `url` and return the body as text.
    async fn fetch(&self, url: &Url) -> Result<String>;
}

/// Persisted portal scan state.
#[async_trait]
pub trait PortalStateStore: Send + Sync {
    /// Load the state. `None` when nothing has been saved yet.
    async fn load_state(&self) -> Result<Option<PortalState>>;

    async fn save_state(&self, state: &PortalState) -> Result<()>;
}
