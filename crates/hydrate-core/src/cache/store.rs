use std::sync::Arc;

use async_trait::async_trait;

use super::{FetchRequest, RequestKey, Response};
use crate::error::{OfflineError, Result};

/// One named cache generation.
#[async_trait]
pub trait Generation: Send + Sync {
    fn name(&self) -> &str;

    /// Stored response matching `request`, if any.
    async fn lookup(&self, request: &FetchRequest) -> Result<Option<Response>>;

    /// Store `response` under `request`, replacing any previous entry wholesale.
    async fn put(&self, request: &FetchRequest, response: Response) -> Result<()>;

    /// Store a batch. Either every entry is written or none is.
    async fn put_all(&self, entries: Vec<(FetchRequest, Response)>) -> Result<()>;

    async fn keys(&self) -> Result<Vec<RequestKey>>;
}

/// The set of generations available to one origin.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open a generation, creating it if absent.
    async fn open(&self, name: &str) -> Result<Arc<dyn Generation>>;

    /// Generation names in creation order.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Delete a generation. Returns false if it did not exist.
    async fn delete(&self, name: &str) -> Result<bool>;

    /// Search every generation in creation order; first match wins.
    ///
    /// Must not create generations as a side effect.
    async fn match_any(&self, request: &FetchRequest) -> Result<Option<Response>>;
}

/// Only GET requests may be written to a generation.
pub(crate) fn check_storable(request: &FetchRequest) -> Result<()> {
    if request.is_get() {
        Ok(())
    } else {
        Err(OfflineError::Store(format!(
            "cannot cache {} request for {}",
            request.method, request.url
        )))
    }
}
