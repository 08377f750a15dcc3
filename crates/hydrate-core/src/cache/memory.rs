//! In-process cache storage, used by tests and short-lived hosts.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::store::check_storable;
use super::{CacheEntry, CacheStorage, FetchRequest, Generation, RequestKey, Response};
use crate::error::Result;

pub struct MemoryGeneration {
    name: String,
    entries: RwLock<HashMap<RequestKey, CacheEntry>>,
}

impl MemoryGeneration {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Generation for MemoryGeneration {
    fn name(&self) -> &str {
        &self.name
    }

    async fn lookup(&self, request: &FetchRequest) -> Result<Option<Response>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(&request.key())
            .filter(|entry| entry.matches(request))
            .map(|entry| entry.response.clone()))
    }

    async fn put(&self, request: &FetchRequest, response: Response) -> Result<()> {
        check_storable(request)?;
        let entry = CacheEntry::new(request, response);
        self.entries.write().await.insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn put_all(&self, batch: Vec<(FetchRequest, Response)>) -> Result<()> {
        for (request, _) in &batch {
            check_storable(request)?;
        }
        let mut entries = self.entries.write().await;
        for (request, response) in batch {
            let entry = CacheEntry::new(&request, response);
            entries.insert(entry.key.clone(), entry);
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<RequestKey>> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }
}

/// Generations kept in creation order.
#[derive(Default)]
pub struct MemoryStorage {
    generations: RwLock<Vec<Arc<MemoryGeneration>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn Generation>> {
        let mut generations = self.generations.write().await;
        if let Some(existing) = generations.iter().find(|g| g.name == name) {
            let handle: Arc<dyn Generation> = existing.clone();
            return Ok(handle);
        }
        debug!(generation = name, "Creating generation");
        let created = Arc::new(MemoryGeneration::new(name));
        generations.push(created.clone());
        let handle: Arc<dyn Generation> = created;
        Ok(handle)
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self
            .generations
            .read()
            .await
            .iter()
            .map(|g| g.name.clone())
            .collect())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let mut generations = self.generations.write().await;
        let before = generations.len();
        generations.retain(|g| g.name != name);
        Ok(generations.len() != before)
    }

    async fn match_any(&self, request: &FetchRequest) -> Result<Option<Response>> {
        let generations = self.generations.read().await.clone();
        for generation in generations {
            if let Some(response) = generation.lookup(request).await? {
                return Ok(Some(response));
            }
        }
        Ok(None)
    }
}
