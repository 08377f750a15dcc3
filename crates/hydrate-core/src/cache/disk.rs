//! File-backed cache storage.
//!
//! Each generation is one JSON file of entry metadata in the cache directory,
//! with response bodies stored as raw files under `<name>.bodies/`. A
//! `generations.json` index records which generations exist and the order
//! they were created in. All reads and writes go through one async mutex, so
//! concurrent puts never interleave on the same file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::store::check_storable;
use super::{CacheEntry, CacheStorage, FetchRequest, Generation, RequestKey, Response};
use crate::error::{OfflineError, Result};

/// Index file listing generation names in creation order
const INDEX_FILE: &str = "generations.json";

/// Directory suffix holding a generation's response bodies
const BODIES_SUFFIX: &str = "bodies";

/// A cache entry whose body lives in `body_file`; `entry.response.body` is empty.
#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    #[serde(flatten)]
    entry: CacheEntry,
    body_file: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct GenerationFile {
    name: String,
    entries: Vec<StoredEntry>,
    /// Next body file number; never reused within a generation.
    #[serde(default)]
    next_body: u64,
}

impl GenerationFile {
    fn empty(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Insert or replace by key. Returns the body file of a replaced entry.
    fn upsert(&mut self, stored: StoredEntry) -> Option<String> {
        match self
            .entries
            .iter_mut()
            .find(|e| e.entry.key == stored.entry.key)
        {
            Some(existing) => Some(std::mem::replace(existing, stored).body_file),
            None => {
                self.entries.push(stored);
                None
            }
        }
    }

    fn find(self, request: &FetchRequest) -> Option<StoredEntry> {
        self.entries
            .into_iter()
            .find(|stored| stored.entry.matches(request))
    }
}

/// Shared by the storage and every generation handle it gives out.
struct DiskInner {
    cache_dir: PathBuf,
    lock: Mutex<()>,
}

impl DiskInner {
    fn index_path(&self) -> PathBuf {
        self.cache_dir.join(INDEX_FILE)
    }

    fn generation_path(&self, name: &str) -> Result<PathBuf> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !name.starts_with('.');
        let file_name = format!("{}.json", name);
        if !valid || file_name == INDEX_FILE {
            return Err(OfflineError::Store(format!(
                "invalid generation name: {:?}",
                name
            )));
        }
        Ok(self.cache_dir.join(file_name))
    }

    fn bodies_dir(&self, name: &str) -> Result<PathBuf> {
        let path = self.generation_path(name)?;
        Ok(path.with_extension(BODIES_SUFFIX))
    }

    fn read_index(&self) -> Result<Vec<String>> {
        Ok(read_json(&self.index_path())?.unwrap_or_default())
    }

    fn write_index(&self, names: &[String]) -> Result<()> {
        write_json(&self.index_path(), &names)
    }

    fn read_generation(&self, name: &str) -> Result<GenerationFile> {
        let path = self.generation_path(name)?;
        Ok(read_json(&path)?.unwrap_or_else(|| GenerationFile::empty(name)))
    }

    fn load_response(&self, name: &str, stored: StoredEntry) -> Result<Response> {
        let mut response = stored.entry.response;
        response.body = std::fs::read(self.bodies_dir(name)?.join(&stored.body_file))?;
        Ok(response)
    }

    /// Write entries into a generation. Fails if the generation was deleted.
    ///
    /// Bodies are written before the metadata file that points at them, and
    /// replaced bodies are removed only after it.
    async fn store(&self, name: &str, entries: Vec<CacheEntry>) -> Result<()> {
        let _guard = self.lock.lock().await;
        if !self.read_index()?.iter().any(|n| n == name) {
            return Err(OfflineError::Store(format!(
                "generation {} no longer exists",
                name
            )));
        }

        let mut file = self.read_generation(name)?;
        let bodies = self.bodies_dir(name)?;
        std::fs::create_dir_all(&bodies)?;

        let mut replaced = Vec::new();
        for mut entry in entries {
            let body_file = file.next_body.to_string();
            file.next_body += 1;
            std::fs::write(bodies.join(&body_file), std::mem::take(&mut entry.response.body))?;
            replaced.extend(file.upsert(StoredEntry { entry, body_file }));
        }
        write_json(&self.generation_path(name)?, &file)?;

        for body_file in replaced {
            if let Err(e) = std::fs::remove_file(bodies.join(&body_file)) {
                warn!(generation = name, body_file = %body_file, error = %e, "Failed to remove replaced body");
            }
        }
        Ok(())
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&contents)?))
}

/// Written to a temp file and renamed into place; readers never see a partial file.
fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let contents = serde_json::to_string(value)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

pub struct DiskGeneration {
    name: String,
    inner: Arc<DiskInner>,
}

#[async_trait]
impl Generation for DiskGeneration {
    fn name(&self) -> &str {
        &self.name
    }

    async fn lookup(&self, request: &FetchRequest) -> Result<Option<Response>> {
        let _guard = self.inner.lock.lock().await;
        match self.inner.read_generation(&self.name)?.find(request) {
            Some(stored) => Ok(Some(self.inner.load_response(&self.name, stored)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, request: &FetchRequest, response: Response) -> Result<()> {
        check_storable(request)?;
        let entry = CacheEntry::new(request, response);
        self.inner.store(&self.name, vec![entry]).await
    }

    async fn put_all(&self, batch: Vec<(FetchRequest, Response)>) -> Result<()> {
        for (request, _) in &batch {
            check_storable(request)?;
        }
        let entries: Vec<CacheEntry> = batch
            .into_iter()
            .map(|(request, response)| CacheEntry::new(&request, response))
            .collect();
        self.inner.store(&self.name, entries).await
    }

    async fn keys(&self) -> Result<Vec<RequestKey>> {
        let _guard = self.inner.lock.lock().await;
        let file = self.inner.read_generation(&self.name)?;
        Ok(file
            .entries
            .into_iter()
            .map(|stored| stored.entry.key)
            .collect())
    }
}

pub struct DiskStorage {
    inner: Arc<DiskInner>,
}

impl DiskStorage {
    pub fn new(cache_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&cache_dir)?;
        Ok(Self {
            inner: Arc::new(DiskInner {
                cache_dir,
                lock: Mutex::new(()),
            }),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.inner.cache_dir
    }
}

#[async_trait]
impl CacheStorage for DiskStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn Generation>> {
        let _guard = self.inner.lock.lock().await;
        let path = self.inner.generation_path(name)?;
        let mut names = self.inner.read_index()?;
        if !names.iter().any(|n| n == name) {
            debug!(generation = name, "Creating generation on disk");
            write_json(&path, &GenerationFile::empty(name))?;
            names.push(name.to_string());
            self.inner.write_index(&names)?;
        }
        let handle: Arc<dyn Generation> = Arc::new(DiskGeneration {
            name: name.to_string(),
            inner: self.inner.clone(),
        });
        Ok(handle)
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let _guard = self.inner.lock.lock().await;
        self.inner.read_index()
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let _guard = self.inner.lock.lock().await;
        let mut names = self.inner.read_index()?;
        let before = names.len();
        names.retain(|n| n != name);
        if names.len() == before {
            return Ok(false);
        }
        self.inner.write_index(&names)?;
        let path = self.inner.generation_path(name)?;
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        let bodies = self.inner.bodies_dir(name)?;
        if bodies.exists() {
            std::fs::remove_dir_all(bodies)?;
        }
        debug!(generation = name, "Deleted generation from disk");
        Ok(true)
    }

    async fn match_any(&self, request: &FetchRequest) -> Result<Option<Response>> {
        let _guard = self.inner.lock.lock().await;
        for name in self.inner.read_index()? {
            if let Some(stored) = self.inner.read_generation(&name)?.find(request) {
                return Ok(Some(self.inner.load_response(&name, stored)?));
            }
        }
        Ok(None)
    }
}
