//! Offline cache manager: the install / activate / fetch lifecycle.
//!
//! The manager arbitrates between a versioned cache and the network for a
//! single origin. Exactly one generation (named by the version string) is
//! current; `activate` deletes the rest.
//!
//! Fetches resolve in three tiers:
//! 1. cache hit in any generation, served without touching the network
//! 2. network response, with 200/basic responses copied into the current
//!    generation in the background
//! 3. the cached root document when the network is unreachable

use std::sync::Arc;

use futures::future::join_all;
use reqwest::Url;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::cache::{CacheStorage, FetchRequest, Response};
use crate::error::{OfflineError, Result};
use crate::manifest::AssetManifest;
use crate::network::Network;

/// Served when the network is down and the request itself is not cached.
pub const ROOT_DOCUMENT: &str = "/index.html";

/// Lifecycle phase of one manager instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Parsed => "parsed",
            Phase::Installing => "installing",
            Phase::Installed => "installed",
            Phase::Activating => "activating",
            Phase::Activated => "activated",
        };
        f.write_str(name)
    }
}

/// Control requests the manager sends to its host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostSignal {
    /// Activate this generation now instead of waiting for old instances to close.
    SkipWaiting,
    /// Take over already-open instances without waiting for a reload.
    ClaimClients,
}

/// Which tier answered a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSource {
    Cache,
    Network,
    OfflineFallback,
}

#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub response: Response,
    pub source: FetchSource,
}

pub struct OfflineCacheManager {
    version: String,
    origin: Url,
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
    signals: Option<mpsc::Sender<HostSignal>>,
    phase: Mutex<Phase>,
    pending_writes: Mutex<JoinSet<()>>,
}

impl OfflineCacheManager {
    pub fn new(
        version: impl Into<String>,
        origin: Url,
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
    ) -> Self {
        Self {
            version: version.into(),
            origin,
            storage,
            network,
            signals: None,
            phase: Mutex::new(Phase::Parsed),
            pending_writes: Mutex::new(JoinSet::new()),
        }
    }

    /// Deliver host signals on `tx`.
    pub fn with_signals(mut self, tx: mpsc::Sender<HostSignal>) -> Self {
        self.signals = Some(tx);
        self
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub async fn phase(&self) -> Phase {
        *self.phase.lock().await
    }

    // ===== Install =====

    /// Populate the current generation with every manifest asset.
    ///
    /// All manifest requests are fetched before anything is written; one
    /// failed or non-ok response fails the whole install and leaves the
    /// manager in `Parsed` so the host can retry.
    pub async fn install(&self, manifest: &AssetManifest) -> Result<()> {
        self.enter("install", &[Phase::Parsed, Phase::Installed], Phase::Installing)
            .await?;
        self.signal(HostSignal::SkipWaiting);

        match self.populate(manifest).await {
            Ok(count) => {
                info!(generation = %self.version, assets = count, "Install complete");
                self.set_phase(Phase::Installed).await;
                Ok(())
            }
            Err(e) => {
                warn!(generation = %self.version, error = %e, "Install failed");
                self.set_phase(Phase::Parsed).await;
                Err(e)
            }
        }
    }

    async fn populate(&self, manifest: &AssetManifest) -> Result<usize> {
        let install_failed = |reason: String| OfflineError::InstallFailed {
            generation: self.version.clone(),
            reason,
        };

        let requests = manifest.requests(&self.origin)?;
        let responses = join_all(requests.iter().map(|r| self.network.fetch(r))).await;

        let mut batch = Vec::with_capacity(requests.len());
        for (request, result) in requests.into_iter().zip(responses) {
            let response =
                result.map_err(|e| install_failed(format!("{}: {}", request.url, e)))?;
            if !response.is_ok() {
                return Err(install_failed(format!(
                    "{} returned status {}: {}",
                    request.url,
                    response.status,
                    OfflineError::truncate_body(&response.body)
                )));
            }
            batch.push((request, response));
        }

        let count = batch.len();
        let generation = self.storage.open(&self.version).await?;
        generation
            .put_all(batch)
            .await
            .map_err(|e| install_failed(e.to_string()))?;
        Ok(count)
    }

    /// Pick up an install completed by an earlier manager for this version.
    ///
    /// Succeeds only if the current generation exists and holds every
    /// manifest asset; the manager is then `Installed` and may activate.
    pub async fn resume_installed(&self, manifest: &AssetManifest) -> Result<()> {
        self.enter("resume", &[Phase::Parsed], Phase::Installing)
            .await?;

        match self.verify_installed(manifest).await {
            Ok(()) => {
                info!(generation = %self.version, "Resumed installed generation");
                self.set_phase(Phase::Installed).await;
                Ok(())
            }
            Err(e) => {
                self.set_phase(Phase::Parsed).await;
                Err(e)
            }
        }
    }

    async fn verify_installed(&self, manifest: &AssetManifest) -> Result<()> {
        let not_installed = |reason: String| OfflineError::InstallFailed {
            generation: self.version.clone(),
            reason,
        };

        if !self.storage.keys().await?.contains(&self.version) {
            return Err(not_installed("generation not found".to_string()));
        }

        let generation = self.storage.open(&self.version).await?;
        let mut missing = Vec::new();
        for request in manifest.requests(&self.origin)? {
            if generation.lookup(&request).await?.is_none() {
                missing.push(request.url.path().to_string());
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(not_installed(format!("missing {}", missing.join(", "))))
        }
    }

    // ===== Activate =====

    /// Delete every generation other than the current one.
    ///
    /// Deletions run concurrently and all are attempted; if any fails the
    /// activate fails, naming the generations left behind, and the manager
    /// stays `Installed`.
    pub async fn activate(&self) -> Result<()> {
        self.enter("activate", &[Phase::Installed, Phase::Activated], Phase::Activating)
            .await?;
        self.signal(HostSignal::ClaimClients);

        match self.purge_stale().await {
            Ok(()) => {
                info!(generation = %self.version, "Activated");
                self.set_phase(Phase::Activated).await;
                Ok(())
            }
            Err(e) => {
                warn!(generation = %self.version, error = %e, "Activate failed");
                self.set_phase(Phase::Installed).await;
                Err(e)
            }
        }
    }

    async fn purge_stale(&self) -> Result<()> {
        let stale: Vec<String> = self
            .storage
            .keys()
            .await?
            .into_iter()
            .filter(|name| *name != self.version)
            .collect();

        let results = join_all(stale.iter().map(|name| self.storage.delete(name))).await;

        let mut failed = Vec::new();
        for (name, result) in stale.into_iter().zip(results) {
            match result {
                Ok(true) => debug!(generation = %name, "Deleted stale generation"),
                Ok(false) => debug!(generation = %name, "Stale generation already gone"),
                Err(e) => {
                    warn!(generation = %name, error = %e, "Failed to delete stale generation");
                    failed.push(name);
                }
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(OfflineError::ActivateFailed { generations: failed })
        }
    }

    // ===== Fetch =====

    /// Resolve a request: cache, then network, then the cached root document.
    pub async fn fetch(&self, request: FetchRequest) -> Result<FetchOutcome> {
        match self.storage.match_any(&request).await {
            Ok(Some(response)) => {
                debug!(url = %request.url, "Cache hit");
                return Ok(FetchOutcome {
                    response,
                    source: FetchSource::Cache,
                });
            }
            Ok(None) => {}
            Err(e) => warn!(url = %request.url, error = %e, "Cache lookup failed, treating as miss"),
        }

        match self.network.fetch(&request).await {
            Ok(response) => {
                if request.is_get() && response.is_cacheable() {
                    self.store_in_background(request, response.clone()).await;
                } else {
                    debug!(
                        url = %request.url,
                        status = response.status,
                        kind = ?response.kind,
                        "Response not cacheable"
                    );
                }
                Ok(FetchOutcome {
                    response,
                    source: FetchSource::Network,
                })
            }
            Err(e) => {
                warn!(url = %request.url, error = %e, "Network fetch failed, trying offline fallback");
                self.offline_fallback(e).await
            }
        }
    }

    async fn offline_fallback(&self, cause: OfflineError) -> Result<FetchOutcome> {
        let root = FetchRequest::for_path(&self.origin, ROOT_DOCUMENT)?;
        let cached = match self.storage.match_any(&root).await {
            Ok(cached) => Ok(cached),
            Err(e) => {
                // A damaged stale generation must not hide the current one.
                warn!(error = %e, "Offline fallback search failed, trying current generation");
                self.lookup_current(&root).await
            }
        };

        match cached {
            Ok(Some(response)) => Ok(FetchOutcome {
                response,
                source: FetchSource::OfflineFallback,
            }),
            Ok(None) => Err(OfflineError::Network(format!(
                "{} (no cached {} to fall back to)",
                cause, ROOT_DOCUMENT
            ))),
            Err(e) => {
                warn!(error = %e, "Offline fallback lookup failed");
                Err(OfflineError::Network(cause.to_string()))
            }
        }
    }

    /// Look in the current generation only, without creating it.
    async fn lookup_current(&self, request: &FetchRequest) -> Result<Option<Response>> {
        if !self.storage.keys().await?.contains(&self.version) {
            return Ok(None);
        }
        self.storage.open(&self.version).await?.lookup(request).await
    }

    /// Copy a response into the current generation without blocking the caller.
    async fn store_in_background(&self, request: FetchRequest, response: Response) {
        let storage = Arc::clone(&self.storage);
        let version = self.version.clone();

        let mut pending = self.pending_writes.lock().await;
        // Reap finished writes.
        while pending.try_join_next().is_some() {}

        pending.spawn(async move {
            let result: Result<()> = async {
                let generation = storage.open(&version).await?;
                generation.put(&request, response).await
            }
            .await;

            match result {
                Ok(()) => debug!(url = %request.url, generation = %version, "Cached network response"),
                Err(e) => warn!(url = %request.url, error = %e, "Failed to cache network response"),
            }
        });
    }

    /// Wait for every background cache write started so far.
    pub async fn wait_for_pending_writes(&self) {
        let mut pending = std::mem::take(&mut *self.pending_writes.lock().await);
        while let Some(result) = pending.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "Cache write task did not finish");
            }
        }
    }

    // ===== Lifecycle helpers =====

    async fn enter(&self, operation: &'static str, allowed: &[Phase], next: Phase) -> Result<()> {
        let mut phase = self.phase.lock().await;
        if !allowed.contains(&*phase) {
            return Err(OfflineError::Lifecycle {
                operation,
                phase: *phase,
            });
        }
        *phase = next;
        Ok(())
    }

    async fn set_phase(&self, next: Phase) {
        *self.phase.lock().await = next;
    }

    /// Signals are one-way; the lifecycle never waits on the host to read them.
    fn signal(&self, signal: HostSignal) {
        let Some(ref tx) = self.signals else {
            return;
        };
        match tx.try_send(signal) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(signal = ?signal, "Host signal channel full, dropping signal")
            }
            Err(TrySendError::Closed(_)) => {
                debug!(signal = ?signal, "Host signal receiver dropped")
            }
        }
    }
}
