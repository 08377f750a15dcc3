//! Install / activate / fetch against the in-memory and on-disk stores with a
//! scripted network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hydrate_core::cache::{Generation, RequestKey};
use hydrate_core::{
    AssetManifest, CacheStorage, DiskStorage, FetchRequest, FetchSource, HostSignal,
    MemoryStorage, Network, OfflineCacheManager, OfflineError, Phase, Response, ResponseKind,
    Result,
};
use reqwest::Url;
use tempfile::TempDir;
use tokio::sync::mpsc;

const ORIGIN: &str = "http://localhost:3000";

// ============================================================================
// Test doubles
// ============================================================================

/// Serves canned responses by path and counts every call.
struct ScriptedNetwork {
    routes: HashMap<String, Response>,
    online: AtomicBool,
    calls: AtomicUsize,
}

impl ScriptedNetwork {
    fn new() -> Self {
        Self {
            routes: HashMap::new(),
            online: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        }
    }

    fn route(mut self, path: &str, status: u16, kind: ResponseKind, body: &str) -> Self {
        let url = format!("{}{}", ORIGIN, path);
        self.routes.insert(
            path.to_string(),
            Response::new(url, status, kind, body.as_bytes().to_vec())
                .with_header("content-type", "text/plain"),
        );
        self
    }

    fn page(self, path: &str, body: &str) -> Self {
        self.route(path, 200, ResponseKind::Basic, body)
    }

    fn go_offline(&self) {
        self.online.store(false, Ordering::SeqCst);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Network for ScriptedNetwork {
    async fn fetch(&self, request: &FetchRequest) -> Result<Response> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.online.load(Ordering::SeqCst) {
            return Err(OfflineError::Network("connection refused".to_string()));
        }
        Ok(self
            .routes
            .get(request.url.path())
            .cloned()
            .unwrap_or_else(|| {
                Response::new(request.url.as_str(), 404, ResponseKind::Basic, b"not found".to_vec())
            }))
    }
}

/// Wraps a store and fails selected operations.
struct FaultyStorage {
    inner: MemoryStorage,
    undeletable: Vec<String>,
    fail_writes: bool,
}

struct FaultyGeneration {
    inner: Arc<dyn Generation>,
    fail_writes: bool,
}

#[async_trait]
impl Generation for FaultyGeneration {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn lookup(&self, request: &FetchRequest) -> Result<Option<Response>> {
        self.inner.lookup(request).await
    }

    async fn put(&self, request: &FetchRequest, response: Response) -> Result<()> {
        if self.fail_writes {
            return Err(OfflineError::Store("quota exceeded".to_string()));
        }
        self.inner.put(request, response).await
    }

    async fn put_all(&self, entries: Vec<(FetchRequest, Response)>) -> Result<()> {
        self.inner.put_all(entries).await
    }

    async fn keys(&self) -> Result<Vec<RequestKey>> {
        self.inner.keys().await
    }
}

#[async_trait]
impl CacheStorage for FaultyStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn Generation>> {
        let inner = self.inner.open(name).await?;
        Ok(Arc::new(FaultyGeneration {
            inner,
            fail_writes: self.fail_writes,
        }))
    }

    async fn keys(&self) -> Result<Vec<String>> {
        self.inner.keys().await
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        if self.undeletable.iter().any(|n| n == name) {
            return Err(OfflineError::Store(format!("{} is locked", name)));
        }
        self.inner.delete(name).await
    }

    async fn match_any(&self, request: &FetchRequest) -> Result<Option<Response>> {
        self.inner.match_any(request).await
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn origin() -> Url {
    Url::parse(ORIGIN).unwrap()
}

fn get(path: &str) -> FetchRequest {
    FetchRequest::for_path(&origin(), path).unwrap()
}

fn shell_network() -> ScriptedNetwork {
    ScriptedNetwork::new()
        .page("/", "<html>root</html>")
        .page("/index.html", "<html>index</html>")
}

fn manifest(entries: &[&str]) -> AssetManifest {
    AssetManifest::new(entries.iter().copied()).unwrap()
}

fn manager_with(
    version: &str,
    storage: Arc<dyn CacheStorage>,
    network: Arc<ScriptedNetwork>,
) -> OfflineCacheManager {
    OfflineCacheManager::new(version, origin(), storage, network)
}

async fn generation_paths(storage: &dyn CacheStorage, name: &str) -> Vec<String> {
    let generation = storage.open(name).await.unwrap();
    let mut paths: Vec<String> = generation
        .keys()
        .await
        .unwrap()
        .into_iter()
        .map(|key| Url::parse(&key.url).unwrap().path().to_string())
        .collect();
    paths.sort();
    paths
}

// ============================================================================
// Install
// ============================================================================

#[tokio::test]
async fn test_install_stores_every_manifest_entry() {
    let storage = Arc::new(MemoryStorage::new());
    let network = Arc::new(
        shell_network()
            .page("/manifest.json", "{}")
            .page("/static/js/main.a1.js", "console.log(1)"),
    );
    let entries = ["/", "/index.html", "/manifest.json", "/static/js/main.a1.js"];
    let manager = manager_with("v1", storage.clone(), network.clone());

    manager.install(&manifest(&entries)).await.unwrap();

    assert_eq!(manager.phase().await, Phase::Installed);
    assert_eq!(
        generation_paths(storage.as_ref(), "v1").await,
        vec!["/", "/index.html", "/manifest.json", "/static/js/main.a1.js"]
    );
    assert_eq!(network.calls(), entries.len());
}

#[tokio::test]
async fn test_install_is_all_or_nothing() {
    let storage = Arc::new(MemoryStorage::new());
    let network = Arc::new(shell_network());
    let manager = manager_with("v1", storage.clone(), network);

    let err = manager
        .install(&manifest(&["/", "/index.html", "/missing.css"]))
        .await
        .unwrap_err();

    match err {
        OfflineError::InstallFailed { generation, reason } => {
            assert_eq!(generation, "v1");
            assert!(reason.contains("/missing.css"));
            assert!(reason.contains("404"));
        }
        other => panic!("expected InstallFailed, got {other:?}"),
    }
    assert!(storage.keys().await.unwrap().is_empty());
    assert!(generation_paths(storage.as_ref(), "v1").await.is_empty());
    assert_eq!(manager.phase().await, Phase::Parsed);
    assert!(manager.activate().await.is_err());
}

#[tokio::test]
async fn test_install_can_be_retried_after_failure() {
    let storage = Arc::new(MemoryStorage::new());
    let network = Arc::new(shell_network());
    network.go_offline();
    let manager = manager_with("v1", storage.clone(), network.clone());
    assert!(manager.install(&manifest(&["/", "/index.html"])).await.is_err());

    network.online.store(true, Ordering::SeqCst);
    manager.install(&manifest(&["/", "/index.html"])).await.unwrap();
    assert_eq!(generation_paths(storage.as_ref(), "v1").await.len(), 2);
}

#[tokio::test]
async fn test_resumed_install_can_activate() {
    let storage = Arc::new(MemoryStorage::new());
    storage.open("v0").await.unwrap();
    let network = Arc::new(shell_network());
    let entries = manifest(&["/", "/index.html"]);
    manager_with("v1", storage.clone(), network.clone())
        .install(&entries)
        .await
        .unwrap();

    let manager = manager_with("v1", storage.clone(), network.clone());
    let calls = network.calls();
    manager.resume_installed(&entries).await.unwrap();
    assert_eq!(manager.phase().await, Phase::Installed);
    assert_eq!(network.calls(), calls);

    manager.activate().await.unwrap();
    assert_eq!(storage.keys().await.unwrap(), vec!["v1"]);
}

#[tokio::test]
async fn test_resume_rejects_partially_populated_generation() {
    let storage = Arc::new(MemoryStorage::new());
    let network = Arc::new(shell_network().page("/app.js", "app"));
    let manager = manager_with("v1", storage.clone(), network);
    manager.fetch(get("/app.js")).await.unwrap();
    manager.wait_for_pending_writes().await;

    let err = manager
        .resume_installed(&manifest(&["/", "/index.html"]))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("missing /, /index.html"));
    assert_eq!(manager.phase().await, Phase::Parsed);
    assert!(manager.activate().await.is_err());
}

// ============================================================================
// Activate
// ============================================================================

#[tokio::test]
async fn test_activate_leaves_only_current_generation() {
    let storage = Arc::new(MemoryStorage::new());
    for stale in ["v0", "hydrate-dial-cache-v0", "other"] {
        storage.open(stale).await.unwrap();
    }
    let manager = manager_with("v1", storage.clone(), Arc::new(shell_network()));

    manager.install(&manifest(&["/", "/index.html"])).await.unwrap();
    manager.activate().await.unwrap();

    assert_eq!(manager.phase().await, Phase::Activated);
    assert_eq!(storage.keys().await.unwrap(), vec!["v1"]);
}

#[tokio::test]
async fn test_activate_failure_reports_undeletable_and_removes_the_rest() {
    let faulty = Arc::new(FaultyStorage {
        inner: MemoryStorage::new(),
        undeletable: vec!["v0".to_string()],
        fail_writes: false,
    });
    faulty.open("v0").await.unwrap();
    faulty.open("old").await.unwrap();
    let manager = manager_with("v1", faulty.clone(), Arc::new(shell_network()));

    manager.install(&manifest(&["/", "/index.html"])).await.unwrap();
    let err = manager.activate().await.unwrap_err();

    match err {
        OfflineError::ActivateFailed { generations } => assert_eq!(generations, vec!["v0"]),
        other => panic!("expected ActivateFailed, got {other:?}"),
    }
    assert_eq!(faulty.keys().await.unwrap(), vec!["v0", "v1"]);
    assert_eq!(manager.phase().await, Phase::Installed);
}

#[tokio::test]
async fn test_host_signals_are_emitted_in_lifecycle_order() {
    let (tx, mut rx) = mpsc::channel(8);
    let manager = manager_with("v1", Arc::new(MemoryStorage::new()), Arc::new(shell_network()))
        .with_signals(tx);

    manager.install(&manifest(&["/", "/index.html"])).await.unwrap();
    manager.activate().await.unwrap();

    assert_eq!(rx.recv().await, Some(HostSignal::SkipWaiting));
    assert_eq!(rx.recv().await, Some(HostSignal::ClaimClients));
}

#[tokio::test]
async fn test_lifecycle_does_not_wait_on_unread_signal_channel() {
    let (tx, _rx) = mpsc::channel(1);
    let manager = manager_with("v1", Arc::new(MemoryStorage::new()), Arc::new(shell_network()))
        .with_signals(tx);

    manager.install(&manifest(&["/", "/index.html"])).await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), manager.activate())
        .await
        .expect("activate should not block on a full signal channel")
        .unwrap();

    assert_eq!(manager.phase().await, Phase::Activated);
}

// ============================================================================
// Fetch
// ============================================================================

#[tokio::test]
async fn test_cache_hit_never_touches_network() {
    let storage = Arc::new(MemoryStorage::new());
    let network = Arc::new(shell_network());
    let manager = manager_with("v1", storage, network.clone());
    manager.install(&manifest(&["/", "/index.html"])).await.unwrap();
    manager.activate().await.unwrap();
    let calls_after_install = network.calls();

    let outcome = manager.fetch(get("/index.html")).await.unwrap();

    assert_eq!(outcome.source, FetchSource::Cache);
    assert_eq!(outcome.response.body, b"<html>index</html>");
    assert_eq!(network.calls(), calls_after_install);
}

#[tokio::test]
async fn test_network_response_is_cached_byte_for_byte() {
    let storage = Arc::new(MemoryStorage::new());
    let network = Arc::new(shell_network().page("/static/css/main.c3.css", "body{}"));
    let manager = manager_with("v1", storage.clone(), network.clone());
    manager.install(&manifest(&["/index.html"])).await.unwrap();
    manager.activate().await.unwrap();

    let outcome = manager.fetch(get("/static/css/main.c3.css")).await.unwrap();
    assert_eq!(outcome.source, FetchSource::Network);
    manager.wait_for_pending_writes().await;

    let stored = storage
        .open("v1")
        .await
        .unwrap()
        .lookup(&get("/static/css/main.c3.css"))
        .await
        .unwrap()
        .expect("response should have been cached");
    assert_eq!(stored, outcome.response);

    let calls = network.calls();
    let again = manager.fetch(get("/static/css/main.c3.css")).await.unwrap();
    assert_eq!(again.source, FetchSource::Cache);
    assert_eq!(network.calls(), calls);
}

#[tokio::test]
async fn test_non_qualifying_responses_are_not_cached() {
    let storage = Arc::new(MemoryStorage::new());
    let network = Arc::new(
        shell_network()
            .route("/cdn.js", 200, ResponseKind::Cors, "cross")
            .route("/opaque.png", 0, ResponseKind::Opaque, "")
            .route("/partial.bin", 206, ResponseKind::Basic, "part")
            .route("/moved", 301, ResponseKind::OpaqueRedirect, ""),
    );
    let manager = manager_with("v1", storage.clone(), network);
    manager.install(&manifest(&["/index.html"])).await.unwrap();

    for path in ["/cdn.js", "/opaque.png", "/partial.bin", "/moved", "/nope"] {
        let outcome = manager.fetch(get(path)).await.unwrap();
        assert_eq!(outcome.source, FetchSource::Network, "{path}");
    }
    manager.wait_for_pending_writes().await;

    assert_eq!(generation_paths(storage.as_ref(), "v1").await, vec!["/index.html"]);
}

#[tokio::test]
async fn test_non_get_responses_are_not_cached() {
    let storage = Arc::new(MemoryStorage::new());
    let network = Arc::new(shell_network().page("/api/sync", "ok"));
    let manager = manager_with("v1", storage.clone(), network.clone());
    manager.install(&manifest(&["/index.html"])).await.unwrap();

    let post = FetchRequest::new("POST", origin().join("/api/sync").unwrap());
    let outcome = manager.fetch(post.clone()).await.unwrap();
    manager.wait_for_pending_writes().await;

    assert_eq!(outcome.source, FetchSource::Network);
    assert_eq!(outcome.response.body, b"ok");
    assert_eq!(generation_paths(storage.as_ref(), "v1").await, vec!["/index.html"]);

    let calls = network.calls();
    assert_eq!(manager.fetch(post).await.unwrap().source, FetchSource::Network);
    assert_eq!(network.calls(), calls + 1);
}

#[tokio::test]
async fn test_offline_miss_falls_back_to_root_document() {
    let storage = Arc::new(MemoryStorage::new());
    let network = Arc::new(shell_network());
    let manager = manager_with("v1", storage, network.clone());
    manager.install(&manifest(&["/", "/index.html"])).await.unwrap();
    manager.activate().await.unwrap();

    network.go_offline();
    let outcome = manager.fetch(get("/unknown.js")).await.unwrap();

    assert_eq!(outcome.source, FetchSource::OfflineFallback);
    assert_eq!(outcome.response.body, b"<html>index</html>");
}

#[tokio::test]
async fn test_offline_without_root_document_fails() {
    let storage = Arc::new(MemoryStorage::new());
    let network = Arc::new(shell_network());
    let manager = manager_with("v1", storage, network.clone());
    manager.install(&manifest(&["/"])).await.unwrap();

    network.go_offline();
    let err = manager.fetch(get("/unknown.js")).await.unwrap_err();
    assert!(err.is_network());
}

#[tokio::test]
async fn test_cache_write_failure_does_not_affect_response() {
    let faulty = Arc::new(FaultyStorage {
        inner: MemoryStorage::new(),
        undeletable: Vec::new(),
        fail_writes: true,
    });
    let network = Arc::new(shell_network().page("/app.js", "app"));
    let manager = manager_with("v1", faulty.clone(), network);
    manager.install(&manifest(&["/index.html"])).await.unwrap();

    let outcome = manager.fetch(get("/app.js")).await.unwrap();
    manager.wait_for_pending_writes().await;

    assert_eq!(outcome.source, FetchSource::Network);
    assert_eq!(outcome.response.body, b"app");
    assert!(faulty.match_any(&get("/app.js")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_concurrent_fetches_of_same_miss_leave_one_entry() {
    let storage = Arc::new(MemoryStorage::new());
    let network = Arc::new(shell_network().page("/shared.js", "shared"));
    let manager = Arc::new(manager_with("v1", storage.clone(), network));
    manager.install(&manifest(&["/index.html"])).await.unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.fetch(get("/shared.js")).await })
        })
        .collect();
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome.response.body, b"shared");
    }
    manager.wait_for_pending_writes().await;

    assert_eq!(
        generation_paths(storage.as_ref(), "v1").await,
        vec!["/index.html", "/shared.js"]
    );
}

// ============================================================================
// End to end
// ============================================================================

#[tokio::test]
async fn test_upgrade_from_v0_to_v1_then_go_offline() {
    let storage = Arc::new(MemoryStorage::new());
    let network = Arc::new(shell_network());

    let old = manager_with("v0", storage.clone(), network.clone());
    old.install(&manifest(&["/", "/index.html"])).await.unwrap();
    old.activate().await.unwrap();
    assert_eq!(storage.keys().await.unwrap(), vec!["v0"]);

    let manager = manager_with("v1", storage.clone(), network.clone());
    manager.install(&manifest(&["/", "/index.html"])).await.unwrap();
    assert_eq!(storage.keys().await.unwrap(), vec!["v0", "v1"]);
    manager.activate().await.unwrap();
    assert_eq!(storage.keys().await.unwrap(), vec!["v1"]);
    assert_eq!(
        generation_paths(storage.as_ref(), "v1").await,
        vec!["/", "/index.html"]
    );

    let calls = network.calls();
    let hit = manager.fetch(get("/index.html")).await.unwrap();
    assert_eq!(hit.source, FetchSource::Cache);
    assert_eq!(network.calls(), calls);

    network.go_offline();
    let fallback = manager.fetch(get("/unknown.js")).await.unwrap();
    assert_eq!(fallback.source, FetchSource::OfflineFallback);
    assert_eq!(fallback.response.body, b"<html>index</html>");
}

#[tokio::test]
async fn test_upgrade_on_disk_store_then_go_offline() {
    let dir = TempDir::new().unwrap();
    let network = Arc::new(shell_network());
    {
        let storage = Arc::new(DiskStorage::new(dir.path().to_path_buf()).unwrap());
        let old = manager_with("v0", storage, network.clone());
        old.install(&manifest(&["/", "/index.html"])).await.unwrap();
        old.activate().await.unwrap();
    }

    let storage = Arc::new(DiskStorage::new(dir.path().to_path_buf()).unwrap());
    assert_eq!(storage.keys().await.unwrap(), vec!["v0"]);
    let manager = manager_with("v1", storage.clone(), network.clone());
    manager.install(&manifest(&["/", "/index.html"])).await.unwrap();
    manager.activate().await.unwrap();

    assert_eq!(storage.keys().await.unwrap(), vec!["v1"]);
    assert!(!dir.path().join("v0.json").exists());
    assert_eq!(
        generation_paths(storage.as_ref(), "v1").await,
        vec!["/", "/index.html"]
    );

    let calls = network.calls();
    let hit = manager.fetch(get("/index.html")).await.unwrap();
    assert_eq!(hit.source, FetchSource::Cache);
    assert_eq!(hit.response.body, b"<html>index</html>");
    assert_eq!(network.calls(), calls);

    network.go_offline();
    let fallback = manager.fetch(get("/unknown.js")).await.unwrap();
    assert_eq!(fallback.source, FetchSource::OfflineFallback);
    assert_eq!(fallback.response.body, b"<html>index</html>");
}

#[tokio::test]
async fn test_network_response_persists_in_disk_store() {
    let dir = TempDir::new().unwrap();
    let network = Arc::new(shell_network().page("/static/js/main.a1.js", "console.log(1)"));
    {
        let storage = Arc::new(DiskStorage::new(dir.path().to_path_buf()).unwrap());
        let manager = manager_with("v1", storage, network.clone());
        manager.install(&manifest(&["/index.html"])).await.unwrap();
        let outcome = manager.fetch(get("/static/js/main.a1.js")).await.unwrap();
        assert_eq!(outcome.source, FetchSource::Network);
        manager.wait_for_pending_writes().await;
    }

    network.go_offline();
    let storage = Arc::new(DiskStorage::new(dir.path().to_path_buf()).unwrap());
    let manager = manager_with("v1", storage, network);
    let outcome = manager.fetch(get("/static/js/main.a1.js")).await.unwrap();
    assert_eq!(outcome.source, FetchSource::Cache);
    assert_eq!(outcome.response.body, b"console.log(1)");
}

#[tokio::test]
async fn test_corrupt_stale_generation_does_not_hide_fallback() {
    let dir = TempDir::new().unwrap();
    let storage = Arc::new(DiskStorage::new(dir.path().to_path_buf()).unwrap());
    storage.open("v0").await.unwrap();
    let network = Arc::new(shell_network());
    let manager = manager_with("v1", storage.clone(), network.clone());
    manager.install(&manifest(&["/", "/index.html"])).await.unwrap();

    std::fs::write(dir.path().join("v0.json"), "not json").unwrap();
    network.go_offline();

    let outcome = manager.fetch(get("/unknown.js")).await.unwrap();
    assert_eq!(outcome.source, FetchSource::OfflineFallback);
    assert_eq!(outcome.response.body, b"<html>index</html>");
}
