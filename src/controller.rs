//! The offline asset cache controller: lifecycle, interception policies,
//! and control messages.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use futures::{StreamExt, stream};
use serde::Serialize;

use crate::config::WorkerConfig;
use crate::error::{Error, Result};
use crate::fetch::AssetFetcher;
use crate::manifest::{AssetManifest, ManifestRecord};
use crate::stats::{CacheStats, StatsSnapshot};
use crate::store::{CacheStore, CachedResponse};
use crate::url::logical_key;

/// Partition populated during install, merged into content at activation.
pub const STAGING_PARTITION: &str = "staging";
/// Long-lived partition serving runtime requests.
pub const CONTENT_PARTITION: &str = "content";
/// Partition holding the single previously-installed manifest record.
pub const MANIFEST_PARTITION: &str = "manifest";

const MANIFEST_KEY: &str = "manifest";

/// Control message forcing immediate activation of a waiting instance.
pub const MSG_SKIP_WAITING: &str = "skipWaiting";
/// Control message triggering a full offline prefetch.
pub const MSG_DOWNLOAD_OFFLINE: &str = "downloadOffline";

/// Lifecycle phase of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Phase {
    /// Created but not yet installed.
    Idle = 0,
    /// Staging the core shell.
    Installing = 1,
    /// Reconciling the content partition with the new manifest.
    Activating = 2,
    /// Serving intercepted requests.
    Active = 3,
}

impl Phase {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Installing,
            2 => Self::Activating,
            3 => Self::Active,
            _ => Self::Idle,
        }
    }
}

/// Keeps a local cache synchronized with a declared manifest of versioned
/// assets and serves requests from cache with network fallback/refresh.
///
/// The controller is driven by its host: the host delivers lifecycle events
/// ([`install`](Self::install), [`activate`](Self::activate)), offers each
/// request via [`handle_fetch`](Self::handle_fetch), and forwards control
/// messages via [`handle_message`](Self::handle_message). Every call runs as
/// an independent task; the partitions tolerate interleaving because keys
/// are content-addressed by path.
pub struct CacheController {
    manifest: AssetManifest,
    origin: String,
    config: WorkerConfig,
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn AssetFetcher>,
    phase: AtomicU8,
    skip_waiting: AtomicBool,
    stats: CacheStats,
}

impl CacheController {
    /// Creates a controller for one build's manifest.
    ///
    /// `origin` is the origin requests are normalized against; it is injected
    /// here once rather than read from ambient state.
    #[must_use]
    pub fn new(
        manifest: AssetManifest,
        origin: impl Into<String>,
        config: WorkerConfig,
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn AssetFetcher>,
    ) -> Self {
        Self {
            manifest,
            origin: origin.into().trim_end_matches('/').to_string(),
            config,
            store,
            fetcher,
            phase: AtomicU8::new(Phase::Idle as u8),
            skip_waiting: AtomicBool::new(false),
            stats: CacheStats::new(),
        }
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Relaxed))
    }

    fn set_phase(&self, phase: Phase) {
        self.phase.store(phase as u8, Ordering::Relaxed);
    }

    /// Whether immediate activation has been requested. The host is expected
    /// to trigger the page reload that usually accompanies it.
    #[must_use]
    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::Relaxed)
    }

    /// Point-in-time serving counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// The manifest this controller serves.
    #[must_use]
    pub fn manifest(&self) -> &AssetManifest {
        &self.manifest
    }

    /// Install: stage every core shell asset into the staging partition.
    ///
    /// The shell is fetched with forced-reload semantics so it is always
    /// freshly retrieved, and install never blocks on a prior instance.
    ///
    /// # Errors
    ///
    /// Propagates the first fetch or store failure; staging is left as-is
    /// for the host to retry.
    pub async fn install(&self) -> Result<()> {
        self.set_phase(Phase::Installing);
        self.skip_waiting.store(true, Ordering::Relaxed);
        log::info!(
            "installing: staging {} core shell asset(s)",
            self.manifest.core().len()
        );

        stream::iter(self.manifest.core())
            .map(|key| async move {
                let response = self.fetcher.fetch_fresh(key).await?;
                self.stats.record_network_fetch();
                self.store.put(STAGING_PARTITION, key, response).await
            })
            .buffer_unordered(self.config.install_concurrency.max(1))
            .collect::<Vec<Result<()>>>()
            .await
            .into_iter()
            .collect::<Result<()>>()
    }

    /// Activate: reconcile the content partition with the new manifest and
    /// promote the staged shell.
    ///
    /// With no prior manifest record the content partition is rebuilt from
    /// staging alone. With a prior record, entries whose path is gone from
    /// the manifest or whose hash changed are evicted; unchanged entries are
    /// reused across versions.
    ///
    /// # Errors
    ///
    /// Any failure is fatal to cache integrity: all three partitions are
    /// deleted and [`Error::Activation`] is returned, forcing the next
    /// install to rebuild from scratch.
    pub async fn activate(&self) -> Result<()> {
        self.set_phase(Phase::Activating);
        match self.try_activate().await {
            Ok(()) => {
                self.set_phase(Phase::Active);
                log::info!("activated, claiming open clients");
                Ok(())
            }
            Err(e) => {
                log::error!("activation failed, discarding cache: {e}");
                let _ = self.store.delete_partition(CONTENT_PARTITION).await;
                let _ = self.store.delete_partition(STAGING_PARTITION).await;
                let _ = self.store.delete_partition(MANIFEST_PARTITION).await;
                Err(Error::Activation(Box::new(e)))
            }
        }
    }

    async fn try_activate(&self) -> Result<()> {
        match self.load_prior_record().await? {
            None => {
                // First install: whatever is in content predates this
                // controller and cannot be trusted.
                self.store.delete_partition(CONTENT_PARTITION).await?;
            }
            Some(prior) => {
                let mut evicted = 0u64;
                for key in self.store.keys(CONTENT_PARTITION).await? {
                    let stale = match self.manifest.hash(&key) {
                        None => true,
                        Some(current) => prior.hash(&key) != Some(current),
                    };
                    if stale {
                        self.store.delete(CONTENT_PARTITION, &key).await?;
                        evicted += 1;
                    }
                }
                if evicted > 0 {
                    self.stats.record_evictions(evicted);
                    log::info!("evicted {evicted} stale or removed cache entries");
                }
            }
        }

        // Promote the freshly staged shell, overwriting retained entries.
        for key in self.store.keys(STAGING_PARTITION).await? {
            if let Some(response) = self.store.get(STAGING_PARTITION, &key).await? {
                self.store.put(CONTENT_PARTITION, &key, response).await?;
            }
        }
        self.store.delete_partition(STAGING_PARTITION).await?;
        self.persist_record().await
    }

    async fn load_prior_record(&self) -> Result<Option<ManifestRecord>> {
        let Some(stored) = self.store.get(MANIFEST_PARTITION, MANIFEST_KEY).await? else {
            return Ok(None);
        };
        let record: ManifestRecord = serde_json::from_slice(&stored.body)?;
        Ok(Some(record))
    }

    async fn persist_record(&self) -> Result<()> {
        let record = self.manifest.to_record();
        let body = serde_json::to_vec(&record)?;
        let response = CachedResponse::ok(body).with_content_type("application/json");
        self.store.put(MANIFEST_PARTITION, MANIFEST_KEY, response).await
    }

    /// Offers a request to the controller.
    ///
    /// Returns `Ok(None)` when the request is declined — non-GET methods,
    /// cross-origin URLs, and paths outside the manifest all fall through to
    /// the host's default handling. The entry document `/` is served
    /// online-first; every other manifest path is served cache-first with
    /// lazy population.
    ///
    /// # Errors
    ///
    /// Network failures surface per policy: the entry document falls back to
    /// cache first, other paths propagate the failure directly.
    pub async fn handle_fetch(
        &self,
        method: &reqwest::Method,
        url: &str,
    ) -> Result<Option<CachedResponse>> {
        if method != reqwest::Method::GET {
            return Ok(None);
        }
        let Some(key) = logical_key(&self.origin, url) else {
            return Ok(None);
        };
        if !self.manifest.contains(&key) {
            return Ok(None);
        }
        if self.phase() != Phase::Active {
            log::debug!("fetch for {key:?} before activation completed");
        }

        let response = if key == "/" {
            self.online_first(&key).await?
        } else {
            self.cache_first(&key).await?
        };
        Ok(Some(response))
    }

    /// Online-first policy for the entry document: network, then cache, then
    /// the original failure.
    async fn online_first(&self, key: &str) -> Result<CachedResponse> {
        self.stats.record_network_fetch();
        match self.fetcher.fetch(key).await {
            Ok(response) => {
                // A completed exchange refreshes the cached copy.
                self.store.put(CONTENT_PARTITION, key, response.clone()).await?;
                Ok(response)
            }
            Err(network_error) => match self.store.get(CONTENT_PARTITION, key).await? {
                Some(cached) => {
                    self.stats.record_hit();
                    log::debug!("network unavailable, serving cached entry document");
                    Ok(cached)
                }
                None => {
                    self.stats.record_miss();
                    Err(network_error)
                }
            },
        }
    }

    /// Cache-first with lazy populate: cached copy if present, otherwise a
    /// network fetch whose successful response is stored before returning.
    async fn cache_first(&self, key: &str) -> Result<CachedResponse> {
        if let Some(cached) = self.store.get(CONTENT_PARTITION, key).await? {
            self.stats.record_hit();
            return Ok(cached);
        }
        self.stats.record_miss();
        self.stats.record_network_fetch();
        let response = self.fetcher.fetch(key).await?;
        if response.is_success() {
            self.store.put(CONTENT_PARTITION, key, response.clone()).await?;
        }
        Ok(response)
    }

    /// Handles an inbound control message. Unrecognized values are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the prefetch triggered by
    /// [`MSG_DOWNLOAD_OFFLINE`] cannot enumerate or write the content
    /// partition.
    pub async fn handle_message(&self, message: &str) -> Result<()> {
        match message {
            MSG_SKIP_WAITING => {
                self.skip_waiting.store(true, Ordering::Relaxed);
                log::info!("immediate activation requested");
                Ok(())
            }
            MSG_DOWNLOAD_OFFLINE => {
                let added = self.prefetch_missing().await?;
                log::info!("offline prefetch added {added} asset(s)");
                Ok(())
            }
            other => {
                log::debug!("ignoring unrecognized message {other:?}");
                Ok(())
            }
        }
    }

    /// Fetches and caches every manifest path not already present in the
    /// content partition. Returns the number of entries added.
    ///
    /// Individual fetch failures are logged and skipped so one unreachable
    /// asset does not abort the whole prefetch.
    ///
    /// # Errors
    ///
    /// Returns an error if the content partition cannot be read or written.
    pub async fn prefetch_missing(&self) -> Result<usize> {
        let cached: HashSet<String> =
            self.store.keys(CONTENT_PARTITION).await?.into_iter().collect();
        // Owned keys: the per-key futures outlive this iterator borrow.
        let missing: Vec<String> = self
            .manifest
            .paths()
            .filter(|path| !cached.contains(*path))
            .map(str::to_string)
            .collect();
        log::info!("prefetching {} missing asset(s)", missing.len());

        let results = stream::iter(missing)
            .map(|key| async move {
                self.stats.record_network_fetch();
                let response = self.fetcher.fetch(&key).await?;
                if !response.is_success() {
                    log::warn!("prefetch of {key:?} returned status {}", response.status);
                    return Ok(false);
                }
                self.store.put(CONTENT_PARTITION, &key, response).await?;
                Ok(true)
            })
            .buffer_unordered(self.config.prefetch_concurrency.max(1))
            .collect::<Vec<Result<bool>>>()
            .await;

        let mut added = 0;
        for result in results {
            match result {
                Ok(true) => added += 1,
                Ok(false) => {}
                Err(Error::Http(e)) => log::warn!("prefetch fetch failed: {e}"),
                Err(Error::Io(e)) => log::warn!("prefetch fetch failed: {e}"),
                Err(e) => return Err(e),
            }
        }
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use bytes::Bytes;
    use reqwest::Method;

    use crate::store::MemoryStore;

    const ORIGIN: &str = "http://localhost:5173";

    /// Fetcher backed by a fixed response map, with per-key failure
    /// injection and call counting.
    struct MockFetcher {
        responses: HashMap<String, CachedResponse>,
        offline: HashSet<String>,
        fetches: Mutex<HashMap<String, usize>>,
        fresh_fetches: Mutex<HashMap<String, usize>>,
    }

    impl MockFetcher {
        fn new(entries: &[(&str, &str)]) -> Self {
            let responses = entries
                .iter()
                .map(|(key, body)| ((*key).to_string(), CachedResponse::ok((*body).to_string())))
                .collect();
            Self {
                responses,
                offline: HashSet::new(),
                fetches: Mutex::new(HashMap::new()),
                fresh_fetches: Mutex::new(HashMap::new()),
            }
        }

        fn with_response(mut self, key: &str, response: CachedResponse) -> Self {
            self.responses.insert(key.to_string(), response);
            self
        }

        fn offline_for(mut self, key: &str) -> Self {
            self.offline.insert(key.to_string());
            self
        }

        fn fetch_count(&self, key: &str) -> usize {
            self.fetches.lock().unwrap().get(key).copied().unwrap_or(0)
        }

        fn fresh_fetch_count(&self, key: &str) -> usize {
            self.fresh_fetches.lock().unwrap().get(key).copied().unwrap_or(0)
        }

        fn lookup(&self, key: &str) -> Result<CachedResponse> {
            if self.offline.contains(key) {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "network unreachable",
                )));
            }
            self.responses.get(key).cloned().ok_or_else(|| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no asset {key}"),
                ))
            })
        }
    }

    #[async_trait]
    impl AssetFetcher for MockFetcher {
        async fn fetch(&self, key: &str) -> Result<CachedResponse> {
            *self.fetches.lock().unwrap().entry(key.to_string()).or_insert(0) += 1;
            self.lookup(key)
        }

        async fn fetch_fresh(&self, key: &str) -> Result<CachedResponse> {
            *self.fresh_fetches.lock().unwrap().entry(key.to_string()).or_insert(0) += 1;
            self.lookup(key)
        }
    }

    fn manifest(entries: &[(&str, &str)], core: &[&str]) -> AssetManifest {
        let resources: BTreeMap<String, String> = entries
            .iter()
            .map(|(path, hash)| ((*path).to_string(), (*hash).to_string()))
            .collect();
        let core = core.iter().map(|p| (*p).to_string()).collect();
        AssetManifest::new(resources, core).unwrap()
    }

    fn controller(
        manifest: AssetManifest,
        store: Arc<MemoryStore>,
        fetcher: Arc<MockFetcher>,
    ) -> CacheController {
        CacheController::new(
            manifest,
            ORIGIN,
            WorkerConfig::default(),
            store,
            fetcher,
        )
    }

    async fn persist_prior(store: &MemoryStore, entries: &[(&str, &str)]) {
        let record = ManifestRecord {
            resources: entries
                .iter()
                .map(|(path, hash)| ((*path).to_string(), (*hash).to_string()))
                .collect(),
            installed_at: chrono::Utc::now(),
        };
        let body = serde_json::to_vec(&record).unwrap();
        store
            .put(MANIFEST_PARTITION, MANIFEST_KEY, CachedResponse::ok(body))
            .await
            .unwrap();
    }

    fn url(path: &str) -> String {
        format!("{ORIGIN}/{path}")
    }

    // ==================== Install ====================

    #[tokio::test]
    async fn install_stages_every_core_shell_path() {
        let store = Arc::new(MemoryStore::new());
        let fetcher = Arc::new(MockFetcher::new(&[("/", "index"), ("app.js", "js")]));
        let ctl = controller(
            manifest(&[("/", "h1"), ("app.js", "h2"), ("lazy.png", "h3")], &["/", "app.js"]),
            Arc::clone(&store),
            Arc::clone(&fetcher),
        );

        ctl.install().await.unwrap();

        let mut staged = store.keys(STAGING_PARTITION).await.unwrap();
        staged.sort();
        assert_eq!(staged, ["/", "app.js"]);
        assert!(store.keys(CONTENT_PARTITION).await.unwrap().is_empty());
        assert!(ctl.skip_waiting_requested());
    }

    #[tokio::test]
    async fn install_bypasses_http_caches() {
        let store = Arc::new(MemoryStore::new());
        let fetcher = Arc::new(MockFetcher::new(&[("/", "index")]));
        let ctl = controller(
            manifest(&[("/", "h1")], &["/"]),
            store,
            Arc::clone(&fetcher),
        );

        ctl.install().await.unwrap();

        assert_eq!(fetcher.fresh_fetch_count("/"), 1);
        assert_eq!(fetcher.fetch_count("/"), 0);
    }

    #[tokio::test]
    async fn install_failure_propagates() {
        let store = Arc::new(MemoryStore::new());
        let fetcher = Arc::new(MockFetcher::new(&[("/", "index")]).offline_for("app.js"));
        let ctl = controller(
            manifest(&[("/", "h1"), ("app.js", "h2")], &["/", "app.js"]),
            store,
            fetcher,
        );

        assert!(ctl.install().await.is_err());
    }

    // ==================== Activate ====================

    #[tokio::test]
    async fn first_activation_promotes_staging_wholesale() {
        let store = Arc::new(MemoryStore::new());
        // A pre-existing content entry from before this controller.
        store
            .put(CONTENT_PARTITION, "leftover.js", CachedResponse::ok("junk"))
            .await
            .unwrap();
        let fetcher = Arc::new(MockFetcher::new(&[("/", "index"), ("app.js", "js")]));
        let ctl = controller(
            manifest(&[("/", "h1"), ("app.js", "h2")], &["/", "app.js"]),
            Arc::clone(&store),
            fetcher,
        );

        ctl.install().await.unwrap();
        ctl.activate().await.unwrap();

        let mut content = store.keys(CONTENT_PARTITION).await.unwrap();
        content.sort();
        assert_eq!(content, ["/", "app.js"]);
        assert!(store.keys(STAGING_PARTITION).await.unwrap().is_empty());
        assert_eq!(ctl.phase(), Phase::Active);

        // The manifest partition now holds the current manifest.
        let stored = store.get(MANIFEST_PARTITION, MANIFEST_KEY).await.unwrap().unwrap();
        let record: ManifestRecord = serde_json::from_slice(&stored.body).unwrap();
        assert_eq!(record.hash("/"), Some("h1"));
        assert_eq!(record.hash("app.js"), Some("h2"));
    }

    #[tokio::test]
    async fn upgrade_retains_unchanged_and_evicts_stale() {
        let store = Arc::new(MemoryStore::new());
        // Prior deploy: "/" at h0, app.js at h2, old.js at h9.
        persist_prior(&store, &[("/", "h0"), ("app.js", "h2"), ("old.js", "h9")]).await;
        store.put(CONTENT_PARTITION, "/", CachedResponse::ok("old index")).await.unwrap();
        store.put(CONTENT_PARTITION, "app.js", CachedResponse::ok("old js")).await.unwrap();
        store.put(CONTENT_PARTITION, "old.js", CachedResponse::ok("gone")).await.unwrap();

        let fetcher = Arc::new(MockFetcher::new(&[("/", "new index")]));
        let ctl = controller(
            manifest(&[("/", "h1"), ("app.js", "h2")], &["/"]),
            Arc::clone(&store),
            Arc::clone(&fetcher),
        );

        ctl.install().await.unwrap();
        ctl.activate().await.unwrap();

        // app.js unchanged between manifests: the cached copy survives and
        // was never re-fetched.
        let app = store.get(CONTENT_PARTITION, "app.js").await.unwrap().unwrap();
        assert_eq!(app.body, Bytes::from("old js"));
        assert_eq!(fetcher.fetch_count("app.js") + fetcher.fresh_fetch_count("app.js"), 0);

        // old.js dropped from the manifest: evicted.
        assert!(store.get(CONTENT_PARTITION, "old.js").await.unwrap().is_none());

        // "/" changed hash: refreshed from staging.
        let index = store.get(CONTENT_PARTITION, "/").await.unwrap().unwrap();
        assert_eq!(index.body, Bytes::from("new index"));

        assert_eq!(ctl.stats().evictions, 2);
    }

    #[tokio::test]
    async fn upgrade_evicts_entry_missing_from_prior_record() {
        let store = Arc::new(MemoryStore::new());
        persist_prior(&store, &[("/", "h1")]).await;
        // Cached under a path the prior manifest never recorded.
        store
            .put(CONTENT_PARTITION, "app.js", CachedResponse::ok("unverified"))
            .await
            .unwrap();

        let fetcher = Arc::new(MockFetcher::new(&[("/", "index")]));
        let ctl = controller(
            manifest(&[("/", "h1"), ("app.js", "h2")], &["/"]),
            Arc::clone(&store),
            fetcher,
        );

        ctl.install().await.unwrap();
        ctl.activate().await.unwrap();

        assert!(store.get(CONTENT_PARTITION, "app.js").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn activation_failure_discards_all_partitions() {
        let store = Arc::new(MemoryStore::new());
        // A corrupt manifest record makes the whole sequence fail.
        store
            .put(MANIFEST_PARTITION, MANIFEST_KEY, CachedResponse::ok("{corrupt"))
            .await
            .unwrap();
        store.put(CONTENT_PARTITION, "app.js", CachedResponse::ok("js")).await.unwrap();

        let fetcher = Arc::new(MockFetcher::new(&[("/", "index")]));
        let ctl = controller(manifest(&[("/", "h1")], &["/"]), Arc::clone(&store), fetcher);

        ctl.install().await.unwrap();
        let err = ctl.activate().await.unwrap_err();
        assert!(matches!(err, Error::Activation(_)));

        assert!(store.keys(CONTENT_PARTITION).await.unwrap().is_empty());
        assert!(store.keys(STAGING_PARTITION).await.unwrap().is_empty());
        assert!(store.keys(MANIFEST_PARTITION).await.unwrap().is_empty());
    }

    // ==================== Fetch interception ====================

    async fn active_controller(
        entries: &[(&str, &str)],
        core: &[&str],
        fetcher: MockFetcher,
    ) -> (CacheController, Arc<MemoryStore>, Arc<MockFetcher>) {
        let store = Arc::new(MemoryStore::new());
        let fetcher = Arc::new(fetcher);
        let ctl = controller(
            manifest(entries, core),
            Arc::clone(&store),
            Arc::clone(&fetcher),
        );
        ctl.install().await.unwrap();
        ctl.activate().await.unwrap();
        (ctl, store, fetcher)
    }

    #[tokio::test]
    async fn entry_document_is_online_first() {
        let fetcher = MockFetcher::new(&[("/", "fresh index")]);
        let (ctl, store, fetcher) =
            active_controller(&[("/", "h1")], &[], fetcher).await;
        // Seed a stale cached copy.
        store.put(CONTENT_PARTITION, "/", CachedResponse::ok("stale index")).await.unwrap();

        let response = ctl.handle_fetch(&Method::GET, ORIGIN).await.unwrap().unwrap();
        assert_eq!(response.body, Bytes::from("fresh index"));
        assert_eq!(fetcher.fetch_count("/"), 1);

        // The cached copy was refreshed.
        let cached = store.get(CONTENT_PARTITION, "/").await.unwrap().unwrap();
        assert_eq!(cached.body, Bytes::from("fresh index"));
    }

    #[tokio::test]
    async fn entry_document_falls_back_to_cache_when_offline() {
        let fetcher = MockFetcher::new(&[]).offline_for("/");
        let (ctl, store, _) = active_controller(&[("/", "h1")], &[], fetcher).await;
        store.put(CONTENT_PARTITION, "/", CachedResponse::ok("cached index")).await.unwrap();

        let response = ctl.handle_fetch(&Method::GET, &format!("{ORIGIN}/")).await.unwrap().unwrap();
        assert_eq!(response.body, Bytes::from("cached index"));
    }

    #[tokio::test]
    async fn entry_document_offline_without_cache_propagates_failure() {
        let fetcher = MockFetcher::new(&[]).offline_for("/");
        let (ctl, _, _) = active_controller(&[("/", "h1")], &[], fetcher).await;

        let err = ctl.handle_fetch(&Method::GET, ORIGIN).await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[tokio::test]
    async fn deep_link_serves_entry_document() {
        let fetcher = MockFetcher::new(&[("/", "index")]);
        let (ctl, _, fetcher) = active_controller(&[("/", "h1")], &[], fetcher).await;

        let url = format!("{ORIGIN}/#/settings");
        let response = ctl.handle_fetch(&Method::GET, &url).await.unwrap().unwrap();
        assert_eq!(response.body, Bytes::from("index"));
        assert_eq!(fetcher.fetch_count("/"), 1);
    }

    #[tokio::test]
    async fn cached_asset_served_without_network() {
        let fetcher = MockFetcher::new(&[("app.js", "from network")]);
        let (ctl, store, fetcher) =
            active_controller(&[("/", "h1"), ("app.js", "h2")], &[], fetcher).await;
        store.put(CONTENT_PARTITION, "app.js", CachedResponse::ok("from cache")).await.unwrap();

        let response = ctl
            .handle_fetch(&Method::GET, &url("app.js"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.body, Bytes::from("from cache"));
        assert_eq!(fetcher.fetch_count("app.js"), 0);
        assert_eq!(ctl.stats().cache_hits, 1);
    }

    #[tokio::test]
    async fn missing_asset_lazily_populates_cache() {
        let fetcher = MockFetcher::new(&[("app.js", "js body")]);
        let (ctl, store, fetcher) =
            active_controller(&[("/", "h1"), ("app.js", "h2")], &[], fetcher).await;

        let first = ctl.handle_fetch(&Method::GET, &url("app.js")).await.unwrap().unwrap();
        assert_eq!(first.body, Bytes::from("js body"));
        let cached = store.get(CONTENT_PARTITION, "app.js").await.unwrap().unwrap();
        assert_eq!(cached.body, Bytes::from("js body"));

        // Second request is a pure cache hit.
        ctl.handle_fetch(&Method::GET, &url("app.js")).await.unwrap().unwrap();
        assert_eq!(fetcher.fetch_count("app.js"), 1);
    }

    #[tokio::test]
    async fn unsuccessful_response_is_returned_but_not_cached() {
        let fetcher = MockFetcher::new(&[])
            .with_response("app.js", CachedResponse::with_status(404, "not found"));
        let (ctl, store, _) =
            active_controller(&[("/", "h1"), ("app.js", "h2")], &[], fetcher).await;

        let response = ctl.handle_fetch(&Method::GET, &url("app.js")).await.unwrap().unwrap();
        assert_eq!(response.status, 404);
        assert!(store.get(CONTENT_PARTITION, "app.js").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn version_query_is_normalized_before_lookup() {
        let fetcher = MockFetcher::new(&[("app.js", "js")]);
        let (ctl, _, _) =
            active_controller(&[("/", "h1"), ("app.js", "h2")], &[], fetcher).await;

        let versioned = format!("{ORIGIN}/app.js?v=h2");
        let response = ctl.handle_fetch(&Method::GET, &versioned).await.unwrap();
        assert!(response.is_some());
    }

    #[tokio::test]
    async fn non_get_requests_are_declined() {
        let fetcher = MockFetcher::new(&[("/", "index")]);
        let (ctl, _, _) = active_controller(&[("/", "h1")], &[], fetcher).await;

        assert!(ctl.handle_fetch(&Method::POST, ORIGIN).await.unwrap().is_none());
        assert!(ctl.handle_fetch(&Method::HEAD, ORIGIN).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_paths_are_declined() {
        let fetcher = MockFetcher::new(&[("/", "index")]);
        let (ctl, _, fetcher) = active_controller(&[("/", "h1")], &[], fetcher).await;

        let declined = ctl.handle_fetch(&Method::GET, &url("api/data")).await.unwrap();
        assert!(declined.is_none());
        assert_eq!(fetcher.fetch_count("api/data"), 0);
    }

    #[tokio::test]
    async fn cross_origin_requests_are_declined() {
        let fetcher = MockFetcher::new(&[("/", "index")]);
        let (ctl, _, _) = active_controller(&[("/", "h1")], &[], fetcher).await;

        let declined = ctl
            .handle_fetch(&Method::GET, "https://cdn.example.com/app.js")
            .await
            .unwrap();
        assert!(declined.is_none());
    }

    // ==================== Messages ====================

    #[tokio::test]
    async fn download_offline_fills_every_missing_entry() {
        let fetcher = MockFetcher::new(&[
            ("/", "index"),
            ("app.js", "js"),
            ("assets/logo.png", "png"),
        ]);
        let (ctl, store, _) = active_controller(
            &[("/", "h1"), ("app.js", "h2"), ("assets/logo.png", "h3")],
            &["/"],
            fetcher,
        )
        .await;
        assert_eq!(store.keys(CONTENT_PARTITION).await.unwrap().len(), 1);

        ctl.handle_message(MSG_DOWNLOAD_OFFLINE).await.unwrap();

        let mut content = store.keys(CONTENT_PARTITION).await.unwrap();
        content.sort();
        assert_eq!(content, ["/", "app.js", "assets/logo.png"]);
    }

    #[tokio::test]
    async fn download_offline_runs_as_spawned_task() {
        // The prefetch future crosses a spawn boundary, as it does when a
        // message arrives through the hosting server.
        let fetcher = MockFetcher::new(&[("/", "index"), ("app.js", "js")]);
        let (ctl, store, _) =
            active_controller(&[("/", "h1"), ("app.js", "h2")], &["/"], fetcher).await;
        let ctl = Arc::new(ctl);

        let task = tokio::spawn({
            let ctl = Arc::clone(&ctl);
            async move { ctl.handle_message(MSG_DOWNLOAD_OFFLINE).await }
        });
        task.await.unwrap().unwrap();

        let mut content = store.keys(CONTENT_PARTITION).await.unwrap();
        content.sort();
        assert_eq!(content, ["/", "app.js"]);
    }

    #[tokio::test]
    async fn prefetch_skips_already_cached_entries() {
        let fetcher = MockFetcher::new(&[("/", "index"), ("app.js", "js")]);
        let (ctl, _, fetcher) =
            active_controller(&[("/", "h1"), ("app.js", "h2")], &["/"], fetcher).await;

        let added = ctl.prefetch_missing().await.unwrap();
        assert_eq!(added, 1);
        // "/" was staged during install and never re-fetched.
        assert_eq!(fetcher.fetch_count("/"), 0);
    }

    #[tokio::test]
    async fn prefetch_tolerates_individual_failures() {
        let fetcher =
            MockFetcher::new(&[("/", "index"), ("app.js", "js")]).offline_for("assets/logo.png");
        let (ctl, store, _) = active_controller(
            &[("/", "h1"), ("app.js", "h2"), ("assets/logo.png", "h3")],
            &["/"],
            fetcher,
        )
        .await;

        let added = ctl.prefetch_missing().await.unwrap();
        assert_eq!(added, 1);
        assert!(store.get(CONTENT_PARTITION, "app.js").await.unwrap().is_some());
        assert!(store.get(CONTENT_PARTITION, "assets/logo.png").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn skip_waiting_message_sets_flag() {
        let store = Arc::new(MemoryStore::new());
        let fetcher = Arc::new(MockFetcher::new(&[]));
        let ctl = controller(manifest(&[("/", "h1")], &[]), store, fetcher);
        assert!(!ctl.skip_waiting_requested());

        ctl.handle_message(MSG_SKIP_WAITING).await.unwrap();
        assert!(ctl.skip_waiting_requested());
    }

    #[tokio::test]
    async fn unrecognized_messages_are_ignored() {
        let fetcher = MockFetcher::new(&[("/", "index")]);
        let (ctl, _, fetcher) = active_controller(&[("/", "h1")], &[], fetcher).await;

        ctl.handle_message("purgeEverything").await.unwrap();
        ctl.handle_message("").await.unwrap();
        assert_eq!(fetcher.fetch_count("/"), 0);
    }

    // ==================== Phase ====================

    #[tokio::test]
    async fn lifecycle_phases_advance_in_order() {
        let store = Arc::new(MemoryStore::new());
        let fetcher = Arc::new(MockFetcher::new(&[("/", "index")]));
        let ctl = controller(manifest(&[("/", "h1")], &["/"]), store, fetcher);

        assert_eq!(ctl.phase(), Phase::Idle);
        ctl.install().await.unwrap();
        assert_eq!(ctl.phase(), Phase::Installing);
        ctl.activate().await.unwrap();
        assert_eq!(ctl.phase(), Phase::Active);
    }
}
